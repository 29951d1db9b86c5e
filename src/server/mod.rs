mod actor;
mod documents;
mod drafts;
pub mod dto;
mod json;
mod request_id;
pub mod response;
mod router;
mod templates;

pub use actor::{ACTOR_HEADER, Actor};
pub use json::ApiJson;
pub use request_id::REQUEST_ID_HEADER;
pub use router::{AppState, create_router};
