mod inputs;
mod models;
mod status;

pub use inputs::*;
pub use models::*;
pub use status::*;
