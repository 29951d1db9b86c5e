mod server;

pub use server::{DraftPolicy, ServerConfig};
