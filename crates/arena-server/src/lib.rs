pub mod identity;
pub mod server;
pub mod ws;

pub use server::{start, AppState, ServerConfig, ServerHandle};
