pub mod client;
pub mod orders;
pub mod server;
pub mod session;
pub mod ws;

pub use client::ClientRegistry;
pub use server::{build_router, start, AppState, BridgeServices, ServerConfig, ServerHandle};
pub use session::SessionManager;
