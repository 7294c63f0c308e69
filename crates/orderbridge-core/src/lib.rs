pub mod backend;
pub mod config;
pub mod errors;
pub mod events;
pub mod ids;
pub mod records;
pub mod security;

pub use errors::BridgeError;
