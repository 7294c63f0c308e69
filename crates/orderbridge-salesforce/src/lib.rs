//! Salesforce adapters for the bridge's backend operations.

pub mod auth;
pub mod cometd;
pub mod http;
pub mod mock;
pub mod publish;
pub mod query;
pub mod stream;

pub use auth::PasswordGrantAuthenticator;
pub use publish::RestEventPublisher;
pub use query::RestQueryClient;
pub use stream::CometdChangeStream;
