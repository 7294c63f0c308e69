//! The four backend operations the bridge consumes.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::BridgeError;
use crate::events::{ChangeEvent, OutboundEvent, PublishResult, ReplayFrom};
use crate::records::QueryResult;
use crate::security::Credential;

/// Lazily produced change events. `Err(MessageDecode)` items are per-event and
/// the stream keeps going; any other error is the last item before the stream ends.
pub type ChangeEventStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, BridgeError>> + Send>>;

/// Obtains a fresh bearer credential. Every call is a new round trip.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authenticate(&self) -> Result<Credential, BridgeError>;
}

/// Opens a subscription on a change-data-capture channel.
#[async_trait]
pub trait ChangeStreamSource: Send + Sync {
    async fn open(
        &self,
        topic: &str,
        replay: ReplayFrom,
    ) -> Result<ChangeEventStream, BridgeError>;
}

/// Publishes application events to a platform event channel.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        event: &OutboundEvent,
    ) -> Result<PublishResult, BridgeError>;
}

/// Runs a read query with an already obtained credential.
#[async_trait]
pub trait RecordQuery: Send + Sync {
    async fn query(&self, soql: &str, credential: &Credential) -> Result<QueryResult, BridgeError>;
}
