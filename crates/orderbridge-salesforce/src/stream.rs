use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use tracing::{debug, info};

use orderbridge_core::backend::{ChangeEventStream, ChangeStreamSource, CredentialProvider};
use orderbridge_core::errors::BridgeError;
use orderbridge_core::events::{ChangeEvent, ReplayFrom, ReplayId};

use crate::cometd::{BayeuxMessage, CometdClient};

/// Decode a Streaming API data message: `data.payload` is the change event,
/// `data.event.replayId` its position.
pub fn decode_data_message(message: &BayeuxMessage) -> Result<ChangeEvent, BridgeError> {
    let data = message
        .data
        .as_ref()
        .ok_or_else(|| BridgeError::MessageDecode("data message without data".into()))?;
    let replay_id = data
        .pointer("/event/replayId")
        .and_then(Value::as_i64)
        .ok_or_else(|| BridgeError::MessageDecode("missing event.replayId".into()))?;
    let payload = data
        .get("payload")
        .cloned()
        .ok_or_else(|| BridgeError::MessageDecode("missing payload".into()))?;
    ChangeEvent::from_payload(payload, ReplayId(replay_id))
}

/// Change stream over the Streaming API. Each `open` authenticates, starts a
/// new Bayeux session and subscribes with the requested replay position.
pub struct CometdChangeStream {
    credentials: Arc<dyn CredentialProvider>,
    api_version: String,
}

impl CometdChangeStream {
    pub fn new(credentials: Arc<dyn CredentialProvider>, api_version: impl Into<String>) -> Self {
        Self {
            credentials,
            api_version: api_version.into(),
        }
    }
}

struct PollState {
    client: CometdClient,
    topic: String,
    pending: VecDeque<Result<ChangeEvent, BridgeError>>,
    finished: bool,
}

impl PollState {
    async fn next_item(mut self) -> Option<(Result<ChangeEvent, BridgeError>, Self)> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some((item, self));
            }
            if self.finished {
                return None;
            }
            match self.client.connect().await {
                Ok(messages) => {
                    for message in messages.iter().filter(|m| m.channel == self.topic) {
                        self.pending.push_back(decode_data_message(message));
                    }
                }
                Err(e) => {
                    self.finished = true;
                    self.client.disconnect().await;
                    return Some((Err(e), self));
                }
            }
        }
    }
}

impl Drop for PollState {
    /// A stream dropped mid-session (shutdown, reconnect) still says goodbye.
    fn drop(&mut self) {
        if self.client.client_id().is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut client = self.client.clone();
        runtime.spawn(async move { client.disconnect().await });
    }
}

#[async_trait]
impl ChangeStreamSource for CometdChangeStream {
    async fn open(
        &self,
        topic: &str,
        replay: ReplayFrom,
    ) -> Result<ChangeEventStream, BridgeError> {
        let credential = self.credentials.authenticate().await?;
        let mut client = CometdClient::new(&credential, &self.api_version)?;

        let opened = async {
            client.handshake().await?;
            client.subscribe(topic, replay).await
        }
        .await;
        if let Err(e) = opened {
            client.disconnect().await;
            return Err(match e {
                BridgeError::AuthFailure(_) | BridgeError::StreamConnectFailure(_) => e,
                other => BridgeError::StreamConnectFailure(other.to_string()),
            });
        }
        info!(topic, replay = replay.wire_value(), "change stream open");

        let state = PollState {
            client,
            topic: topic.to_string(),
            pending: VecDeque::new(),
            finished: false,
        };
        debug!(topic, "starting long poll");
        Ok(Box::pin(stream::unfold(state, PollState::next_item)))
    }
}
