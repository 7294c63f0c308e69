//! Minimal Bayeux (CometD) long-polling client for the Streaming API.
//!
//! One client is one Bayeux session: `handshake`, `subscribe`, then repeated
//! `connect` polls that return whatever data messages arrived meanwhile. The
//! server pins the session with cookies, so each client owns its own
//! cookie-enabled `reqwest::Client`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use orderbridge_core::errors::{BridgeError, Operation};
use orderbridge_core::events::ReplayFrom;
use orderbridge_core::security::Credential;

use crate::http::{status_error, transport_error};

pub const META_HANDSHAKE: &str = "/meta/handshake";
pub const META_SUBSCRIBE: &str = "/meta/subscribe";
pub const META_CONNECT: &str = "/meta/connect";
pub const META_DISCONNECT: &str = "/meta/disconnect";

/// The server holds a `/meta/connect` open for up to 110 s.
pub const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(130);

/// `/meta/disconnect` is a courtesy; never wait a full poll window for it.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Advice {
    pub reconnect: Option<String>,
    pub interval: Option<u64>,
    pub timeout: Option<u64>,
}

/// One message of a Bayeux response array.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BayeuxMessage {
    pub channel: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub successful: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub advice: Option<Advice>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl BayeuxMessage {
    fn is_meta(&self) -> bool {
        self.channel.starts_with("/meta/")
    }

    fn failure(&self) -> String {
        self.error.clone().unwrap_or_else(|| "unsuccessful".into())
    }
}

#[derive(Clone)]
pub struct CometdClient {
    http: reqwest::Client,
    endpoint: String,
    bearer: String,
    client_id: Option<String>,
    next_id: u64,
}

impl CometdClient {
    pub fn new(credential: &Credential, api_version: &str) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(LONG_POLL_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::StreamConnectFailure(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/cometd/{}", credential.instance_url, api_version),
            bearer: credential.bearer(),
            client_id: None,
            next_id: 0,
        })
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    fn message_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    async fn exchange(&self, body: Value) -> Result<Vec<BayeuxMessage>, BridgeError> {
        self.exchange_within(body, LONG_POLL_TIMEOUT).await
    }

    async fn exchange_within(
        &self,
        body: Value,
        timeout: Duration,
    ) -> Result<Vec<BayeuxMessage>, BridgeError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, &self.bearer)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Operation::Stream, e, timeout))?;
        if !resp.status().is_success() {
            return Err(status_error(Operation::Stream, resp).await);
        }
        resp.json()
            .await
            .map_err(|e| {
                BridgeError::StreamInterrupted(format!("unreadable bayeux response: {e}"))
            })
    }

    fn reply<'a>(
        messages: &'a [BayeuxMessage],
        channel: &str,
    ) -> Result<&'a BayeuxMessage, BridgeError> {
        messages
            .iter()
            .find(|m| m.channel == channel)
            .ok_or_else(|| BridgeError::StreamInterrupted(format!("no {channel} reply")))
    }

    pub async fn handshake(&mut self) -> Result<(), BridgeError> {
        let id = self.message_id();
        let messages = self
            .exchange(json!([{
                "id": id,
                "channel": META_HANDSHAKE,
                "version": "1.0",
                "minimumVersion": "1.0",
                "supportedConnectionTypes": ["long-polling"],
            }]))
            .await?;
        let reply = Self::reply(&messages, META_HANDSHAKE)?;
        if reply.successful != Some(true) {
            let reason = reply.failure();
            // "401::Authentication invalid"
            if reason.starts_with("401") {
                return Err(BridgeError::AuthFailure(reason));
            }
            return Err(BridgeError::StreamConnectFailure(format!("handshake: {reason}")));
        }
        self.client_id = reply.client_id.clone();
        debug!(client_id = ?self.client_id, "bayeux handshake complete");
        Ok(())
    }

    pub async fn subscribe(&mut self, topic: &str, replay: ReplayFrom) -> Result<(), BridgeError> {
        let id = self.message_id();
        let messages = self
            .exchange(json!([{
                "id": id,
                "channel": META_SUBSCRIBE,
                "clientId": self.client_id,
                "subscription": topic,
                "ext": { "replay": { topic: replay.wire_value() } },
            }]))
            .await?;
        let reply = Self::reply(&messages, META_SUBSCRIBE)?;
        if reply.successful != Some(true) {
            return Err(BridgeError::StreamConnectFailure(format!(
                "subscribe {topic}: {}",
                reply.failure()
            )));
        }
        debug!(topic, replay = replay.wire_value(), "subscribed");
        Ok(())
    }

    /// One long poll. Returns the data messages delivered with it.
    pub async fn connect(&mut self) -> Result<Vec<BayeuxMessage>, BridgeError> {
        let id = self.message_id();
        let messages = self
            .exchange(json!([{
                "id": id,
                "channel": META_CONNECT,
                "clientId": self.client_id,
                "connectionType": "long-polling",
            }]))
            .await?;
        if let Some(reply) = messages.iter().find(|m| m.channel == META_CONNECT) {
            let must_rehandshake = reply
                .advice
                .as_ref()
                .and_then(|a| a.reconnect.as_deref())
                .is_some_and(|r| r == "handshake" || r == "none");
            if reply.successful != Some(true) || must_rehandshake {
                return Err(BridgeError::StreamInterrupted(format!(
                    "connect: {}",
                    reply.failure()
                )));
            }
        }
        Ok(messages.into_iter().filter(|m| !m.is_meta()).collect())
    }

    /// End the Bayeux session. Best effort: failures are logged, and the
    /// server expires abandoned sessions on its own. No-op before a handshake
    /// or after a previous disconnect.
    pub async fn disconnect(&mut self) {
        let Some(client_id) = self.client_id.take() else {
            return;
        };
        let id = self.message_id();
        let result = self
            .exchange_within(
                json!([{
                    "id": id,
                    "channel": META_DISCONNECT,
                    "clientId": client_id,
                }]),
                DISCONNECT_TIMEOUT,
            )
            .await;
        match result {
            Ok(_) => debug!(client_id = %client_id, "bayeux session closed"),
            Err(e) => debug!(client_id = %client_id, error = %e, "bayeux disconnect failed"),
        }
    }
}
