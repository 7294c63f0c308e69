//! Long-lived change stream subscription with reconnect supervision.
//!
//! The first open must succeed or the caller gets `StreamConnectFailure`.
//! After that a supervisor task owns the stream: decoded events fan out via
//! the [`EventSource`], malformed ones are logged and skipped, and a lost
//! stream is reopened with bounded backoff from the last replay id seen.
//!
//! Attempts accumulate across reopened streams: a stream that opens and dies
//! again without delivering anything does not earn a fresh budget. The count
//! resets once a stream delivers an event or stays up for [`STABLE_AFTER`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use orderbridge_core::backend::{ChangeEventStream, ChangeStreamSource};
use orderbridge_core::errors::BridgeError;
use orderbridge_core::events::{ReplayFrom, ReplayId};
use orderbridge_telemetry::{names, MetricsRecorder};

use crate::backoff::ReconnectPolicy;
use crate::event_source::{EventSource, EventSubscription, DEFAULT_CAPACITY};

/// A stream that stays open this long counts as healthy again.
pub const STABLE_AFTER: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamState {
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl StreamState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

pub struct ChangeStreamSubscriber {
    source: Arc<dyn ChangeStreamSource>,
    policy: ReconnectPolicy,
    metrics: Arc<MetricsRecorder>,
}

impl ChangeStreamSubscriber {
    pub fn new(source: Arc<dyn ChangeStreamSource>, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            policy,
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Open `topic` from the tip and hand the stream to a supervisor task.
    pub async fn connect(&self, topic: &str) -> Result<StreamHandle, BridgeError> {
        let stream = match self.source.open(topic, ReplayFrom::Tip).await {
            Ok(stream) => stream,
            Err(e @ BridgeError::StreamConnectFailure(_)) => return Err(e),
            Err(other) => return Err(BridgeError::StreamConnectFailure(other.to_string())),
        };
        info!(topic, "change stream connected");

        let events = EventSource::new(topic, DEFAULT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(StreamState::Connected);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor {
            source: self.source.clone(),
            topic: topic.to_string(),
            policy: self.policy.clone(),
            metrics: self.metrics.clone(),
            events: events.clone(),
            state: state_tx,
            cancel: cancel.clone(),
            last_replay: None,
            attempt: 0,
        };
        let task = tokio::spawn(supervisor.run(stream));

        Ok(StreamHandle {
            events,
            state: state_rx,
            cancel,
            task,
        })
    }
}

/// Owner's view of a running subscription.
pub struct StreamHandle {
    events: EventSource,
    state: watch::Receiver<StreamState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// The shared fan-out of decoded events.
    pub fn event_source(&self) -> EventSource {
        self.events.clone()
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    pub fn state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Resolves with the reason once the stream has given up.
    pub async fn failed(&self) -> String {
        let mut rx = self.state.clone();
        loop {
            if let StreamState::Failed { reason } = &*rx.borrow_and_update() {
                return reason.clone();
            }
            if rx.changed().await.is_err() {
                return "change stream supervisor stopped".into();
            }
        }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

struct Supervisor {
    source: Arc<dyn ChangeStreamSource>,
    topic: String,
    policy: ReconnectPolicy,
    metrics: Arc<MetricsRecorder>,
    events: EventSource,
    state: watch::Sender<StreamState>,
    cancel: CancellationToken,
    last_replay: Option<ReplayId>,
    /// Reconnect attempts since the last healthy stream.
    attempt: u32,
}

impl Supervisor {
    async fn run(mut self, mut stream: ChangeEventStream) {
        let cancel = self.cancel.clone();
        loop {
            let opened_at = Instant::now();
            let lost = tokio::select! {
                _ = cancel.cancelled() => return,
                lost = self.drain(&mut stream) => lost,
            };
            if opened_at.elapsed() >= STABLE_AFTER {
                self.attempt = 0;
            }
            warn!(
                topic = %self.topic,
                error = %lost,
                last_replay = ?self.last_replay,
                attempt = self.attempt,
                "change stream lost"
            );
            if matches!(lost, BridgeError::AuthFailure(_)) {
                self.fail(lost.to_string());
                return;
            }
            match self.reconnect().await {
                Some(next) => stream = next,
                None => return,
            }
        }
    }

    /// Forward events until the stream errors or ends.
    async fn drain(&mut self, stream: &mut ChangeEventStream) -> BridgeError {
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    self.attempt = 0;
                    self.last_replay = Some(event.replay_id);
                    self.metrics.counter_inc(names::EVENTS_RECEIVED, &[], 1);
                    debug!(
                        replay_id = %event.replay_id,
                        entity = event.entity_name(),
                        change_type = ?event.change_type(),
                        "change event received"
                    );
                    self.events.emit(event);
                }
                Err(BridgeError::MessageDecode(reason)) => {
                    self.metrics.counter_inc(names::EVENTS_MALFORMED, &[], 1);
                    warn!(
                        topic = %self.topic,
                        error = %reason,
                        "skipping malformed change event"
                    );
                }
                Err(e) => return e,
            }
        }
        BridgeError::StreamInterrupted("stream ended".into())
    }

    /// Reopen after the last seen replay id. `None` when cancelled or exhausted.
    /// A successful open still spends an attempt; only a healthy stream
    /// gives it back.
    async fn reconnect(&mut self) -> Option<ChangeEventStream> {
        let mut last_error = String::from("stream lost");
        while self.policy.allows(self.attempt) {
            let attempt = self.attempt;
            self.attempt += 1;
            self.state
                .send_replace(StreamState::Reconnecting { attempt: attempt + 1 });
            self.metrics.counter_inc(names::STREAM_RECONNECTS, &[], 1);
            let delay = self.policy.delay(attempt);
            debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "reconnecting change stream"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            let replay = self.last_replay.map_or(ReplayFrom::Tip, ReplayFrom::After);
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                opened = self.source.open(&self.topic, replay) => opened,
            };
            match opened {
                Ok(stream) => {
                    info!(
                        topic = %self.topic,
                        replay = replay.wire_value(),
                        attempt = attempt + 1,
                        "change stream resumed"
                    );
                    self.state.send_replace(StreamState::Connected);
                    return Some(stream);
                }
                Err(e @ BridgeError::AuthFailure(_)) => {
                    self.fail(e.to_string());
                    return None;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        self.fail(format!(
            "gave up after {} reconnect attempts: {last_error}",
            self.policy.max_attempts
        ));
        None
    }

    fn fail(&self, reason: String) {
        error!(topic = %self.topic, reason = %reason, "change stream failed");
        self.state.send_replace(StreamState::Failed { reason });
    }
}
