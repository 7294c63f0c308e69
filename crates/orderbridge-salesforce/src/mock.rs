//! Test doubles for the four backend operations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use orderbridge_core::backend::{
    ChangeEventStream, ChangeStreamSource, CredentialProvider, EventPublisher, RecordQuery,
};
use orderbridge_core::errors::BridgeError;
use orderbridge_core::events::{
    status, ChangeEvent, ChangeEventHeader, ChangeType, OutboundEvent, PublishResult, ReplayFrom,
    ReplayId,
};
use orderbridge_core::records::QueryResult;
use orderbridge_core::security::Credential;

type StreamItem = Result<ChangeEvent, BridgeError>;

/// An `Order__c` change event with the given status.
pub fn order_change(
    change_type: ChangeType,
    order_status: &str,
    record_ids: &[&str],
    replay_id: i64,
) -> ChangeEvent {
    let mut fields = Map::new();
    fields.insert(status::FIELD.into(), Value::String(order_status.into()));
    ChangeEvent {
        header: ChangeEventHeader {
            entity_name: "Order__c".into(),
            change_type,
            record_ids: record_ids.iter().map(|s| s.to_string()).collect(),
            commit_timestamp: None,
            commit_user: None,
            changed_fields: vec![status::FIELD.into()],
        },
        fields,
        replay_id: ReplayId(replay_id),
    }
}

pub struct MockCredentials {
    result: Result<Credential, BridgeError>,
    calls: AtomicUsize,
}

impl MockCredentials {
    pub fn ok(token: &str, instance_url: impl Into<String>) -> Self {
        Self {
            result: Ok(Credential::new(token, instance_url)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: BridgeError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CredentialProvider for MockCredentials {
    async fn authenticate(&self) -> Result<Credential, BridgeError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.result.clone()
    }
}

/// Scripted outcome of one `open` call.
pub enum MockOpen {
    /// Yield the items, then end (or stay idle when `hold_open`).
    Events {
        items: Vec<StreamItem>,
        hold_open: bool,
    },
    /// `open` itself fails.
    Fail(BridgeError),
    /// Items pushed by the test through the paired sender; ends when it drops.
    Live(mpsc::UnboundedReceiver<StreamItem>),
}

impl MockOpen {
    pub fn events(items: Vec<StreamItem>) -> Self {
        Self::Events {
            items,
            hold_open: false,
        }
    }

    pub fn events_then_idle(items: Vec<StreamItem>) -> Self {
        Self::Events {
            items,
            hold_open: true,
        }
    }

    pub fn live() -> (Self, mpsc::UnboundedSender<StreamItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Live(rx), tx)
    }
}

/// Change stream that plays back `MockOpen`s in order. Once the script runs
/// out, further opens return a stream that never yields.
pub struct MockChangeStream {
    script: Mutex<VecDeque<MockOpen>>,
    opened: Mutex<Vec<(String, ReplayFrom)>>,
}

impl MockChangeStream {
    pub fn new(script: Vec<MockOpen>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Single live subscription driven by the returned sender.
    pub fn live() -> (Self, mpsc::UnboundedSender<StreamItem>) {
        let (open, tx) = MockOpen::live();
        (Self::new(vec![open]), tx)
    }

    /// Every `(topic, replay)` requested so far.
    pub fn opened(&self) -> Vec<(String, ReplayFrom)> {
        self.opened.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }
}

#[async_trait]
impl ChangeStreamSource for MockChangeStream {
    async fn open(
        &self,
        topic: &str,
        replay: ReplayFrom,
    ) -> Result<ChangeEventStream, BridgeError> {
        self.opened.lock().push((topic.to_string(), replay));
        let next = self.script.lock().pop_front();
        let events: ChangeEventStream = match next {
            Some(MockOpen::Events { items, hold_open }) => {
                let items = stream::iter(items);
                if hold_open {
                    Box::pin(items.chain(stream::pending::<StreamItem>()))
                } else {
                    Box::pin(items)
                }
            }
            Some(MockOpen::Fail(error)) => return Err(error),
            Some(MockOpen::Live(rx)) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => Box::pin(stream::pending::<StreamItem>()),
        };
        Ok(events)
    }
}

/// Publisher that records every event. Replies come from the configured
/// queue, falling back to success.
#[derive(Default)]
pub struct MockPublisher {
    replies: Mutex<VecDeque<Result<PublishResult, BridgeError>>>,
    published: Mutex<Vec<(String, OutboundEvent)>>,
    delay: Option<Duration>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: Vec<Result<PublishResult, BridgeError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn published(&self) -> Vec<(String, OutboundEvent)> {
        self.published.lock().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl EventPublisher for MockPublisher {
    async fn publish(
        &self,
        topic: &str,
        event: &OutboundEvent,
    ) -> Result<PublishResult, BridgeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().pop_front();
        let reply = reply.unwrap_or_else(|| {
            Ok(PublishResult {
                id: Some(format!("evt-{}", self.publish_count() + 1)),
                success: true,
            })
        });
        if reply.is_ok() {
            self.published.lock().push((topic.to_string(), event.clone()));
        }
        reply
    }
}

pub struct MockQuery {
    result: Result<QueryResult, BridgeError>,
    queries: Mutex<Vec<String>>,
}

impl MockQuery {
    pub fn returning(records: Vec<Value>) -> Self {
        Self {
            result: Ok(QueryResult {
                total_size: records.len() as u64,
                done: true,
                records,
            }),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: BridgeError) -> Self {
        Self {
            result: Err(error),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// SOQL text of every query run so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl RecordQuery for MockQuery {
    async fn query(
        &self,
        soql: &str,
        _credential: &Credential,
    ) -> Result<QueryResult, BridgeError> {
        self.queries.lock().push(soql.to_string());
        self.result.clone()
    }
}
