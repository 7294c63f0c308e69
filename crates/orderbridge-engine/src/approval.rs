use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use orderbridge_core::backend::EventPublisher;
use orderbridge_core::config::DEFAULT_DEDUP_WINDOW;
use orderbridge_core::errors::BridgeError;
use orderbridge_core::events::{
    ApprovalMessage, OutboundEvent, PublishResult, MANUFACTURING_EVENT_TOPIC,
};
use orderbridge_telemetry::{names, MetricsRecorder};

use crate::dedup::{idempotency_key, DedupCache, KeyLocks};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Published(PublishResult),
    /// Not an approval; nothing sent.
    Ignored,
    /// Same record and status already published within the dedup window.
    Duplicate,
}

/// Turns approved decisions into platform events.
pub struct ApprovalPublisher {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    created_by: String,
    dedup: DedupCache,
    in_flight: KeyLocks,
    metrics: Arc<MetricsRecorder>,
}

impl ApprovalPublisher {
    pub fn new(publisher: Arc<dyn EventPublisher>, created_by: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: MANUFACTURING_EVENT_TOPIC.to_string(),
            created_by: created_by.into(),
            dedup: DedupCache::new(DEFAULT_DEDUP_WINDOW),
            in_flight: KeyLocks::new(),
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup = DedupCache::new(window);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Publish iff the message approves, once per dedup window.
    ///
    /// Identical approvals are handled one at a time: a repeat that arrives
    /// while the first is still publishing waits for its outcome, and only
    /// becomes a `Duplicate` if that publish succeeded. A failed publish does
    /// not occupy the window.
    pub async fn handle(&self, message: &ApprovalMessage) -> Result<ApprovalOutcome, BridgeError> {
        if !message.is_approved() {
            debug!(
                record_id = %message.record_id,
                status = %message.status,
                "not an approval, ignoring"
            );
            return Ok(ApprovalOutcome::Ignored);
        }

        let key = idempotency_key(&message.record_id, &message.status);
        if self.dedup.window().is_zero() {
            return self.publish(message).await.map(ApprovalOutcome::Published);
        }

        let _in_flight = self.in_flight.lock(&key).await;
        if !self.dedup.first_seen(&key) {
            self.metrics.counter_inc(names::APPROVALS_DUPLICATE, &[], 1);
            info!(
                record_id = %message.record_id,
                idempotency_key = %key,
                "duplicate approval dropped"
            );
            return Ok(ApprovalOutcome::Duplicate);
        }

        match self.publish(message).await {
            Ok(result) => Ok(ApprovalOutcome::Published(result)),
            Err(e) => {
                self.dedup.forget(&key);
                Err(e)
            }
        }
    }

    /// Build the outbound event and publish it, no filtering.
    pub async fn publish(&self, message: &ApprovalMessage) -> Result<PublishResult, BridgeError> {
        let event = OutboundEvent::from_approval(message, &self.created_by);
        debug!(
            record_id = %message.record_id,
            created_by = %event.created_by,
            created_at = %event.created_at,
            topic = %self.topic,
            "publishing approval"
        );
        let started = Instant::now();
        let result = self
            .publisher
            .publish(&self.topic, &event)
            .await
            .map_err(|e| match e {
                BridgeError::PublishFailure(_) => e,
                other => BridgeError::PublishFailure(other.to_string()),
            });
        self.metrics.histogram_observe(
            names::PUBLISH_LATENCY_MS,
            &[],
            started.elapsed().as_secs_f64() * 1000.0,
        );

        match &result {
            Ok(r) => {
                self.metrics.counter_inc(names::APPROVALS_PUBLISHED, &[], 1);
                info!(
                    record_id = %message.record_id,
                    created_by = %event.created_by,
                    event_id = ?r.id,
                    "approval published"
                );
            }
            Err(e) => {
                self.metrics.counter_inc(names::APPROVALS_FAILED, &[], 1);
                warn!(
                    record_id = %message.record_id,
                    created_by = %event.created_by,
                    error = %e,
                    "approval publish failed"
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderbridge_core::events::status;
    use orderbridge_salesforce::mock::MockPublisher;

    fn approval(record_id: &str, status: &str) -> ApprovalMessage {
        ApprovalMessage {
            record_id: record_id.into(),
            status: status.into(),
        }
    }

    fn setup() -> (Arc<MockPublisher>, ApprovalPublisher, Arc<MetricsRecorder>) {
        let mock = Arc::new(MockPublisher::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let publisher = ApprovalPublisher::new(mock.clone(), "005xx0000012345")
            .with_metrics(metrics.clone());
        (mock, publisher, metrics)
    }

    #[tokio::test]
    async fn approval_publishes_exactly_one_event() {
        let (mock, publisher, metrics) = setup();
        let outcome = publisher
            .handle(&approval("a001", status::APPROVED_BY_MANUFACTURING))
            .await
            .unwrap();
        assert!(matches!(outcome, ApprovalOutcome::Published(ref r) if r.success));

        let published = mock.published();
        assert_eq!(published.len(), 1);
        let (topic, event) = &published[0];
        assert_eq!(topic, MANUFACTURING_EVENT_TOPIC);
        assert_eq!(event.order_id.as_deref(), Some("a001"));
        assert_eq!(event.status.as_deref(), Some(status::APPROVED_BY_MANUFACTURING));
        assert_eq!(event.created_by, "005xx0000012345");
        assert_eq!(metrics.counter_get(names::APPROVALS_PUBLISHED, &[]), 1);
        assert_eq!(metrics.histogram_summary(names::PUBLISH_LATENCY_MS, &[]).count, 1);
    }

    #[tokio::test]
    async fn rejection_publishes_nothing() {
        let (mock, publisher, _) = setup();
        let outcome = publisher.handle(&approval("a001", "Rejected")).await.unwrap();
        assert_eq!(outcome, ApprovalOutcome::Ignored);
        assert_eq!(mock.publish_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_within_window_dropped() {
        let (mock, publisher, metrics) = setup();
        let msg = approval("a001", status::APPROVED_BY_MANUFACTURING);
        publisher.handle(&msg).await.unwrap();
        assert_eq!(publisher.handle(&msg).await.unwrap(), ApprovalOutcome::Duplicate);
        assert_eq!(mock.publish_count(), 1);
        assert_eq!(metrics.counter_get(names::APPROVALS_DUPLICATE, &[]), 1);

        tokio::time::advance(DEFAULT_DEDUP_WINDOW + Duration::from_secs(1)).await;
        assert!(matches!(
            publisher.handle(&msg).await.unwrap(),
            ApprovalOutcome::Published(_)
        ));
        assert_eq!(mock.publish_count(), 2);
    }

    #[tokio::test]
    async fn distinct_records_are_not_duplicates() {
        let (mock, publisher, _) = setup();
        publisher
            .handle(&approval("a001", status::APPROVED_BY_MANUFACTURING))
            .await
            .unwrap();
        publisher
            .handle(&approval("a002", status::APPROVED_BY_MANUFACTURING))
            .await
            .unwrap();
        assert_eq!(mock.publish_count(), 2);
    }

    #[tokio::test]
    async fn disabled_window_publishes_every_time() {
        let mock = Arc::new(MockPublisher::new());
        let publisher =
            ApprovalPublisher::new(mock.clone(), "005").with_dedup_window(Duration::ZERO);
        let msg = approval("a001", status::APPROVED_BY_MANUFACTURING);
        publisher.handle(&msg).await.unwrap();
        publisher.handle(&msg).await.unwrap();
        assert_eq!(mock.publish_count(), 2);
    }

    #[tokio::test]
    async fn failure_is_reported_and_retry_allowed() {
        let mock = Arc::new(MockPublisher::with_replies(vec![Err(
            BridgeError::StreamInterrupted("connection reset".into()),
        )]));
        let metrics = Arc::new(MetricsRecorder::new());
        let publisher = ApprovalPublisher::new(mock.clone(), "005")
            .with_metrics(metrics.clone());
        let msg = approval("a001", status::APPROVED_BY_MANUFACTURING);

        let err = publisher.handle(&msg).await.unwrap_err();
        assert!(matches!(err, BridgeError::PublishFailure(_)), "got {err:?}");
        assert_eq!(metrics.counter_get(names::APPROVALS_FAILED, &[]), 1);

        assert!(matches!(
            publisher.handle(&msg).await.unwrap(),
            ApprovalOutcome::Published(_)
        ));
        assert_eq!(mock.publish_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_during_failed_publish_goes_through() {
        let mock = Arc::new(
            MockPublisher::with_replies(vec![Err(BridgeError::PublishFailure("boom".into()))])
                .with_delay(Duration::from_millis(50)),
        );
        let publisher = Arc::new(ApprovalPublisher::new(mock.clone(), "005"));
        let msg = approval("a001", status::APPROVED_BY_MANUFACTURING);

        let first = {
            let (publisher, msg) = (publisher.clone(), msg.clone());
            tokio::spawn(async move { publisher.handle(&msg).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = publisher.handle(&msg).await;

        assert!(matches!(
            first.await.unwrap(),
            Err(BridgeError::PublishFailure(_))
        ));
        assert!(matches!(second, Ok(ApprovalOutcome::Published(_))), "got {second:?}");
        assert_eq!(mock.publish_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_during_successful_publish_is_duplicate() {
        let mock = Arc::new(MockPublisher::new().with_delay(Duration::from_millis(50)));
        let publisher = Arc::new(ApprovalPublisher::new(mock.clone(), "005"));
        let msg = approval("a001", status::APPROVED_BY_MANUFACTURING);

        let first = {
            let (publisher, msg) = (publisher.clone(), msg.clone());
            tokio::spawn(async move { publisher.handle(&msg).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = publisher.handle(&msg).await.unwrap();

        assert!(matches!(
            first.await.unwrap().unwrap(),
            ApprovalOutcome::Published(_)
        ));
        assert_eq!(second, ApprovalOutcome::Duplicate);
        assert_eq!(mock.publish_count(), 1);
    }

    #[tokio::test]
    async fn custom_topic_is_used() {
        let mock = Arc::new(MockPublisher::new());
        let publisher = ApprovalPublisher::new(mock.clone(), "005")
            .with_topic("/event/Other__e");
        publisher
            .publish(&approval("a001", status::APPROVED_BY_MANUFACTURING))
            .await
            .unwrap();
        assert_eq!(mock.published()[0].0, "/event/Other__e");
    }
}
