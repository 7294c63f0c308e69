use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use orderbridge_core::errors::BridgeError;
use orderbridge_core::events::InboundMessage;
use orderbridge_core::ids::SessionId;
use orderbridge_engine::{
    ApprovalOutcome, ApprovalPublisher, EventSource, EventSubscription, Translator,
};
use orderbridge_telemetry::{names, MetricsRecorder};

use crate::client::ClientRegistry;

/// A spawned approval publish. Runs to completion even if the session closes.
pub type PendingPublish = JoinHandle<Result<ApprovalOutcome, BridgeError>>;

struct Forwarder {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the live sessions: one change-event listener per session going
/// out, approval messages coming in.
pub struct SessionManager {
    registry: Arc<ClientRegistry>,
    events: EventSource,
    translator: Arc<Translator>,
    approvals: Arc<ApprovalPublisher>,
    metrics: Arc<MetricsRecorder>,
    forwarders: DashMap<SessionId, Forwarder>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ClientRegistry>,
        events: EventSource,
        translator: Arc<Translator>,
        approvals: Arc<ApprovalPublisher>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            registry,
            events,
            translator,
            approvals,
            metrics,
            forwarders: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.forwarders.len()
    }

    /// Open a session: register its send queue and attach a listener that
    /// forwards matching notifications to this session only. The listener is
    /// attached before returning, so every event emitted from here on is seen.
    pub fn on_connect(&self) -> (SessionId, mpsc::Receiver<String>) {
        let (session_id, rx) = self.registry.register();
        let subscription = self.events.subscribe();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(forward(
            session_id.clone(),
            subscription,
            Arc::clone(&self.translator),
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
            cancel.clone(),
        ));
        self.forwarders
            .insert(session_id.clone(), Forwarder { cancel, task });
        self.update_gauge();

        info!(
            session_id = %session_id,
            topic = self.events.topic(),
            listeners = self.events.listener_count(),
            "session opened"
        );
        (session_id, rx)
    }

    /// Decode one inbound frame. Approvals are handed to the publisher on
    /// their own task; anything unreadable is logged and dropped.
    pub fn on_message(
        &self,
        session_id: &SessionId,
        raw: &[u8],
    ) -> Result<Option<PendingPublish>, BridgeError> {
        let message = match InboundMessage::decode(raw) {
            Ok(m) => m,
            Err(e) => {
                self.metrics.counter_inc(names::MESSAGES_MALFORMED, &[], 1);
                warn!(session_id = %session_id, error = %e, "dropping malformed message");
                return Err(e);
            }
        };

        match message {
            InboundMessage::Other => {
                debug!(session_id = %session_id, "ignoring message without status");
                Ok(None)
            }
            InboundMessage::Approval(approval) => {
                debug!(
                    session_id = %session_id,
                    record_id = %approval.record_id,
                    status = %approval.status,
                    "decision received"
                );
                let publisher = Arc::clone(&self.approvals);
                Ok(Some(tokio::spawn(async move {
                    publisher.handle(&approval).await
                })))
            }
        }
    }

    /// Close a session. Its listener is detached by the time this returns;
    /// publishes it started keep running.
    pub async fn on_disconnect(&self, session_id: &SessionId) {
        self.registry.unregister(session_id);
        let Some((_, forwarder)) = self.forwarders.remove(session_id) else {
            return;
        };
        forwarder.cancel.cancel();
        if let Err(e) = forwarder.task.await {
            warn!(session_id = %session_id, error = %e, "forward task ended abnormally");
        }
        self.update_gauge();
        info!(
            session_id = %session_id,
            topic = self.events.topic(),
            listeners = self.events.listener_count(),
            "session closed"
        );
    }

    /// Close every open session.
    pub async fn close_all(&self) {
        let ids: Vec<SessionId> =
            self.forwarders.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.on_disconnect(&id).await;
        }
    }

    fn update_gauge(&self) {
        self.metrics
            .gauge_set(names::SESSIONS_ACTIVE, &[], self.forwarders.len() as f64);
    }
}

async fn forward(
    session_id: SessionId,
    mut subscription: EventSubscription,
    translator: Arc<Translator>,
    registry: Arc<ClientRegistry>,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(notification) = translator.translate(&event) else {
            continue;
        };
        if registry.send_to(&session_id, notification.to_json()) {
            metrics.counter_inc(names::NOTIFICATIONS_SENT, &[], 1);
            info!(
                session_id = %session_id,
                replay_id = event.replay_id.0,
                record_ids = ?notification.record_ids,
                "notification sent"
            );
        }
    }
    subscription.cancel();
}
