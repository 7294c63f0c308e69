use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use orderbridge_core::backend::{CredentialProvider, EventPublisher};
use orderbridge_core::errors::{BridgeError, Operation};
use orderbridge_core::events::{OutboundEvent, PublishResult};

use crate::http::{rest_base, status_error, transport_error};

/// Platform event object name behind an `/event/<Name>` channel.
pub fn event_object_name(topic: &str) -> Result<&str, BridgeError> {
    topic
        .strip_prefix("/event/")
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .ok_or_else(|| {
            BridgeError::PublishFailure(format!("not a platform event channel: {topic}"))
        })
}

/// Insert body. `CreatedDate`/`CreatedById` are stamped by the platform from
/// the authenticated principal, so only the custom fields are sent.
#[derive(Serialize)]
struct EventInsert<'a> {
    #[serde(rename = "Order_Id__c")]
    order_id: Option<&'a str>,
    #[serde(rename = "Status__c")]
    status: Option<&'a str>,
}

#[derive(Deserialize)]
struct InsertResponse {
    id: Option<String>,
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// Publishes platform events through the REST sObject endpoint.
pub struct RestEventPublisher {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    api_version: String,
    timeout: Duration,
}

impl RestEventPublisher {
    pub fn new(
        client: reqwest::Client,
        credentials: Arc<dyn CredentialProvider>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            credentials,
            api_version: api_version.into(),
            timeout,
        }
    }
}

#[async_trait]
impl EventPublisher for RestEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        event: &OutboundEvent,
    ) -> Result<PublishResult, BridgeError> {
        let object = event_object_name(topic)?;
        let credential = self
            .credentials
            .authenticate()
            .await
            .map_err(|e| BridgeError::PublishFailure(e.to_string()))?;
        let url = format!(
            "{}/sobjects/{}/",
            rest_base(&credential.instance_url, &self.api_version),
            object
        );

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .json(&EventInsert {
                order_id: event.order_id.as_deref(),
                status: event.status.as_deref(),
            })
            .send()
            .await
            .map_err(|e| transport_error(Operation::Publish, e, self.timeout))?;
        if !resp.status().is_success() {
            return Err(status_error(Operation::Publish, resp).await);
        }

        let body: InsertResponse = resp.json().await.map_err(|e| {
            BridgeError::PublishFailure(format!("unreadable insert response: {e}"))
        })?;
        if !body.success {
            return Err(BridgeError::PublishFailure(format!(
                "insert rejected: {}",
                serde_json::Value::Array(body.errors)
            )));
        }
        debug!(
            event_id = ?body.id,
            object,
            created_by = %event.created_by,
            "platform event published"
        );
        Ok(PublishResult {
            id: body.id,
            success: true,
        })
    }
}
