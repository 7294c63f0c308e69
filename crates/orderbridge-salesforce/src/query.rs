use std::time::Duration;

use async_trait::async_trait;

use orderbridge_core::backend::RecordQuery;
use orderbridge_core::errors::{BridgeError, Operation};
use orderbridge_core::records::QueryResult;
use orderbridge_core::security::Credential;

use crate::http::{rest_base, status_error, transport_error};

/// SOQL over the REST query endpoint.
pub struct RestQueryClient {
    client: reqwest::Client,
    api_version: String,
    timeout: Duration,
}

impl RestQueryClient {
    pub fn new(client: reqwest::Client, api_version: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_version: api_version.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RecordQuery for RestQueryClient {
    async fn query(&self, soql: &str, credential: &Credential) -> Result<QueryResult, BridgeError> {
        let url = format!("{}/query", rest_base(&credential.instance_url, &self.api_version));
        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .query(&[("q", soql)])
            .send()
            .await
            .map_err(|e| transport_error(Operation::Query, e, self.timeout))?;
        if !resp.status().is_success() {
            return Err(status_error(Operation::Query, resp).await);
        }
        resp.json()
            .await
            .map_err(|e| BridgeError::QueryFailure(format!("unreadable query response: {e}")))
    }
}
