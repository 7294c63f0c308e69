use std::time::Duration;

use orderbridge_core::errors::{BridgeError, Operation};

/// Shared HTTP client for token, query and publish calls.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
}

/// REST base for a given org instance, `{instance}/services/data/v{version}`.
pub fn rest_base(instance_url: &str, api_version: &str) -> String {
    format!(
        "{}/services/data/v{}",
        instance_url.trim_end_matches('/'),
        api_version
    )
}

/// Map a transport-level failure (no HTTP status) onto the operation's error.
pub fn transport_error(
    operation: Operation,
    err: reqwest::Error,
    timeout: Duration,
) -> BridgeError {
    if err.is_timeout() && operation == Operation::Stream {
        return BridgeError::Timeout(timeout);
    }
    let detail = if err.is_timeout() {
        format!("timed out after {timeout:?}")
    } else {
        err.to_string()
    };
    match operation {
        Operation::Authenticate => BridgeError::AuthFailure(detail),
        Operation::Stream => BridgeError::StreamInterrupted(detail),
        Operation::Publish => BridgeError::PublishFailure(detail),
        Operation::Query => BridgeError::QueryFailure(detail),
    }
}

/// Consume a non-success response into a classified error.
pub async fn status_error(operation: Operation, resp: reqwest::Response) -> BridgeError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    BridgeError::from_status(operation, status, body)
}
