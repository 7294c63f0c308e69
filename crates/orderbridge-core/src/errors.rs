use std::time::Duration;

/// Error taxonomy for every bridge operation.
///
/// Per-message and per-request failures (`MessageDecode`, `PublishFailure`,
/// `QueryFailure`, `NotFound`, `InvalidRecordId`) stay local to the caller.
/// `StreamConnectFailure` and `AuthFailure` on the stream path end the process.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("change stream connect failed: {0}")]
    StreamConnectFailure(String),
    #[error("change stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("malformed message: {0}")]
    MessageDecode(String),
    #[error("publish failed: {0}")]
    PublishFailure(String),
    #[error("query failed: {0}")]
    QueryFailure(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("invalid record id: {0:?}")]
    InvalidRecordId(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

/// Which backend operation produced an HTTP failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Authenticate,
    Stream,
    Publish,
    Query,
}

impl BridgeError {
    /// Errors after which reconnecting cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthFailure(_) | Self::StreamConnectFailure(_))
    }

    /// Transient failures worth another attempt on the stream path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StreamInterrupted(_) | Self::Timeout(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthFailure(_) => "auth_failure",
            Self::StreamConnectFailure(_) => "stream_connect_failure",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::MessageDecode(_) => "message_decode",
            Self::PublishFailure(_) => "publish_failure",
            Self::QueryFailure(_) => "query_failure",
            Self::NotFound(_) => "not_found",
            Self::InvalidRecordId(_) => "invalid_record_id",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify a non-success HTTP status for the given operation.
    pub fn from_status(operation: Operation, status: u16, body: String) -> Self {
        let detail = format!("status {status}: {body}");
        match (operation, status) {
            (_, 401) | (Operation::Authenticate, _) => Self::AuthFailure(detail),
            (Operation::Stream, 500..=599) => Self::StreamInterrupted(detail),
            (Operation::Stream, _) => Self::StreamConnectFailure(detail),
            (Operation::Publish, _) => Self::PublishFailure(detail),
            (Operation::Query, 404) => Self::NotFound(detail),
            (Operation::Query, _) => Self::QueryFailure(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(BridgeError::AuthFailure("bad secret".into()).is_fatal());
        assert!(BridgeError::StreamConnectFailure("refused".into()).is_fatal());
        assert!(!BridgeError::PublishFailure("rejected".into()).is_fatal());
        assert!(!BridgeError::MessageDecode("eof".into()).is_fatal());
    }

    #[test]
    fn retryable_classification() {
        assert!(BridgeError::StreamInterrupted("reset".into()).is_retryable());
        assert!(BridgeError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!BridgeError::AuthFailure("locked".into()).is_retryable());
        assert!(!BridgeError::QueryFailure("bad soql".into()).is_retryable());
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            BridgeError::from_status(Operation::Query, 401, "expired".into()),
            BridgeError::AuthFailure(_)
        ));
        assert!(matches!(
            BridgeError::from_status(Operation::Authenticate, 400, "invalid_grant".into()),
            BridgeError::AuthFailure(_)
        ));
        assert!(matches!(
            BridgeError::from_status(Operation::Stream, 503, "maintenance".into()),
            BridgeError::StreamInterrupted(_)
        ));
        assert!(matches!(
            BridgeError::from_status(Operation::Stream, 403, "no access".into()),
            BridgeError::StreamConnectFailure(_)
        ));
        assert!(matches!(
            BridgeError::from_status(Operation::Publish, 400, "bad field".into()),
            BridgeError::PublishFailure(_)
        ));
        assert!(matches!(
            BridgeError::from_status(Operation::Query, 404, "gone".into()),
            BridgeError::NotFound(_)
        ));
        assert!(matches!(
            BridgeError::from_status(Operation::Query, 500, "oops".into()),
            BridgeError::QueryFailure(_)
        ));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(BridgeError::MessageDecode("x".into()).error_kind(), "message_decode");
        assert_eq!(BridgeError::NotFound("a001".into()).error_kind(), "not_found");
        assert_eq!(
            BridgeError::Timeout(Duration::from_secs(1)).error_kind(),
            "timeout"
        );
    }

    #[test]
    fn display_includes_detail() {
        let err = BridgeError::from_status(Operation::Publish, 400, "INVALID_FIELD".into());
        assert_eq!(err.to_string(), "publish failed: status 400: INVALID_FIELD");
    }
}
