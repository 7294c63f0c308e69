use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use orderbridge_core::errors::BridgeError;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct OrderParams {
    #[serde(rename = "recordId")]
    pub record_id: Option<String>,
}

/// HTTP view of a failed order lookup.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        let status = match &e {
            BridgeError::InvalidRecordId(_) => StatusCode::BAD_REQUEST,
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: e.error_kind(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.kind, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// `GET /api/orders?recordId=...` responds `{"records": [detail]}`.
pub async fn order_detail_handler(
    State(state): State<AppState>,
    Query(params): Query<OrderParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(record_id) = params.record_id.filter(|id| !id.trim().is_empty()) else {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            kind: "missing_record_id",
            message: "recordId query parameter is required".into(),
        });
    };

    match state.orders.get_order_detail(record_id.trim()).await {
        Ok(detail) => Ok(Json(json!({ "records": [detail] }))),
        Err(e) => {
            tracing::warn!(record_id = %record_id, error = %e, "order lookup failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let cases = [
            (BridgeError::InvalidRecordId("x".into()), StatusCode::BAD_REQUEST),
            (BridgeError::NotFound("a001".into()), StatusCode::NOT_FOUND),
            (BridgeError::QueryFailure("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (BridgeError::AuthFailure("bad".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn error_body_carries_kind() {
        let err = ApiError::from(BridgeError::NotFound("a001".into()));
        assert_eq!(err.kind, "not_found");
        assert!(err.message.contains("a001"));
    }
}
