use std::sync::Arc;

use tracing::{debug, warn};

use orderbridge_core::backend::{CredentialProvider, RecordQuery};
use orderbridge_core::errors::BridgeError;
use orderbridge_core::records::{order_detail_soql, OrderDetail, RecordId};

/// Authenticated detail lookup for one order.
pub struct OrderQueryService {
    credentials: Arc<dyn CredentialProvider>,
    query: Arc<dyn RecordQuery>,
}

impl OrderQueryService {
    pub fn new(credentials: Arc<dyn CredentialProvider>, query: Arc<dyn RecordQuery>) -> Self {
        Self { credentials, query }
    }

    /// Fails with `InvalidRecordId` before any backend call, `NotFound` when
    /// nothing matches, and `QueryFailure` for every backend error,
    /// authentication included.
    pub async fn get_order_detail(&self, record_id: &str) -> Result<OrderDetail, BridgeError> {
        let record_id = RecordId::parse(record_id)?;

        let credential = self.credentials.authenticate().await.map_err(|e| {
            warn!(record_id = %record_id, error = %e, "authentication for order query failed");
            BridgeError::QueryFailure(e.to_string())
        })?;

        let soql = order_detail_soql(&record_id);
        debug!(record_id = %record_id, "querying order detail");
        let result = self
            .query
            .query(&soql, &credential)
            .await
            .map_err(|e| match e {
                BridgeError::NotFound(_) | BridgeError::QueryFailure(_) => e,
                other => BridgeError::QueryFailure(other.to_string()),
            })?;

        OrderDetail::first_of(&result, &record_id)
    }
}
