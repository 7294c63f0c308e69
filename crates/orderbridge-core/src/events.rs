use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::BridgeError;

/// Change-data-capture channel for order records.
pub const ORDER_CDC_TOPIC: &str = "/data/Order__ChangeEvent";
/// Platform event channel that receives manufacturing decisions.
pub const MANUFACTURING_EVENT_TOPIC: &str = "/event/Manufacturing_Event__e";

/// Order status values exchanged with the backend and the browser.
pub mod status {
    pub const SUBMITTED_TO_MANUFACTURING: &str = "Submitted to Manufacturing";
    pub const APPROVED_BY_MANUFACTURING: &str = "Approved by Manufacturing";
    /// Field on the order record that carries the status.
    pub const FIELD: &str = "Status__c";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Undelete,
    GapCreate,
    GapUpdate,
    GapDelete,
    GapUndelete,
    GapOverflow,
}

/// Opaque stream position. Only ever compared for resumption, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplayId(pub i64);

impl std::fmt::Display for ReplayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a (re)subscription starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayFrom {
    /// Only events published after subscribing.
    Tip,
    /// Everything still retained by the backend.
    Earliest,
    /// Events strictly after the given position.
    After(ReplayId),
}

impl ReplayFrom {
    /// Wire value understood by the backend's replay extension.
    pub fn wire_value(&self) -> i64 {
        match self {
            Self::Tip => -1,
            Self::Earliest => -2,
            Self::After(id) => id.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEventHeader {
    pub entity_name: String,
    pub change_type: ChangeType,
    pub record_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
}

/// A record mutation received from the change stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub header: ChangeEventHeader,
    pub fields: Map<String, Value>,
    pub replay_id: ReplayId,
}

impl ChangeEvent {
    /// Decode a change-event payload: a JSON object holding `ChangeEventHeader`
    /// next to the changed record fields.
    pub fn from_payload(payload: Value, replay_id: ReplayId) -> Result<Self, BridgeError> {
        let Value::Object(mut fields) = payload else {
            return Err(BridgeError::MessageDecode(
                "change event payload is not an object".into(),
            ));
        };
        let header = fields
            .remove("ChangeEventHeader")
            .ok_or_else(|| BridgeError::MessageDecode("missing ChangeEventHeader".into()))?;
        let header: ChangeEventHeader = serde_json::from_value(header)
            .map_err(|e| BridgeError::MessageDecode(format!("ChangeEventHeader: {e}")))?;
        if header.record_ids.is_empty() {
            return Err(BridgeError::MessageDecode("recordIds is empty".into()));
        }
        Ok(Self {
            header,
            fields,
            replay_id,
        })
    }

    pub fn entity_name(&self) -> &str {
        &self.header.entity_name
    }

    pub fn change_type(&self) -> ChangeType {
        self.header.change_type
    }

    pub fn record_ids(&self) -> &[String] {
        &self.header.record_ids
    }

    /// String value of a changed field, if present.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn status(&self) -> Option<&str> {
        self.field_str(status::FIELD)
    }
}

/// Session-facing payload, serialized as `{"recordIds": [...]}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub record_ids: Vec<String>,
}

impl Notification {
    pub fn to_json(&self) -> String {
        serde_json::json!({ "recordIds": self.record_ids }).to_string()
    }
}

/// Decision sent by a session, `{"recordId": "...", "status": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalMessage {
    pub record_id: String,
    pub status: String,
}

impl ApprovalMessage {
    pub fn is_approved(&self) -> bool {
        self.status == status::APPROVED_BY_MANUFACTURING
    }
}

/// Anything a session may send over the real-time channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundMessage {
    Approval(ApprovalMessage),
    /// A JSON object without a `status` (e.g. the client's greeting).
    Other,
}

impl InboundMessage {
    pub fn decode(raw: &[u8]) -> Result<Self, BridgeError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| BridgeError::MessageDecode(e.to_string()))?;
        let Value::Object(map) = &value else {
            return Err(BridgeError::MessageDecode("expected a JSON object".into()));
        };
        if !map.contains_key("status") {
            return Ok(Self::Other);
        }
        serde_json::from_value(value)
            .map(Self::Approval)
            .map_err(|e| BridgeError::MessageDecode(e.to_string()))
    }
}

/// Event published back to the backend's platform event channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "CreatedDate", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "CreatedById")]
    pub created_by: String,
    #[serde(rename = "Order_Id__c")]
    pub order_id: Option<String>,
    #[serde(rename = "Status__c")]
    pub status: Option<String>,
}

impl OutboundEvent {
    pub fn from_approval(message: &ApprovalMessage, created_by: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            created_by: created_by.into(),
            order_id: Some(message.record_id.clone()),
            status: Some(message.status.clone()),
        }
    }
}

/// Backend acknowledgement for a published event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub id: Option<String>,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_payload(change_type: &str, status: &str, ids: &[&str]) -> Value {
        json!({
            "ChangeEventHeader": {
                "entityName": "Order__c",
                "changeType": change_type,
                "recordIds": ids,
                "commitTimestamp": 1700000000000_i64,
                "changedFields": ["Status__c"]
            },
            "Status__c": status
        })
    }

    #[test]
    fn decode_update_payload() {
        let event = ChangeEvent::from_payload(
            order_payload("UPDATE", status::SUBMITTED_TO_MANUFACTURING, &["a001"]),
            ReplayId(42),
        )
        .unwrap();
        assert_eq!(event.entity_name(), "Order__c");
        assert_eq!(event.change_type(), ChangeType::Update);
        assert_eq!(event.record_ids(), ["a001".to_string()]);
        assert_eq!(event.status(), Some(status::SUBMITTED_TO_MANUFACTURING));
        assert_eq!(event.replay_id, ReplayId(42));
        assert!(!event.fields.contains_key("ChangeEventHeader"));
    }

    #[test]
    fn decode_gap_change_type() {
        let event =
            ChangeEvent::from_payload(order_payload("GAP_OVERFLOW", "x", &["a001"]), ReplayId(1))
                .unwrap();
        assert_eq!(event.change_type(), ChangeType::GapOverflow);
    }

    #[test]
    fn decode_rejects_missing_header() {
        let err = ChangeEvent::from_payload(json!({"Status__c": "x"}), ReplayId(1)).unwrap_err();
        assert!(matches!(err, BridgeError::MessageDecode(_)));
    }

    #[test]
    fn decode_rejects_empty_record_ids() {
        let err = ChangeEvent::from_payload(order_payload("UPDATE", "x", &[]), ReplayId(1))
            .unwrap_err();
        assert!(err.to_string().contains("recordIds"));
    }

    #[test]
    fn decode_rejects_unknown_change_type() {
        let err = ChangeEvent::from_payload(order_payload("UPSERT", "x", &["a001"]), ReplayId(1))
            .unwrap_err();
        assert!(matches!(err, BridgeError::MessageDecode(_)));
    }

    #[test]
    fn replay_from_wire_values() {
        assert_eq!(ReplayFrom::Tip.wire_value(), -1);
        assert_eq!(ReplayFrom::Earliest.wire_value(), -2);
        assert_eq!(ReplayFrom::After(ReplayId(991)).wire_value(), 991);
    }

    #[test]
    fn notification_wire_shape() {
        let n = Notification {
            record_ids: vec!["a001".into(), "a002".into()],
        };
        assert_eq!(n.to_json(), r#"{"recordIds":["a001","a002"]}"#);
    }

    #[test]
    fn inbound_approval_decodes() {
        let msg = InboundMessage::decode(
            br#"{"recordId":"a001","status":"Approved by Manufacturing"}"#,
        )
        .unwrap();
        let InboundMessage::Approval(approval) = msg else {
            panic!("expected approval, got {msg:?}");
        };
        assert_eq!(approval.record_id, "a001");
        assert!(approval.is_approved());
    }

    #[test]
    fn inbound_greeting_is_other() {
        let msg = InboundMessage::decode(br#"{"message": "Hello Server!"}"#).unwrap();
        assert_eq!(msg, InboundMessage::Other);
    }

    #[test]
    fn inbound_malformed_is_decode_error() {
        let cases: [&[u8]; 3] = [
            b"not json",
            b"[1,2]",
            br#"{"status":"Approved by Manufacturing"}"#,
        ];
        for raw in cases {
            let err = InboundMessage::decode(raw).unwrap_err();
            assert!(matches!(err, BridgeError::MessageDecode(_)), "raw: {raw:?}");
        }
    }

    #[test]
    fn rejected_status_is_not_approved() {
        let msg = ApprovalMessage {
            record_id: "a001".into(),
            status: "Rejected".into(),
        };
        assert!(!msg.is_approved());
    }

    #[test]
    fn outbound_event_wire_names() {
        let approval = ApprovalMessage {
            record_id: "a001".into(),
            status: status::APPROVED_BY_MANUFACTURING.into(),
        };
        let event = OutboundEvent::from_approval(&approval, "005xx0000012345");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["Order_Id__c"], "a001");
        assert_eq!(json["Status__c"], status::APPROVED_BY_MANUFACTURING);
        assert_eq!(json["CreatedById"], "005xx0000012345");
        assert!(json["CreatedDate"].is_i64());
    }
}
