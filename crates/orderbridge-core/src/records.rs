use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::BridgeError;

/// A backend record id that passed the format allow-list
/// (15 or 18 ASCII alphanumerics). Only validated ids are ever placed
/// in query text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

fn record_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]{15}(?:[A-Za-z0-9]{3})?$").expect("record id pattern is valid")
    })
}

impl RecordId {
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        if record_id_pattern().is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(BridgeError::InvalidRecordId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Detail query for one order with its line items.
pub fn order_detail_soql(record_id: &RecordId) -> String {
    format!(
        "SELECT Id, Name, Status__c, \
         (SELECT Id, Name, Product__r.Name, Price__c, Qty_L__c, Qty_M__c, Qty_S__c \
         FROM Order_Items__r) \
         FROM Order__c WHERE Id = '{}'",
        record_id.as_str()
    )
}

/// Raw query response, `{"totalSize": n, "done": true, "records": [...]}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default = "default_done")]
    pub done: bool,
    #[serde(default)]
    pub records: Vec<Value>,
}

fn default_done() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelatedName {
    #[serde(rename = "Name")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Product__r", default)]
    pub product: Option<RelatedName>,
    #[serde(rename = "Price__c", default)]
    pub price: Option<f64>,
    #[serde(rename = "Qty_L__c", default)]
    pub qty_l: Option<f64>,
    #[serde(rename = "Qty_M__c", default)]
    pub qty_m: Option<f64>,
    #[serde(rename = "Qty_S__c", default)]
    pub qty_s: Option<f64>,
}

/// Child relationship block returned by a sub-select.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedRecords<T> {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default = "default_done")]
    pub done: bool,
    pub records: Vec<T>,
}

/// One order with its line items, keyed by the backend's field names so it
/// can be handed to the page layer unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Status__c", default)]
    pub status: Option<String>,
    #[serde(rename = "Order_Items__r", default)]
    pub order_items: Option<RelatedRecords<OrderItem>>,
}

impl OrderDetail {
    /// First record of a query response, typed.
    pub fn first_of(result: &QueryResult, record_id: &RecordId) -> Result<Self, BridgeError> {
        let first = result
            .records
            .first()
            .ok_or_else(|| BridgeError::NotFound(record_id.to_string()))?;
        serde_json::from_value(first.clone())
            .map_err(|e| BridgeError::QueryFailure(format!("unexpected record shape: {e}")))
    }
}
