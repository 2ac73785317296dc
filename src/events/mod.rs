pub mod builder;

use serde::{Deserialize, Serialize};

pub const EVENT_STATUS_COMPLETED: &str = "COMPLETED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    pub data_element: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub event: String,
    pub occurred_at: String,
    pub completed_at: String,
    pub status: String,
    pub org_unit: String,
    pub data_values: Vec<DataValue>,
    pub program: String,
}

#[derive(Debug, Serialize)]
pub struct TrackerPayload<'a> {
    pub events: &'a [EventPayload],
}
