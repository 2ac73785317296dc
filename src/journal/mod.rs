pub mod schema;
pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub seq: i64,
    pub run_id: String,
    pub ts: String,
    pub event_type: String,
    pub source_uuid: Option<String>,
    pub event_uid: Option<String>,
    pub payload_json: Value,
    pub dedupe_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub source_uuid: Option<String>,
    pub event_uid: Option<String>,
    pub payload_json: Value,
    pub dedupe_key: Option<String>,
}

impl NewEvent {
    pub fn simple(event_type: &str, payload_json: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            source_uuid: None,
            event_uid: None,
            payload_json,
            dedupe_key: None,
        }
    }

    pub fn for_row(event_type: &str, source_uuid: &str, event_uid: &str, payload_json: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            source_uuid: Some(source_uuid.to_string()),
            event_uid: Some(event_uid.to_string()),
            payload_json,
            dedupe_key: Some(format!("{event_type}:{source_uuid}")),
        }
    }
}
