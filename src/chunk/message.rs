//! Log message parsing.
//!
//! Upstream payloads are JSON documents. The transformer pulls out the
//! identity, timestamp and dataset fields the index needs and keeps the
//! rest as the document body. A payload that is not a JSON object or is
//! missing `id`/`timestamp_ms` is counted as failed and dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub id: String,
    pub timestamp_ms: i64,
    /// Dataset this message belongs to, e.g. `api_log`.
    pub source: String,
    /// Remaining document fields.
    pub fields: Value,
}

impl LogMessage {
    pub fn from_json_bytes(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|err| Error::Index(format!("malformed message: {err}")))?;
        let Value::Object(mut doc) = value else {
            return Err(Error::Index("message is not a JSON object".to_string()));
        };

        let id = match doc.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => return Err(Error::Index("message has no id".to_string())),
        };
        let timestamp_ms = doc
            .remove("timestamp_ms")
            .and_then(|ts| ts.as_i64())
            .ok_or_else(|| Error::Index(format!("message {id} has no timestamp_ms")))?;
        let source = match doc.remove("source") {
            Some(Value::String(source)) => source,
            _ => String::new(),
        };

        Ok(Self {
            id,
            timestamp_ms,
            source,
            fields: Value::Object(doc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_full_document() {
        let payload =
            json!({"id": "m-1", "timestamp_ms": 1601546400000i64, "source": "api_log", "level": "warn"});
        let message = LogMessage::from_json_bytes(payload.to_string().as_bytes()).unwrap();
        assert_eq!(message.id, "m-1");
        assert_eq!(message.timestamp_ms, 1601546400000);
        assert_eq!(message.source, "api_log");
        assert_eq!(message.fields, json!({"level": "warn"}));
    }

    #[test]
    fn rejects_documents_missing_required_fields() {
        assert!(LogMessage::from_json_bytes(b"not json").is_err());
        assert!(LogMessage::from_json_bytes(b"[1, 2]").is_err());
        assert!(LogMessage::from_json_bytes(br#"{"timestamp_ms": 5}"#).is_err());
        assert!(LogMessage::from_json_bytes(br#"{"id": "m-1"}"#).is_err());
        assert!(LogMessage::from_json_bytes(br#"{"id": "", "timestamp_ms": 5}"#).is_err());
    }

    #[test]
    fn source_is_optional() {
        let message =
            LogMessage::from_json_bytes(br#"{"id": "m-1", "timestamp_ms": 5}"#).unwrap();
        assert_eq!(message.source, "");
    }
}
