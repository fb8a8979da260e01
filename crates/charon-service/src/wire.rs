//! The JSON-lines wire model spoken by the transport adapter.
//!
//! Requests arrive one JSON object per line; replies and signals leave the
//! same way. Data payloads restrict values to the closed variant set; byte
//! arrays travel as base64 strings under a `bytes` wrapper so the payload
//! stays valid JSON.

use std::collections::BTreeMap;

use charon::{DataMap, Variant};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A method call received from the transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum IncomingMessage {
    StartRequest {
        id: String,
        file_path: String,
        virtual_paths: Vec<String>,
    },
    CancelRequest {
        id: String,
    },
}

/// A reply or one-way signal sent to the transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// Reply to `start_request`.
    Started { id: String, ok: bool },
    Data {
        id: String,
        data: BTreeMap<String, Value>,
    },
    Completed { id: String },
    Error { id: String, message: String },
}

impl OutgoingMessage {
    pub fn data(id: &str, data: DataMap) -> Self {
        OutgoingMessage::Data {
            id: id.to_string(),
            data: data
                .into_iter()
                .map(|(key, value)| (key, wire_value(&value)))
                .collect(),
        }
    }

    /// The signal this message is delivered as.
    pub fn signal_name(&self) -> &'static str {
        match self {
            OutgoingMessage::Started { .. } => "started",
            OutgoingMessage::Data { .. } => "data",
            OutgoingMessage::Completed { .. } => "completed",
            OutgoingMessage::Error { .. } => "error",
        }
    }
}

/// Encodes a variant for the wire. Scalars map to their JSON counterparts;
/// byte arrays become `{"bytes": "<base64>"}`.
pub fn wire_value(value: &Variant) -> Value {
    match value {
        Variant::Null => Value::Null,
        Variant::Bool(value) => Value::Bool(*value),
        Variant::Int(value) => Value::from(*value),
        Variant::Float(value) => serde_json::Number::from_f64(*value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Variant::String(value) => Value::String(value.clone()),
        Variant::Bytes(bytes) => {
            serde_json::json!({ "bytes": base64::encode(bytes) })
        }
    }
}
