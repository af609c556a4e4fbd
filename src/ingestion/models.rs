//! Wire and in-memory types of the ingestion pipeline.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The subset of an SDK error event the pipeline reads. Unknown fields are kept
/// in `extra` so the full payload can be persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdkEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub fingerprint: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// SDKs send either a bare list or `{"values": [...]}`
    #[serde(default, deserialize_with = "exception_list")]
    pub exception: Vec<ExceptionRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SdkEvent {
    /// Client supplied occurrence time: RFC 3339 or fractional epoch seconds.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        match self.timestamp.as_ref()? {
            Value::String(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|at| at.with_timezone(&Utc)),
            Value::Number(number) => {
                let seconds = number.as_f64()?;
                let whole = seconds.trunc() as i64;
                let nanos = ((seconds - seconds.trunc()) * 1_000_000_000.0) as u32;
                Utc.timestamp_opt(whole, nanos).single()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stacktrace {
    #[serde(default)]
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn exception_list<'de, D>(deserializer: D) -> Result<Vec<ExceptionRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Shape {
        List(Vec<ExceptionRecord>),
        Wrapped {
            #[serde(default)]
            values: Vec<ExceptionRecord>,
        },
    }

    Ok(match Option::<Shape>::deserialize(deserializer)? {
        Some(Shape::List(values)) | Some(Shape::Wrapped { values }) => values,
        None => Vec::new(),
    })
}

/// Envelope carried on the aggregator's internal channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEventMessage {
    pub project_id: i32,
    pub event: SdkEvent,
}

/// Normalized view of one inbound event
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectEvent {
    pub project_id: i32,
    pub event_id: String,
    /// Hash of the normalized fingerprint
    pub fingerprint: String,
    pub raw_fingerprint: Value,
    pub trace: Value,
    pub raw_event: Value,
    /// Message of the first exception
    pub title: String,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// In-memory grouping key: one bucket per (project, fingerprint hash)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalEventKey {
    pub project_id: i32,
    pub hash: String,
}

/// One occurrence tagged with its grouping key, held until flushed
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedEvent {
    pub aggregation_key: GlobalEventKey,
    pub project_event: ProjectEvent,
}
