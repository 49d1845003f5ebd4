//! # Envelopes
//!
//! The two wire shapes of a procedure call.
//!
//! - Call: `{ "path": "user.getById", "input": "123", "id": 1 }`
//! - Result: `{ "id": 1, "result": {..} }` or `{ "id": 1, "error": { "code", "message" } }`
//!
//! ## Invariants
//! - `input` is omitted when null and reads back as null when absent, so an
//!   input-less call survives a round trip unchanged.
//! - A result envelope has exactly one of `result` and `error`.
//! - Ids keep their JSON type: `1` is echoed as `1`, never `"1"`.

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

use crate::error::CallError;

/// Correlates a call with its result inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for CallId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Wire representation of a single invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub path: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CallId>,
}

impl CallEnvelope {
    pub fn new(path: impl Into<String>, input: Value) -> Self {
        Self {
            path: path.into(),
            input,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<CallId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Wire representation of a call's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResult", into = "RawResult")]
pub struct ResultEnvelope {
    pub id: Option<CallId>,
    pub outcome: Result<Value, CallError>,
}

impl ResultEnvelope {
    pub fn success(id: Option<CallId>, value: Value) -> Self {
        Self { id, outcome: Ok(value) }
    }

    pub fn failure(id: Option<CallId>, error: CallError) -> Self {
        Self { id, outcome: Err(error) }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Field-level view of a result envelope. Both bodies are optional here and
/// the exactly-one rule is checked in `TryFrom`.
#[derive(Serialize, Deserialize)]
struct RawResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<CallId>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<CallError>,
}

/// Distinguishes `"result": null` (a null success) from a missing field.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawResult> for ResultEnvelope {
    type Error = String;

    fn try_from(raw: RawResult) -> std::result::Result<Self, Self::Error> {
        match (raw.result, raw.error) {
            (Some(value), None) => Ok(Self::success(raw.id, value)),
            (None, Some(error)) => Ok(Self::failure(raw.id, error)),
            (Some(_), Some(_)) => Err("result envelope has both `result` and `error`".into()),
            (None, None) => Err("result envelope has neither `result` nor `error`".into()),
        }
    }
}

impl From<ResultEnvelope> for RawResult {
    fn from(env: ResultEnvelope) -> Self {
        let (result, error) = match env.outcome {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        };
        Self { id: env.id, result, error }
    }
}
