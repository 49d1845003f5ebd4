//! # Codec
//!
//! Moves calls and results between envelopes, raw parts and bytes.
//!
//! ## Invariants
//! - **Round trip**: `decode_call(&encode_call(p, i)) == (p, i)`, also through bytes.
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Batch isolation**: A malformed batch member becomes an `Invalid` item (or a
//!   failed result) in its own slot; its siblings are decoded normally.

use serde_json::Value;

use typack::json_kind;

use crate::envelope::CallEnvelope;
use crate::envelope::CallId;
use crate::envelope::ResultEnvelope;
use crate::error::CallError;
use crate::error::Result;
use crate::error::WireError;

/// Builds the envelope for a call. The id is left for the link to assign.
pub fn encode_call(path: &str, input: Value) -> CallEnvelope {
    CallEnvelope::new(path, input)
}

/// Splits an envelope back into its path and raw input.
pub fn decode_call(envelope: &CallEnvelope) -> (String, Value) {
    (envelope.path.clone(), envelope.input.clone())
}

pub fn encode_result(id: Option<CallId>, outcome: std::result::Result<Value, CallError>) -> ResultEnvelope {
    ResultEnvelope { id, outcome }
}

pub fn decode_result(envelope: ResultEnvelope) -> std::result::Result<Value, CallError> {
    envelope.outcome
}

/// One member of an inbound batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    Valid(CallEnvelope),
    /// Could not be read as a call. Answered in place with `error`.
    Invalid { id: Option<CallId>, error: CallError },
}

/// An inbound payload: one call or an ordered batch.
#[derive(Debug, Clone, PartialEq)]
pub enum CallPayload {
    Single(CallEnvelope),
    Batch(Vec<BatchItem>),
}

impl CallPayload {
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An outbound payload, shaped like the payload it answers.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    Single(ResultEnvelope),
    Batch(Vec<ResultEnvelope>),
}

impl ResultPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Single(env) => serde_json::to_vec(env)?,
            Self::Batch(envs) => serde_json::to_vec(envs)?,
        };
        Ok(bytes)
    }

    /// Flattens into envelopes in payload order.
    pub fn into_vec(self) -> Vec<ResultEnvelope> {
        match self {
            Self::Single(env) => vec![env],
            Self::Batch(envs) => envs,
        }
    }
}

pub fn encode_single(call: &CallEnvelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(call)?)
}

pub fn encode_batch(calls: &[CallEnvelope]) -> Result<Vec<u8>> {
    if calls.is_empty() {
        return Err(WireError::EmptyBatch);
    }
    Ok(serde_json::to_vec(calls)?)
}

/// Reads an inbound payload.
///
/// The first non-whitespace byte decides between a single call (`{`) and a
/// batch (`[`). An empty batch is an error; a batch with unreadable members
/// is not.
pub fn parse_calls(bytes: &[u8]) -> Result<CallPayload> {
    match first_byte(bytes)? {
        b'{' => {
            let value = parse_value(bytes)?;
            let env = decode_call_value(value)
                .map_err(|(id, reason)| WireError::InvalidEnvelope { id, reason })?;
            Ok(CallPayload::Single(env))
        }
        b'[' => {
            let items: Vec<Value> = serde_json::from_slice(bytes)
                .map_err(|e| WireError::Syntax(e.to_string()))?;
            if items.is_empty() {
                return Err(WireError::EmptyBatch);
            }

            let items = items
                .into_iter()
                .map(|item| match decode_call_value(item) {
                    Ok(env) => BatchItem::Valid(env),
                    Err((id, reason)) => BatchItem::Invalid {
                        id,
                        error: CallError::parse(format!("invalid envelope: {}", reason)),
                    },
                })
                .collect();
            Ok(CallPayload::Batch(items))
        }
        _ => Err(WireError::UnexpectedShape(json_kind(&parse_value(bytes)?))),
    }
}

/// Reads an outbound payload on the caller side.
///
/// A malformed member of a batch response becomes a `PARSE_ERROR` result in
/// its own slot, keeping its id when one is readable.
pub fn parse_results(bytes: &[u8]) -> Result<ResultPayload> {
    match first_byte(bytes)? {
        b'{' => {
            let value = parse_value(bytes)?;
            let env = decode_result_value(value)
                .map_err(|(id, reason)| WireError::InvalidEnvelope { id, reason })?;
            Ok(ResultPayload::Single(env))
        }
        b'[' => {
            let items: Vec<Value> = serde_json::from_slice(bytes)
                .map_err(|e| WireError::Syntax(e.to_string()))?;
            let envs = items
                .into_iter()
                .map(|item| {
                    decode_result_value(item).unwrap_or_else(|(id, reason)| {
                        ResultEnvelope::failure(id, CallError::parse(format!("invalid result: {}", reason)))
                    })
                })
                .collect();
            Ok(ResultPayload::Batch(envs))
        }
        _ => Err(WireError::UnexpectedShape(json_kind(&parse_value(bytes)?))),
    }
}

fn first_byte(bytes: &[u8]) -> Result<u8> {
    bytes
        .iter()
        .copied()
        .find(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| WireError::Syntax("empty input".into()))
}

fn parse_value(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| WireError::Syntax(e.to_string()))
}

fn read_id(value: &Value) -> Option<CallId> {
    value
        .get("id")
        .and_then(|id| serde_json::from_value(id.clone()).ok())
}

fn decode_call_value(value: Value) -> std::result::Result<CallEnvelope, (Option<CallId>, String)> {
    let id = read_id(&value);
    serde_json::from_value(value).map_err(|e| (id, e.to_string()))
}

fn decode_result_value(value: Value) -> std::result::Result<ResultEnvelope, (Option<CallId>, String)> {
    let id = read_id(&value);
    serde_json::from_value(value).map_err(|e| (id, e.to_string()))
}
