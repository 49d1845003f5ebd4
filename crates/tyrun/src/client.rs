//! # Client
//!
//! The calling side. A [`Client`] sends calls by path over a link (direct,
//! one payload per call, or batched through a [`Peer`]); a [`Bound`] wraps a
//! typed declaration so inputs and outputs are checked by the compiler.
//!
//! Each call is a small state machine: pending until its result arrives,
//! then settled as success or failure exactly once. Nothing is retried.

use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;
use tracing::debug_span;

use typack::Schema;
use tyrpc::CallError;
use tyrpc::CallId;
use tyrpc::ErrorCode;
use tyrpc::ProcedureRef;
use tyrpc::ResultPayload;
use tyrpc::encode_call;
use tyrpc::encode_single;
use tyrpc::parse_results;

use crate::config::ClientConfig;
use crate::peer::Peer;
use crate::transport::Transport;
use crate::transport::TransportError;

/// Why a call did not produce a value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The server, or a local precheck, answered with a classified failure.
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// The reply could not be read or did not match the request.
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("failed to encode input: {0}")]
    Encode(String),
    #[error("failed to decode output: {0}")]
    Decode(String),
    #[error("reply carried no result for call {0}")]
    MissingResult(CallId),
    #[error("call timed out")]
    Timeout,
    #[error("client link closed")]
    Closed,
}

impl ClientError {
    /// The taxonomy code this failure surfaces as.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Call(err) => err.code,
            Self::Transport(TransportError::Timeout) | Self::Timeout => ErrorCode::Timeout,
            Self::Transport(TransportError::PayloadTooLarge) => ErrorCode::PayloadTooLarge,
            Self::Transport(_) | Self::Closed => ErrorCode::ClientClosed,
            Self::Protocol(_) => ErrorCode::ParseError,
            Self::Encode(_) => ErrorCode::BadInput,
            Self::Decode(_) | Self::MissingResult(_) => ErrorCode::Internal,
        }
    }

    pub fn call_error(&self) -> Option<&CallError> {
        match self {
            Self::Call(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Clone)]
enum Link {
    Direct {
        transport: Arc<dyn Transport>,
        seq_gen: Arc<AtomicI64>,
        call_timeout: Duration,
    },
    Batched(Arc<Peer>),
}

#[derive(Clone)]
pub struct Client {
    link: Link,
}

impl Client {
    /// A client sending one payload per call.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::direct(transport, &ClientConfig::default())
    }

    pub fn direct(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            link: Link::Direct {
                transport,
                seq_gen: Arc::new(AtomicI64::new(1)),
                call_timeout: config.call_timeout,
            },
        }
    }

    /// A client coalescing concurrent calls into batches.
    ///
    /// Must be created inside a tokio runtime.
    pub fn batched(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            link: Link::Batched(Arc::new(Peer::new("client", transport, config))),
        }
    }

    /// Calls the procedure at `path` with a raw input.
    pub async fn call(&self, path: &str, input: Value) -> Result<Value> {
        match &self.link {
            Link::Direct {
                transport,
                seq_gen,
                call_timeout,
            } => {
                let id = CallId::Number(seq_gen.fetch_add(1, Ordering::Relaxed));
                let span = debug_span!("client_call", path = %path, id = %id);
                let round_trip = call_direct(transport.as_ref(), path, input, id);
                match tokio::time::timeout(*call_timeout, round_trip.instrument(span)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ClientError::Timeout),
                }
            }
            Link::Batched(peer) => peer.call(path, input).await,
        }
    }

    /// Calls a typed declaration.
    pub async fn query<In, Out>(&self, declaration: &ProcedureRef<In, Out>, input: &In) -> Result<Out>
    where
        In: Serialize,
        Out: DeserializeOwned,
    {
        let input = serde_json::to_value(input).map_err(|e| ClientError::Encode(e.to_string()))?;
        let output = self.call(declaration.path(), input).await?;
        serde_json::from_value(output).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Binds a typed declaration to this client.
    pub fn bind<In, Out>(&self, declaration: &ProcedureRef<In, Out>) -> Bound<In, Out> {
        Bound {
            client: self.clone(),
            declaration: *declaration,
            precheck: None,
        }
    }
}

async fn call_direct(transport: &dyn Transport, path: &str, input: Value, id: CallId) -> Result<Value> {
    let envelope = encode_call(path, input).with_id(id.clone());
    let bytes = encode_single(&envelope).map_err(|e| ClientError::Encode(e.to_string()))?;
    let reply = transport.call(&bytes).await?;

    match parse_results(&reply).map_err(|e| ClientError::Protocol(e.to_string()))? {
        ResultPayload::Single(envelope) if envelope.id.as_ref() == Some(&id) => {
            envelope.outcome.map_err(ClientError::Call)
        }
        // refused before the call was read
        ResultPayload::Single(envelope) if envelope.id.is_none() && !envelope.is_success() => {
            envelope.outcome.map_err(ClientError::Call)
        }
        ResultPayload::Single(envelope) => Err(ClientError::Protocol(format!(
            "id mismatch: expected {}, received {}",
            id,
            envelope.id.map(|id| id.to_string()).unwrap_or_else(|| "none".into())
        ))),
        ResultPayload::Batch(_) => Err(ClientError::Protocol("batch reply to a single call".into())),
    }
}

/// A typed declaration bound to a client.
///
/// ```ignore
/// const GET_BY_ID: ProcedureRef<String, User> = ProcedureRef::query("user.getById");
/// let user: User = client.bind(&GET_BY_ID).call(&"123".to_string()).await?;
/// ```
pub struct Bound<In, Out> {
    client: Client,
    declaration: ProcedureRef<In, Out>,
    precheck: Option<Arc<Schema>>,
}

impl<In, Out> Bound<In, Out>
where
    In: Serialize,
    Out: DeserializeOwned,
{
    /// Validates inputs locally before sending, failing with `BAD_INPUT`
    /// without a round trip. The server still validates.
    pub fn precheck(mut self, schema: impl Into<Schema>) -> Self {
        self.precheck = Some(Arc::new(schema.into()));
        self
    }

    pub fn path(&self) -> &'static str {
        self.declaration.path()
    }

    pub async fn call(&self, input: &In) -> Result<Out> {
        let raw = serde_json::to_value(input).map_err(|e| ClientError::Encode(e.to_string()))?;
        if let Some(schema) = &self.precheck {
            if let Err(err) = schema.validate(&raw) {
                let call_err = CallError::bad_input(err.to_string());
                return Err(ClientError::Call(match err.path() {
                    Some(path) => call_err.with_validation_path(path),
                    None => call_err,
                }));
            }
        }
        let output = self.client.call(self.declaration.path(), raw).await?;
        serde_json::from_value(output).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

impl<In, Out> Clone for Bound<In, Out> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            declaration: self.declaration,
            precheck: self.precheck.clone(),
        }
    }
}
