//! # Server
//!
//! Answers call payloads against a [`Router`].
//!
//! ## Invariants
//! - **One result per call**: a batch of `n` calls is answered with exactly
//!   `n` results in request order, each carrying its call's id.
//! - **Sibling isolation**: batch members run concurrently and independently;
//!   one member failing, panicking or timing out leaves the others untouched.
//! - **No bytes unanswered**: any payload, however broken, gets a reply.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tracing::Instrument;
use tracing::debug;
use tracing::error;
use tracing::info_span;
use tracing::warn;

use tyrpc::BatchItem;
use tyrpc::CallEnvelope;
use tyrpc::CallError;
use tyrpc::CallId;
use tyrpc::CallPayload;
use tyrpc::ErrorCode;
use tyrpc::ResultEnvelope;
use tyrpc::ResultPayload;
use tyrpc::WireError;
use tyrpc::parse_calls;

use crate::config::ConfigError;
use crate::config::ServerConfig;
use crate::context::Context;
use crate::context::ContextBuilder;
use crate::context::RequestMeta;
use crate::procedure::panic_message;
use crate::procedure::scrub;
use crate::router::Router;

type ContextHook = Arc<dyn Fn(&RequestMeta, &mut ContextBuilder) -> Result<(), CallError> + Send + Sync>;

const FALLBACK_REPLY: &[u8] = br#"{"error":{"code":"INTERNAL","message":"internal server error"}}"#;

#[derive(Clone)]
pub struct Server {
    router: Arc<Router>,
    config: ServerConfig,
    context: Option<ContextHook>,
}

impl Server {
    pub fn new(router: Router) -> Self {
        Self {
            router: Arc::new(router),
            config: ServerConfig::default(),
            context: None,
        }
    }

    /// Replaces the default limits. Zero limits are rejected.
    pub fn with_config(mut self, config: ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Sets the hook that fills each call's [`Context`].
    ///
    /// Runs once per call, after the path resolves and before validation.
    /// Whatever it stores lives exactly as long as the call. An error fails
    /// only that call, as does a panic.
    pub fn with_context<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RequestMeta, &mut ContextBuilder) -> Result<(), CallError> + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(hook));
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Answers one call.
    pub async fn call(&self, meta: &Arc<RequestMeta>, envelope: CallEnvelope) -> ResultEnvelope {
        let CallEnvelope { path, input, id } = envelope;
        let shown_id = id.as_ref().map(ToString::to_string).unwrap_or_default();
        let span = info_span!("call", path = %path, id = %shown_id);

        async move {
            let started = Instant::now();
            let outcome = self.run(meta, &path, id.clone(), input).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                Ok(_) => debug!(elapsed_ms, "call succeeded"),
                // already logged with its detail where it happened
                Err(err) if err.code == ErrorCode::Internal => debug!(elapsed_ms, "call failed internally"),
                Err(err) => warn!(elapsed_ms, code = %err.code, message = %err.message, "call failed"),
            }
            ResultEnvelope { id, outcome }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        meta: &Arc<RequestMeta>,
        path: &str,
        id: Option<CallId>,
        input: Value,
    ) -> Result<Value, CallError> {
        let procedure = self.router.resolve(path)?;

        let mut builder = ContextBuilder::new();
        if let Some(hook) = &self.context {
            match std::panic::catch_unwind(AssertUnwindSafe(|| hook(meta.as_ref(), &mut builder))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(scrub(path, err)),
                Err(panic) => {
                    error!(panic = %panic_message(panic.as_ref()), "context hook panicked");
                    return Err(CallError::internal());
                }
            }
        }
        let ctx: Context = builder.build(path, id, meta.clone());

        match tokio::time::timeout(self.config.call_timeout, procedure.invoke(&ctx, input)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CallError::timeout(format!(
                "call to '{}' exceeded {}ms",
                path,
                self.config.call_timeout.as_millis()
            ))),
        }
    }

    /// Answers a parsed payload, shaped like the payload.
    pub async fn dispatch(&self, meta: RequestMeta, payload: CallPayload) -> ResultPayload {
        let meta = Arc::new(meta);
        match payload {
            CallPayload::Single(envelope) => ResultPayload::Single(self.call(&meta, envelope).await),
            CallPayload::Batch(items) if items.len() > self.config.max_batch_size => {
                warn!(size = items.len(), limit = self.config.max_batch_size, "batch rejected");
                let error = CallError::new(
                    ErrorCode::PayloadTooLarge,
                    format!(
                        "batch of {} calls exceeds the limit of {}",
                        items.len(),
                        self.config.max_batch_size
                    ),
                );
                let envs = items
                    .into_iter()
                    .map(|item| ResultEnvelope::failure(item_id(&item), error.clone()))
                    .collect();
                ResultPayload::Batch(envs)
            }
            CallPayload::Batch(items) => {
                let calls = items.into_iter().map(|item| {
                    let meta = meta.clone();
                    async move {
                        match item {
                            BatchItem::Valid(envelope) => self.call(&meta, envelope).await,
                            BatchItem::Invalid { id, error } => {
                                warn!(id = ?id, message = %error.message, "unreadable batch member");
                                ResultEnvelope::failure(id, error)
                            }
                        }
                    }
                });
                ResultPayload::Batch(join_all(calls).await)
            }
        }
    }

    /// Answers raw payload bytes with raw reply bytes.
    pub async fn handle_bytes(&self, meta: RequestMeta, bytes: &[u8]) -> Vec<u8> {
        let reply = if bytes.len() > self.config.max_payload_bytes {
            let err = WireError::PayloadTooLarge {
                limit: self.config.max_payload_bytes,
                actual: bytes.len(),
            };
            warn!(error = %err, "payload rejected");
            ResultPayload::Single(ResultEnvelope::failure(None, err.to_call_error()))
        } else {
            match parse_calls(bytes) {
                Ok(payload) => self.dispatch(meta, payload).await,
                Err(err) => {
                    warn!(error = %err, "unreadable payload");
                    ResultPayload::Single(ResultEnvelope::failure(err.call_id().cloned(), err.to_call_error()))
                }
            }
        };

        reply.to_bytes().unwrap_or_else(|err| {
            error!(error = %err, "failed to encode reply");
            FALLBACK_REPLY.to_vec()
        })
    }
}

fn item_id(item: &BatchItem) -> Option<CallId> {
    match item {
        BatchItem::Valid(envelope) => envelope.id.clone(),
        BatchItem::Invalid { id, .. } => id.clone(),
    }
}
