//! # Procedures
//!
//! A procedure is one callable unit: an input schema, an optional output
//! schema, guards, and a handler.
//!
//! ## Invocation
//!
//! 1. The raw input is validated. Failure answers `BAD_INPUT` and the handler
//!    never runs.
//! 2. Guards run in registration order against the call's [`Context`].
//! 3. The handler runs with the validated input. A panic in a guard or the
//!    handler is caught here.
//! 4. Domain failures pass through with their code. Anything else is logged
//!    with its detail and answered with a generic `INTERNAL`.
//! 5. If an output schema is declared, the result must satisfy it.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::error;

use typack::Schema;
use typack::ValidationError;
use tyrpc::CallError;
use tyrpc::ErrorCode;
use tyrpc::ProcedureKind;

use crate::context::Context;

/// How a handler fails.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// An expected outcome the caller should see as-is (`NOT_FOUND`, `CONFLICT`, ...).
    #[error(transparent)]
    Domain(#[from] CallError),
    /// An unexpected fault. Logged, never shown to the caller.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn fault<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Fault(err.into())
    }
}

/// The untyped seam every procedure body sits behind.
///
/// Most procedures are written as typed closures through
/// [`ProcedureBuilder::resolve`]; implement this directly to work on raw
/// JSON values.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &Context, input: Value) -> Result<Value, HandlerError>;
}

/// A check run before the handler, such as "caller must be signed in".
pub type Guard = Arc<dyn Fn(&Context) -> Result<(), CallError> + Send + Sync>;

#[derive(Clone)]
pub struct Procedure {
    kind: ProcedureKind,
    input: Schema,
    output: Option<Schema>,
    guards: Vec<Guard>,
    handler: Arc<dyn Handler>,
}

impl Procedure {
    pub fn query() -> ProcedureBuilder {
        ProcedureBuilder::new(ProcedureKind::Query)
    }

    pub fn mutation() -> ProcedureBuilder {
        ProcedureBuilder::new(ProcedureKind::Mutation)
    }

    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    pub fn input_schema(&self) -> &Schema {
        &self.input
    }

    pub fn output_schema(&self) -> Option<&Schema> {
        self.output.as_ref()
    }

    /// Runs one call through validation, guards, the handler and error
    /// classification. Never panics, whatever the guards or handler do.
    pub async fn invoke(&self, ctx: &Context, raw: Value) -> Result<Value, CallError> {
        let input = self.input.validate(&raw).map_err(bad_input)?;

        let guarded = async {
            for guard in &self.guards {
                if let Err(err) = guard(ctx) {
                    return Err(HandlerError::Domain(err));
                }
            }
            self.handler.call(ctx, input).await
        };
        let outcome = AssertUnwindSafe(guarded).catch_unwind().await;

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(HandlerError::Domain(err))) => return Err(scrub(ctx.path(), err)),
            Ok(Err(HandlerError::Fault(fault))) => {
                error!(path = %ctx.path(), error = %format!("{:#}", fault), "handler failed");
                return Err(CallError::internal());
            }
            Err(panic) => {
                error!(path = %ctx.path(), panic = %panic_message(panic.as_ref()), "procedure panicked");
                return Err(CallError::internal());
            }
        };

        match &self.output {
            Some(schema) => schema.validate(&value).map_err(|err| {
                error!(path = %ctx.path(), error = %err, "handler output broke its declared schema");
                CallError::internal()
            }),
            None => Ok(value),
        }
    }
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure")
            .field("kind", &self.kind)
            .field("input", &self.input.kind())
            .field("guards", &self.guards.len())
            .finish()
    }
}

fn bad_input(err: ValidationError) -> CallError {
    let call_err = CallError::bad_input(err.to_string());
    match err.path() {
        Some(path) => call_err.with_validation_path(path),
        None => call_err,
    }
}

/// Passes a classified failure through, except `INTERNAL`, whose detail is
/// logged and replaced with the generic message.
pub(crate) fn scrub(path: &str, err: CallError) -> CallError {
    if err.code != ErrorCode::Internal {
        return err;
    }
    error!(path = %path, message = %err.message, "call reported an internal error");
    CallError::internal()
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}

/// Fluent builder for a [`Procedure`].
///
/// ```ignore
/// let get_by_id = Procedure::query()
///     .input(Schema::string().non_empty())
///     .resolve(|ctx: Context, id: String| async move { ... });
/// ```
pub struct ProcedureBuilder {
    kind: ProcedureKind,
    input: Schema,
    output: Option<Schema>,
    guards: Vec<Guard>,
}

impl ProcedureBuilder {
    fn new(kind: ProcedureKind) -> Self {
        Self {
            kind,
            input: Schema::optional(Schema::Any),
            output: None,
            guards: Vec::new(),
        }
    }

    pub(crate) fn with_kind(mut self, kind: ProcedureKind) -> Self {
        self.kind = kind;
        self
    }

    /// Without this, the procedure takes no input (anything, including absent).
    pub fn input(mut self, schema: impl Into<Schema>) -> Self {
        self.input = schema.into();
        self
    }

    pub fn output(mut self, schema: impl Into<Schema>) -> Self {
        self.output = Some(schema.into());
        self
    }

    pub fn guard<G>(mut self, guard: G) -> Self
    where
        G: Fn(&Context) -> Result<(), CallError> + Send + Sync + 'static,
    {
        self.guards.push(Arc::new(guard));
        self
    }

    /// Finishes with a typed handler.
    ///
    /// The validated input is deserialized into `In` before the handler runs;
    /// if that fails the call is answered with `BAD_INPUT`. The handler's
    /// error type may be [`CallError`], [`anyhow::Error`] or [`HandlerError`].
    pub fn resolve<F, Fut, E, In, Out>(self, f: F) -> Procedure
    where
        F: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
    {
        self.handler(FnHandler {
            f,
            _types: PhantomData,
        })
    }

    /// Finishes with an untyped handler.
    pub fn handler(self, handler: impl Handler) -> Procedure {
        Procedure {
            kind: self.kind,
            input: self.input,
            output: self.output,
            guards: self.guards,
            handler: Arc::new(handler),
        }
    }
}

struct FnHandler<F, In, Out> {
    f: F,
    _types: PhantomData<fn(In) -> Out>,
}

#[async_trait::async_trait]
impl<F, Fut, E, In, Out> Handler for FnHandler<F, In, Out>
where
    F: Fn(Context, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, E>> + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    async fn call(&self, ctx: &Context, input: Value) -> Result<Value, HandlerError> {
        let input: In = serde_json::from_value(input)
            .map_err(|e| CallError::bad_input(format!("input does not fit the handler: {}", e)))?;
        let output = (self.f)(ctx.clone(), input).await.map_err(Into::into)?;
        serde_json::to_value(output)
            .map_err(|e| HandlerError::fault(anyhow::anyhow!("failed to serialize output: {}", e)))
    }
}
