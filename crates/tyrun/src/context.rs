//! Per-call context handed to guards and handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tyrpc::CallId;

type Extensions = anymap::Map<dyn anymap::any::Any + Send + Sync>;

/// What the transport knows about the request a call arrived in.
///
/// Shared by every call of one batch. Header names are matched
/// case-insensitively by [`RequestMeta::header`].
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub headers: HashMap<String, String>,
    pub peer: Option<String>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .or_else(|| self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v))
            .map(String::as_str)
    }
}

/// A staging area for the collaborators a call needs (database handles,
/// the authenticated user, ...). Filled by the server's context hook once
/// per call, before the procedure runs.
pub struct ContextBuilder {
    extensions: Extensions,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            extensions: Extensions::new(),
        }
    }

    /// Stores a value, replacing any earlier value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) {
        self.extensions.insert(val);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    pub(crate) fn build(self, path: &str, call_id: Option<CallId>, meta: Arc<RequestMeta>) -> Context {
        Context {
            inner: Arc::new(Inner {
                path: path.to_string(),
                call_id,
                meta,
                received_at: Instant::now(),
                extensions: self.extensions,
            }),
        }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Request-scoped, read-only state for one call.
///
/// Cloning is cheap and shares the same call. Collaborators stored in the
/// context are dropped with the last clone, which the server releases as soon
/// as the call resolves, fails, times out or panics.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    path: String,
    call_id: Option<CallId>,
    meta: Arc<RequestMeta>,
    received_at: Instant,
    extensions: Extensions,
}

impl Context {
    /// A context outside any server, for calling procedures directly.
    pub fn detached(path: &str) -> Self {
        ContextBuilder::new().build(path, None, Arc::new(RequestMeta::default()))
    }

    /// Full dotted path of the procedure being called.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.inner.call_id.as_ref()
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.inner.meta
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.meta.header(name)
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.received_at.elapsed()
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.inner.extensions.get::<T>()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.inner.path)
            .field("call_id", &self.inner.call_id)
            .field("peer", &self.inner.meta.peer)
            .finish()
    }
}
