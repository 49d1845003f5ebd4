//! Mock transports for testing.
//!
//! These are used by the test suites and are not meant for production links.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportError;

/// A request-response mock answering every payload with a closure.
pub struct CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync,
{
    handler: F,
}

impl<F> CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait::async_trait]
impl<F> Transport for CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync + 'static,
{
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        (self.handler)(payload)
    }
}

/// A transport whose link is always down.
pub struct DeadTransport;

#[async_trait::async_trait]
impl Transport for DeadTransport {
    async fn call(&self, _payload: &[u8]) -> transport::Result<Vec<u8>> {
        Err(TransportError::ConnectionLost("link is down".into()))
    }
}

/// Wraps another transport and records every payload that crosses it.
pub struct RecordingTransport {
    inner: Arc<dyn Transport>,
    payloads: Mutex<Vec<Vec<u8>>>,
    count: AtomicUsize,
}

impl RecordingTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            payloads: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    /// Number of payloads sent so far.
    pub fn round_trips(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload.to_vec());
        }
        self.inner.call(payload).await
    }
}
