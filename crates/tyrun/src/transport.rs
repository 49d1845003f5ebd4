//! # Transport Abstraction
//!
//! A minimal, async interface for moving payloads between a client and a server.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about envelopes, paths or schemas.
//!   It moves opaque buffers.
//! - **Request-Response**: One payload out (a single call or a batch), one payload back.
//!   Batching and correlation are built on top of this, not defined here.

/// Errors that occur at the network/transport layer.
///
/// Cloned to every caller waiting on the payload that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The operation timed out before a response was received.
    #[error("request timed out")]
    Timeout,
    /// The remote peer rejected the payload size.
    #[error("payload too large for transport")]
    PayloadTooLarge,
    /// Generic I/O error or internal transport failure.
    #[error("i/o error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A mechanism to send a payload and receive the reply.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload and waits for the response payload.
    ///
    /// # invariants
    /// - Must return `Ok(vec)` with the raw reply bytes on success, even when
    ///   the reply carries failed calls.
    /// - Must return `Err` only if the payload could not be delivered or answered.
    /// - Should not interpret the payload content.
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;
}
