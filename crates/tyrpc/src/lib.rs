//! # TyRPC
//!
//! The wire layer for typed procedure calls: envelopes, batches, and the
//! failure taxonomy every call resolves to.
//!
//! ## Architecture
//!
//! - [`envelope`]: `CallEnvelope` / `ResultEnvelope` and the `CallId` that correlates them.
//! - [`codec`]: envelope <-> parts <-> bytes, single calls and batches.
//! - [`error`]: `ErrorCode`, `CallError` (what callers see) and `WireError` (unreadable payloads).
//! - [`contract`]: `ProcedureRef`, the typed declaration shared by router and client.
//!
//! The format is JSON. Nothing here knows about routers, handlers or transports.

pub mod codec;
pub mod contract;
pub mod envelope;
pub mod error;


pub use codec::BatchItem;
pub use codec::CallPayload;
pub use codec::ResultPayload;
pub use codec::decode_call;
pub use codec::decode_result;
pub use codec::encode_batch;
pub use codec::encode_call;
pub use codec::encode_result;
pub use codec::encode_single;
pub use codec::parse_calls;
pub use codec::parse_results;
pub use contract::ProcedureKind;
pub use contract::ProcedureRef;
pub use envelope::CallEnvelope;
pub use envelope::CallId;
pub use envelope::ResultEnvelope;
pub use error::CallError;
pub use error::ErrorCode;
pub use error::Result;
pub use error::WireError;
