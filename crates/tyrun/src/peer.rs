//! # Batching Peer
//!
//! A client link that coalesces calls into batches.
//!
//! Callers enqueue envelopes and wait on a oneshot. A pump task collects
//! whatever arrives within `batch_window` of the first queued call (up to
//! `max_batch_size`), sends it as one batch, and routes each result back to
//! its caller by call id.
//!
//! ## Invariants
//! - **Exactly once**: every call is sent in exactly one batch and never retried.
//! - **Demultiplexing by id**: results are matched to callers by id, never by position.
//! - **Shared fate only for the payload**: a transport or decode failure fails
//!   every member of that batch; a result missing for one id fails only that caller.
//! - **Abandonment**: a caller that stops waiting (timeout or dropped future)
//!   leaves its siblings untouched; its late result is discarded.

use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use tyrpc::CallEnvelope;
use tyrpc::CallId;
use tyrpc::ResultPayload;
use tyrpc::encode_batch;
use tyrpc::parse_results;

use crate::client::ClientError;
use crate::config::ClientConfig;
use crate::transport::Transport;

type Outcome = Result<Value, ClientError>;
type Pending = DashMap<CallId, oneshot::Sender<Outcome>>;

/// Batching link over a transport.
///
/// Must be created inside a tokio runtime: it spawns its pump task. The
/// pump stops once the peer is dropped.
pub struct Peer {
    peer_name: String,
    queue: mpsc::UnboundedSender<CallEnvelope>,
    pending: Arc<Pending>,
    seq_gen: AtomicI64,
    call_timeout: Duration,
}

impl Peer {
    pub fn new(peer_name: impl Into<String>, transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        let peer_name = peer_name.into();
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let (queue, rx) = mpsc::unbounded_channel();

        tokio::spawn(pump(
            peer_name.clone(),
            rx,
            transport,
            pending.clone(),
            config.batch_window,
            config.max_batch_size.max(1),
        ));

        Self {
            peer_name,
            queue,
            pending,
            seq_gen: AtomicI64::new(1),
            call_timeout: config.call_timeout,
        }
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Calls still waiting for a result.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub async fn call(&self, path: &str, input: Value) -> Outcome {
        let id = CallId::Number(self.seq_gen.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            id: id.clone(),
        };

        let envelope = CallEnvelope::new(path, input).with_id(id);
        if self.queue.send(envelope).is_err() {
            return Err(ClientError::Closed);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

/// Frees a caller's pending entry however its wait ends.
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: CallId,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

async fn pump(
    peer_name: String,
    mut rx: mpsc::UnboundedReceiver<CallEnvelope>,
    transport: Arc<dyn Transport>,
    pending: Arc<Pending>,
    window: Duration,
    max_batch_size: usize,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        while batch.len() < max_batch_size {
            tokio::select! {
                _ = &mut deadline => break,
                next = rx.recv() => match next {
                    Some(envelope) => batch.push(envelope),
                    None => break,
                },
            }
        }

        // callers abandoned while queued are not worth sending
        batch.retain(|envelope| envelope.id.as_ref().is_some_and(|id| pending.contains_key(id)));
        if batch.is_empty() {
            continue;
        }

        debug!(peer = %peer_name, size = batch.len(), "flushing batch");
        tokio::spawn(flush(peer_name.clone(), transport.clone(), pending.clone(), batch));
    }
    debug!(peer = %peer_name, "pump stopped");
}

async fn flush(peer_name: String, transport: Arc<dyn Transport>, pending: Arc<Pending>, batch: Vec<CallEnvelope>) {
    let ids: Vec<CallId> = batch.iter().filter_map(|envelope| envelope.id.clone()).collect();

    let bytes = match encode_batch(&batch) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(peer = %peer_name, error = %e, "failed to encode batch");
            return notify(&pending, &ids, ClientError::Protocol(e.to_string()));
        }
    };

    let reply = match transport.call(&bytes).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(peer = %peer_name, error = %e, size = ids.len(), "transport failed for batch");
            return notify(&pending, &ids, ClientError::Transport(e));
        }
    };

    let envelopes = match parse_results(&reply) {
        // the whole payload was refused before any call ran
        Ok(ResultPayload::Single(envelope)) if envelope.id.is_none() => {
            let error = match envelope.outcome {
                Err(err) => ClientError::Call(err),
                Ok(_) => ClientError::Protocol("single result for a batch".into()),
            };
            return notify(&pending, &ids, error);
        }
        Ok(payload) => payload.into_vec(),
        Err(e) => {
            warn!(peer = %peer_name, error = %e, "unreadable batch reply");
            return notify(&pending, &ids, ClientError::Protocol(e.to_string()));
        }
    };

    for envelope in envelopes {
        let Some(id) = envelope.id else {
            warn!(peer = %peer_name, "dropping result without id");
            continue;
        };
        // no entry: the caller already gave up
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(envelope.outcome.map_err(ClientError::Call));
        }
    }

    for id in ids {
        if let Some((id, tx)) = pending.remove(&id) {
            warn!(peer = %peer_name, id = %id, "reply carried no result for call");
            let _ = tx.send(Err(ClientError::MissingResult(id)));
        }
    }
}

fn notify(pending: &Pending, ids: &[CallId], error: ClientError) {
    for id in ids {
        if let Some((_, tx)) = pending.remove(id) {
            let _ = tx.send(Err(error.clone()));
        }
    }
}
