//! In-process transport: hands payload bytes straight to a [`Server`].
//!
//! Goes through the full encode/parse path on both sides, so calls behave
//! exactly as they would over a network.

use std::sync::Arc;

use crate::context::RequestMeta;
use crate::server::Server;
use crate::transport;
use crate::transport::Transport;

pub struct LocalTransport {
    server: Arc<Server>,
    meta: RequestMeta,
}

impl LocalTransport {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            meta: RequestMeta::default(),
        }
    }

    /// Request metadata sent along with every payload, such as auth headers.
    pub fn with_meta(mut self, meta: RequestMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn server(&self) -> &Server {
        &self.server
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        Ok(self.server.handle_bytes(self.meta.clone(), payload).await)
    }
}
