//! # TyRun
//!
//! The runtime for typed procedure calls: procedures and routers on the
//! serving side, links and typed clients on the calling side.
//!
//! ## Architecture
//!
//! - [`procedure`]: a schema-checked handler and how its failures are classified.
//! - [`router`]: dotted paths to procedures, assembled once and then immutable.
//! - [`server`]: answers single calls and batches against a router.
//! - [`transport`]: the byte-moving seam between client and server.
//! - [`peer`] / [`client`]: batching link and the typed calling surface.
//!
//! ```ignore
//! let router = Router::builder()
//!     .procedure("user.getById", Procedure::query().input(Schema::string()).resolve(get_user))?
//!     .build();
//! let server = Arc::new(Server::new(router));
//! let client = Client::new(Arc::new(LocalTransport::new(server)));
//! let user = client.call("user.getById", json!("123")).await?;
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod local;
pub mod logging;
pub mod mock_transport;
pub mod peer;
pub mod procedure;
pub mod router;
pub mod server;
pub mod transport;

#[cfg(test)]
mod tests;

pub use client::Bound;
pub use client::Client;
pub use client::ClientError;
pub use config::ClientConfig;
pub use config::Config;
pub use config::ConfigError;
pub use config::ServerConfig;
pub use context::Context;
pub use context::ContextBuilder;
pub use context::RequestMeta;
pub use local::LocalTransport;
pub use procedure::Handler;
pub use procedure::HandlerError;
pub use procedure::Procedure;
pub use procedure::ProcedureBuilder;
pub use router::Router;
pub use router::RouterBuilder;
pub use router::RouterError;
pub use server::Server;
pub use transport::Transport;
pub use transport::TransportError;
