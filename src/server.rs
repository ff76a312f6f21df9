//! Connection runtime: handler registry, dispatcher, and transports.
//!
//! ```ignore
//! use crystalmath_lsp::server::{transport, ConnectionConfig, HandlerRegistry};
//!
//! let registry = HandlerRegistry::builder()
//!     .on_request("textDocument/hover", |_params, _peer| async {
//!         Ok(serde_json::json!({"contents": "SHRINK: Monkhorst-Pack grid"}))
//!     })
//!     .build();
//!
//! let outcome = transport::stdio(registry, ConnectionConfig::from_env())
//!     .serve()
//!     .await?;
//! ```

mod config;
mod dispatcher;
mod peer;
mod registry;
pub mod transport;

pub use config::{ConnectionConfig, ENV_LIFECYCLE_CODE, ENV_MAX_CONTENT_LENGTH, ENV_REQUEST_TIMEOUT};
pub use dispatcher::{Connection, ConnectionOutcome};
pub use peer::{BoxedWriter, Peer};
pub use registry::{
    decode_params, HandlerFuture, HandlerRegistry, HandlerRegistryBuilder, NotificationHandler,
    RequestHandler,
};
