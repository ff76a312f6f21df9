//! CrystalMath language server core.
//!
//! A JSON-RPC 2.0 / Language Server Protocol runtime over any duplex byte
//! stream:
//!
//! - `rpc` - Content-Length framing, envelopes, errors, request correlation
//! - `lsp` - method catalog, lifecycle state machine, capabilities
//! - `server` - handler registry, the per-connection dispatcher, transports
//!
//! # Usage
//!
//! ```ignore
//! use crystalmath_lsp::server::{Connection, ConnectionConfig, HandlerRegistry};
//!
//! let registry = HandlerRegistry::builder()
//!     .on_notification("textDocument/didOpen", |_params, _peer| async { Ok(()) })
//!     .build();
//!
//! let (reader, writer) = tokio::io::split(stream);
//! let outcome = Connection::new(reader, writer, registry, ConnectionConfig::default())
//!     .serve()
//!     .await?;
//! ```
//!
//! The library logs through `tracing` but never installs a subscriber.

pub mod lsp;
pub mod rpc;
pub mod server;
