//! Language Server Protocol layer on top of the JSON-RPC core.
//!
//! - `catalog` - the fixed method catalog and method-name constants
//! - `lifecycle` - the per-connection state machine
//! - `capabilities` - capability declaration and derivation
//! - `types` - payloads for the methods the server sends itself

pub mod capabilities;
pub mod catalog;
pub mod lifecycle;
pub mod types;

pub use capabilities::{InitializeResult, ServerCapabilities, TextDocumentSyncKind};
pub use catalog::{methods, MethodSpec};
pub use lifecycle::{ConnectionState, Lifecycle};
