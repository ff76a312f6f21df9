//! JSON-RPC 2.0 core: framing, envelopes, errors, and request correlation.
//!
//! # Protocol
//!
//! Messages use HTTP-style Content-Length framing:
//!
//! ```text
//! Content-Length: 46\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"initialize"}
//! ```
//!
//! Nothing in this module knows about LSP methods or connection state.

pub mod correlation;
pub mod error;
pub mod framing;
pub mod message;

pub use correlation::{CorrelationTable, PendingResponse};
pub use error::{ConnectionError, ErrorCode, FramingError, HandlerError, ResponseError, RpcError};
pub use framing::{encode_frame, Frame, FrameReader, FrameWriter};
pub use message::{classify, Envelope, Malformed, Notification, Request, RequestId, Response};
