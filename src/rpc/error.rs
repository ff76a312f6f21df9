//! Error taxonomy for the JSON-RPC core.
//!
//! Errors fall into three groups:
//!
//! - [`FramingError`] - the byte stream itself is broken. Always fatal to
//!   the connection because the next frame boundary is unknown.
//! - [`ResponseError`] / [`ErrorCode`] - the wire error object sent back to
//!   the peer for a single message.
//! - [`HandlerError`] and [`RpcError`] - failures on the two sides of a
//!   handler: what a handler returns, and what an outbound request yields.

use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::message::RequestId;

/// Lower bound of the range reserved for handler-defined error codes.
pub const SERVER_ERROR_START: i64 = -32099;
/// Upper bound of the range reserved for handler-defined error codes.
pub const SERVER_ERROR_END: i64 = -32000;

/// JSON-RPC error codes understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Content bytes are not valid JSON (-32700).
    ParseError,
    /// Envelope is structurally invalid for its kind (-32600).
    InvalidRequest,
    /// No handler is registered for the requested method (-32601).
    MethodNotFound,
    /// The handler rejected the params (-32602).
    InvalidParams,
    /// Any other handler failure (-32603).
    InternalError,
    /// Handler-defined code inside -32099..=-32000.
    ServerError(i64),
    /// Any code outside the reserved ranges.
    Other(i64),
}

impl ErrorCode {
    /// Numeric wire value of this code.
    pub const fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError(code) | ErrorCode::Other(code) => code,
        }
    }

    /// Classify a numeric code.
    pub const fn from_code(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            c if is_server_error_code(c) => ErrorCode::ServerError(c),
            c => ErrorCode::Other(c),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Whether `code` lies in the range reserved for handler-defined errors.
pub const fn is_server_error_code(code: i64) -> bool {
    code >= SERVER_ERROR_START && code <= SERVER_ERROR_END
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct ResponseError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    /// Build an error object from a code and message.
    pub fn new(code: impl Into<i64>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Classified form of [`ResponseError::code`].
    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

/// Fatal faults in the header+content framing.
///
/// There is no resynchronization primitive in the protocol, so any of these
/// ends the connection.
#[derive(Debug, Error)]
pub enum FramingError {
    /// Reading from the underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Header block ended without a `Content-Length` field.
    #[error("Missing Content-Length header")]
    MissingContentLength,

    /// `Content-Length` is not a plain decimal integer.
    #[error("Invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    /// A header line is not `Name: value` terminated by CRLF.
    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),

    /// The stream closed in the middle of a header block.
    #[error("Connection closed inside header block")]
    TruncatedHeader,

    /// The stream closed before the declared content length arrived.
    #[error("Connection closed after {received} of {expected} content bytes")]
    TruncatedContent {
        /// Declared `Content-Length`.
        expected: usize,
        /// Bytes actually received.
        received: usize,
    },

    /// Declared content exceeds the configured maximum.
    #[error("Message size {size} exceeds maximum {max} bytes")]
    MessageTooLarge {
        /// Declared `Content-Length`.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Failure returned by a registered handler.
///
/// The dispatcher maps these onto error responses: `InvalidParams` to
/// -32602, `Application` to its own code, everything else to -32603.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The params did not match what the handler expects.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Handler-defined error in the -32099..=-32000 range.
    #[error("{message} (code {code})")]
    Application {
        /// Error code, expected inside the server-error range.
        code: i64,
        /// Human-readable message.
        message: String,
        /// Optional structured detail.
        data: Option<Value>,
    },

    /// Anything else.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn invalid_params(message: impl fmt::Display) -> Self {
        HandlerError::InvalidParams(message.to_string())
    }

    pub fn application(code: i64, message: impl Into<String>) -> Self {
        HandlerError::Application {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Convert into the error object written to the wire.
    ///
    /// Application codes outside the reserved server-error range are not
    /// allowed to impersonate protocol codes and are reported as internal
    /// errors instead.
    pub fn into_response_error(self) -> ResponseError {
        match self {
            HandlerError::InvalidParams(message) => {
                ResponseError::new(ErrorCode::InvalidParams, message)
            }
            HandlerError::Application {
                code,
                message,
                data,
            } if is_server_error_code(code) => ResponseError {
                code,
                message,
                data,
            },
            HandlerError::Application { code, message, .. } => {
                tracing::warn!(
                    "Handler used error code {} outside the server error range",
                    code
                );
                ResponseError::internal(message)
            }
            HandlerError::Internal(err) => ResponseError::internal(format!("{:#}", err)),
        }
    }
}

/// Failure of a locally issued (outbound) request.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The peer answered with an error response.
    #[error("Peer returned error {}: {}", .0.code, .0.message)]
    Remote(ResponseError),

    /// No response arrived within the configured timeout.
    #[error("Request {id} timed out after {timeout:?}")]
    Timeout {
        /// Id of the abandoned request.
        id: RequestId,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The connection terminated before a response arrived.
    #[error("Connection closed before a response arrived")]
    ConnectionClosed,

    /// An id is already awaiting a response.
    #[error("Request id {0} is already pending")]
    DuplicateId(RequestId),

    /// The outgoing message could not be serialized.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Writing the frame failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Fault that ends [`crate::server::Connection::serve`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The inbound byte stream could not be framed.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Writing an outbound frame failed.
    #[error("Failed to write frame: {0}")]
    Write(#[source] io::Error),
}
