//! Outbound side of a connection.
//!
//! A [`Peer`] is handed to every handler. It writes notifications directly
//! and issues requests through the correlation table. All writers share one
//! frame writer behind an async mutex, the single lock that keeps frames
//! from interleaving on the wire.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::debug;

use crate::lsp::catalog::methods;
use crate::lsp::lifecycle::{ConnectionState, Lifecycle};
use crate::lsp::types::{Diagnostic, MessageParams, MessageType, PublishDiagnosticsParams};
use crate::rpc::correlation::{CorrelationTable, PendingResponse};
use crate::rpc::error::RpcError;
use crate::rpc::framing::FrameWriter;
use crate::rpc::message::{Envelope, Notification, Request};

/// Type-erased write half of the transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct PeerInner {
    writer: Mutex<FrameWriter<BoxedWriter>>,
    table: Arc<CorrelationTable>,
    lifecycle: Arc<Lifecycle>,
    request_timeout: Option<Duration>,
}

/// Handle for sending messages to the other side of the connection.
///
/// Cheap to clone; all clones share the same writer and correlation table.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    pub(crate) fn new(
        writer: BoxedWriter,
        table: Arc<CorrelationTable>,
        lifecycle: Arc<Lifecycle>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                writer: Mutex::new(FrameWriter::new(writer)),
                table,
                lifecycle,
                request_timeout,
            }),
        }
    }

    /// Current lifecycle phase of the connection.
    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.state()
    }

    /// Number of outbound requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.table.len()
    }

    /// Issue a request and return a handle for its response.
    ///
    /// The request is registered before its frame is written, so a fast
    /// response can never miss its entry. Dropping the returned handle
    /// abandons the request locally.
    ///
    /// # Errors
    ///
    /// - `RpcError::ConnectionClosed` if the connection has exited
    /// - `RpcError::Io` if the frame cannot be written
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingResponse, RpcError> {
        if self.inner.lifecycle.is_exited() {
            return Err(RpcError::ConnectionClosed);
        }

        let id = self.inner.table.next_id();
        let pending = self.inner.table.register(id.clone(), method)?;

        debug!("Issuing request {} (id {})", method, id);
        self.send(&Envelope::Request(Request {
            id,
            method: method.to_string(),
            params,
        }))
        .await?;

        Ok(pending)
    }

    /// Issue a request and wait for its result.
    ///
    /// When a request timeout is configured and expires, the request is
    /// abandoned and `RpcError::Timeout` is returned.
    ///
    /// # Errors
    ///
    /// Everything [`Peer::request`] returns, plus `RpcError::Remote` for an
    /// error response and `RpcError::Timeout`.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let pending = self.request(method, params).await?;

        match self.inner.request_timeout {
            Some(limit) => {
                let id = pending.id().clone();
                match tokio::time::timeout(limit, pending).await {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::Timeout { id, timeout: limit }),
                }
            }
            None => pending.await,
        }
    }

    /// Send a notification. No correlation bookkeeping is involved.
    ///
    /// # Errors
    ///
    /// - `RpcError::ConnectionClosed` if the connection has exited
    /// - `RpcError::Io` if the frame cannot be written
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        if self.inner.lifecycle.is_exited() {
            return Err(RpcError::ConnectionClosed);
        }

        debug!("Sending notification {}", method);
        self.send(&Envelope::Notification(Notification {
            method: method.to_string(),
            params,
        }))
        .await?;
        Ok(())
    }

    /// Send a notification with serializable params.
    ///
    /// # Errors
    ///
    /// `RpcError::Encode` if the params fail to serialize, otherwise as
    /// [`Peer::notify`].
    pub async fn notify_with<P: Serialize>(&self, method: &str, params: &P) -> Result<(), RpcError> {
        let params = serde_json::to_value(params)?;
        self.notify(method, Some(params)).await
    }

    /// `window/showMessage`
    pub async fn show_message(
        &self,
        typ: MessageType,
        message: impl Into<String>,
    ) -> Result<(), RpcError> {
        let params = MessageParams {
            typ,
            message: message.into(),
        };
        self.notify_with(methods::SHOW_MESSAGE, &params).await
    }

    /// `window/logMessage`
    pub async fn log_message(
        &self,
        typ: MessageType,
        message: impl Into<String>,
    ) -> Result<(), RpcError> {
        let params = MessageParams {
            typ,
            message: message.into(),
        };
        self.notify_with(methods::LOG_MESSAGE, &params).await
    }

    /// `textDocument/publishDiagnostics`
    pub async fn publish_diagnostics(
        &self,
        uri: impl Into<String>,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<(), RpcError> {
        let params = PublishDiagnosticsParams {
            uri: uri.into(),
            diagnostics,
        };
        self.notify_with(methods::PUBLISH_DIAGNOSTICS, &params).await
    }

    /// Write one envelope as a single frame.
    pub(crate) async fn send(&self, envelope: &Envelope) -> std::io::Result<()> {
        self.inner.writer.lock().await.write_frame(envelope).await
    }

    /// Close the write half of the transport.
    pub(crate) async fn close(&self) {
        if let Err(e) = self.inner.writer.lock().await.shutdown().await {
            debug!("Error closing transport: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::framing::{Frame, FrameReader};
    use crate::rpc::message::{classify, RequestId};
    use crate::lsp::types::{DiagnosticSeverity, Position, Range};
    use serde_json::json;
    use tokio::io::{BufReader, DuplexStream};
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn peer_pair(request_timeout: Option<Duration>) -> (Peer, Arc<CorrelationTable>, FrameReader<BufReader<DuplexStream>>) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let table = Arc::new(CorrelationTable::new());
        let peer = Peer::new(
            Box::new(ours),
            Arc::clone(&table),
            Arc::new(Lifecycle::new()),
            request_timeout,
        );
        (peer, table, FrameReader::new(BufReader::new(theirs)))
    }

    async fn next_envelope(reader: &mut FrameReader<BufReader<DuplexStream>>) -> Envelope {
        let frame = timeout(TEST_TIMEOUT, reader.read_frame())
            .await
            .expect("Test timed out")
            .expect("Read failed")
            .expect("Stream closed");
        match frame {
            Frame::Json(value) => classify(value).expect("Malformed envelope"),
            Frame::Unparsable(reason) => panic!("Unparsable frame: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_request_writes_frame_and_resolves() {
        let (peer, table, mut reader) = peer_pair(None);

        let pending = peer
            .request("workspace/configuration", Some(json!({"items": []})))
            .await
            .unwrap();
        assert_eq!(peer.pending_requests(), 1);

        let Envelope::Request(req) = next_envelope(&mut reader).await else {
            panic!("Expected request");
        };
        assert_eq!(req.method, "workspace/configuration");
        assert_eq!(&req.id, pending.id());

        table.resolve(&req.id, Ok(json!([{"basis": "sto-3g"}])));
        let result = timeout(TEST_TIMEOUT, pending).await.unwrap().unwrap();
        assert_eq!(result, json!([{"basis": "sto-3g"}]));
        assert_eq!(peer.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_call_times_out_and_abandons() {
        let (peer, table, mut reader) = peer_pair(Some(Duration::from_millis(20)));

        let result = peer.call("slow/request", None).await;
        match result {
            Err(RpcError::Timeout { id, .. }) => assert_eq!(id, RequestId::Number(1)),
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert!(table.is_empty());

        // The request still went out on the wire
        let env = next_envelope(&mut reader).await;
        assert_eq!(env.method(), Some("slow/request"));
    }

    #[tokio::test]
    async fn test_notify_writes_notification() {
        let (peer, _table, mut reader) = peer_pair(None);

        peer.show_message(MessageType::Info, "Converged in 12 cycles")
            .await
            .unwrap();

        let env = next_envelope(&mut reader).await;
        assert_eq!(
            env,
            Envelope::Notification(Notification {
                method: "window/showMessage".to_string(),
                params: Some(json!({"type": 3, "message": "Converged in 12 cycles"})),
            })
        );
    }

    #[tokio::test]
    async fn test_publish_diagnostics_shape() {
        let (peer, _table, mut reader) = peer_pair(None);

        let diagnostic = Diagnostic {
            range: Range {
                start: Position { line: 1, character: 0 },
                end: Position { line: 1, character: 7 },
            },
            message: "Missing END".to_string(),
            severity: Some(DiagnosticSeverity::Error),
            source: Some("crystal".to_string()),
        };
        peer.publish_diagnostics("file:///tmp/mgo.d12", vec![diagnostic])
            .await
            .unwrap();

        let env = next_envelope(&mut reader).await;
        assert_eq!(env.method(), Some("textDocument/publishDiagnostics"));
        let Envelope::Notification(notif) = env else {
            panic!("Expected notification");
        };
        assert_eq!(
            notif.params,
            Some(json!({
                "uri": "file:///tmp/mgo.d12",
                "diagnostics": [{
                    "range": {
                        "start": {"line": 1, "character": 0},
                        "end": {"line": 1, "character": 7}
                    },
                    "message": "Missing END",
                    "severity": 1,
                    "source": "crystal"
                }]
            }))
        );
    }

    #[tokio::test]
    async fn test_refuses_after_exit() {
        let (ours, _theirs) = tokio::io::duplex(1024);
        let lifecycle = Arc::new(Lifecycle::new());
        let peer = Peer::new(
            Box::new(ours),
            Arc::new(CorrelationTable::new()),
            Arc::clone(&lifecycle),
            None,
        );
        lifecycle.terminate();

        assert!(matches!(
            peer.notify("window/logMessage", None).await,
            Err(RpcError::ConnectionClosed)
        ));
        assert!(matches!(
            peer.request("x", None).await,
            Err(RpcError::ConnectionClosed)
        ));
    }
}
