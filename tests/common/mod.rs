//! Test harness: plays the editor on the far end of a duplex pipe.

#![allow(dead_code)]

use std::time::Duration;

use crystalmath_lsp::rpc::{encode_frame, ConnectionError, Frame, FrameReader};
use crystalmath_lsp::server::{
    Connection, ConnectionConfig, ConnectionOutcome, HandlerRegistry, Peer,
};
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Editor {
    reader: FrameReader<BufReader<ReadHalf<DuplexStream>>>,
    writer: Option<WriteHalf<DuplexStream>>,
    pub peer: Peer,
    server: JoinHandle<Result<ConnectionOutcome, ConnectionError>>,
}

impl Editor {
    pub fn start(registry: HandlerRegistry) -> Self {
        Self::start_with(registry, ConnectionConfig::default().with_name("test"))
    }

    pub fn start_with(registry: HandlerRegistry, config: ConnectionConfig) -> Self {
        let (editor_end, server_end) = tokio::io::duplex(256 * 1024);
        let (server_read, server_write) = tokio::io::split(server_end);
        let connection = Connection::new(server_read, server_write, registry, config);
        let peer = connection.peer();
        let server = tokio::spawn(connection.serve());

        let (editor_read, editor_write) = tokio::io::split(editor_end);
        Self {
            reader: FrameReader::new(BufReader::new(editor_read)),
            writer: Some(editor_write),
            peer,
            server,
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let writer = self.writer.as_mut().expect("Writer already closed");
        writer.write_all(bytes).await.expect("Write failed");
        writer.flush().await.expect("Flush failed");
    }

    pub async fn send(&mut self, value: Value) {
        let frame = encode_frame(&value).expect("Encode failed");
        self.send_raw(&frame).await;
    }

    pub async fn request(&mut self, id: Value, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    /// Next outbound message from the server.
    pub async fn recv(&mut self) -> Value {
        let frame = timeout(TEST_TIMEOUT, self.reader.read_frame())
            .await
            .expect("Timed out waiting for a message")
            .expect("Read failed")
            .expect("Server closed the stream");
        match frame {
            Frame::Json(value) => value,
            Frame::Unparsable(reason) => panic!("Server sent unparsable frame: {}", reason),
        }
    }

    /// True if nothing arrives within `wait` (or the stream closes).
    pub async fn is_silent(&mut self, wait: Duration) -> bool {
        match timeout(wait, self.reader.read_frame()).await {
            Err(_) => true,
            Ok(Ok(None)) => true,
            Ok(_) => false,
        }
    }

    /// Run the initialize handshake with id 0.
    pub async fn initialize(&mut self) -> Value {
        self.request(json!(0), "initialize", json!({"capabilities": {}}))
            .await;
        let response = self.recv().await;
        assert_eq!(response["id"], json!(0), "Unexpected message: {}", response);
        response
    }

    /// Close the editor's write half.
    pub async fn hang_up(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Wait for `serve` to return.
    pub async fn outcome(self) -> Result<ConnectionOutcome, ConnectionError> {
        timeout(TEST_TIMEOUT, self.server)
            .await
            .expect("serve did not return")
            .expect("serve panicked")
    }
}
