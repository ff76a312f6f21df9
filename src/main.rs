//! crystalmath-lsp - language server for CRYSTAL23 and VASP input files.
//!
//! Serves one LSP connection over stdio, or over a Unix socket with
//! `--socket [path]`. Logs go to stderr; stdout carries the protocol.

mod documents;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use crystalmath_lsp::lsp::types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
};
use crystalmath_lsp::lsp::{methods, InitializeResult, ServerCapabilities, TextDocumentSyncKind};
use crystalmath_lsp::server::{transport, Connection, ConnectionConfig, HandlerRegistry};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use documents::DocumentStore;

/// How the server is reached.
#[derive(Debug, PartialEq, Eq)]
enum Listen {
    Stdio,
    Socket(PathBuf),
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Listen> {
    let mut args = args.into_iter().peekable();
    let mut listen = Listen::Stdio;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--socket" => {
                let path = match args.next_if(|next| !next.starts_with("--")) {
                    Some(path) => PathBuf::from(path),
                    None => transport::default_socket_path(),
                };
                listen = Listen::Socket(path);
            }
            "--stdio" => listen = Listen::Stdio,
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(listen)
}

fn build_registry(store: Arc<DocumentStore>) -> HandlerRegistry {
    let capabilities = ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncKind::Incremental),
        ..ServerCapabilities::default()
    };

    let open_store = Arc::clone(&store);
    let change_store = Arc::clone(&store);
    let close_store = store;

    let advertised = capabilities.clone();

    HandlerRegistry::builder()
        .on_request(methods::INITIALIZE, move |_params, _peer| {
            let result = InitializeResult::new(advertised.clone());
            async move {
                let value = result.to_value().context("Failed to encode capabilities")?;
                Ok(value)
            }
        })
        .on_request(methods::SHUTDOWN, |_params, _peer| async {
            info!("Shutdown requested");
            Ok(Value::Null)
        })
        .on_notification_typed(
            methods::DID_OPEN,
            move |params: DidOpenTextDocumentParams, _peer| {
                let store = Arc::clone(&open_store);
                async move {
                    store.open(params)?;
                    Ok(())
                }
            },
        )
        .on_notification_typed(
            methods::DID_CHANGE,
            move |params: DidChangeTextDocumentParams, _peer| {
                let store = Arc::clone(&change_store);
                async move {
                    let uri = store.change(params)?;
                    if let Some(doc) = store.get(&uri) {
                        debug!("{} is {} bytes of {}", uri, doc.text.len(), doc.language_id);
                    }
                    Ok(())
                }
            },
        )
        .on_notification_typed(
            methods::DID_CLOSE,
            move |params: DidCloseTextDocumentParams, peer| {
                let store = Arc::clone(&close_store);
                async move {
                    let uri = store.close(params)?;
                    debug!("{} documents still open", store.len());
                    peer.publish_diagnostics(uri.as_str(), Vec::new())
                        .await
                        .context("Failed to clear diagnostics")?;
                    Ok(())
                }
            },
        )
        .capabilities(capabilities)
        .build()
}

async fn connect(listen: &Listen, registry: HandlerRegistry, config: ConnectionConfig) -> Result<Connection> {
    match listen {
        Listen::Stdio => Ok(transport::stdio(registry, config)),
        #[cfg(unix)]
        Listen::Socket(path) => transport::accept_unix(path, registry, config)
            .await
            .with_context(|| format!("Failed to listen on {}", path.display())),
        #[cfg(not(unix))]
        Listen::Socket(_) => bail!("Unix sockets are not supported on this platform"),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "crystalmath_lsp=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    info!("Starting crystalmath-lsp v{}", env!("CARGO_PKG_VERSION"));

    let listen = parse_args(std::env::args().skip(1))?;
    let config = ConnectionConfig::from_env();
    let registry = build_registry(Arc::new(DocumentStore::new()));

    let connection = connect(&listen, registry, config).await?;
    let outcome = connection.serve().await?;

    info!("Connection finished: {:?}", outcome);
    Ok(if outcome.exit_code() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crystalmath_lsp::rpc::{encode_frame, Frame, FrameReader};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::time::timeout;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(args(&[])).unwrap(), Listen::Stdio);
        assert_eq!(
            parse_args(args(&["--socket", "/tmp/x.sock"])).unwrap(),
            Listen::Socket(PathBuf::from("/tmp/x.sock"))
        );
        assert_eq!(
            parse_args(args(&["--socket"])).unwrap(),
            Listen::Socket(transport::default_socket_path())
        );
        assert!(parse_args(args(&["--port", "9000"])).is_err());
    }

    #[test]
    fn test_registry_declares_incremental_sync() {
        let registry = build_registry(Arc::new(DocumentStore::new()));
        assert_eq!(
            registry.capabilities().text_document_sync,
            Some(TextDocumentSyncKind::Incremental)
        );
        assert_eq!(registry.request_methods(), vec!["initialize", "shutdown"]);
        assert!(registry.notification_handler(methods::DID_CLOSE).is_some());
    }

    #[tokio::test]
    async fn test_initialize_reply_matches_registry_capabilities() {
        let registry = build_registry(Arc::new(DocumentStore::new()));
        let declared = serde_json::to_value(registry.capabilities()).unwrap();

        let (editor, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let connection = Connection::new(server_read, server_write, registry, ConnectionConfig::default());
        let serving = tokio::spawn(connection.serve());

        let (editor_read, mut editor_write) = tokio::io::split(editor);
        let request = json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"capabilities": {}}
        });
        editor_write
            .write_all(&encode_frame(&request).unwrap())
            .await
            .unwrap();

        let mut reader = FrameReader::new(BufReader::new(editor_read));
        let frame = timeout(Duration::from_secs(5), reader.read_frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Frame::Json(response) = frame else {
            panic!("Expected a JSON frame");
        };
        assert_eq!(response["id"], json!(1));
        assert_eq!(response["result"]["capabilities"], declared);
        assert_eq!(response["result"]["capabilities"]["textDocumentSync"], json!(2));

        serving.abort();
    }
}
