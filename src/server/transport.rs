//! Transports a [`Connection`] can run over.
//!
//! The protocol only needs a duplex byte stream, so these are thin
//! constructors. Editors usually spawn the server on stdio; the Unix socket
//! transport accepts a single client and is handy for attaching a debugger.

use std::path::{Path, PathBuf};

use tracing::info;

use super::config::ConnectionConfig;
use super::dispatcher::Connection;
use super::registry::HandlerRegistry;

const SOCKET_FILE_NAME: &str = "crystalmath-lsp.sock";

/// Connection over the process's stdin and stdout.
///
/// Nothing else may write to stdout while the connection runs; logs go to
/// stderr.
pub fn stdio(registry: HandlerRegistry, config: ConnectionConfig) -> Connection {
    Connection::new(tokio::io::stdin(), tokio::io::stdout(), registry, config)
}

/// Listen on `path` and return a connection for the first client.
///
/// A stale socket file left by a previous run is removed before binding.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound or the accept fails.
#[cfg(unix)]
pub async fn accept_unix(
    path: &Path,
    registry: HandlerRegistry,
    config: ConnectionConfig,
) -> std::io::Result<Connection> {
    use tokio::net::UnixListener;

    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let listener = UnixListener::bind(path)?;
    info!("Listening on {}", path.display());

    let (stream, _addr) = listener.accept().await?;
    info!("Client connected on {}", path.display());

    let (reader, writer) = stream.into_split();
    Ok(Connection::new(reader, writer, registry, config))
}

/// Default socket path for the server.
///
/// Checks in order:
/// 1. `$XDG_RUNTIME_DIR/crystalmath-lsp.sock` (Linux standard)
/// 2. The platform cache directory (e.g. `~/Library/Caches` on macOS)
/// 3. `/tmp/crystalmath-lsp.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(SOCKET_FILE_NAME);
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join(SOCKET_FILE_NAME);
    }

    PathBuf::from("/tmp").join(SOCKET_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket_path_format() {
        let path = default_socket_path();
        assert!(path.is_absolute());
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(SOCKET_FILE_NAME)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_accept_unix_replaces_stale_socket() {
        use crate::lsp::lifecycle::ConnectionState;
        use tokio::net::UnixStream;

        let dir = std::env::temp_dir().join(format!("crystalmath-lsp-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stale.sock");
        std::fs::write(&path, b"").unwrap();

        let accept_path = path.clone();
        let server = tokio::spawn(async move {
            accept_unix(
                &accept_path,
                HandlerRegistry::default(),
                ConnectionConfig::default(),
            )
            .await
        });

        // Retry until the listener has replaced the stale file
        let mut client = None;
        for _ in 0..100 {
            if let Ok(stream) = UnixStream::connect(&path).await {
                client = Some(stream);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(client.is_some(), "Could not connect to listener");

        let connection = server.await.unwrap().unwrap();
        assert_eq!(connection.state(), ConnectionState::Uninitialized);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
