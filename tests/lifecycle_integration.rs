//! Lifecycle gating observed from the editor side of a connection.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::Editor;
use crystalmath_lsp::lsp::ConnectionState;
use crystalmath_lsp::rpc::HandlerError;
use crystalmath_lsp::server::{ConnectionConfig, ConnectionOutcome, HandlerRegistry};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const QUIET: Duration = Duration::from_millis(100);

fn registry() -> HandlerRegistry {
    HandlerRegistry::builder()
        .on_request("textDocument/hover", |_params, _peer| async {
            Ok(json!({"contents": "EXCHSIZE"}))
        })
        .on_request("shutdown", |_params, _peer| async {
            // Whatever a shutdown handler returns, the response is null
            Ok(json!({"ignored": true}))
        })
        .build()
}

#[tokio::test]
async fn test_request_before_initialize_is_rejected() {
    let mut editor = Editor::start(registry());

    editor
        .request(json!("a"), "textDocument/hover", json!({}))
        .await;
    let response = editor.recv().await;
    assert_eq!(response["id"], json!("a"));
    assert_eq!(response["error"]["code"], json!(-32600));
    assert!(response.get("result").is_none());
    assert_eq!(editor.peer.state(), ConnectionState::Uninitialized);
}

#[tokio::test]
async fn test_lifecycle_code_is_configurable() {
    let config = ConnectionConfig::default().with_lifecycle_violation_code(-32002);
    let mut editor = Editor::start_with(registry(), config);

    editor.request(json!(1), "shutdown", Value::Null).await;
    assert_eq!(editor.recv().await["error"]["code"], json!(-32002));
}

#[tokio::test]
async fn test_notifications_ignored_before_initialize() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let registry = HandlerRegistry::builder()
        .on_notification("textDocument/didOpen", move |_params, _peer| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .build();
    let mut editor = Editor::start(registry);

    editor.notify("textDocument/didOpen", json!({})).await;
    assert!(editor.is_silent(QUIET).await);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    editor.initialize().await;
    editor.notify("textDocument/didOpen", json!({})).await;
    editor.request(json!(1), "unknown/method", Value::Null).await;
    assert_eq!(editor.recv().await["error"]["code"], json!(-32601));
    // Give the notification worker time to run
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_initialize_rejected() {
    let mut editor = Editor::start(registry());
    editor.initialize().await;
    assert_eq!(editor.peer.state(), ConnectionState::Initialized);

    editor.request(json!(1), "initialize", json!({})).await;
    assert_eq!(editor.recv().await["error"]["code"], json!(-32600));
}

#[tokio::test]
async fn test_failed_initialize_can_be_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let registry = HandlerRegistry::builder()
        .on_request("initialize", move |_params, _peer| {
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    Err(HandlerError::invalid_params("rootUri is required"))
                } else {
                    Ok(json!({"capabilities": {}}))
                }
            }
        })
        .build();
    let mut editor = Editor::start(registry);

    editor.request(json!(1), "initialize", json!({})).await;
    assert_eq!(editor.recv().await["error"]["code"], json!(-32602));
    assert_eq!(editor.peer.state(), ConnectionState::Uninitialized);

    editor.request(json!(2), "initialize", json!({})).await;
    assert_eq!(editor.recv().await["result"], json!({"capabilities": {}}));
    assert_eq!(editor.peer.state(), ConnectionState::Initialized);
}

#[tokio::test]
async fn test_shutdown_then_exit_is_clean() {
    let mut editor = Editor::start(registry());
    editor.initialize().await;

    editor.request(json!(1), "shutdown", Value::Null).await;
    assert_eq!(
        editor.recv().await,
        json!({"jsonrpc": "2.0", "id": 1, "result": null})
    );

    // Requests after shutdown are rejected
    editor
        .request(json!(2), "textDocument/hover", Value::Null)
        .await;
    assert_eq!(editor.recv().await["error"]["code"], json!(-32600));

    editor.notify("exit", Value::Null).await;
    // No response after exit, not even an error
    editor
        .request(json!(3), "textDocument/hover", Value::Null)
        .await;
    assert!(editor.is_silent(QUIET).await);

    assert_eq!(
        editor.outcome().await.unwrap(),
        ConnectionOutcome::Exited { clean: true }
    );
}

#[tokio::test]
async fn test_exit_without_shutdown_is_unclean() {
    let mut editor = Editor::start(registry());
    editor.initialize().await;

    editor.notify("exit", Value::Null).await;
    let outcome = editor.outcome().await.unwrap();
    assert_eq!(outcome, ConnectionOutcome::Exited { clean: false });
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_default_shutdown_without_handler() {
    let mut editor = Editor::start(HandlerRegistry::default());
    editor.initialize().await;

    editor.request(json!(9), "shutdown", Value::Null).await;
    assert_eq!(
        editor.recv().await,
        json!({"jsonrpc": "2.0", "id": 9, "result": null})
    );
    editor.notify("exit", Value::Null).await;

    let outcome = editor.outcome().await.unwrap();
    assert_eq!(outcome.exit_code(), 0);
}
