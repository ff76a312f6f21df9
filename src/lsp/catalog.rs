//! The fixed method catalog.
//!
//! Each entry names a method, who sends it, whether it expects a response,
//! and the params/result contracts it carries. The core never looks inside
//! those payloads; the contract names are for logging and documentation.

/// Who originates a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Whether a method is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
}

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    pub method: &'static str,
    pub direction: Direction,
    pub kind: MessageKind,
    /// Name of the params contract.
    pub params: &'static str,
    /// Name of the result contract; `None` for notifications.
    pub result: Option<&'static str>,
}

/// Method name constants.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";

    pub const SHOW_MESSAGE: &str = "window/showMessage";
    pub const LOG_MESSAGE: &str = "window/logMessage";

    pub const DID_CHANGE_CONFIGURATION: &str = "workspace/didChangeConfiguration";
    pub const DID_CHANGE_WATCHED_FILES: &str = "workspace/didChangeWatchedFiles";

    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const DID_CLOSE: &str = "textDocument/didClose";

    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

    pub const COMPLETION: &str = "textDocument/completion";
    pub const COMPLETION_RESOLVE: &str = "completionItem/resolve";
    pub const HOVER: &str = "textDocument/hover";
    pub const SIGNATURE_HELP: &str = "textDocument/signatureHelp";
    pub const DEFINITION: &str = "textDocument/definition";
    pub const REFERENCES: &str = "textDocument/references";
    pub const DOCUMENT_HIGHLIGHT: &str = "textDocument/documentHighlight";
    pub const DOCUMENT_SYMBOL: &str = "textDocument/documentSymbol";
    pub const WORKSPACE_SYMBOL: &str = "workspace/symbol";
    pub const CODE_ACTION: &str = "textDocument/codeAction";
    pub const CODE_LENS: &str = "textDocument/codeLens";
    pub const CODE_LENS_RESOLVE: &str = "codeLens/resolve";
    pub const FORMATTING: &str = "textDocument/formatting";
    pub const RANGE_FORMATTING: &str = "textDocument/rangeFormatting";
    pub const ON_TYPE_FORMATTING: &str = "textDocument/onTypeFormatting";
    pub const RENAME: &str = "textDocument/rename";
}

use methods::*;
use Direction::{ClientToServer, ServerToClient};
use MessageKind::{Notification, Request};

const fn request(method: &'static str, params: &'static str, result: &'static str) -> MethodSpec {
    MethodSpec {
        method,
        direction: ClientToServer,
        kind: Request,
        params,
        result: Some(result),
    }
}

const fn notification(
    method: &'static str,
    direction: Direction,
    params: &'static str,
) -> MethodSpec {
    MethodSpec {
        method,
        direction,
        kind: Notification,
        params,
        result: None,
    }
}

/// Every method of this protocol version.
pub const CATALOG: &[MethodSpec] = &[
    // Lifecycle
    request(INITIALIZE, "InitializeParams", "InitializeResult"),
    request(SHUTDOWN, "null", "null"),
    notification(EXIT, ClientToServer, "null"),
    // Window
    notification(SHOW_MESSAGE, ServerToClient, "ShowMessageParams"),
    notification(LOG_MESSAGE, ServerToClient, "LogMessageParams"),
    // Workspace
    notification(
        DID_CHANGE_CONFIGURATION,
        ClientToServer,
        "DidChangeConfigurationParams",
    ),
    notification(
        DID_CHANGE_WATCHED_FILES,
        ClientToServer,
        "DidChangeWatchedFilesParams",
    ),
    // Document synchronization
    notification(DID_OPEN, ClientToServer, "DidOpenTextDocumentParams"),
    notification(DID_CHANGE, ClientToServer, "DidChangeTextDocumentParams"),
    notification(DID_CLOSE, ClientToServer, "DidCloseTextDocumentParams"),
    // Diagnostics
    notification(
        PUBLISH_DIAGNOSTICS,
        ServerToClient,
        "PublishDiagnosticsParams",
    ),
    // Language features
    request(COMPLETION, "TextDocumentPositionParams", "CompletionItem[] | CompletionList"),
    request(COMPLETION_RESOLVE, "CompletionItem", "CompletionItem"),
    request(HOVER, "TextDocumentPositionParams", "Hover"),
    request(SIGNATURE_HELP, "TextDocumentPositionParams", "SignatureHelp"),
    request(DEFINITION, "TextDocumentPositionParams", "Location | Location[]"),
    request(REFERENCES, "ReferenceParams", "Location[]"),
    request(
        DOCUMENT_HIGHLIGHT,
        "TextDocumentPositionParams",
        "DocumentHighlight[]",
    ),
    request(DOCUMENT_SYMBOL, "DocumentSymbolParams", "SymbolInformation[]"),
    request(WORKSPACE_SYMBOL, "WorkspaceSymbolParams", "SymbolInformation[]"),
    request(CODE_ACTION, "CodeActionParams", "Command[]"),
    request(CODE_LENS, "CodeLensParams", "CodeLens[]"),
    request(CODE_LENS_RESOLVE, "CodeLens", "CodeLens"),
    request(FORMATTING, "DocumentFormattingParams", "TextEdit[]"),
    request(RANGE_FORMATTING, "DocumentRangeFormattingParams", "TextEdit[]"),
    request(ON_TYPE_FORMATTING, "DocumentOnTypeFormattingParams", "TextEdit[]"),
    request(RENAME, "RenameParams", "WorkspaceEdit"),
];

/// Look up a method in the catalog.
pub fn lookup(method: &str) -> Option<&'static MethodSpec> {
    CATALOG.iter().find(|spec| spec.method == method)
}
