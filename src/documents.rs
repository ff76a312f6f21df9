//! Open-document tracking for the server binary.
//!
//! Fed by the document synchronization notifications, which the dispatcher
//! delivers in receipt order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crystalmath_lsp::lsp::types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams, Position,
    TextDocumentContentChangeEvent,
};
use crystalmath_lsp::rpc::HandlerError;
use tracing::{debug, warn};
use url::Url;

/// A document the client has opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDocument {
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: Mutex<HashMap<Url, OpenDocument>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> MutexGuard<'_, HashMap<Url, OpenDocument>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a newly opened document. Reopening replaces the old contents.
    pub fn open(&self, params: DidOpenTextDocumentParams) -> Result<Url, HandlerError> {
        let item = params.text_document;
        let uri = parse_uri(&item.uri)?;

        debug!("Opened {} ({}, v{})", uri, item.language_id, item.version);
        self.docs().insert(
            uri.clone(),
            OpenDocument {
                language_id: item.language_id,
                version: item.version,
                text: item.text,
            },
        );
        Ok(uri)
    }

    /// Apply content changes in order.
    ///
    /// All or nothing: if any change fails the document keeps its previous
    /// text and version. Changes to a document that was never opened are
    /// logged and ignored.
    pub fn change(&self, params: DidChangeTextDocumentParams) -> Result<Url, HandlerError> {
        let uri = parse_uri(&params.text_document.uri)?;
        let mut docs = self.docs();

        let Some(doc) = docs.get_mut(&uri) else {
            warn!("Change for unopened document {}", uri);
            return Ok(uri);
        };

        let mut text = doc.text.clone();
        for change in params.content_changes {
            apply_change(&mut text, change)?;
        }
        doc.text = text;
        if let Some(version) = params.text_document.version {
            doc.version = version;
        }
        debug!("Changed {} (v{})", uri, doc.version);
        Ok(uri)
    }

    /// Stop tracking a document. Returns its uri.
    pub fn close(&self, params: DidCloseTextDocumentParams) -> Result<Url, HandlerError> {
        let uri = parse_uri(&params.text_document.uri)?;
        if self.docs().remove(&uri).is_none() {
            warn!("Close for unopened document {}", uri);
        }
        Ok(uri)
    }

    pub fn get(&self, uri: &Url) -> Option<OpenDocument> {
        self.docs().get(uri).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs().len()
    }
}

fn parse_uri(raw: &str) -> Result<Url, HandlerError> {
    Url::parse(raw).map_err(|e| HandlerError::invalid_params(format!("Invalid uri {:?}: {}", raw, e)))
}

fn apply_change(text: &mut String, change: TextDocumentContentChangeEvent) -> Result<(), HandlerError> {
    let Some(range) = change.range else {
        *text = change.text;
        return Ok(());
    };

    let start = byte_offset(text, range.start);
    let end = byte_offset(text, range.end);
    match (start, end) {
        (Some(start), Some(end)) if start <= end => {
            text.replace_range(start..end, &change.text);
            Ok(())
        }
        _ => Err(HandlerError::invalid_params(format!(
            "Range {}:{}-{}:{} is outside the document",
            range.start.line, range.start.character, range.end.line, range.end.character
        ))),
    }
}

/// Byte offset of an LSP position. `character` counts UTF-16 code units; a
/// column past the end of the line clamps to the line end.
fn byte_offset(text: &str, position: Position) -> Option<usize> {
    let mut line_start = 0;
    for _ in 0..position.line {
        line_start += text[line_start..].find('\n')? + 1;
    }

    let line = &text[line_start..];
    let line = &line[..line.find('\n').unwrap_or(line.len())];

    let mut units = 0;
    for (idx, ch) in line.char_indices() {
        if units >= position.character as usize {
            return Some(line_start + idx);
        }
        units += ch.len_utf16();
    }
    Some(line_start + line.len())
}
