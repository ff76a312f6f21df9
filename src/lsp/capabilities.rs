//! Capability negotiation.
//!
//! Capabilities are a passive declaration sent in the `initialize` result.
//! They are advisory to the peer: invoking a method whose capability was not
//! declared still goes through ordinary handler lookup.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::catalog::methods;

/// How the server wants document changes delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDocumentSyncKind {
    None = 0,
    Full = 1,
    Incremental = 2,
}

impl Serialize for TextDocumentSyncKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for TextDocumentSyncKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(TextDocumentSyncKind::None),
            1 => Ok(TextDocumentSyncKind::Full),
            2 => Ok(TextDocumentSyncKind::Incremental),
            other => Err(serde::de::Error::custom(format!(
                "invalid text document sync kind {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    #[serde(default, skip_serializing_if = "is_false")]
    pub resolve_provider: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger_characters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelpOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger_characters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLensOptions {
    #[serde(default, skip_serializing_if = "is_false")]
    pub resolve_provider: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOnTypeFormattingOptions {
    pub first_trigger_character: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub more_trigger_character: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Optional features the server declares at `initialize` time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_document_sync: Option<TextDocumentSyncKind>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hover_provider: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_provider: Option<CompletionOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_help_provider: Option<SignatureHelpOptions>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub definition_provider: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub references_provider: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub document_highlight_provider: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub document_symbol_provider: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub workspace_symbol_provider: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub code_action_provider: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_lens_provider: Option<CodeLensOptions>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub document_formatting_provider: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub document_range_formatting_provider: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_on_type_formatting_provider: Option<DocumentOnTypeFormattingOptions>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rename_provider: bool,
}

impl ServerCapabilities {
    /// Derive capability flags from the set of methods that have handlers.
    ///
    /// `textDocument/onTypeFormatting` is never derived because it needs a
    /// trigger character only the caller knows.
    pub fn derive_from<'a>(registered: impl IntoIterator<Item = &'a str>) -> Self {
        let mut caps = ServerCapabilities::default();

        for method in registered {
            match method {
                methods::DID_OPEN | methods::DID_CHANGE | methods::DID_CLOSE => {
                    caps.text_document_sync = Some(TextDocumentSyncKind::Full);
                }
                methods::HOVER => caps.hover_provider = true,
                methods::COMPLETION => {
                    caps.completion_provider.get_or_insert_with(Default::default);
                }
                methods::COMPLETION_RESOLVE => {
                    caps.completion_provider
                        .get_or_insert_with(Default::default)
                        .resolve_provider = true;
                }
                methods::SIGNATURE_HELP => {
                    caps.signature_help_provider = Some(SignatureHelpOptions::default());
                }
                methods::DEFINITION => caps.definition_provider = true,
                methods::REFERENCES => caps.references_provider = true,
                methods::DOCUMENT_HIGHLIGHT => caps.document_highlight_provider = true,
                methods::DOCUMENT_SYMBOL => caps.document_symbol_provider = true,
                methods::WORKSPACE_SYMBOL => caps.workspace_symbol_provider = true,
                methods::CODE_ACTION => caps.code_action_provider = true,
                methods::CODE_LENS => {
                    caps.code_lens_provider.get_or_insert_with(Default::default);
                }
                methods::CODE_LENS_RESOLVE => {
                    caps.code_lens_provider
                        .get_or_insert_with(Default::default)
                        .resolve_provider = true;
                }
                methods::FORMATTING => caps.document_formatting_provider = true,
                methods::RANGE_FORMATTING => caps.document_range_formatting_provider = true,
                methods::RENAME => caps.rename_provider = true,
                _ => {}
            }
        }

        caps
    }

    /// Whether the declared capabilities cover `method`.
    ///
    /// Methods with no associated capability (lifecycle, workspace
    /// notifications) are always covered.
    pub fn advertises(&self, method: &str) -> bool {
        match method {
            methods::DID_OPEN | methods::DID_CHANGE | methods::DID_CLOSE => {
                self.text_document_sync
                    .is_some_and(|kind| kind != TextDocumentSyncKind::None)
            }
            methods::HOVER => self.hover_provider,
            methods::COMPLETION => self.completion_provider.is_some(),
            methods::COMPLETION_RESOLVE => self
                .completion_provider
                .as_ref()
                .is_some_and(|opts| opts.resolve_provider),
            methods::SIGNATURE_HELP => self.signature_help_provider.is_some(),
            methods::DEFINITION => self.definition_provider,
            methods::REFERENCES => self.references_provider,
            methods::DOCUMENT_HIGHLIGHT => self.document_highlight_provider,
            methods::DOCUMENT_SYMBOL => self.document_symbol_provider,
            methods::WORKSPACE_SYMBOL => self.workspace_symbol_provider,
            methods::CODE_ACTION => self.code_action_provider,
            methods::CODE_LENS => self.code_lens_provider.is_some(),
            methods::CODE_LENS_RESOLVE => self
                .code_lens_provider
                .as_ref()
                .is_some_and(|opts| opts.resolve_provider),
            methods::FORMATTING => self.document_formatting_provider,
            methods::RANGE_FORMATTING => self.document_range_formatting_provider,
            methods::ON_TYPE_FORMATTING => self.document_on_type_formatting_provider.is_some(),
            methods::RENAME => self.rename_provider,
            _ => true,
        }
    }
}

/// Result of `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    pub capabilities: ServerCapabilities,
}

impl InitializeResult {
    pub fn new(capabilities: ServerCapabilities) -> Self {
        Self { capabilities }
    }

    /// Encode as the `initialize` response result.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error unchanged.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
