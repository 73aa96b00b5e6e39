use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    PlainText,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::PlainText => "plain_text",
        }
    }

    /// Infer the kind from a file extension. Unknown extensions yield `None`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("pdf") => Some(SourceKind::Pdf),
            Some("txt") | Some("text") | Some("md") => Some(SourceKind::PlainText),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub origin_file: String,
    pub page_index: Option<u32>,
}

impl DocumentMetadata {
    /// Short provenance label used in prompts and rendered sources.
    pub fn label(&self) -> String {
        match self.page_index {
            Some(page) => format!("{}, page {}", self.origin_file, page + 1),
            None => self.origin_file.clone(),
        }
    }
}

/// One page (PDF) or one whole file (plain text) of extracted text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDocument {
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl SourceDocument {
    pub fn new(text: impl Into<String>, origin_file: impl Into<String>, page_index: Option<u32>) -> Self {
        Self {
            text: text.into(),
            metadata: DocumentMetadata {
                origin_file: origin_file.into(),
                page_index,
            },
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}
