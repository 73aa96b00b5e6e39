use std::fs;
use std::panic;
use std::path::Path;

use tracing::{debug, warn};

use crate::document::{SourceDocument, SourceKind};
use crate::error::{AssessError, Result};

/// Load a file into ordered source records: one per PDF page, or one for a
/// whole plain-text file.
///
/// Image-only PDF pages come back with empty text rather than an error; the
/// caller decides whether that is fatal.
pub fn load_document(path: &Path, kind: SourceKind) -> Result<Vec<SourceDocument>> {
    let origin = origin_name(path);
    let docs = match kind {
        SourceKind::Pdf => load_pdf(path, &origin)?,
        SourceKind::PlainText => vec![load_plain_text(path, &origin)?],
    };
    let chars: usize = docs.iter().map(SourceDocument::char_count).sum();
    debug!(file = %origin, kind = kind.as_str(), records = docs.len(), chars, "loaded document");
    Ok(docs)
}

fn load_pdf(path: &Path, origin: &str) -> Result<Vec<SourceDocument>> {
    // pdf-extract panics on some malformed inputs instead of returning an error.
    let extracted = panic::catch_unwind(|| pdf_extract::extract_text_by_pages(path))
        .map_err(|_| AssessError::unreadable(path, "pdf parser aborted on malformed input"))?
        .map_err(|e| AssessError::unreadable(path, format!("pdf extract failed: {e}")))?;
    if extracted.is_empty() {
        return Err(AssessError::unreadable(path, "pdf has no pages"));
    }
    let mut docs = Vec::with_capacity(extracted.len());
    for (idx, text) in extracted.into_iter().enumerate() {
        let doc = SourceDocument::new(text, origin, Some(idx as u32));
        if doc.is_blank() {
            warn!(file = %origin, page = idx + 1, "pdf page has no extractable text");
        }
        docs.push(doc);
    }
    Ok(docs)
}

fn load_plain_text(path: &Path, origin: &str) -> Result<SourceDocument> {
    let bytes = fs::read(path).map_err(|e| AssessError::unreadable(path, e))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| AssessError::unreadable(path, format!("not valid UTF-8: {e}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text).to_string();
    Ok(SourceDocument::new(text, origin, None))
}

fn origin_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
