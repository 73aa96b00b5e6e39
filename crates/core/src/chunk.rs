use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::document::{DocumentMetadata, SourceDocument};
use crate::error::{AssessError, Result};

const CHUNK_VERSION: u32 = 1;

/// What to do with a single separator-delimited segment longer than `chunk_size`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Emit the segment whole as its own chunk, exceeding the nominal bound.
    #[default]
    Keep,
    /// Cut the segment into `chunk_size`-char pieces before merging.
    Split,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkConfig {
    pub separator: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub oversize: OversizePolicy,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            separator: "\n".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            oversize: OversizePolicy::Keep,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(AssessError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AssessError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A bounded span of source text, the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    /// Position in the session-wide chunk sequence.
    pub ordinal: usize,
    pub text: String,
    pub metadata: DocumentMetadata,
    /// `[start, end)` in chars of the parent document's text.
    pub span: [usize; 2],
}

impl Chunk {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// A merged window before provenance is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy)]
struct Segment<'a> {
    text: &'a str,
    start: usize,
    len: usize,
}

impl Segment<'_> {
    fn end(&self) -> usize {
        self.start + self.len
    }
}

pub struct Chunker {
    config: ChunkConfig,
    separator_len: usize,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        let separator_len = config.separator.chars().count();
        Ok(Self {
            config,
            separator_len,
        })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Chunk every document independently, keeping document order then
    /// intra-document order.
    pub fn split_documents(&self, documents: &[SourceDocument]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for doc in documents {
            for window in self.split_text(&doc.text) {
                let ordinal = chunks.len();
                chunks.push(Chunk {
                    chunk_id: stable_chunk_id(&doc.metadata, ordinal, window.start, window.end),
                    ordinal,
                    text: window.text,
                    metadata: doc.metadata.clone(),
                    span: [window.start, window.end],
                });
            }
        }
        chunks
    }

    pub fn split_text(&self, text: &str) -> Vec<TextWindow> {
        let mut segments = split_segments(text, &self.config.separator);
        if self.config.oversize == OversizePolicy::Split {
            segments = segments
                .into_iter()
                .flat_map(|seg| hard_split(seg, self.config.chunk_size))
                .collect();
        }
        self.merge_segments(&segments)
    }

    fn merge_segments(&self, segments: &[Segment<'_>]) -> Vec<TextWindow> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let mut windows = Vec::new();
        let mut current: VecDeque<Segment<'_>> = VecDeque::new();
        let mut total = 0usize;
        for seg in segments {
            if total + seg.len + self.joiner_len(&current) > size {
                if total > size {
                    warn!(
                        chunk_chars = total,
                        chunk_size = size,
                        "kept an unsplit segment longer than chunk_size"
                    );
                }
                if !current.is_empty() {
                    if let Some(window) = self.join(&current) {
                        windows.push(window);
                    }
                    while total > overlap
                        || (total > 0 && total + seg.len + self.joiner_len(&current) > size)
                    {
                        let Some(front) = current.pop_front() else {
                            break;
                        };
                        total -= front.len + self.joiner_len(&current);
                    }
                }
            }
            current.push_back(*seg);
            total += seg.len + if current.len() > 1 { self.separator_len } else { 0 };
        }
        if total > size {
            warn!(
                chunk_chars = total,
                chunk_size = size,
                "kept an unsplit segment longer than chunk_size"
            );
        }
        if let Some(window) = self.join(&current) {
            windows.push(window);
        }
        windows
    }

    fn joiner_len(&self, current: &VecDeque<Segment<'_>>) -> usize {
        if current.is_empty() {
            0
        } else {
            self.separator_len
        }
    }

    fn join(&self, segments: &VecDeque<Segment<'_>>) -> Option<TextWindow> {
        let first = segments.front()?;
        let last = segments.back()?;
        let joined = segments
            .iter()
            .map(|seg| seg.text)
            .collect::<Vec<_>>()
            .join(&self.config.separator);
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            return None;
        }
        let leading = joined.chars().take_while(|c| c.is_whitespace()).count();
        let trailing = joined.chars().rev().take_while(|c| c.is_whitespace()).count();
        Some(TextWindow {
            text: trimmed.to_string(),
            start: first.start + leading,
            end: last.end().saturating_sub(trailing),
        })
    }
}

/// Literal split; an empty separator splits into single characters.
fn split_segments<'a>(text: &'a str, separator: &str) -> Vec<Segment<'a>> {
    let mut out = Vec::new();
    if separator.is_empty() {
        for (idx, (byte, ch)) in text.char_indices().enumerate() {
            out.push(Segment {
                text: &text[byte..byte + ch.len_utf8()],
                start: idx,
                len: 1,
            });
        }
        return out;
    }
    let separator_len = separator.chars().count();
    let mut char_pos = 0usize;
    for piece in text.split(separator) {
        let len = piece.chars().count();
        if !piece.is_empty() {
            out.push(Segment {
                text: piece,
                start: char_pos,
                len,
            });
        }
        char_pos += len + separator_len;
    }
    out
}

fn hard_split(seg: Segment<'_>, size: usize) -> Vec<Segment<'_>> {
    if seg.len <= size {
        return vec![seg];
    }
    let mut out = Vec::new();
    let mut piece_byte = 0usize;
    let mut piece_start = seg.start;
    let mut count = 0usize;
    for (byte, _) in seg.text.char_indices() {
        if count == size {
            out.push(Segment {
                text: &seg.text[piece_byte..byte],
                start: piece_start,
                len: count,
            });
            piece_byte = byte;
            piece_start += count;
            count = 0;
        }
        count += 1;
    }
    if count > 0 {
        out.push(Segment {
            text: &seg.text[piece_byte..],
            start: piece_start,
            len: count,
        });
    }
    out
}

fn stable_chunk_id(meta: &DocumentMetadata, ordinal: usize, start: usize, end: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(meta.origin_file.as_bytes());
    hasher.update(CHUNK_VERSION.to_be_bytes());
    hasher.update(meta.page_index.map(|p| p as i64).unwrap_or(-1).to_be_bytes());
    hasher.update(ordinal.to_be_bytes());
    hasher.update(start.to_be_bytes());
    hasher.update(end.to_be_bytes());
    hex::encode(hasher.finalize())
}
