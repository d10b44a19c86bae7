//! Boundary-aware text chunker.
//!
//! Documents at or below the large-document threshold are kept whole as a
//! single chunk. Larger documents are split into ordered chunks of at most
//! `max_tokens` (approximated as characters) that end on a paragraph break,
//! a sentence end, or whitespace, searched for within a look-back window
//! before the hard limit. A hard cut only happens when the window contains
//! no boundary at all.

use crate::models::{Chunk, ChunkedDocument};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Chunking parameters, usually built from `[pipeline]` configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSettings {
    /// Texts longer than this many bytes are split.
    pub large_document_chars: usize,
    pub max_tokens: usize,
    /// How far back from the hard limit to look for a boundary.
    pub lookback_chars: usize,
}

impl ChunkSettings {
    fn max_chars(&self) -> usize {
        (self.max_tokens * CHARS_PER_TOKEN).max(1)
    }
}

impl From<&crate::config::PipelineConfig> for ChunkSettings {
    fn from(cfg: &crate::config::PipelineConfig) -> Self {
        Self {
            large_document_chars: cfg.large_document_chars,
            max_tokens: cfg.chunk_max_tokens,
            lookback_chars: cfg.sentence_lookback_chars,
        }
    }
}

/// Split extracted text into an ordered [`ChunkedDocument`].
///
/// Blank text yields zero chunks. Chunk indices are contiguous from 0 and
/// follow source order.
pub fn chunk_document(text: &str, settings: &ChunkSettings) -> ChunkedDocument {
    if text.trim().is_empty() {
        return ChunkedDocument::default();
    }

    if text.len() <= settings.large_document_chars {
        let mut chunks = Vec::with_capacity(1);
        push_chunk(&mut chunks, text, 0, text.len());
        return ChunkedDocument { chunks };
    }

    let max_chars = settings.max_chars();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        if text.len() - start <= max_chars {
            push_chunk(&mut chunks, text, start, text.len());
            break;
        }

        let hard_end = floor_char_boundary(text, start + max_chars);
        let window_start = floor_char_boundary(
            text,
            hard_end.saturating_sub(settings.lookback_chars).max(start + 1),
        );
        let split = find_boundary(text, window_start, hard_end)
            .filter(|&pos| pos > start)
            .unwrap_or(if hard_end > start {
                hard_end
            } else {
                // Single character wider than max_chars
                ceil_char_boundary(text, start + 1)
            });

        push_chunk(&mut chunks, text, start, split);
        start = split;
    }

    ChunkedDocument { chunks }
}

/// Best split position in `text[from..to]`, as a byte offset into `text`.
///
/// Preference order: paragraph break, sentence end, any whitespace.
fn find_boundary(text: &str, from: usize, to: usize) -> Option<usize> {
    if from >= to {
        return None;
    }
    let window = &text[from..to];

    if let Some(pos) = window.rfind("\n\n") {
        return Some(from + pos + 2);
    }

    let mut sentence_end = None;
    let mut prev: Option<(usize, char)> = None;
    for (i, c) in window.char_indices() {
        if let Some((pi, pc)) = prev {
            if matches!(pc, '.' | '!' | '?') && c.is_whitespace() {
                sentence_end = Some(from + pi + pc.len_utf8());
            }
        }
        prev = Some((i, c));
    }
    if sentence_end.is_some() {
        return sentence_end;
    }

    window
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .last()
        .map(|(i, c)| from + i + c.len_utf8())
}

fn push_chunk(chunks: &mut Vec<Chunk>, text: &str, start: usize, end: usize) {
    let piece = &text[start..end];
    let trimmed_start = start + (piece.len() - piece.trim_start().len());
    let trimmed_end = end - (piece.len() - piece.trim_end().len());
    if trimmed_start >= trimmed_end {
        return;
    }
    chunks.push(Chunk {
        index: chunks.len(),
        text: text[trimmed_start..trimmed_end].to_string(),
        char_range: trimmed_start..trimmed_end,
    });
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(text.len())
}
