//! Paragraph-boundary text chunker.
//!
//! Splits a document body into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`) to
//! keep each chunk coherent; oversized paragraphs are hard-split at line,
//! space or character boundaries (content is often Japanese, which has no
//! spaces, so every split point is checked against UTF-8 boundaries).
//!
//! When `overlap_tokens > 0`, every chunk after the first is prefixed with the
//! tail of its predecessor so that retrieval does not lose sentences that
//! straddle a boundary.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, SourceItem};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split a document into chunks with contiguous indices starting at 0.
///
/// Whitespace-only bodies produce no chunks.
pub fn chunk_item(item: &SourceItem, max_tokens: usize, overlap_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let pieces = split_pieces(&item.body, max_chars);

    let mut chunks = Vec::with_capacity(pieces.len());
    let mut previous: Option<&str> = None;
    for (index, piece) in pieces.iter().enumerate() {
        let text = match previous {
            Some(prev) if overlap_chars > 0 => {
                let tail = overlap_tail(prev, overlap_chars);
                if tail.is_empty() {
                    piece.clone()
                } else {
                    format!("{}\n\n{}", tail, piece)
                }
            }
            _ => piece.clone(),
        };
        chunks.push(make_chunk(item, index as i64, &text));
        previous = Some(piece);
    }

    chunks
}

fn split_pieces(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = hard_split_point(remaining, max_chars);
                let piece = remaining[..split_at].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[split_at..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

/// Byte offset at which to cut `text` so the head is at most `max_chars` bytes,
/// preferring a newline or space. Always makes progress.
fn hard_split_point(text: &str, max_chars: usize) -> usize {
    if text.len() <= max_chars {
        return text.len();
    }
    let limit = floor_char_boundary(text, max_chars);
    let preferred = text[..limit]
        .rfind(|c: char| c == '\n' || c == ' ')
        .map(|pos| pos + 1)
        .filter(|&pos| pos > 0 && pos < limit);

    match preferred {
        Some(pos) => pos,
        None if limit > 0 => limit,
        None => text.chars().next().map(char::len_utf8).unwrap_or(text.len()),
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// The last `overlap_chars` bytes of `text`, starting at a word boundary when one exists.
fn overlap_tail(text: &str, overlap_chars: usize) -> &str {
    if text.len() <= overlap_chars {
        return text.trim();
    }
    let mut start = text.len() - overlap_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) if pos + 1 < tail.len() => tail[pos..].trim(),
        _ => tail.trim(),
    }
}

fn make_chunk(item: &SourceItem, index: i64, text: &str) -> Chunk {
    Chunk {
        id: format!("{}#{}", item.source_id, index),
        source_id: item.source_id.clone(),
        source: item.source.clone(),
        chunk_index: index,
        text: text.to_string(),
        hash: content_hash(text),
    }
}

/// SHA-256 of a chunk's text, used to skip duplicate chunks across documents.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
