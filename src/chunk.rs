//! Paragraph-boundary text chunker with overlap.
//!
//! Splits page text into [`TextChunk`]s that respect a configurable
//! `chunk_size` (in tokens). Splitting occurs on paragraph boundaries
//! (`\n\n`) to preserve semantic coherence within each chunk; each chunk
//! after the first is prefixed with up to `chunk_overlap` tokens of trailing
//! context from the previous chunk.
//!
//! # Algorithm
//!
//! 1. Convert tokens to characters using a 4 chars/token ratio.
//! 2. Accumulate paragraphs until the next one would exceed the content
//!    budget (`chunk_size - chunk_overlap`), then flush.
//! 3. Paragraphs larger than the budget are hard-split at the nearest
//!    newline or space boundary.
//! 4. Prefix every chunk but the first with the tail of its predecessor,
//!    starting at a word boundary.

use sha2::{Digest, Sha256};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// A chunk of page text, before it becomes a [`Node`](crate::models::Node).
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Contiguous index within the page, starting at 0.
    pub index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Split text into overlapping chunks. Whitespace-only text yields no chunks.
///
/// Callers guarantee `chunk_overlap < chunk_size` (validated with the pack
/// options).
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let overlap_chars = chunk_overlap * CHARS_PER_TOKEN;
    let budget = chunk_size.saturating_sub(chunk_overlap).max(1) * CHARS_PER_TOKEN;

    let pieces = split_paragraphs(text, budget);

    let mut chunks = Vec::with_capacity(pieces.len());
    for (index, piece) in pieces.iter().enumerate() {
        let text = if index == 0 {
            piece.clone()
        } else {
            let tail = overlap_tail(&pieces[index - 1], overlap_chars);
            if tail.is_empty() {
                piece.clone()
            } else {
                format!("{} {}", tail, piece)
            }
        };
        chunks.push(make_chunk(index, text));
    }
    chunks
}

fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
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

fn hard_split(paragraph: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let split_at = floor_char_boundary(remaining, remaining.len().min(max_chars));
        let split_at = if split_at == 0 {
            next_char_boundary(remaining)
        } else {
            split_at
        };
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
}

/// Trailing context of at most `max_chars` bytes, starting at a word boundary.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    if text.len() <= max_chars {
        return text;
    }
    let start = ceil_char_boundary(text, text.len() - max_chars);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start(),
        None => tail,
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn next_char_boundary(s: &str) -> usize {
    s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
}

fn make_chunk(index: usize, text: String) -> TextChunk {
    TextChunk {
        index,
        hash: sha256_hex(text.as_bytes()),
        text,
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 512, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", 512, 200).is_empty());
        assert!(chunk_text(" \n\n \t", 512, 200).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // budget = (8 - 2) * 4 = 24 chars
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text(text, 8, 2);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_overlap_carries_previous_tail() {
        let text = "alpha beta gamma delta.\n\nepsilon zeta eta theta.";
        let chunks = chunk_text(text, 8, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "alpha beta gamma delta.");
        // tail of at most 8 chars starting at a word boundary
        assert!(chunks[1].text.starts_with("delta. epsilon"));
    }

    #[test]
    fn test_zero_overlap_has_no_prefix() {
        let text = "alpha beta gamma delta.\n\nepsilon zeta eta theta.";
        let chunks = chunk_text(text, 6, 0);
        assert_eq!(chunks[1].text, "epsilon zeta eta theta.");
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "年度报告显示收入增长了百分之十二，利润率保持稳定。".repeat(10);
        let chunks = chunk_text(&text, 4, 1);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text(text, 3, 1);
        let c2 = chunk_text(text, 3, 1);
        assert_eq!(c1, c2);
    }
}
