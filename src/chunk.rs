//! Paragraph-boundary text chunker.
//!
//! Splits an extracted text blob into pieces of at most `max_tokens`
//! (approximated as 4 characters per token). Splits happen on blank lines
//! first; a paragraph longer than the limit is cut at the last newline or
//! space before the limit.

use sha2::{Digest, Sha256};

const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

/// Split text into chunks with contiguous indices starting at 0. Blank
/// input yields no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<TextChunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunker = Chunker {
        max_chars,
        chunks: Vec::new(),
        buf: String::new(),
    };

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() > max_chars {
            chunker.flush();
            chunker.hard_split(trimmed);
            continue;
        }
        if !chunker.buf.is_empty() && chunker.buf.len() + 2 + trimmed.len() > max_chars {
            chunker.flush();
        }
        if !chunker.buf.is_empty() {
            chunker.buf.push_str("\n\n");
        }
        chunker.buf.push_str(trimmed);
    }
    chunker.flush();
    chunker.chunks
}

struct Chunker {
    max_chars: usize,
    chunks: Vec<TextChunk>,
    buf: String,
}

impl Chunker {
    fn push(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.chunks.push(TextChunk {
            index: self.chunks.len(),
            text: text.to_string(),
        });
    }

    fn flush(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.push(&buf);
    }

    fn hard_split(&mut self, mut remaining: &str) {
        while !remaining.is_empty() {
            if remaining.len() <= self.max_chars {
                self.push(remaining);
                break;
            }
            let mut limit = self.max_chars;
            while !remaining.is_char_boundary(limit) {
                limit -= 1;
            }
            let window = &remaining[..limit];
            let cut = window
                .rfind('\n')
                .or_else(|| window.rfind(' '))
                .filter(|&pos| pos > 0)
                .map(|pos| pos + 1)
                .unwrap_or(limit.max(first_char_len(remaining)));
            self.push(&remaining[..cut]);
            remaining = &remaining[cut..];
        }
    }
}

fn first_char_len(s: &str) -> usize {
    s.chars().next().map(char::len_utf8).unwrap_or(0)
}

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
