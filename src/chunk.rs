//! Recursive separator-preference text chunker.
//!
//! Splits extracted text into [`Chunk`]s of at most `chunk_size` characters
//! with up to `chunk_overlap` characters carried over between neighbours.
//! Boundaries are tried coarse to fine: paragraph breaks, then
//! sentence-ending punctuation (CJK and Latin), then line breaks, clause
//! punctuation, spaces, and finally single characters.
//!
//! Each chunk receives a random UUID plus a SHA-256 hash of its text.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::loader::Section;
use crate::models::Chunk;

/// Separator preferences, coarsest first. The empty separator splits into
/// single characters and guarantees termination.
pub const SEPARATORS: &[&str] = &[
    "\n\n", "。", "！", "？", "；", ". ", "! ", "? ", "\n", "，", "、", " ", "",
];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    /// Split `text` into trimmed, non-empty pieces of at most `chunk_size` chars.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = "";
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut out = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                out.extend(self.merge(&fitting));
                fitting.clear();
            }
            if finer.is_empty() {
                push_trimmed(&mut out, piece);
            } else {
                out.extend(self.split_with(piece, finer));
            }
        }
        if !fitting.is_empty() {
            out.extend(self.merge(&fitting));
        }
        out
    }

    /// Greedily pack small pieces into chunks, keeping a tail of up to
    /// `chunk_overlap` chars as the start of the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut out, &join(&window));
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some((_, first_len)) => total -= first_len,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }

        if !window.is_empty() {
            push_trimmed(&mut out, &join(&window));
        }
        out
    }
}

/// Split `text` after every occurrence of `separator`, so each separator
/// stays at the end of the piece it closes. An empty separator yields chars.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, sep) in text.match_indices(separator) {
        let end = idx + sep.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    pieces.push(&text[start..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn join(window: &VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(piece, _)| *piece).collect()
}

fn push_trimmed(out: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Chunk every section of one document. Indices are contiguous from 0
/// across sections; each chunk keeps its section's page.
pub fn chunk_sections(source: &str, sections: &[Section], splitter: &TextSplitter) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for section in sections {
        for text in splitter.split(&section.text) {
            let index = chunks.len() as i64;
            chunks.push(make_chunk(source, section.page, index, &text));
        }
    }
    chunks
}

fn make_chunk(source: &str, page: Option<u32>, index: i64, text: &str) -> Chunk {
    let hash = hex::encode(Sha256::digest(text.as_bytes()));

    Chunk {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        page,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
