//! Recursive character splitting with overlap.
//!
//! The splitter cuts a text at the most natural separator that is present
//! (paragraphs, then lines, then words, then single characters), merges the
//! pieces back into chunks of at most `chunk_size` characters and carries up
//! to `overlap` characters of trailing pieces into the next chunk. Pieces that
//! are still too large are split again with the remaining separators.
//!
//! Separators stay attached to the piece they end, so every chunk is a
//! contiguous slice of the input and the input can be rebuilt from the chunks
//! by dropping the overlapping prefix of each one.

use std::collections::VecDeque;
use std::ops::Range;

use crate::{Config, RagError, Result};

/// Separators in order of preference. The empty separator cuts between characters.
pub const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// A chunk of the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The text content
    pub text: String,
    /// Position of the chunk in the split output
    pub index: usize,
    /// Byte offset where the chunk starts in the corpus
    pub start: usize,
    /// Byte offset one past the chunk's end in the corpus
    pub end: usize,
}

/// Splits text into overlapping chunks.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

/// A byte range of the input together with its length in characters.
type Piece = (Range<usize>, usize);

impl TextSplitter {
    /// Create a splitter. `overlap` must be smaller than `chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be positive".to_string()));
        }
        if overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        self.split_span(text, 0..text.len(), SEPARATORS)
            .into_iter()
            .enumerate()
            .map(|(index, span)| Chunk {
                text: text[span.clone()].to_string(),
                index,
                start: span.start,
                end: span.end,
            })
            .collect()
    }

    fn split_span(&self, text: &str, span: Range<usize>, separators: &[&str]) -> Vec<Range<usize>> {
        let slice = &text[span.clone()];
        if slice.chars().count() <= self.chunk_size {
            return vec![span];
        }

        let (separator, rest) = match separators
            .iter()
            .position(|s| s.is_empty() || slice.contains(s))
        {
            Some(i) => (separators[i], &separators[i + 1..]),
            None => ("", &[][..]),
        };

        let mut spans = Vec::new();
        let mut fitting: Vec<Piece> = Vec::new();

        for piece in split_keeping_separator(text, span, separator) {
            let len = text[piece.clone()].chars().count();
            if len <= self.chunk_size {
                fitting.push((piece, len));
            } else {
                spans.extend(self.merge(&fitting));
                fitting.clear();
                spans.extend(self.split_span(text, piece, rest));
            }
        }
        spans.extend(self.merge(&fitting));

        spans
    }

    /// Greedily merge adjacent pieces into chunks, keeping a tail of at most
    /// `overlap` characters from one chunk as the head of the next.
    fn merge(&self, pieces: &[Piece]) -> Vec<Range<usize>> {
        let mut merged = Vec::new();
        let mut window: VecDeque<&Piece> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = piece.1;
            if total + len > self.chunk_size && !window.is_empty() {
                merged.push(window_span(&window));

                while total > self.overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }

        if !window.is_empty() {
            merged.push(window_span(&window));
        }

        merged
    }
}

fn window_span(window: &VecDeque<&Piece>) -> Range<usize> {
    match (window.front(), window.back()) {
        (Some(first), Some(last)) => first.0.start..last.0.end,
        _ => 0..0,
    }
}

/// Split `span` at every occurrence of `separator`, keeping the separator at
/// the end of the piece it closes. An empty separator yields single characters.
fn split_keeping_separator(text: &str, span: Range<usize>, separator: &str) -> Vec<Range<usize>> {
    let slice = &text[span.clone()];

    if separator.is_empty() {
        return slice
            .char_indices()
            .map(|(i, c)| span.start + i..span.start + i + c.len_utf8())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = span.start;
    for (i, _) in slice.match_indices(separator) {
        let end = span.start + i + separator.len();
        pieces.push(start..end);
        start = end;
    }
    if start < span.end {
        pieces.push(start..span.end);
    }
    pieces
}
