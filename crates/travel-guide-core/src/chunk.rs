//! Fixed-size, overlapping character chunker.
//!
//! Splits corpus text into [`Chunk`]s of at most `size` characters where
//! each chunk after the first starts `overlap` characters before the end
//! of its predecessor. Sizes are counted in Unicode scalar values, so a
//! multi-byte character is never cut in half.
//!
//! Each chunk records its character range in the source and a SHA-256
//! hash of its text, which the vector store persists alongside the
//! embedding.
//!
//! # Algorithm
//!
//! 1. Validate `overlap < size` and `size > 0`.
//! 2. Start at character 0 and emit `[start, min(start + size, n))`.
//! 3. Stop once a chunk reaches the end of the text.
//! 4. Otherwise advance `start` by `size - overlap` and repeat.
//!
//! Text no longer than `size` produces exactly one chunk holding the whole
//! input. Empty text produces no chunks.
//!
//! # Example
//!
//! ```rust
//! use travel_guide_core::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams::new(10, 4).unwrap();
//! let chunks = chunk_text("abcdefghijklmnop", params);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "abcdefghij");
//! assert_eq!(chunks[1].text, "ghijklmnop");
//! ```

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::Chunk;

/// Invalid chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("chunk size must be > 0")]
    ZeroSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Validated chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    size: usize,
    overlap: usize,
}

impl ChunkParams {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if size == 0 {
            return Err(ChunkError::ZeroSize);
        }
        if overlap >= size {
            return Err(ChunkError::OverlapTooLarge { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of two adjacent chunks.
    pub fn step(&self) -> usize {
        self.size - self.overlap
    }
}

/// A restartable chunk sequence over a borrowed text.
///
/// Character boundaries are computed once; every call to [`Chunker::iter`]
/// starts a fresh pass that yields the same chunks in the same order.
pub struct Chunker<'a> {
    text: &'a str,
    params: ChunkParams,
    /// Byte offset of every character, plus `text.len()` as a sentinel.
    boundaries: Vec<usize>,
}

impl<'a> Chunker<'a> {
    pub fn new(text: &'a str, params: ChunkParams) -> Self {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());
        Self {
            text,
            params,
            boundaries,
        }
    }

    /// Number of characters in the source text.
    pub fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn iter(&self) -> Chunks<'_> {
        Chunks {
            text: self.text,
            boundaries: &self.boundaries,
            params: self.params,
            next_start: (self.char_len() > 0).then_some(0),
            index: 0,
        }
    }
}

/// Iterator returned by [`Chunker::iter`].
pub struct Chunks<'c> {
    text: &'c str,
    boundaries: &'c [usize],
    params: ChunkParams,
    next_start: Option<usize>,
    index: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next_start?;
        let len = self.boundaries.len() - 1;
        let end = (start + self.params.size).min(len);

        self.next_start = if end >= len {
            None
        } else {
            Some(start + self.params.step())
        };

        let text = &self.text[self.boundaries[start]..self.boundaries[end]];
        let chunk = make_chunk(self.index, start, end, text);
        self.index += 1;
        Some(chunk)
    }
}

/// Chunk `text` eagerly. Equivalent to collecting [`Chunker::iter`].
pub fn chunk_text(text: &str, params: ChunkParams) -> Vec<Chunk> {
    Chunker::new(text, params).iter().collect()
}

/// Rebuild the source text from a chunk sequence by dropping each
/// chunk's leading overlap with its predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        out.extend(chunk.text.chars().skip(skip));
        covered = chunk.end;
    }
    out
}

fn make_chunk(index: usize, start: usize, end: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());

    Chunk {
        index,
        start,
        end,
        text: text.to_string(),
        hash: format!("{:x}", hasher.finalize()),
    }
}
