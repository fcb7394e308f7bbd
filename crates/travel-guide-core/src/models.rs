//! Core data models shared by the ingestion and retrieval pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the corpus bytes were turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    /// The file was valid UTF-8.
    Utf8,
    /// Invalid sequences were replaced with `U+FFFD`.
    Utf8Lossy,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf8Lossy => "utf-8-lossy",
        }
    }
}

/// The knowledge-base text loaded from a single file.
#[derive(Debug, Clone)]
pub struct CorpusDocument {
    pub path: PathBuf,
    pub text: String,
    pub encoding: TextEncoding,
}

/// A contiguous, overlap-adjusted slice of a [`CorpusDocument`].
///
/// `start` and `end` are character (not byte) offsets into the source
/// text, half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// One ranked hit from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// 1-based rank within the result list.
    pub rank: usize,
    /// Position of the chunk in the original corpus.
    pub chunk_index: usize,
    pub text: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// A single question/answer exchange within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: String,
    pub query: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}
