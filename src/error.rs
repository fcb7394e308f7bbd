//! Error taxonomy for the retrieval pipeline and the itinerary generator.
//!
//! Library code returns these typed errors; the CLI wraps them in
//! `anyhow` and the HTTP server maps them onto status codes with
//! [`RagError::code`].

use thiserror::Error;

use travel_guide_core::chunk::ChunkError;
use travel_guide_core::retry::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RagError {
    #[error("knowledge base file not found: {0}")]
    CorpusNotFound(String),

    #[error("failed to read knowledge base {path}: {detail}")]
    CorpusReadError { path: String, detail: String },

    /// Rate limits persisted through every retry while building the index.
    #[error("embedding provider rate limited the index build: {0}")]
    EmbeddingRateLimited(String),

    #[error("embedding provider failed: {0}")]
    EmbeddingProviderError(String),

    /// The persisted index exists but cannot be read back.
    #[error("vector store is corrupted: {0}")]
    StoreCorrupted(String),

    /// The automatic rebuild of a corrupted index did not produce a
    /// usable store. Terminal for the life of the process.
    #[error("vector store rebuild failed: {0}")]
    RebuildFailed(Box<RagError>),

    /// Rate limits persisted through every retry while answering a query.
    #[error("answer generation was rate limited: {0}")]
    AskRateLimited(String),

    #[error("LLM provider failed: {0}")]
    LlmProviderError(String),

    #[error("invalid chunking parameters: {0}")]
    InvalidChunking(#[from] ChunkError),

    /// Filesystem or database failure that is not a corruption signal
    /// (permissions, disk full).
    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    /// Map an embedding failure raised while building the index.
    pub fn from_index_embedding(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited(msg) => RagError::EmbeddingRateLimited(msg),
            ProviderError::Failed(msg) => RagError::EmbeddingProviderError(msg),
        }
    }

    /// Map a failure raised while answering a question (query embedding
    /// or completion). Throttling becomes [`RagError::AskRateLimited`].
    pub fn from_ask(err: ProviderError, during_completion: bool) -> Self {
        match err {
            ProviderError::RateLimited(msg) => RagError::AskRateLimited(msg),
            ProviderError::Failed(msg) if during_completion => RagError::LlmProviderError(msg),
            ProviderError::Failed(msg) => RagError::EmbeddingProviderError(msg),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingRateLimited(_) | RagError::AskRateLimited(_)
        )
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::CorpusNotFound(_) => "corpus_not_found",
            RagError::CorpusReadError { .. } => "corpus_read_error",
            RagError::EmbeddingRateLimited(_) => "embedding_rate_limited",
            RagError::EmbeddingProviderError(_) => "embedding_provider_error",
            RagError::StoreCorrupted(_) => "store_corrupted",
            RagError::RebuildFailed(_) => "store_unavailable",
            RagError::AskRateLimited(_) => "rate_limited",
            RagError::LlmProviderError(_) => "llm_provider_error",
            RagError::InvalidChunking(_) => "invalid_chunking",
            RagError::Storage(_) => "storage_error",
        }
    }

    /// Short message suitable for an end user.
    pub fn user_message(&self) -> String {
        match self {
            RagError::CorpusNotFound(path) => {
                format!("RAG unavailable: the knowledge base file {} is missing.", path)
            }
            RagError::CorpusReadError { .. } => {
                "RAG unavailable: the knowledge base could not be read.".to_string()
            }
            RagError::EmbeddingRateLimited(_) => {
                "RAG is temporarily unavailable because the embedding service is busy. Please try again later."
                    .to_string()
            }
            RagError::AskRateLimited(_) => {
                "Too many requests right now. Please wait a moment and try again.".to_string()
            }
            RagError::StoreCorrupted(_) | RagError::RebuildFailed(_) => {
                "Unable to load detailed information at this time.".to_string()
            }
            RagError::EmbeddingProviderError(_) | RagError::LlmProviderError(_) => {
                "The AI service returned an error. Please try again.".to_string()
            }
            RagError::InvalidChunking(_) | RagError::Storage(_) => {
                "RAG unavailable: the index could not be prepared.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItineraryError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("itinerary generation was rate limited: {0}")]
    RateLimited(String),

    #[error("LLM provider failed: {0}")]
    Provider(String),
}

impl ItineraryError {
    pub fn code(&self) -> &'static str {
        match self {
            ItineraryError::MissingFields(_) => "missing_fields",
            ItineraryError::Invalid(_) => "bad_request",
            ItineraryError::RateLimited(_) => "rate_limited",
            ItineraryError::Provider(_) => "llm_provider_error",
        }
    }
}

impl From<ProviderError> for ItineraryError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited(msg) => ItineraryError::RateLimited(msg),
            ProviderError::Failed(msg) => ItineraryError::Provider(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_throttle_is_distinct() {
        let err = RagError::from_ask(ProviderError::RateLimited("429".into()), true);
        assert_eq!(err, RagError::AskRateLimited("429".into()));
        assert!(err.is_rate_limited());

        let err = RagError::from_ask(ProviderError::Failed("bad key".into()), true);
        assert_eq!(err.code(), "llm_provider_error");
    }

    #[test]
    fn test_index_throttle_message_says_try_later() {
        let err = RagError::from_index_embedding(ProviderError::RateLimited("429".into()));
        assert!(err.user_message().contains("try again later"));
    }

    #[test]
    fn test_rebuild_failure_message() {
        let err = RagError::RebuildFailed(Box::new(RagError::StoreCorrupted("x".into())));
        assert_eq!(
            err.user_message(),
            "Unable to load detailed information at this time."
        );
        assert!(err.to_string().contains("vector store is corrupted"));
    }

    #[test]
    fn test_missing_fields_display() {
        let err = ItineraryError::MissingFields(vec!["city", "month"]);
        assert_eq!(err.to_string(), "missing required fields: city, month");
    }
}
