//! TOML configuration for the travel guide.
//!
//! Every section is optional; a missing section takes its defaults.
//!
//! ```toml
//! [corpus]
//! path = "data/rag.txt"
//!
//! [index]
//! dir = "rag_db"
//!
//! [chunking]
//! size = 1000
//! overlap = 200
//!
//! [retrieval]
//! top_k = 4
//!
//! [embedding]
//! provider = "cohere"            # disabled | cohere | openai | ollama | hashing
//! model = "embed-english-v3.0"
//! dims = 1024
//!
//! [llm]
//! provider = "cohere"            # disabled | cohere | openai
//! model = "command-r-plus-08-2024"
//!
//! [history]
//! max_turns = 0                  # 0 = unbounded (default)
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```
//!
//! Relative `corpus.path` and `index.dir` values are resolved against the
//! directory containing the config file. API keys never live in the file;
//! they are read from `COHERE_API_KEY` / `OPENAI_API_KEY`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use travel_guide_core::chunk::ChunkParams;
use travel_guide_core::retry::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "./config/guide.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("data/rag.txt")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("rag_db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkParams> {
        ChunkParams::new(self.size, self.overlap)
            .map_err(|e| anyhow::anyhow!("invalid [chunking] section: {}", e))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway, Cohere proxy).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_embedding_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// After the index build is rate limited, requests fail fast for this
    /// long before the next one retries the build.
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_embedding_backoff_ms(),
            timeout_secs: default_embedding_timeout_secs(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    96
}
fn default_max_attempts() -> u32 {
    3
}
fn default_embedding_backoff_ms() -> u64 {
    2_000
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_rate_limit_cooldown_secs() -> u64 {
    60
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_llm_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: None,
            max_attempts: default_max_attempts(),
            backoff_ms: default_llm_backoff_ms(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_backoff_ms() -> u64 {
    10_000
}
fn default_llm_timeout_secs() -> u64 {
    120
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

fn default_max_turns() -> usize {
    0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }

    Ok(config)
}

/// Parse and validate a config document without touching the filesystem.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.chunking.params()?;

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hashing" => {}
            "cohere" | "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, cohere, openai, ollama, or hashing.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.max_attempts > 1 && self.embedding.backoff_ms == 0 {
            bail!("embedding.backoff_ms must be > 0 when max_attempts > 1");
        }

        match self.llm.provider.as_str() {
            "disabled" => {}
            "cohere" | "openai" => {
                if self.llm.model.is_none() {
                    bail!(
                        "llm.model must be specified when provider is '{}'",
                        self.llm.provider
                    );
                }
            }
            other => bail!(
                "Unknown llm provider: '{}'. Must be disabled, cohere, or openai.",
                other
            ),
        }
        if let Some(t) = self.llm.temperature {
            if !(0.0..=2.0).contains(&t) {
                bail!("llm.temperature must be in [0.0, 2.0]");
            }
        }
        if self.llm.max_attempts > 1 && self.llm.backoff_ms == 0 {
            bail!("llm.backoff_ms must be > 0 when max_attempts > 1");
        }

        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.corpus.path.is_relative() {
            self.corpus.path = base.join(&self.corpus.path);
        }
        if self.index.dir.is_relative() {
            self.index.dir = base.join(&self.index.dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.corpus.path, PathBuf::from("data/rag.txt"));
        assert_eq!(config.index.dir, PathBuf::from("rag_db"));
        assert_eq!((config.chunking.size, config.chunking.overlap), (1000, 200));
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.history.max_turns, 0);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.llm.provider, "disabled");
        assert_eq!(config.embedding.rate_limit_cooldown(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_backoff_rejected_when_retrying() {
        let err = parse_config("[llm]\nbackoff_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("llm.backoff_ms"));

        let err = parse_config("[embedding]\nprovider = \"hashing\"\nbackoff_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("embedding.backoff_ms"));

        let config = parse_config("[llm]\nmax_attempts = 1\nbackoff_ms = 0\n").unwrap();
        assert_eq!(config.llm.retry_policy().max_attempts(), 1);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config("[chunking]\nsize = 100\noverlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunking"));
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let err = parse_config("[embedding]\nprovider = \"cohere\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let err = parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_hashing_needs_no_model() {
        let config = parse_config("[embedding]\nprovider = \"hashing\"\ndims = 64\n").unwrap();
        assert_eq!(config.embedding.dims, Some(64));
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse_config("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[llm]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_retry_policy_from_section() {
        let config =
            parse_config("[llm]\nprovider = \"disabled\"\nmax_attempts = 3\nbackoff_ms = 10000\n")
                .unwrap();
        let policy = config.llm.retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(2), Duration::from_secs(20));
    }

    #[test]
    fn test_relative_paths_resolved_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.toml");
        std::fs::write(&path, "[corpus]\npath = \"kb.txt\"\n[index]\ndir = \"/abs/db\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.corpus.path, dir.path().join("kb.txt"));
        assert_eq!(config.index.dir, PathBuf::from("/abs/db"));
    }
}
