#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use tempfile::TempDir;

use travel_guide::embedding::HashingProvider;
use travel_guide::llm::LlmProvider;
use travel_guide::rag::RagService;
use travel_guide::vector_store::VectorStore;
use travel_guide_core::chunk::ChunkParams;
use travel_guide_core::embedding::EmbeddingProvider;
use travel_guide_core::history::ConversationHistory;
use travel_guide_core::prompt::Prompt;
use travel_guide_core::retry::{ProviderError, RetryPolicy};

pub const PARIS: &str = "Paris is famous for the Eiffel Tower. The Louvre holds the Mona Lisa.";

/// Hashing embedder that counts calls and can be told to throttle or stall.
pub struct CountingEmbedder {
    inner: HashingProvider,
    pub document_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub throttle: AtomicBool,
    /// Added to every document batch.
    pub delay_ms: AtomicU64,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingProvider::new(64),
            document_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            throttle: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    pub fn documents(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.throttle.load(Ordering::SeqCst) {
            return Err(ProviderError::RateLimited("429 Too Many Requests".into()));
        }
        self.inner.embed_documents(texts).await
    }
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.embed_one(text))
    }
}

/// LLM that answers by echoing the retrieved context and records every prompt.
pub struct RecordingLlm {
    pub prompts: Mutex<Vec<Prompt>>,
    pub throttle: AtomicBool,
    pub calls: AtomicUsize,
}

impl RecordingLlm {
    pub fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            throttle: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn last_prompt(&self) -> Prompt {
        self.prompts.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl LlmProvider for RecordingLlm {
    fn name(&self) -> &str {
        "recording"
    }
    fn model_name(&self) -> &str {
        "recording"
    }
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.throttle.load(Ordering::SeqCst) {
            return Err(ProviderError::RateLimited("429".into()));
        }
        self.prompts.lock().unwrap().push(prompt.clone());
        let context = prompt
            .system
            .split_once("Context:\n")
            .map(|(_, c)| c)
            .unwrap_or("");
        Ok(format!(
            "Answer to {:?} based on: {}",
            prompt.question().unwrap_or(""),
            context
        ))
    }
}

pub struct Fixture {
    pub tmp: TempDir,
    pub corpus: PathBuf,
    pub index_dir: PathBuf,
    pub embedder: Arc<CountingEmbedder>,
    pub llm: Arc<RecordingLlm>,
}

impl Fixture {
    /// A workspace whose corpus holds `text`, or no corpus when `None`.
    pub fn new(text: Option<&str>) -> Self {
        let tmp = TempDir::new().unwrap();
        let corpus = tmp.path().join("data").join("rag.txt");
        if let Some(text) = text {
            std::fs::create_dir_all(corpus.parent().unwrap()).unwrap();
            std::fs::write(&corpus, text).unwrap();
        }
        let index_dir = tmp.path().join("rag_db");
        Self {
            tmp,
            corpus,
            index_dir,
            embedder: Arc::new(CountingEmbedder::new()),
            llm: Arc::new(RecordingLlm::new()),
        }
    }

    pub fn store(&self) -> VectorStore {
        VectorStore::new(
            &self.index_dir,
            self.embedder.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            16,
            ChunkParams::new(1000, 200).unwrap(),
        )
    }

    /// A fresh service over the same directories, as a new process would see them.
    pub fn service(&self) -> Arc<RagService> {
        self.service_with_history(Arc::new(ConversationHistory::new()))
    }

    pub fn service_with_history(&self, history: Arc<ConversationHistory>) -> Arc<RagService> {
        Arc::new(self.rag_service(history))
    }

    /// A service whose indexing rate limit clears after `cooldown`.
    pub fn service_with_cooldown(&self, cooldown: Duration) -> Arc<RagService> {
        Arc::new(
            self.rag_service(Arc::new(ConversationHistory::new()))
                .with_rate_limit_cooldown(cooldown),
        )
    }

    fn rag_service(&self, history: Arc<ConversationHistory>) -> RagService {
        RagService::new(
            &self.corpus,
            self.store(),
            self.llm.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            history,
            4,
        )
    }
}

/// Damage the index underneath a running service.
pub async fn drop_chunks_table(index_dir: &Path) {
    let options = SqliteConnectOptions::new().filename(index_dir.join("index.sqlite"));
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
    sqlx::query("DROP TABLE chunks").execute(&mut conn).await.unwrap();
    conn.close().await.unwrap();
}

pub fn truncate_index(index_dir: &Path) {
    let path = index_dir.join("index.sqlite");
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 3]).unwrap();
}
