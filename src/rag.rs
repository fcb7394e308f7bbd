//! Retrieval chain orchestration.
//!
//! [`RagService`] owns the vector store, the LLM, and the shared
//! conversation history, and moves through three states:
//!
//! ```text
//!                  initialize() ok
//!  Uninitialized ───────────────────▶ Ready
//!        │                              │  query hits StoreCorrupted
//!        │ initialize() fails           │  and the one rebuild fails
//!        ▼                              ▼
//!     Degraded ◀────────────────────────┘
//! ```
//!
//! Resolution under [`RagService::initialize`]: load the index; if it is
//! absent, build it from the corpus; if it is corrupted, rebuild it once.
//! A process gets exactly one automatic rebuild, whether it is spent
//! during initialization or later when a query finds the store damaged.
//! Once Degraded, every call returns the recorded error without touching
//! the providers again. An indexing rate limit is the exception: once the
//! cooldown has passed, the next call retries the build, and
//! [`RagService::retry_after_rate_limit`] skips the wait.
//!
//! Resolution happens under one async mutex, so two callers racing to
//! initialize produce a single build. The observable [`RagState`] is
//! published separately and can be read while a build is in flight.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use travel_guide_core::chunk::{chunk_text, ChunkParams};
use travel_guide_core::history::ConversationHistory;
use travel_guide_core::models::{RetrievedChunk, Turn};
use travel_guide_core::prompt::Prompt;
use travel_guide_core::retry::RetryPolicy;

use crate::config::Config;
use crate::corpus::{corpus_hash, load_corpus};
use crate::embedding::create_provider;
use crate::error::RagError;
use crate::llm::{complete_with_retry, create_llm, LlmProvider};
use crate::vector_store::{StoreHandle, VectorStore};

pub const TRAVEL_EXPERT_INSTRUCTIONS: &str = "You are a travel expert. Use the following pieces of retrieved context \
to answer questions about travel destinations, attractions, and recommendations. \
If the context does not contain the answer, say so and answer from general knowledge, \
noting that it was not found in the provided material. Keep answers concise and practical.";

/// How long an indexing rate limit is reported before the build is retried.
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Default follow-up question used by "more details" actions.
pub fn details_query(request: &str) -> String {
    format!("Provide detailed information about the attractions: {}", request)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RagState {
    Uninitialized,
    Ready,
    Degraded(RagError),
}

impl RagState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RagState::Uninitialized => "uninitialized",
            RagState::Ready => "ready",
            RagState::Degraded(_) => "degraded",
        }
    }
}

enum ChainState {
    Uninitialized,
    Ready(Arc<StoreHandle>),
    Degraded(RagError),
}

impl ChainState {
    fn observed(&self) -> RagState {
        match self {
            ChainState::Uninitialized => RagState::Uninitialized,
            ChainState::Ready(_) => RagState::Ready,
            ChainState::Degraded(e) => RagState::Degraded(e.clone()),
        }
    }
}

struct Inner {
    state: ChainState,
    rebuild_spent: bool,
    rate_limited_at: Option<Instant>,
}

pub struct RagService {
    corpus_path: PathBuf,
    top_k: usize,
    store: VectorStore,
    llm: Arc<dyn LlmProvider>,
    llm_retry: RetryPolicy,
    history: Arc<ConversationHistory>,
    rate_limit_cooldown: Duration,
    inner: Mutex<Inner>,
    observed: RwLock<RagState>,
}

impl RagService {
    pub fn new(
        corpus_path: impl Into<PathBuf>,
        store: VectorStore,
        llm: Arc<dyn LlmProvider>,
        llm_retry: RetryPolicy,
        history: Arc<ConversationHistory>,
        top_k: usize,
    ) -> Self {
        Self {
            corpus_path: corpus_path.into(),
            top_k: top_k.max(1),
            store,
            llm,
            llm_retry,
            history,
            rate_limit_cooldown: DEFAULT_RATE_LIMIT_COOLDOWN,
            inner: Mutex::new(Inner {
                state: ChainState::Uninitialized,
                rebuild_spent: false,
                rate_limited_at: None,
            }),
            observed: RwLock::new(RagState::Uninitialized),
        }
    }

    /// Wire providers, store, and history from configuration.
    pub fn from_config(config: &Config, history: Arc<ConversationHistory>) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let store = VectorStore::from_config(config, embedder)?;
        let llm = create_llm(&config.llm)?;
        Ok(Self::new(
            config.corpus.path.clone(),
            store,
            llm,
            config.llm.retry_policy(),
            history,
            config.retrieval.top_k,
        )
        .with_rate_limit_cooldown(config.embedding.rate_limit_cooldown()))
    }

    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// Current state. Does not wait for an in-flight build, which stays
    /// `Uninitialized` until it finishes.
    pub fn state(&self) -> RagState {
        self.observed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, inner: &mut Inner, state: ChainState) {
        inner.rate_limited_at = match &state {
            ChainState::Degraded(RagError::EmbeddingRateLimited(_)) => Some(Instant::now()),
            _ => None,
        };
        *self.observed.write().unwrap_or_else(PoisonError::into_inner) = state.observed();
        inner.state = state;
    }

    fn cooldown_elapsed(&self, inner: &Inner) -> bool {
        inner
            .rate_limited_at
            .is_some_and(|at| at.elapsed() >= self.rate_limit_cooldown)
    }

    /// Resolve the vector store and hand back the ask interface.
    ///
    /// Idempotent: once Ready or Degraded, later calls return the same
    /// outcome without doing any work, unless an indexing rate limit has
    /// outlived its cooldown.
    pub async fn initialize(self: &Arc<Self>) -> Result<RagChain, RagError> {
        self.ready_handle().await?;
        Ok(RagChain {
            service: Arc::clone(self),
        })
    }

    /// Leave Degraded when the recorded error is an indexing rate limit,
    /// so the next [`RagService::initialize`] tries again without waiting
    /// out the cooldown. Returns whether the state was reset.
    pub async fn retry_after_rate_limit(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if let ChainState::Degraded(RagError::EmbeddingRateLimited(_)) = inner.state {
            info!("clearing rate-limited state; next call re-initializes");
            self.set_state(&mut inner, ChainState::Uninitialized);
            return true;
        }
        false
    }

    /// Rebuild the index from the corpus on operator request.
    ///
    /// Does not consume the automatic rebuild allowance.
    pub async fn rebuild(&self) -> Result<(), RagError> {
        let mut inner = self.inner.lock().await;
        if let ChainState::Ready(old) = &inner.state {
            old.close().await;
        }
        match self.build_from_corpus().await {
            Ok(handle) => {
                self.set_state(&mut inner, ChainState::Ready(Arc::new(handle)));
                Ok(())
            }
            Err(e) => {
                error!("index rebuild failed: {}", e);
                self.set_state(&mut inner, ChainState::Degraded(e.clone()));
                Err(e)
            }
        }
    }

    async fn ready_handle(&self) -> Result<Arc<StoreHandle>, RagError> {
        let mut inner = self.inner.lock().await;
        match &inner.state {
            ChainState::Ready(handle) => return Ok(Arc::clone(handle)),
            ChainState::Degraded(RagError::EmbeddingRateLimited(_)) if self.cooldown_elapsed(&inner) => {
                info!("rate-limit cooldown elapsed; retrying index build");
            }
            ChainState::Degraded(e) => return Err(e.clone()),
            ChainState::Uninitialized => {}
        }

        match self.resolve(&mut inner).await {
            Ok(handle) => {
                let handle = Arc::new(handle);
                self.set_state(&mut inner, ChainState::Ready(Arc::clone(&handle)));
                info!(chunks = handle.manifest().chunk_count, "retrieval chain ready");
                Ok(handle)
            }
            Err(e) => {
                if e.is_rate_limited() {
                    warn!("indexing rate limited; RAG degraded until retried: {}", e);
                } else {
                    error!("RAG initialization failed: {}", e);
                }
                self.set_state(&mut inner, ChainState::Degraded(e.clone()));
                Err(e)
            }
        }
    }

    async fn resolve(&self, inner: &mut Inner) -> Result<StoreHandle, RagError> {
        let reason = match self.store.load().await {
            Ok(Some(handle)) => match self.store.open(&handle).await {
                Ok(()) => {
                    info!(dir = %self.store.dir().display(), "using existing vector index");
                    return Ok(handle);
                }
                Err(RagError::StoreCorrupted(reason)) => {
                    handle.close().await;
                    reason
                }
                Err(e) => return Err(e),
            },
            Ok(None) => {
                info!(dir = %self.store.dir().display(), "no vector index found; building");
                return self.build_from_corpus().await;
            }
            Err(RagError::StoreCorrupted(reason)) => reason,
            Err(e) => return Err(e),
        };

        warn!("vector index unusable ({}); rebuilding", reason);
        self.spend_rebuild(inner, reason).await
    }

    async fn spend_rebuild(&self, inner: &mut Inner, reason: String) -> Result<StoreHandle, RagError> {
        if inner.rebuild_spent {
            return Err(RagError::RebuildFailed(Box::new(RagError::StoreCorrupted(reason))));
        }
        inner.rebuild_spent = true;
        self.build_from_corpus()
            .await
            .map_err(|e| RagError::RebuildFailed(Box::new(e)))
    }

    async fn build_from_corpus(&self) -> Result<StoreHandle, RagError> {
        let doc = load_corpus(&self.corpus_path)?;
        let params: ChunkParams = self.store.chunk_params();
        let chunks = chunk_text(&doc.text, params);
        info!(
            corpus = %doc.path.display(),
            encoding = doc.encoding.as_str(),
            chunks = chunks.len(),
            "chunked corpus"
        );
        self.store.build(&chunks, &corpus_hash(&doc)).await
    }

    /// Called when a query through `failed` reported corruption. Rebuilds
    /// at most once per process; a concurrent caller that already swapped
    /// in a fresh handle wins.
    async fn recover(&self, failed: &Arc<StoreHandle>, reason: String) -> Result<Arc<StoreHandle>, RagError> {
        let mut inner = self.inner.lock().await;
        match &inner.state {
            ChainState::Ready(current) if !Arc::ptr_eq(current, failed) => {
                return Ok(Arc::clone(current));
            }
            ChainState::Degraded(e) => return Err(e.clone()),
            _ => {}
        }

        warn!("vector index corrupted during query ({}); attempting rebuild", reason);
        failed.close().await;
        match self.spend_rebuild(&mut inner, reason).await {
            Ok(handle) => {
                let handle = Arc::new(handle);
                self.set_state(&mut inner, ChainState::Ready(Arc::clone(&handle)));
                info!("vector index rebuilt");
                Ok(handle)
            }
            Err(e) => {
                error!("RAG degraded for the rest of this process: {}", e);
                self.set_state(&mut inner, ChainState::Degraded(e.clone()));
                Err(e)
            }
        }
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, RagError> {
        let mut handle = self.ready_handle().await?;
        let mut recoveries = 0;
        loop {
            match self.store.query(&handle, query, self.top_k).await {
                // A rebuilt index that fails again degrades via the spent allowance.
                Err(RagError::StoreCorrupted(reason)) if recoveries < 2 => {
                    recoveries += 1;
                    handle = self.recover(&handle, reason).await?;
                }
                other => return other,
            }
        }
    }

    /// Build the grounded prompt for `query` in `session_id`.
    pub async fn compose(&self, session_id: &str, query: &str) -> Result<Prompt, RagError> {
        let hits = self.retrieve(query).await?;
        let history = self.history.history(session_id);
        debug!(session = session_id, hits = hits.len(), prior_turns = history.len(), "composing prompt");
        Ok(Prompt::grounded(TRAVEL_EXPERT_INSTRUCTIONS, &hits, &history, query))
    }

    async fn ask(&self, session_id: &str, query: &str) -> Result<String, RagError> {
        let prompt = self.compose(session_id, query).await?;
        complete_with_retry(self.llm.as_ref(), &self.llm_retry, &prompt)
            .await
            .map_err(|e| RagError::from_ask(e, true))
    }
}

/// The ask interface handed to UI layers by [`RagService::initialize`].
///
/// Cheap to clone; all clones share one service.
#[derive(Clone)]
pub struct RagChain {
    service: Arc<RagService>,
}

impl RagChain {
    /// Answer `query` grounded on retrieved context and the session's
    /// prior turns. The turn is not recorded; call
    /// [`RagChain::record_turn`] for exchanges that belong in history.
    pub async fn ask(&self, session_id: &str, query: &str) -> Result<String, RagError> {
        self.service.ask(session_id, query).await
    }

    pub fn record_turn(&self, session_id: &str, query: &str, answer: &str) -> Turn {
        self.service.history.append(session_id, query, answer)
    }

    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.service.history.history(session_id)
    }

    pub fn service(&self) -> &Arc<RagService> {
        &self.service
    }
}
