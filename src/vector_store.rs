//! Persisted vector index.
//!
//! One index lives in one directory:
//!
//! ```text
//! <index.dir>/
//!   index.sqlite     chunks(chunk_index, start_char, end_char, text, hash, embedding)
//!   manifest.json    model, dims, chunk count, chunking params, corpus hash,
//!                    SHA-256 of index.sqlite, build time
//! ```
//!
//! The manifest is the commit marker: a directory without a readable
//! manifest is treated as absent. [`VectorStore::build`] therefore removes
//! the old manifest first, writes the data file under a temporary name,
//! renames it into place, and only then writes (and renames) the new
//! manifest. A crash at any point leaves either the previous index or no
//! index, never a half-written one that looks complete.
//!
//! Corruption is detected lazily: [`VectorStore::load`] only parses the
//! manifest and opens the database, [`VectorStore::open`] verifies the
//! checksum and probes the table, and [`VectorStore::query`] reports any
//! structural read failure as [`RagError::StoreCorrupted`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use travel_guide_core::chunk::ChunkParams;
use travel_guide_core::embedding::{blob_to_vec, vec_to_blob, EmbeddingProvider};
use travel_guide_core::models::{Chunk, RetrievedChunk};
use travel_guide_core::retry::RetryPolicy;
use travel_guide_core::search::{top_k, Candidate};

use crate::config::Config;
use crate::embedding::{embed_documents_with_retry, embed_query_with_retry};
use crate::error::RagError;

pub const DATA_FILE: &str = "index.sqlite";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const FORMAT_VERSION: u32 = 1;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub build_id: String,
    pub embedding_model: String,
    pub dims: usize,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub corpus_hash: String,
    /// SHA-256 of `index.sqlite` as written.
    pub data_sha256: String,
    pub created_at: DateTime<Utc>,
}

/// An index resolved from disk, ready to be validated and queried.
#[derive(Debug)]
pub struct StoreHandle {
    dir: PathBuf,
    manifest: Manifest,
    pool: SqlitePool,
}

impl StoreHandle {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Release the database connections. Queries through this handle fail
    /// afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Result of [`VectorStore::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum StoreStatus {
    Absent,
    Present { manifest: Manifest },
    Corrupted { reason: String },
}

pub struct VectorStore {
    dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    batch_size: usize,
    params: ChunkParams,
}

impl VectorStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
        batch_size: usize,
        params: ChunkParams,
    ) -> Self {
        Self {
            dir: dir.into(),
            embedder,
            retry,
            batch_size: batch_size.max(1),
            params,
        }
    }

    pub fn from_config(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.index.dir.clone(),
            embedder,
            config.embedding.retry_policy(),
            config.embedding.batch_size,
            config.chunking.params()?,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_params(&self) -> ChunkParams {
        self.params
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    // ============ build ============

    /// Embed `chunks` and persist them, replacing any existing index.
    ///
    /// Every chunk is embedded before the directory is touched, so a
    /// provider failure leaves the previous index (if any) in place.
    pub async fn build(&self, chunks: &[Chunk], corpus_hash: &str) -> Result<StoreHandle, RagError> {
        let vectors = self.embed_chunks(chunks).await?;
        let dims = vectors.first().map(Vec::len).unwrap_or_else(|| self.embedder.dims());

        std::fs::create_dir_all(&self.dir).map_err(|e| storage("create index directory", &self.dir, e))?;

        let manifest_path = self.manifest_path();
        remove_if_exists(&manifest_path)?;

        let data_path = self.data_path();
        let partial_data = with_suffix(&data_path, PARTIAL_SUFFIX);
        remove_if_exists(&partial_data)?;
        remove_if_exists(&with_suffix(&partial_data, "-journal"))?;

        write_database(&partial_data, chunks, &vectors).await?;
        std::fs::rename(&partial_data, &data_path).map_err(|e| storage("commit index data", &data_path, e))?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            build_id: Uuid::new_v4().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            dims,
            chunk_count: chunks.len(),
            chunk_size: self.params.size(),
            chunk_overlap: self.params.overlap(),
            corpus_hash: corpus_hash.to_string(),
            data_sha256: file_sha256(&data_path)?,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| RagError::Storage(format!("serialize manifest: {}", e)))?;
        let partial_manifest = with_suffix(&manifest_path, PARTIAL_SUFFIX);
        std::fs::write(&partial_manifest, json).map_err(|e| storage("write manifest", &partial_manifest, e))?;
        std::fs::rename(&partial_manifest, &manifest_path)
            .map_err(|e| storage("commit manifest", &manifest_path, e))?;

        info!(
            dir = %self.dir.display(),
            chunks = manifest.chunk_count,
            dims = manifest.dims,
            model = %manifest.embedding_model,
            "vector index built"
        );

        let pool = connect_read_only(&data_path)
            .await
            .map_err(|e| RagError::Storage(format!("reopen built index: {}", e)))?;
        Ok(StoreHandle {
            dir: self.dir.clone(),
            manifest,
            pool,
        })
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(chunks.len());
        let total_batches = chunks.len().div_ceil(self.batch_size);

        for (i, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            debug!(batch = i + 1, of = total_batches, size = texts.len(), "embedding chunks");
            let batch_vectors = embed_documents_with_retry(self.embedder.as_ref(), &self.retry, &texts)
                .await
                .map_err(RagError::from_index_embedding)?;
            if batch_vectors.len() != texts.len() {
                return Err(RagError::EmbeddingProviderError(format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    batch_vectors.len()
                )));
            }
            vectors.extend(batch_vectors);
        }

        let expected = match (self.embedder.dims(), vectors.first()) {
            (0, Some(first)) => first.len(),
            (dims, _) => dims,
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected || v.is_empty()) {
            return Err(RagError::EmbeddingProviderError(format!(
                "embedding has {} dimensions, expected {}",
                bad.len(),
                expected
            )));
        }
        Ok(vectors)
    }

    // ============ load / open ============

    /// Resolve the index from disk.
    ///
    /// `Ok(None)` means no committed index exists and one must be built.
    /// A manifest that exists but cannot be used is
    /// [`RagError::StoreCorrupted`].
    pub async fn load(&self) -> Result<Option<StoreHandle>, RagError> {
        let manifest = match self.read_manifest()? {
            Some(m) => m,
            None => return Ok(None),
        };

        let data_path = self.data_path();
        if !data_path.is_file() {
            return Err(RagError::StoreCorrupted(format!(
                "manifest present but {} is missing",
                data_path.display()
            )));
        }

        let pool = connect_read_only(&data_path)
            .await
            .map_err(|e| RagError::StoreCorrupted(format!("cannot open index: {}", e)))?;

        debug!(dir = %self.dir.display(), chunks = manifest.chunk_count, "vector index loaded");
        Ok(Some(StoreHandle {
            dir: self.dir.clone(),
            manifest,
            pool,
        }))
    }

    /// Validate a loaded index: checksum, staleness against the current
    /// embedder and chunking, row count, and vector width.
    pub async fn open(&self, handle: &StoreHandle) -> Result<(), RagError> {
        let m = &handle.manifest;

        let actual = file_sha256(&handle.dir.join(DATA_FILE))
            .map_err(|e| RagError::StoreCorrupted(e.to_string()))?;
        if actual != m.data_sha256 {
            return Err(RagError::StoreCorrupted("index checksum mismatch".to_string()));
        }

        if m.embedding_model != self.embedder.model_name() {
            return Err(RagError::StoreCorrupted(format!(
                "index was built with embedding model '{}', configured model is '{}'",
                m.embedding_model,
                self.embedder.model_name()
            )));
        }
        let dims = self.embedder.dims();
        if dims > 0 && m.chunk_count > 0 && m.dims != dims {
            return Err(RagError::StoreCorrupted(format!(
                "index has {} dimensions, embedder produces {}",
                m.dims, dims
            )));
        }
        if m.chunk_size != self.params.size() || m.chunk_overlap != self.params.overlap() {
            return Err(RagError::StoreCorrupted(format!(
                "index was chunked with size {}/overlap {}, configured {}/{}",
                m.chunk_size,
                m.chunk_overlap,
                self.params.size(),
                self.params.overlap()
            )));
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&handle.pool)
            .await
            .map_err(corrupted)?;
        if count as usize != m.chunk_count {
            return Err(RagError::StoreCorrupted(format!(
                "index holds {} rows, manifest says {}",
                count, m.chunk_count
            )));
        }

        if m.chunk_count > 0 {
            let blob: Vec<u8> = sqlx::query_scalar("SELECT embedding FROM chunks ORDER BY chunk_index LIMIT 1")
                .fetch_one(&handle.pool)
                .await
                .map_err(corrupted)?;
            match blob_to_vec(&blob) {
                Some(v) if v.len() == m.dims => {}
                _ => {
                    return Err(RagError::StoreCorrupted(
                        "stored vector width does not match manifest".to_string(),
                    ))
                }
            }
        }

        Ok(())
    }

    fn read_manifest(&self) -> Result<Option<Manifest>, RagError> {
        let path = self.manifest_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RagError::StoreCorrupted(format!("cannot read manifest: {}", e))),
        };
        let manifest: Manifest = serde_json::from_str(&content)
            .map_err(|e| RagError::StoreCorrupted(format!("unreadable manifest: {}", e)))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::StoreCorrupted(format!(
                "unsupported index format version {}",
                manifest.format_version
            )));
        }
        Ok(Some(manifest))
    }

    // ============ query ============

    /// The `k` chunks most similar to `text`, best first.
    ///
    /// Read-only. A throttled query embedding surfaces as
    /// [`RagError::AskRateLimited`]; any failure reading rows is
    /// [`RagError::StoreCorrupted`].
    pub async fn query(
        &self,
        handle: &StoreHandle,
        text: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RagError> {
        if k == 0 || handle.manifest.chunk_count == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_query_with_retry(self.embedder.as_ref(), &self.retry, text)
            .await
            .map_err(|e| RagError::from_ask(e, false))?;

        let rows = sqlx::query("SELECT chunk_index, text, embedding FROM chunks")
            .fetch_all(&handle.pool)
            .await
            .map_err(corrupted)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk_index: i64 = row.try_get("chunk_index").map_err(corrupted)?;
            let text: String = row.try_get("text").map_err(corrupted)?;
            let blob: Vec<u8> = row.try_get("embedding").map_err(corrupted)?;
            let vector = blob_to_vec(&blob).ok_or_else(|| {
                RagError::StoreCorrupted(format!("chunk {} has a malformed vector", chunk_index))
            })?;
            if vector.len() != query_vec.len() {
                return Err(RagError::StoreCorrupted(format!(
                    "chunk {} has {} dimensions, query has {}",
                    chunk_index,
                    vector.len(),
                    query_vec.len()
                )));
            }
            candidates.push(Candidate {
                chunk_index: chunk_index as usize,
                text,
                vector,
            });
        }

        let hits = top_k(&query_vec, candidates, k);
        debug!(k, hits = hits.len(), "similarity query");
        Ok(hits)
    }

    // ============ status ============

    /// Inspect the directory without opening the database.
    pub fn status(&self) -> StoreStatus {
        let manifest = match self.read_manifest() {
            Ok(Some(m)) => m,
            Ok(None) => return StoreStatus::Absent,
            Err(e) => {
                return StoreStatus::Corrupted {
                    reason: e.to_string(),
                }
            }
        };
        match file_sha256(&self.data_path()) {
            Ok(sum) if sum == manifest.data_sha256 => StoreStatus::Present { manifest },
            Ok(_) => StoreStatus::Corrupted {
                reason: "index checksum mismatch".to_string(),
            },
            Err(e) => StoreStatus::Corrupted {
                reason: e.to_string(),
            },
        }
    }
}

async fn write_database(path: &Path, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), RagError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| RagError::Storage(format!("create {}: {}", path.display(), e)))?;

    let result = insert_rows(&pool, chunks, vectors).await;
    pool.close().await;
    result.map_err(|e| RagError::Storage(format!("write {}: {}", path.display(), e)))
}

async fn insert_rows(pool: &SqlitePool, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE chunks (
            chunk_index INTEGER PRIMARY KEY,
            start_char  INTEGER NOT NULL,
            end_char    INTEGER NOT NULL,
            text        TEXT NOT NULL,
            hash        TEXT NOT NULL,
            embedding   BLOB NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    for (chunk, vector) in chunks.iter().zip(vectors) {
        sqlx::query(
            "INSERT INTO chunks (chunk_index, start_char, end_char, text, hash, embedding) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(chunk.index as i64)
        .bind(chunk.start as i64)
        .bind(chunk.end as i64)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

async fn connect_read_only(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .journal_mode(SqliteJournalMode::Delete);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
}

fn file_sha256(path: &Path) -> Result<String, RagError> {
    let bytes = std::fs::read(path).map_err(|e| storage("read", path, e))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<(), RagError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(storage("remove", path, e)),
    }
}

fn storage(action: &str, path: &Path, e: std::io::Error) -> RagError {
    RagError::Storage(format!("{} {}: {}", action, path.display(), e))
}

fn corrupted(e: sqlx::Error) -> RagError {
    RagError::StoreCorrupted(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use travel_guide_core::chunk::chunk_text;

    const CORPUS: &str = "Paris is famous for the Eiffel Tower. The Louvre holds the Mona Lisa. \
        Rome has the Colosseum and the Trevi Fountain. \
        Tokyo offers sushi at Tsukiji and the Shibuya crossing.";

    fn store(dir: &Path) -> VectorStore {
        VectorStore::new(
            dir,
            Arc::new(HashingProvider::new(128)),
            RetryPolicy::no_retry(),
            2,
            ChunkParams::new(60, 10).unwrap(),
        )
    }

    async fn built(dir: &Path) -> (VectorStore, StoreHandle) {
        let s = store(dir);
        let chunks = chunk_text(CORPUS, s.chunk_params());
        let handle = s.build(&chunks, "hash").await.unwrap();
        (s, handle)
    }

    #[tokio::test]
    async fn test_absent_directory_loads_none() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(&tmp.path().join("rag_db"));
        assert!(s.load().await.unwrap().is_none());
        assert_eq!(s.status(), StoreStatus::Absent);
    }

    #[tokio::test]
    async fn test_build_writes_manifest_and_data() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("rag_db");
        let (s, handle) = built(&dir).await;

        assert!(dir.join(DATA_FILE).is_file());
        assert!(dir.join(MANIFEST_FILE).is_file());
        assert!(!dir.join("index.sqlite.partial").exists());
        assert!(!dir.join("manifest.json.partial").exists());

        let m = handle.manifest();
        assert_eq!(m.dims, 128);
        assert_eq!(m.embedding_model, "hashing-v1");
        assert!(m.chunk_count > 1);
        assert!(matches!(s.status(), StoreStatus::Present { .. }));
        s.open(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_ranks_matching_chunk_first() {
        let tmp = tempfile::tempdir().unwrap();
        let (s, handle) = built(&tmp.path().join("rag_db")).await;
        let hits = s.query(&handle, "Colosseum Rome", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].text.contains("Colosseum"));
        assert_eq!(hits[0].rank, 1);
    }

    #[tokio::test]
    async fn test_reload_matches_fresh_build() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("rag_db");
        let (s, handle) = built(&dir).await;
        let before = s.query(&handle, "Louvre", 3).await.unwrap();
        handle.close().await;

        let reopened = store(&dir);
        let handle = reopened.load().await.unwrap().unwrap();
        reopened.open(&handle).await.unwrap();
        let after = reopened.query(&handle, "Louvre", 3).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_garbage_manifest_is_corrupted() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("rag_db");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), "{ not json").unwrap();
        let err = store(&dir).load().await.unwrap_err();
        assert!(matches!(err, RagError::StoreCorrupted(_)));
    }

    #[tokio::test]
    async fn test_truncated_data_fails_open() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("rag_db");
        let (s, handle) = built(&dir).await;
        handle.close().await;

        let bytes = std::fs::read(dir.join(DATA_FILE)).unwrap();
        std::fs::write(dir.join(DATA_FILE), &bytes[..bytes.len() / 3]).unwrap();

        let outcome = match s.load().await {
            Ok(Some(handle)) => s.open(&handle).await,
            Ok(None) => panic!("manifest should still be present"),
            Err(e) => Err(e),
        };
        assert!(matches!(outcome, Err(RagError::StoreCorrupted(_))));
        assert!(matches!(s.status(), StoreStatus::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_changed_chunking_is_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("rag_db");
        let (_, handle) = built(&dir).await;
        handle.close().await;

        let other = VectorStore::new(
            &dir,
            Arc::new(HashingProvider::new(128)),
            RetryPolicy::no_retry(),
            2,
            ChunkParams::new(1000, 200).unwrap(),
        );
        let handle = other.load().await.unwrap().unwrap();
        assert!(matches!(other.open(&handle).await, Err(RagError::StoreCorrupted(_))));
    }

    #[tokio::test]
    async fn test_empty_corpus_builds_empty_index() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(&tmp.path().join("rag_db"));
        let handle = s.build(&[], "empty").await.unwrap();
        s.open(&handle).await.unwrap();
        assert!(s.query(&handle, "anything", 4).await.unwrap().is_empty());
    }
}
