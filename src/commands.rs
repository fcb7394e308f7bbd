//! CLI command implementations.
//!
//! Each `run_*` function backs one `guide` subcommand. Results go to
//! stdout; progress and diagnostics go through `tracing` to stderr.

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use travel_guide_core::history::ConversationHistory;

use crate::config::Config;
use crate::embedding::DisabledProvider;
use crate::error::RagError;
use crate::itinerary::{ItineraryGenerator, TripRequest};
use crate::llm::create_llm;
use crate::rag::{details_query, RagService};
use crate::vector_store::{StoreStatus, VectorStore};

fn rag_failure(err: RagError) -> anyhow::Error {
    anyhow!("{} ({})", err.user_message(), err)
}

fn service(config: &Config) -> Result<Arc<RagService>> {
    let history = Arc::new(ConversationHistory::with_max_turns(config.history.max_turns));
    Ok(Arc::new(RagService::from_config(config, history)?))
}

/// `guide index build`: rebuild the index from the corpus unconditionally.
pub async fn run_index_build(config: &Config) -> Result<()> {
    let service = service(config)?;
    service.rebuild().await.map_err(rag_failure)?;

    match service.store().status() {
        StoreStatus::Present { manifest } => {
            println!(
                "Indexed {} chunks ({} dims, model {}) into {}",
                manifest.chunk_count,
                manifest.dims,
                manifest.embedding_model,
                service.store().dir().display()
            );
            Ok(())
        }
        other => Err(anyhow!("index not usable after build: {:?}", other)),
    }
}

/// `guide index status`: report on the persisted index without embedding anything.
pub fn run_index_status(config: &Config, json: bool) -> Result<()> {
    let store = VectorStore::from_config(config, Arc::new(DisabledProvider))?;
    let status = store.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("index: {}", store.dir().display());
    match status {
        StoreStatus::Absent => println!("state: absent (run `guide index build`)"),
        StoreStatus::Corrupted { reason } => {
            println!("state: corrupted");
            println!("reason: {}", reason);
        }
        StoreStatus::Present { manifest } => {
            println!("state: present");
            println!("model: {} ({} dims)", manifest.embedding_model, manifest.dims);
            println!("chunks: {}", manifest.chunk_count);
            println!(
                "chunking: size {} / overlap {}",
                manifest.chunk_size, manifest.chunk_overlap
            );
            println!("built: {}", manifest.created_at.to_rfc3339());
            println!("corpus sha256: {}", manifest.corpus_hash);
        }
    }
    Ok(())
}

/// `guide ask`: one grounded answer.
pub async fn run_ask(config: &Config, query: &str, session: &str) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("query must not be empty");
    }
    let chain = service(config)?.initialize().await.map_err(rag_failure)?;
    let answer = chain.ask(session, query).await.map_err(rag_failure)?;
    println!("{}", answer);
    Ok(())
}

/// `guide chat`: read questions from stdin, answering each with the
/// session's earlier turns as context.
pub async fn run_chat(config: &Config, session: Option<String>) -> Result<()> {
    let session = session.unwrap_or_else(|| Uuid::new_v4().to_string());
    let chain = service(config)?.initialize().await.map_err(rag_failure)?;

    eprintln!("session {} (type `exit` to quit)", session);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "exit" || query == "quit" {
            break;
        }

        match chain.ask(&session, query).await {
            Ok(answer) => {
                println!("{}\n", answer);
                chain.record_turn(&session, query, &answer);
            }
            Err(e) if e.is_rate_limited() => eprintln!("{}", e.user_message()),
            Err(e) => return Err(rag_failure(e)),
        }
    }
    Ok(())
}

fn generator(config: &Config) -> Result<ItineraryGenerator> {
    Ok(ItineraryGenerator::new(
        create_llm(&config.llm)?,
        config.llm.retry_policy(),
    ))
}

/// `guide itinerary`: structured form.
pub async fn run_itinerary(config: &Config, request: &TripRequest) -> Result<()> {
    let itinerary = generator(config)?.generate_structured(request).await?;
    println!("{}", itinerary);
    Ok(())
}

/// `guide plan`: free-text request, optionally followed by a grounded
/// details answer that is recorded in `session`.
pub async fn run_plan(config: &Config, request: &str, details: bool, session: &str) -> Result<()> {
    let itinerary = generator(config)?.generate_free_form(request).await?;
    println!("{}", itinerary);

    if details {
        let chain = match service(config)?.initialize().await {
            Ok(chain) => chain,
            Err(e) => {
                eprintln!("{}", e.user_message());
                return Ok(());
            }
        };
        let query = details_query(request);
        match chain.ask(session, &query).await {
            Ok(answer) => {
                println!("\n--- More details ---\n{}", answer);
                chain.record_turn(session, &query, &answer);
            }
            Err(e) => eprintln!("{}", e.user_message()),
        }
    }
    Ok(())
}
