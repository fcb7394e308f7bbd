//! # Travel Guide
//!
//! A travel-itinerary generator with retrieval-augmented follow-up answers.
//!
//! Itineraries come straight from an LLM prompt built from a structured
//! form or a free-text request. Follow-up questions ("tell me more about
//! these attractions") are answered by a retrieval chain: the question is
//! embedded, matched against a persisted index of a local knowledge base,
//! and answered with the best passages and the session's earlier turns in
//! the prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  corpus   │──▶│ chunk+embed  │──▶│  rag_db/          │
//! │ rag.txt   │   │  (build)     │   │  index.sqlite     │
//! └───────────┘   └──────────────┘   │  manifest.json    │
//!                                    └────────┬─────────┘
//!                                             │ query
//!               ┌──────────────┐     ┌────────▼─────────┐
//!               │ conversation │────▶│    RagService     │──▶ LLM
//!               │   history    │     │ (Ready/Degraded)  │
//!               └──────────────┘     └────────┬─────────┘
//!                                    ┌────────┴─────────┐
//!                                    ▼                  ▼
//!                               ┌─────────┐       ┌──────────┐
//!                               │   CLI   │       │   HTTP   │
//!                               │ (guide) │       │  (axum)  │
//!                               └─────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`corpus`] | Knowledge-base loading |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat-completion providers |
//! | [`vector_store`] | Persisted index: build, load, validate, query |
//! | [`rag`] | Retrieval chain state machine and ask interface |
//! | [`itinerary`] | Structured and free-form itinerary generation |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |
//! | [`error`] | Error types |
//!
//! Chunking, prompt composition, history, retry, and ranking live in
//! `travel-guide-core`.

pub mod commands;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
mod http;
pub mod itinerary;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod server;
pub mod vector_store;
