//! # Travel Guide Core
//!
//! Shared, I/O-free logic for Travel Guide: data models, the overlapping
//! character chunker, the embedding provider trait, similarity ranking,
//! the provider retry policy, the per-session conversation history, and
//! grounded prompt composition.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem code. Provider
//! implementations and the persisted vector store live in the `travel-guide`
//! app crate.

pub mod chunk;
pub mod embedding;
pub mod history;
pub mod models;
pub mod prompt;
pub mod retry;
pub mod search;
