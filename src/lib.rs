//! Developer enrichment service library
//!
//! Fetches developer profiles from GitHub, scores them, guesses their
//! country, stores them in PostgreSQL and hands each one to an asynchronous
//! AI evaluation worker.
//!
//! # Modules
//!
//! - `ai_client`: AI completion client, prompts and response parsing.
//! - `batch`: Batch driver over a bounded worker pool.
//! - `cache`: Profile cache.
//! - `cache_validator`: Checksummed cache envelopes.
//! - `circuit_breaker`: Circuit breaker for the AI endpoint.
//! - `config`: Configuration management.
//! - `db`: Database connection and schema.
//! - `db_storage`: Profile store.
//! - `enrichment`: Per-username enrichment pipeline.
//! - `errors`: Error handling types.
//! - `github_client`: GitHub REST client.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `nation`: Nation prediction.
//! - `queue`: Evaluation work queue.
//! - `retry`: Retry policy.
//! - `scoring`: Talent and confidence scores.
//! - `worker`: Evaluation worker.

pub mod ai_client;
pub mod batch;
pub mod cache;
pub mod cache_validator;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod enrichment;
pub mod errors;
pub mod github_client;
pub mod handlers;
pub mod models;
pub mod nation;
pub mod queue;
pub mod retry;
pub mod scoring;
pub mod worker;
