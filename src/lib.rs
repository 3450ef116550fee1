//! # gita-search
//!
//! Search Bhagavad Gita verses and synthesize what the classical commentary
//! traditions say about them in answer to a reader's question.
//!
//! ## Pipeline
//!
//! ```text
//!   query ──► VerseIndex (BM25) ──► verses + commentaries
//!                                          │ per verse
//!                                          ▼
//!                              ┌───────────────────────┐
//!                              │   Excerpt selection   │
//!                              │  floor, school caps,  │
//!                              │  low-signal override  │
//!                              └───────────┬───────────┘
//!                                          ▼
//!                              ┌───────────────────────┐
//!                              │ Credential + metering │──► blocked
//!                              └───────────┬───────────┘
//!                                          ▼
//!                              ┌───────────────────────┐
//!                              │  Model call (bounded) │──► skipped
//!                              └───────────┬───────────┘
//!                                          ▼
//!                              ┌───────────────────────┐
//!                              │  Repair + grounding   │──► summary
//!                              └───────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for server, corpus, selection and LLM settings
//! - [`models`] - Shared data types: `Verse`, `Commentary`, `Excerpt`, `Outcome`, request/response types
//! - [`corpus`] - Loads the verse/commentary JSON corpus
//! - [`search::bm25`] - In-memory BM25 verse index powered by tantivy
//! - [`synthesis::select`] - Relevance-ranked, school-balanced excerpt selection
//! - [`synthesis::request`] - Prompt assembly under a token budget
//! - [`synthesis::repair`] - Turns any model reply into a grounded `SynthesisResult`
//! - [`synthesis::orchestrator`] - Per-verse and batch synthesis with trial metering
//! - [`synthesis::audit`] - JSONL log of completed syntheses
//! - [`llm::generate`] - Chat completion via Ollama or OpenAI-compatible APIs
//! - [`usage`] - Free-trial meter over an in-memory or JSON-file store
//! - [`api`] - Axum HTTP handlers for search, summaries and trial status
//! - [`state`] - Shared application state

pub mod api;
pub mod config;
pub mod corpus;
pub mod llm;
pub mod models;
pub mod search;
pub mod state;
pub mod synthesis;
pub mod usage;
