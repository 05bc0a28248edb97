//! CaishenAI stock chat
//!
//! A chat assistant for a stock broker that answers price questions by
//! letting the model call tools backed by a local price table:
//! - Tool-augmented response loop with a bounded number of tool rounds
//! - OpenAI-compatible model clients (OpenAI, Anthropic, Gemini)
//! - SQLite price store with an in-memory fallback
//! - Optional speech and image enrichment of replies
//! - Snarky summaries of stock websites
//!
//! LOOP:
//! USER → MODEL → (TOOL CALLS → RESOLVE → MODEL)* → FINAL TEXT

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod llm;
pub mod media;
pub mod models;
pub mod store;
pub mod summarizer;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use agent::{ChatOrchestrator, StreamingTurn};
pub use config::ChatConfig;
pub use error::ChatError;
pub use models::*;
