//! Keepsake - memory lifecycle engine for conversational agents
//!
//! Turns user messages into durable memories and keeps them healthy over
//! time: rule-first extraction with an LLM fallback, conflict resolution
//! against what is already stored, composite scoring, decay and compaction.

pub mod bootstrap;
pub mod config;
pub mod conflict;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod lifecycle;
pub mod llm;
pub mod manager;
pub mod memory;
pub mod resilience;
pub mod storage;
pub mod testing;

pub use error::{KeepsakeError, Result};
pub use manager::{MemoryManager, MemoryManagerBuilder};
