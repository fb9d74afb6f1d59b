//! Memory types and scoring
//!
//! Defines the persisted memory record, entities, the composite scorer and
//! the token estimator shared by compaction and context assembly.

pub mod buffer;
pub mod scorer;
pub mod tokens;
pub mod types;

pub use buffer::{ConversationBuffer, ConversationTurn, Role};
pub use scorer::{
    KeywordBoost, MemoryScoring, PassthroughScorer, ScoreBreakdown, ScoreInput, ScoreResult,
    Scorer, ScoringConfig, TypeBase,
};
pub use tokens::{estimate_tokens, estimate_tokens_all, truncate_to_tokens};
pub use types::{
    ConflictStrategy, Entity, EntityInput, EntityRelation, EntityType, Memory, MemoryInput,
    MemoryType, Metadata, Tier, meta,
};
