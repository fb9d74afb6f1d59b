//! Message to candidate memories
//!
//! A static rule table handles the structured facts advisors care about
//! (scores, targets, budget, plans); an LLM fills in when the rules find
//! too little.

mod engine;
mod llm;
pub mod rules;
mod validate;

pub use engine::{
    ExtractionConfig, ExtractionEngine, ExtractionOptions, ExtractionResult, ExtractionStats,
    RuleMatches,
};
pub use rules::{EntityEmitter, ExtractionRule, RULES, RuleKey, Validator};
