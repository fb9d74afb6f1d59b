//! LLM fallback for messages the rule table cannot cover
//!
//! Output parsing is deliberately forgiving: fenced or prose-wrapped JSON is
//! unwrapped, unknown types are skipped, and anything unparseable yields no
//! candidates.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::LlmProvider;
use crate::llm::prompts::{EXTRACTION_PROMPT, EXTRACTION_SYSTEM_PROMPT};
use crate::memory::{EntityInput, EntityType, MemoryInput, MemoryType, meta};

/// Elements stay raw so one malformed entry cannot sink the rest
#[derive(Debug, Default, Deserialize)]
struct ExtractionJson {
    #[serde(default)]
    memories: Vec<Value>,
    #[serde(default)]
    entities: Vec<Value>,
}

fn parse_elements<T: DeserializeOwned>(values: Vec<Value>, kind: &str) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(element) => Some(element),
            Err(e) => {
                debug!("Skipping malformed LLM {}: {}", kind, e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct MemoryJson {
    #[serde(rename = "type", default)]
    memory_type: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    importance: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct EntityJson {
    #[serde(rename = "type", default)]
    entity_type: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

/// Candidates proposed by the LLM for one message
#[derive(Debug, Default)]
pub(crate) struct LlmCandidates {
    pub memories: Vec<MemoryInput>,
    pub entities: Vec<EntityInput>,
}

pub(crate) async fn extract_with_llm(
    llm: &dyn LlmProvider,
    message: &str,
    confidence: f32,
    max_chars: usize,
) -> LlmCandidates {
    let message: String = message.chars().take(max_chars).collect();
    let prompt = EXTRACTION_PROMPT.replace("{message}", &message);

    match llm.complete(EXTRACTION_SYSTEM_PROMPT, &prompt).await {
        Ok(response) => {
            debug!("Extraction response: {}", response);
            parse_candidates(&response, confidence)
        }
        Err(e) => {
            warn!("LLM extraction via {} failed: {}", llm.name(), e);
            LlmCandidates::default()
        }
    }
}

pub(crate) fn parse_candidates(response: &str, confidence: f32) -> LlmCandidates {
    let json_str = extract_json_from_response(response);
    let parsed: ExtractionJson = match serde_json::from_str(json_str) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Failed to parse extraction JSON: {}, raw: {}", e, response);
            return LlmCandidates::default();
        }
    };

    let memories = parse_elements::<MemoryJson>(parsed.memories, "memory")
        .into_iter()
        .filter_map(|m| {
            let content = m.content.trim();
            if content.is_empty() {
                return None;
            }
            let memory_type: MemoryType = match m.memory_type.parse() {
                Ok(t) => t,
                Err(_) => {
                    debug!("Skipping LLM memory with unknown type '{}'", m.memory_type);
                    return None;
                }
            };
            let category = m
                .category
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| memory_type.as_str().to_lowercase());
            let importance = m
                .importance
                .as_ref()
                .and_then(Value::as_f64)
                .map(|i| i as f32)
                .unwrap_or(0.5);

            Some(
                MemoryInput::new(memory_type, category, content)
                    .with_importance(importance)
                    .with_confidence(confidence)
                    .with_metadata(meta::SOURCE, "llm"),
            )
        })
        .collect();

    let entities = parse_elements::<EntityJson>(parsed.entities, "entity")
        .into_iter()
        .filter_map(|e| {
            let name = e.name.trim();
            if name.is_empty() {
                return None;
            }
            let entity_type: EntityType = e.entity_type.parse().ok()?;
            Some(EntityInput::new(entity_type, name).with_description(e.description.trim()))
        })
        .collect();

    LlmCandidates { memories, entities }
}

/// Strip code fences and surrounding prose down to the outermost JSON object
fn extract_json_from_response(content: &str) -> &str {
    let trimmed = content.trim();

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    trimmed
}
