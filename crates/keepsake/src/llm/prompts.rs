//! Prompts for LLM-based extraction and summarization

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You extract durable memories about a student from chat messages for a college admissions advisor. You answer with JSON only.";

/// Placeholder: {message} - the user message to analyze
pub const EXTRACTION_PROMPT: &str = r#"Extract facts worth remembering about the user from the message below.

Memory types:
- FACT: stable facts such as scores, grades, school year, location
- PREFERENCE: likes, target schools, intended majors, budget, constraints
- DECISION: commitments the user has made
- FEEDBACK: the user's reaction to advice they received

Entity types: SCHOOL, PERSON, EVENT, TOPIC

Message:
{message}

Respond with a JSON object in exactly this format:
{
  "memories": [
    {"type": "PREFERENCE", "category": "major", "content": "Interested in computer science", "importance": 0.7}
  ],
  "entities": [
    {"type": "TOPIC", "name": "Computer Science", "description": "Intended field of study"}
  ]
}

Use empty arrays when nothing is worth remembering. Only include the JSON object, no other text."#;

pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You condense notes about a student into a short factual summary. Keep every number, name and date.";

/// Placeholders: {max_tokens} - token budget, {contents} - one note per line
pub const SUMMARY_PROMPT: &str = r#"Summarize the following notes in at most {max_tokens} tokens. Merge duplicates and drop filler. Reply with the summary text only.

Notes:
{contents}"#;
