//! Dedupe rules consulted before the candidate's own key
//!
//! Extraction keys only exist on rule-sourced candidates. These rules give
//! the same slots to memories arriving from the LLM or straight from callers,
//! by reading the content itself.

use crate::memory::{ConflictStrategy, MemoryInput, MemoryType};

/// How a dedupe rule derives a key from candidate content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKey {
    /// `key` when `label` appears as a whole word in the content
    Labelled {
        label: &'static str,
        key: &'static str,
    },
    /// `prefix:<value>` for content shaped like `label: value`
    LabelledValue {
        label: &'static str,
        prefix: &'static str,
    },
}

impl ConflictKey {
    pub fn generate(&self, content: &str) -> Option<String> {
        match self {
            ConflictKey::Labelled { label, key } => {
                contains_word(content, label).then(|| (*key).to_string())
            }
            ConflictKey::LabelledValue { label, prefix } => {
                let (head, value) = content.split_once(':')?;
                let value = value.trim().to_lowercase();
                (head.trim().eq_ignore_ascii_case(label) && !value.is_empty())
                    .then(|| format!("{prefix}:{value}"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupeRule {
    pub memory_type: MemoryType,
    /// `None` matches every category of the type
    pub category: Option<&'static str>,
    pub key: ConflictKey,
    pub strategy: ConflictStrategy,
}

impl DedupeRule {
    pub fn applies_to(&self, candidate: &MemoryInput) -> bool {
        self.memory_type == candidate.memory_type
            && self
                .category
                .is_none_or(|c| c.eq_ignore_ascii_case(&candidate.category))
    }
}

const fn labelled(
    memory_type: MemoryType,
    category: &'static str,
    label: &'static str,
    key: &'static str,
    strategy: ConflictStrategy,
) -> DedupeRule {
    DedupeRule {
        memory_type,
        category: Some(category),
        key: ConflictKey::Labelled { label, key },
        strategy,
    }
}

pub static DEFAULT_DEDUPE_RULES: &[DedupeRule] = &[
    labelled(MemoryType::Fact, "academic", "GPA", "user:gpa", ConflictStrategy::KeepLatest),
    labelled(MemoryType::Fact, "academic", "SAT", "user:sat", ConflictStrategy::KeepHighest),
    labelled(MemoryType::Fact, "academic", "ACT", "user:act", ConflictStrategy::KeepHighest),
    labelled(MemoryType::Fact, "academic", "TOEFL", "user:toefl", ConflictStrategy::KeepLatest),
    labelled(MemoryType::Fact, "academic", "IELTS", "user:ielts", ConflictStrategy::KeepLatest),
    labelled(
        MemoryType::Fact,
        "profile",
        "Graduation year",
        "user:graduation_year",
        ConflictStrategy::KeepLatest,
    ),
    labelled(
        MemoryType::Preference,
        "major",
        "Intended major",
        "user:major",
        ConflictStrategy::KeepLatest,
    ),
    labelled(
        MemoryType::Preference,
        "budget",
        "Budget",
        "user:budget",
        ConflictStrategy::KeepLatest,
    ),
    DedupeRule {
        memory_type: MemoryType::Preference,
        category: Some("target_school"),
        key: ConflictKey::LabelledValue {
            label: "Target school",
            prefix: "user:target_school",
        },
        strategy: ConflictStrategy::KeepLatest,
    },
    labelled(
        MemoryType::Decision,
        "application_plan",
        "Early application",
        "user:early_plan",
        ConflictStrategy::AskUser,
    ),
];

/// Case-insensitive whole-word search
fn contains_word(content: &str, word: &str) -> bool {
    let haystack = content.to_lowercase();
    let needle = word.to_lowercase();
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');

    haystack.match_indices(&needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_key_whole_word() {
        let sat = ConflictKey::Labelled {
            label: "SAT",
            key: "user:sat",
        };
        assert_eq!(sat.generate("SAT: 1400").as_deref(), Some("user:sat"));
        assert_eq!(sat.generate("my sat score went up").as_deref(), Some("user:sat"));
        assert_eq!(sat.generate("Saturday classes"), None);
        assert_eq!(sat.generate("ESAT results"), None);
    }

    #[test]
    fn test_labelled_value_key() {
        let school = ConflictKey::LabelledValue {
            label: "Target school",
            prefix: "user:target_school",
        };
        assert_eq!(
            school.generate("Target school: Stanford University").as_deref(),
            Some("user:target_school:stanford university")
        );
        assert_eq!(school.generate("Likes Stanford"), None);
        assert_eq!(school.generate("Target school:   "), None);
    }

    #[test]
    fn test_rule_scope() {
        let rule = DEFAULT_DEDUPE_RULES[1];
        assert!(rule.applies_to(&MemoryInput::new(MemoryType::Fact, "Academic", "SAT 1500")));
        assert!(!rule.applies_to(&MemoryInput::new(MemoryType::Fact, "profile", "SAT 1500")));
        assert!(!rule.applies_to(&MemoryInput::new(MemoryType::Preference, "academic", "SAT")));
    }
}
