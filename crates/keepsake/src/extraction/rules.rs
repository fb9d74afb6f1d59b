//! Static rule table for deterministic extraction
//!
//! Each rule is plain data: patterns, a validator tag, importance boosts, a
//! key generator and a default conflict strategy. The engine interprets the
//! table in declaration order, so several rules may fire on one message.

use regex::Regex;

use crate::memory::{ConflictStrategy, EntityType, MemoryType};

/// Normalizes a raw captured value or explains why it was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Grade point average; scale inferred from context, 4.0 by default
    Gpa,
    /// SAT total, 400-1600
    Sat,
    /// ACT composite, 1-36
    Act,
    /// TOEFL iBT, 0-120
    Toefl,
    /// IELTS band, 0-9 in half steps
    Ielts,
    /// Four-digit year between 1990 and 2100
    Year,
    /// Subject name, cut at the first connector word
    Subject,
    /// School name
    School,
    /// Amount with unit and currency normalization
    Money,
    /// Free text clause
    Clause,
    /// Feedback on advice, labelled with its sentiment
    Sentiment,
}

/// How a rule derives the dedupe key of its candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKey {
    /// Same key for every match, e.g. `user:gpa`
    Fixed(&'static str),
    /// Prefix plus the lowercased normalized value
    PerValue(&'static str),
    /// No rule key; the type+content key applies
    Content,
}

impl RuleKey {
    pub fn generate(&self, value: &str) -> Option<String> {
        match self {
            RuleKey::Fixed(key) => Some((*key).to_string()),
            RuleKey::PerValue(prefix) => Some(format!("{}:{}", prefix, value.trim().to_lowercase())),
            RuleKey::Content => None,
        }
    }
}

/// Entity candidate emitted alongside a rule's memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityEmitter {
    pub entity_type: EntityType,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractionRule {
    pub id: &'static str,
    pub memory_type: MemoryType,
    pub category: &'static str,
    pub patterns: &'static [&'static str],
    pub base_importance: f32,
    /// (case-insensitive substring, boost)
    pub boosts: &'static [(&'static str, f32)],
    pub validator: Validator,
    pub key: RuleKey,
    pub strategy: ConflictStrategy,
    pub ttl_days: Option<i64>,
    /// `{value}` is replaced by the normalized value
    pub template: Option<&'static str>,
    pub entity: Option<EntityEmitter>,
}

impl ExtractionRule {
    /// Importance for a message: base plus every matching boost, capped at 1
    pub fn importance_for(&self, message: &str) -> f32 {
        let lowered = message.to_lowercase();
        let boost: f32 = self
            .boosts
            .iter()
            .filter(|(condition, _)| lowered.contains(&condition.to_lowercase()))
            .map(|(_, boost)| boost)
            .sum();
        (self.base_importance + boost).min(1.0)
    }

    pub fn render(&self, value: &str) -> String {
        match self.template {
            Some(template) => template.replace("{value}", value),
            None => value.to_string(),
        }
    }
}

/// A rule with its patterns compiled
#[derive(Debug)]
pub struct CompiledRule {
    pub rule: &'static ExtractionRule,
    pub patterns: Vec<Regex>,
}

// Shared tails: optional linking word between a label and its value.
macro_rules! link {
    () => {
        r"\s*(?i:score\s*)?(?:(?i:is|of|was)|=|:|：|是|为|考了|成绩)?\s*"
    };
}

// School names: capitalized words ("University of Michigan") or Han names
// ending in 大学/学院.
macro_rules! school {
    () => {
        r"([A-Z][\w.&'-]*(?:\s+(?:of\s+|at\s+)?[A-Z][\w.&'-]*){0,5}|\p{Han}{2,15}(?:大学|学院))"
    };
}

pub static RULES: &[ExtractionRule] = &[
    ExtractionRule {
        id: "gpa",
        memory_type: MemoryType::Fact,
        category: "academic",
        patterns: &[
            concat!(r"(?i)GPA", link!(), r"(\d{1,3}(?:\.\d{1,2})?)(?:\s*/\s*\d{1,3}(?:\.\d)?)?"),
            concat!(r"(?i)绩点", link!(), r"(\d(?:\.\d{1,2})?)(?:\s*/\s*\d(?:\.\d)?)?"),
        ],
        base_importance: 0.9,
        boosts: &[("cumulative", 0.05), ("unweighted", 0.03), ("最终", 0.05)],
        validator: Validator::Gpa,
        key: RuleKey::Fixed("user:gpa"),
        strategy: ConflictStrategy::KeepLatest,
        ttl_days: None,
        template: Some("GPA: {value}"),
        entity: None,
    },
    ExtractionRule {
        id: "sat",
        memory_type: MemoryType::Fact,
        category: "academic",
        patterns: &[concat!(r"(?:^|[^A-Za-z])SAT", link!(), r"(\d{3,4})")],
        base_importance: 0.85,
        boosts: &[("superscore", 0.05), ("official", 0.05), ("出分", 0.05)],
        validator: Validator::Sat,
        key: RuleKey::Fixed("user:sat"),
        strategy: ConflictStrategy::KeepHighest,
        ttl_days: None,
        template: Some("SAT: {value}"),
        entity: None,
    },
    ExtractionRule {
        id: "act",
        memory_type: MemoryType::Fact,
        category: "academic",
        patterns: &[concat!(r"(?:^|[^A-Za-z])ACT", link!(), r"(\d{1,2})(?:[^\d.]|$)")],
        base_importance: 0.85,
        boosts: &[("superscore", 0.05), ("official", 0.05)],
        validator: Validator::Act,
        key: RuleKey::Fixed("user:act"),
        strategy: ConflictStrategy::KeepHighest,
        ttl_days: None,
        template: Some("ACT: {value}"),
        entity: None,
    },
    ExtractionRule {
        id: "toefl",
        memory_type: MemoryType::Fact,
        category: "academic",
        patterns: &[concat!(r"(?i)(?:TOEFL|托福)(?:\s*iBT)?", link!(), r"(\d{2,3})")],
        base_importance: 0.8,
        boosts: &[("official", 0.05), ("home edition", 0.02)],
        validator: Validator::Toefl,
        key: RuleKey::Fixed("user:toefl"),
        strategy: ConflictStrategy::KeepLatest,
        ttl_days: None,
        template: Some("TOEFL: {value}"),
        entity: None,
    },
    ExtractionRule {
        id: "ielts",
        memory_type: MemoryType::Fact,
        category: "academic",
        patterns: &[concat!(r"(?i)(?:IELTS|雅思)", link!(), r"(\d(?:\.[05])?)")],
        base_importance: 0.8,
        boosts: &[("official", 0.05)],
        validator: Validator::Ielts,
        key: RuleKey::Fixed("user:ielts"),
        strategy: ConflictStrategy::KeepLatest,
        ttl_days: None,
        template: Some("IELTS: {value}"),
        entity: None,
    },
    ExtractionRule {
        id: "graduation_year",
        memory_type: MemoryType::Fact,
        category: "profile",
        patterns: &[
            r"(?i)(?:graduat\w*|class of)\D{0,12}?((?:19|20)\d{2})",
            r"((?:19|20)\d{2})\s*年?\s*毕业",
        ],
        base_importance: 0.75,
        boosts: &[("high school", 0.05), ("高中", 0.05)],
        validator: Validator::Year,
        key: RuleKey::Fixed("user:graduation_year"),
        strategy: ConflictStrategy::KeepLatest,
        ttl_days: None,
        template: Some("Graduation year: {value}"),
        entity: None,
    },
    ExtractionRule {
        id: "intended_major",
        memory_type: MemoryType::Preference,
        category: "major",
        patterns: &[
            r"(?i)(?:major(?:ing)?\s+in|intended\s+major(?:\s+is)?|want\s+to\s+(?:study|major\s+in)|plan\s+to\s+study)\s+([a-z][a-z &-]{1,48}[a-z])",
            r"(?:想学|想读|专业是|主修|想申请的专业是)\s*([\p{Han}A-Za-z]{2,12})",
        ],
        base_importance: 0.75,
        boosts: &[("definitely", 0.05), ("passionate", 0.05), ("一定", 0.05)],
        validator: Validator::Subject,
        key: RuleKey::Fixed("user:major"),
        strategy: ConflictStrategy::KeepLatest,
        ttl_days: None,
        template: Some("Intended major: {value}"),
        entity: Some(EntityEmitter {
            entity_type: EntityType::Topic,
            description: "Intended field of study",
        }),
    },
    ExtractionRule {
        id: "target_school",
        memory_type: MemoryType::Preference,
        category: "target_school",
        patterns: &[
            concat!(
                r"(?i:apply(?:ing)?\s+to|dream\s+school\s+is|target\s+school\s+is|first\s+choice\s+is|want\s+to\s+(?:go\s+to|attend|get\s+into))\s+",
                school!()
            ),
            concat!(r"(?:想去|想申请|目标学校是|梦校是)\s*", school!()),
        ],
        base_importance: 0.8,
        boosts: &[("dream", 0.1), ("first choice", 0.1), ("梦校", 0.1)],
        validator: Validator::School,
        key: RuleKey::PerValue("user:target_school"),
        strategy: ConflictStrategy::KeepLatest,
        ttl_days: None,
        template: Some("Target school: {value}"),
        entity: Some(EntityEmitter {
            entity_type: EntityType::School,
            description: "Target school",
        }),
    },
    ExtractionRule {
        id: "budget",
        memory_type: MemoryType::Preference,
        category: "budget",
        patterns: &[
            r"(?i)(?:budget|预算)\D{0,20}?(\$?\s*\d[\d,]*(?:\.\d+)?\s*(?:k\b|thousand|万|美元|dollars|usd|rmb|元)?)",
            r"(?i)(?:afford|spend)\D{0,15}?(\$\s*\d[\d,]*(?:\.\d+)?\s*(?:k\b|thousand)?)",
        ],
        base_importance: 0.7,
        boosts: &[("max", 0.05), ("at most", 0.05), ("最多", 0.05), ("per year", 0.03)],
        validator: Validator::Money,
        key: RuleKey::Fixed("user:budget"),
        strategy: ConflictStrategy::KeepLatest,
        ttl_days: None,
        template: Some("Budget: {value}"),
        entity: None,
    },
    ExtractionRule {
        id: "early_plan",
        memory_type: MemoryType::Decision,
        category: "application_plan",
        patterns: &[
            concat!(
                r"(?i:appl(?:y|ying|ied)\s+(?:early\s+decision|early\s+action|restrictive\s+early\s+action|ed2?|ea|rea)(?:\s+ii?)?\s+(?:to|at|for))\s+",
                school!()
            ),
            concat!(r"(?i:(?:early\s+decision|early\s+action)\s+(?:to|at|for))\s+", school!()),
            concat!(
                r"(?:(?:^|[^A-Za-z])(?:ED|EA)(?:\s*(?:了|申请)\s*|\s+)|早申\s*(?:了|申请)?\s*)",
                school!()
            ),
        ],
        base_importance: 0.9,
        boosts: &[("binding", 0.1), ("绑定", 0.1)],
        validator: Validator::School,
        key: RuleKey::Fixed("user:early_plan"),
        strategy: ConflictStrategy::AskUser,
        ttl_days: None,
        template: Some("Early application: {value}"),
        entity: Some(EntityEmitter {
            entity_type: EntityType::School,
            description: "Early application school",
        }),
    },
    ExtractionRule {
        id: "decision",
        memory_type: MemoryType::Decision,
        category: "decision",
        patterns: &[
            r"(?i)(?:I(?:'ve|\s+have)?\s+decided\s+to|I\s+chose\s+to|I'm\s+going\s+to\s+commit\s+to)\s+([^.!?\n]{3,120})",
            r"(?:我决定|我已经决定|我选择)\s*([^。！？.!?\n]{2,60})",
        ],
        base_importance: 0.8,
        boosts: &[("final", 0.1), ("definitely", 0.05), ("最终", 0.1)],
        validator: Validator::Clause,
        key: RuleKey::Content,
        strategy: ConflictStrategy::KeepLatest,
        ttl_days: None,
        template: Some("Decided: {value}"),
        entity: None,
    },
    ExtractionRule {
        id: "advice_feedback",
        memory_type: MemoryType::Feedback,
        category: "advice",
        patterns: &[
            r"(?i)((?:that|this|your)\s+(?:advice|suggestion|tip|recommendation)s?\s+(?:was|were|is|are)\s+(?:very\s+|really\s+|super\s+|not\s+)?(?:helpful|useful|great|good|useless|unhelpful|bad|confusing|wrong))",
            r"(?i)(thanks?,?\s+(?:that|this)\s+help(?:s|ed))",
            r"((?:建议|意见)(?:很|非常|不太|没)?(?:有用|有帮助|没用|不错))",
        ],
        base_importance: 0.5,
        boosts: &[("really", 0.05), ("very", 0.05), ("非常", 0.05)],
        validator: Validator::Sentiment,
        key: RuleKey::Content,
        strategy: ConflictStrategy::KeepBoth,
        ttl_days: Some(90),
        template: Some("Advice feedback {value}"),
        entity: None,
    },
];

/// Look up a rule by id
pub fn rule(id: &str) -> Option<&'static ExtractionRule> {
    RULES.iter().find(|r| r.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_ids_unique() {
        let mut ids: Vec<_> = RULES.iter().map(|r| r.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), RULES.len());
    }

    #[test]
    fn test_all_patterns_compile() {
        for rule in RULES {
            for pattern in rule.patterns {
                assert!(Regex::new(pattern).is_ok(), "rule {} pattern {pattern}", rule.id);
            }
        }
    }

    #[test]
    fn test_importance_for_sums_boosts() {
        let gpa = rule("gpa").unwrap();
        assert_eq!(gpa.importance_for("my GPA is 3.8"), 0.9);
        assert!((gpa.importance_for("Cumulative GPA 3.8, unweighted") - 0.98).abs() < 1e-6);

        let plan = rule("early_plan").unwrap();
        assert_eq!(plan.importance_for("binding ED, 绑定"), 1.0);
    }

    #[test]
    fn test_rule_key_generation() {
        assert_eq!(RuleKey::Fixed("user:gpa").generate("3.80").as_deref(), Some("user:gpa"));
        assert_eq!(
            RuleKey::PerValue("user:target_school").generate(" MIT ").as_deref(),
            Some("user:target_school:mit")
        );
        assert_eq!(RuleKey::Content.generate("x"), None);
    }
}
