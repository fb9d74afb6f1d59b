//! Numeric score sniffing for KEEP_HIGHEST
//!
//! Guesses the kind of a test score from magnitude alone: an SAT-like total
//! first, then a GPA-like decimal, then an ACT-like composite. The guess is
//! ambiguous outside academic scores ("100" could be TOEFL or a percentage),
//! so it only runs for the categories listed in [`SCORE_CATEGORIES`].

use std::sync::LazyLock;

use regex::Regex;

/// Categories whose content is sniffed for comparable scores
pub const SCORE_CATEGORIES: &[&str] = &["academic"];

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").ok());

/// A score normalized onto a common scale
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct SniffedScore {
    pub raw: f64,
    pub scaled: f64,
}

/// Sniff a comparable score from `content`, or `None` outside score
/// categories or when nothing plausible is found.
pub fn sniff_score(category: &str, content: &str) -> Option<SniffedScore> {
    if !SCORE_CATEGORIES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(category.trim()))
    {
        return None;
    }

    let tokens: Vec<&str> = NUMBER
        .as_ref()?
        .find_iter(content)
        .map(|m| m.as_str())
        .collect();

    let integers = || {
        tokens
            .iter()
            .filter(|t| !t.contains('.'))
            .filter_map(|t| t.parse::<u32>().ok().map(|v| (t.len(), f64::from(v))))
    };

    // 3-4 digit total in [400, 1600], as is
    if let Some((_, value)) = integers().find(|(len, v)| (3..=4).contains(len) && (400.0..=1600.0).contains(v)) {
        return Some(SniffedScore { raw: value, scaled: value });
    }

    // decimal in [0, 5], scaled x100
    if let Some(value) = tokens
        .iter()
        .filter(|t| t.contains('.'))
        .filter_map(|t| t.parse::<f64>().ok())
        .find(|v| (0.0..=5.0).contains(v))
    {
        return Some(SniffedScore { raw: value, scaled: value * 100.0 });
    }

    // 1-2 digit composite in [1, 36], scaled x10
    integers()
        .find(|(len, v)| (1..=2).contains(len) && (1.0..=36.0).contains(v))
        .map(|(_, value)| SniffedScore { raw: value, scaled: value * 10.0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaled(content: &str) -> Option<f64> {
        sniff_score("academic", content).map(|s| s.scaled)
    }

    #[test]
    fn test_sat_like() {
        assert_eq!(scaled("SAT: 1400"), Some(1400.0));
        assert_eq!(scaled("Superscored 1520 (750 EBRW)"), Some(1520.0));
    }

    #[test]
    fn test_gpa_like() {
        assert_eq!(scaled("GPA: 3.80"), Some(380.0));
        assert_eq!(scaled("GPA: 4.50/5.0"), Some(450.0));
    }

    #[test]
    fn test_act_like() {
        assert_eq!(scaled("ACT: 32"), Some(320.0));
    }

    #[test]
    fn test_nothing_plausible() {
        assert_eq!(scaled("no numbers here"), None);
        assert_eq!(scaled("ACT: 40"), None);
    }

    #[test]
    fn test_toefl_is_ambiguous() {
        // 100 is neither SAT-like nor ACT-like, so TOEFL totals never compare
        assert_eq!(scaled("TOEFL: 100"), None);
        // a two-digit TOEFL is mistaken for an ACT composite
        assert_eq!(scaled("TOEFL: 30"), Some(300.0));
    }

    #[test]
    fn test_scoped_to_score_categories() {
        assert!(sniff_score("budget", "Budget: 1500 USD").is_none());
        assert!(sniff_score("Academic", "SAT 1500").is_some());
    }
}
