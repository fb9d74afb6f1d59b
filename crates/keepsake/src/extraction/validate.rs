//! Validators that normalize captured values
//!
//! A validator sees the captured value, the full match and the whole message.
//! It returns the normalized value or a short rejection reason; rejections are
//! counted by the engine and never surface as errors.

use std::sync::LazyLock;

use regex::Regex;

use crate::extraction::rules::Validator;

/// Explicit GPA scale: "/4.0", "满分5.0", "out of 4.3", "on a 100 scale"
static GPA_SCALE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:/\s*|满分\s*|out\s+of\s+|on\s+a\s+)(\d{1,3}(?:\.\d)?)").ok()
});

const GPA_SCALES: [f32; 4] = [4.0, 4.3, 5.0, 100.0];

const SUBJECT_CONNECTORS: [&str; 9] = [
    " and ", " because ", " at ", " but ", " since ", " or ", " so ", " in college", " next ",
];

const SUBJECT_STOPWORDS: [&str; 8] = [
    "it", "that", "this", "something", "anything", "abroad", "there", "more",
];

const SCHOOL_STOPWORDS: [&str; 9] = ["I", "It", "The", "A", "My", "This", "That", "We", "Is"];

const NEGATIVE_MARKERS: [&str; 10] = [
    "not ", "n't", "useless", "unhelpful", "bad", "confusing", "wrong", "没用", "不太", "没有",
];

impl Validator {
    pub fn validate(&self, raw: &str, matched: &str, message: &str) -> Result<String, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty value".to_string());
        }

        match self {
            Validator::Gpa => gpa(raw, matched, message),
            Validator::Sat => {
                let score = integer(raw)?;
                if !(400..=1600).contains(&score) {
                    return Err(format!("SAT {score} outside 400-1600"));
                }
                if score % 10 != 0 {
                    return Err(format!("SAT {score} is not a multiple of 10"));
                }
                Ok(score.to_string())
            }
            Validator::Act => {
                let score = integer(raw)?;
                if !(1..=36).contains(&score) {
                    return Err(format!("ACT {score} outside 1-36"));
                }
                Ok(score.to_string())
            }
            Validator::Toefl => {
                let score = integer(raw)?;
                if score > 120 {
                    return Err(format!("TOEFL {score} above 120"));
                }
                Ok(score.to_string())
            }
            Validator::Ielts => {
                let band: f32 = raw.parse().map_err(|_| format!("not a number: {raw}"))?;
                if !(0.0..=9.0).contains(&band) || (band * 2.0).fract() != 0.0 {
                    return Err(format!("IELTS {band} is not a half band in 0-9"));
                }
                Ok(format!("{band:.1}"))
            }
            Validator::Year => {
                let year = integer(raw)?;
                if !(1990..=2100).contains(&year) {
                    return Err(format!("year {year} out of range"));
                }
                Ok(year.to_string())
            }
            Validator::Subject => subject(raw),
            Validator::School => school(raw),
            Validator::Money => money(raw),
            Validator::Clause => {
                let clause = collapse(trim_punctuation(raw));
                let chars = clause.chars().count();
                if !(2..=160).contains(&chars) {
                    return Err(format!("clause length {chars} out of range"));
                }
                Ok(clause)
            }
            Validator::Sentiment => {
                let lowered = raw.to_lowercase();
                let label = if NEGATIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
                    "negative"
                } else {
                    "positive"
                };
                Ok(format!("({label}): {}", collapse(trim_punctuation(raw))))
            }
        }
    }
}

fn integer(raw: &str) -> Result<u32, String> {
    raw.parse().map_err(|_| format!("not an integer: {raw}"))
}

fn gpa(raw: &str, matched: &str, message: &str) -> Result<String, String> {
    let value: f32 = raw.parse().map_err(|_| format!("not a number: {raw}"))?;
    if value <= 0.0 {
        return Err("GPA must be positive".to_string());
    }

    let scale = explicit_scale(matched)
        .or_else(|| explicit_scale(message))
        .or_else(|| inferred_scale(value))
        .ok_or_else(|| format!("no GPA scale fits {value}"))?;

    if value > scale {
        return Err(format!("GPA {value} exceeds scale {scale}"));
    }

    if scale == 100.0 {
        Ok(format!("{value:.0}/100"))
    } else if scale == 4.0 {
        Ok(format!("{value:.2}"))
    } else {
        Ok(format!("{value:.2}/{scale:.1}"))
    }
}

fn explicit_scale(text: &str) -> Option<f32> {
    let re = GPA_SCALE.as_ref()?;
    re.captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<f32>().ok())
        .find_map(|s| GPA_SCALES.iter().copied().find(|known| (known - s).abs() < 1e-3))
}

fn inferred_scale(value: f32) -> Option<f32> {
    if value <= 4.0 {
        Some(4.0)
    } else if value <= 4.3 {
        Some(4.3)
    } else if value <= 5.0 {
        Some(5.0)
    } else if (50.0..=100.0).contains(&value) {
        Some(100.0)
    } else {
        None
    }
}

fn subject(raw: &str) -> Result<String, String> {
    let lowered = raw.to_lowercase();
    let cut = SUBJECT_CONNECTORS
        .iter()
        .filter_map(|c| lowered.find(c))
        .min()
        .unwrap_or(raw.len());
    let subject = collapse(trim_punctuation(raw.get(..cut).unwrap_or(raw)));

    if subject.chars().count() < 2 {
        return Err("subject too short".to_string());
    }
    if SUBJECT_STOPWORDS.contains(&subject.to_lowercase().as_str()) {
        return Err(format!("'{subject}' is not a subject"));
    }
    Ok(title_case(&subject))
}

fn school(raw: &str) -> Result<String, String> {
    let name = collapse(trim_punctuation(raw.trim_end_matches("'s")));
    let chars = name.chars().count();
    if !(2..=80).contains(&chars) {
        return Err(format!("school name length {chars} out of range"));
    }
    if SCHOOL_STOPWORDS.contains(&name.as_str()) {
        return Err(format!("'{name}' is not a school"));
    }
    Ok(name)
}

fn money(raw: &str) -> Result<String, String> {
    let lowered = raw.to_lowercase();
    let digits: String = lowered
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = digits
        .parse()
        .map_err(|_| format!("not an amount: {raw}"))?;

    let multiplier = if lowered.contains('万') {
        10_000.0
    } else if lowered.contains("thousand") || lowered.contains('k') {
        1_000.0
    } else {
        1.0
    };

    let currency = if lowered.contains("美元")
        || lowered.contains('$')
        || lowered.contains("dollar")
        || lowered.contains("usd")
    {
        "USD"
    } else if lowered.contains('元') || lowered.contains("rmb") || lowered.contains('万') {
        "CNY"
    } else {
        "USD"
    };

    let amount = value * multiplier;
    if amount <= 0.0 || amount > 100_000_000.0 {
        return Err(format!("amount {amount} out of range"));
    }
    Ok(format!("{} {}", amount.round() as u64, currency))
}

fn trim_punctuation(text: &str) -> &str {
    text.trim().trim_matches(|c: char| {
        (c.is_ascii_punctuation() && c != '&' && c != '$') || "，。！？；：、".contains(c)
    })
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .enumerate()
        .map(|(i, word)| {
            if i > 0 && matches!(word, "and" | "of" | "in" | "the") {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod gpa {
        use super::*;

        #[test]
        fn test_default_four_scale() {
            assert_eq!(Validator::Gpa.validate("3.8", "GPA 3.8", "GPA 3.8"), Ok("3.80".into()));
        }

        #[test]
        fn test_scale_from_match() {
            let message = "我的 GPA 是 3.8/4.0";
            assert_eq!(
                Validator::Gpa.validate("3.8", "GPA 是 3.8/4.0", message),
                Ok("3.80".into())
            );
        }

        #[test]
        fn test_scale_from_message_context() {
            let message = "GPA 4.5，满分5.0";
            assert_eq!(
                Validator::Gpa.validate("4.5", "GPA 4.5", message),
                Ok("4.50/5.0".into())
            );
        }

        #[test]
        fn test_hundred_scale() {
            assert_eq!(
                Validator::Gpa.validate("92", "GPA 92", "GPA 92 out of 100"),
                Ok("92/100".into())
            );
        }

        #[test]
        fn test_rejects_over_scale() {
            assert!(Validator::Gpa.validate("4.5", "GPA 4.5/4.0", "GPA 4.5/4.0").is_err());
            assert!(Validator::Gpa.validate("12", "GPA 12", "GPA 12").is_err());
            assert!(Validator::Gpa.validate("0", "GPA 0", "GPA 0").is_err());
        }
    }

    #[test]
    fn test_sat_bounds() {
        assert_eq!(Validator::Sat.validate("1400", "", ""), Ok("1400".into()));
        assert!(Validator::Sat.validate("1700", "", "").is_err());
        assert!(Validator::Sat.validate("350", "", "").is_err());
        assert!(Validator::Sat.validate("1405", "", "").is_err());
    }

    #[test]
    fn test_act_and_toefl_bounds() {
        assert_eq!(Validator::Act.validate("34", "", ""), Ok("34".into()));
        assert!(Validator::Act.validate("0", "", "").is_err());
        assert!(Validator::Act.validate("37", "", "").is_err());
        assert_eq!(Validator::Toefl.validate("110", "", ""), Ok("110".into()));
        assert!(Validator::Toefl.validate("121", "", "").is_err());
    }

    #[test]
    fn test_ielts_half_bands() {
        assert_eq!(Validator::Ielts.validate("7.5", "", ""), Ok("7.5".into()));
        assert_eq!(Validator::Ielts.validate("7", "", ""), Ok("7.0".into()));
        assert!(Validator::Ielts.validate("9.5", "", "").is_err());
    }

    #[test]
    fn test_subject_cut_at_connector() {
        assert_eq!(
            Validator::Subject.validate("computer science and maybe math", "", ""),
            Ok("Computer Science".into())
        );
        assert_eq!(
            Validator::Subject.validate("history of art", "", ""),
            Ok("History of Art".into())
        );
        assert!(Validator::Subject.validate("something", "", "").is_err());
        assert_eq!(Validator::Subject.validate("计算机", "", ""), Ok("计算机".into()));
    }

    #[test]
    fn test_school_normalization() {
        assert_eq!(Validator::School.validate("MIT.", "", ""), Ok("MIT".into()));
        assert_eq!(
            Validator::School.validate("University  of Michigan", "", ""),
            Ok("University of Michigan".into())
        );
        assert!(Validator::School.validate("I", "", "").is_err());
    }

    #[test]
    fn test_money_units() {
        assert_eq!(Validator::Money.validate("$60k", "", ""), Ok("60000 USD".into()));
        assert_eq!(Validator::Money.validate("$45,000", "", ""), Ok("45000 USD".into()));
        assert_eq!(Validator::Money.validate("30万", "", ""), Ok("300000 CNY".into()));
        assert_eq!(Validator::Money.validate("5万美元", "", ""), Ok("50000 USD".into()));
        assert!(Validator::Money.validate("0", "", "").is_err());
    }

    #[test]
    fn test_sentiment_labels() {
        assert_eq!(
            Validator::Sentiment.validate("that advice was really helpful", "", ""),
            Ok("(positive): that advice was really helpful".into())
        );
        assert!(
            Validator::Sentiment
                .validate("your suggestion was not useful", "", "")
                .unwrap()
                .starts_with("(negative)")
        );
    }
}
