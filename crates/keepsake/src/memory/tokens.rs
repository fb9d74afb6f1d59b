//! Token estimation for budgeting compaction and context assembly.
//!
//! CJK text packs roughly 1.5 characters per token, everything else about 4.

/// Estimate the token count of `text`, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });

    (cjk as f64 / 1.5 + other as f64 / 4.0).ceil() as usize
}

/// Sum of token estimates across several texts
pub fn estimate_tokens_all<S: AsRef<str>>(texts: &[S]) -> usize {
    texts.iter().map(|t| estimate_tokens(t.as_ref())).sum()
}

/// Longest prefix of `text` whose estimate stays within `max_tokens`
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let (mut cjk, mut other) = (0usize, 0usize);
    for (index, c) in text.char_indices() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
        if (cjk as f64 / 1.5 + other as f64 / 4.0).ceil() as usize > max_tokens {
            return &text[..index];
        }
    }
    text
}

pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF
            | 0x3400..=0x4DBF
            | 0x20000..=0x2A6DF
            | 0xF900..=0xFAFF
            | 0x3040..=0x30FF
            | 0xAC00..=0xD7AF
            | 0x3000..=0x303F
            | 0xFF00..=0xFFEF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_ascii_rounds_up() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_cjk_is_denser() {
        // 3 Han characters -> 2 tokens
        assert_eq!(estimate_tokens("计算机"), 2);
        assert!(estimate_tokens("我的目标是麻省理工") > estimate_tokens("my goal is MIT"));
    }

    #[test]
    fn test_mixed_text() {
        // 2 CJK + 4 ASCII = 1.33 + 1 = 2.33 -> 3
        assert_eq!(estimate_tokens("我的GPA "), 3);
    }

    #[test]
    fn test_truncate_stays_within_budget() {
        assert_eq!(truncate_to_tokens("abcdefghij", 2), "abcdefgh");
        assert_eq!(truncate_to_tokens("计算机科学", 2), "计算机");
        assert_eq!(truncate_to_tokens("short", 10), "short");
        assert_eq!(truncate_to_tokens("abc", 0), "");
    }

    #[test]
    fn test_sum_over_texts() {
        assert_eq!(estimate_tokens_all(&["abcd", "abcd"]), 2);
    }
}
