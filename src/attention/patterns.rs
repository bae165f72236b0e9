//! Question and direct-address pattern sets used by the attention engine's
//! rule-based pass.

use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns that mark a sentence as a question directed outward: a leading
/// WH-word or auxiliary verb, or containing "you"/"your" together with a
/// terminal `?`.
static QUESTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("terminal-question-mark", Regex::new(r"\?\s*$").unwrap()),
        (
            "leading-wh-word",
            Regex::new(r"(?i)^\s*(who|what|when|where|why|how|which)\b").unwrap(),
        ),
        (
            "leading-auxiliary",
            Regex::new(r"(?i)^\s*(can|could|would|will|do|does|did|is|are|should|may|might)\b")
                .unwrap(),
        ),
        (
            "you-or-your-with-question-mark",
            Regex::new(r"(?i)\b(you|your)\b.*\?").unwrap(),
        ),
    ]
});

/// Patterns for direct address: a greeting followed by a name, formal
/// address terms, apology-style attention grabs, and leading imperatives.
static DIRECT_ADDRESS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "greeting-plus-name",
            Regex::new(r"(?i)^\s*(hey|hi|hello|yo)\s+\w+").unwrap(),
        ),
        (
            "formal-address",
            Regex::new(r"(?i)\b(sir|ma'am|madam|mister|miss)\b").unwrap(),
        ),
        (
            "excuse-or-pardon",
            Regex::new(r"(?i)\b(excuse me|pardon me)\b").unwrap(),
        ),
        (
            "leading-imperative",
            Regex::new(r"(?i)^\s*(look|listen)\b").unwrap(),
        ),
    ]
});

/// Returns the names of every question pattern that matches `text`.
pub fn matching_question_patterns(text: &str) -> Vec<String> {
    QUESTION_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Returns the names of every direct-address pattern that matches `text`.
pub fn matching_direct_address_patterns(text: &str) -> Vec<String> {
    DIRECT_ADDRESS_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_mark_is_recognized() {
        assert!(!matching_question_patterns("is this on?").is_empty());
    }

    #[test]
    fn greeting_plus_name_is_recognized() {
        assert!(!matching_direct_address_patterns("hey Sam, got a second?").is_empty());
    }

    #[test]
    fn plain_statement_matches_nothing() {
        assert!(matching_question_patterns("the weather is nice today").is_empty());
        assert!(matching_direct_address_patterns("the weather is nice today").is_empty());
    }
}
