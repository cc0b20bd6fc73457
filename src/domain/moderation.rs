//! Moderation of ad copy before it is accepted into the cache.
//!
//! The word list is deliberately small; a rejected request must leave
//! the cache untouched, which is the property the callers rely on.

use once_cell::sync::Lazy;

use crate::domain::error::DomainError;

static FORBIDDEN: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "fuck", "shit", "bitch", "cunt", "asshole", "bastard", "dick", "whore",
    ]
});

/// Scan every text field of an ad submission and reject it when a
/// forbidden word appears as a whole word.
pub fn check(texts: &[&str]) -> Result<(), DomainError> {
    let mut found: Vec<String> = Vec::new();
    for text in texts {
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let lowered = word.to_lowercase();
            if FORBIDDEN.contains(&lowered.as_str()) && !found.contains(&lowered) {
                found.push(lowered);
            }
        }
    }
    if found.is_empty() {
        Ok(())
    } else {
        Err(DomainError::ForbiddenWords { words: found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_passes() {
        assert!(check(&["Sunny flat", "clean text"]).is_ok());
    }

    #[test]
    fn forbidden_word_is_reported_in_message() {
        let err = check(&["fuck this"]).expect_err("must reject");
        assert_eq!(err.to_string(), "forbidden words: [fuck]");
    }

    #[test]
    fn detection_ignores_case_and_punctuation() {
        assert!(check(&["well, FUCK."]).is_err());
    }

    #[test]
    fn substring_inside_word_is_not_flagged() {
        // "class" contains no forbidden whole word.
        assert!(check(&["classic shitake"]).is_ok());
    }
}
