//! Copy-detection for free-text answers.
//!
//! A Writing answer is rejected when any sentence of the supplied example is
//! contained in it. The check is deliberately one-directional: an answer
//! sentence appearing inside the example is not flagged.

use crate::error::ValidationError;

/// Trims, collapses internal whitespace runs to single spaces, and
/// lowercases.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Splits on the period delimiter, trimming each unit and discarding
/// empty ones.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split('.')
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

/// Checks a candidate answer against the example text shown with the
/// prompt.
///
/// # Errors
///
/// Returns `ValidationError::BannedSentence` carrying the first example
/// sentence found inside the normalized answer.
pub fn validate_answer(answer: &str, example: &str) -> Result<(), ValidationError> {
    let normalized_answer = normalize(answer);

    for sentence in split_sentences(example) {
        let normalized_sentence = normalize(sentence);
        if normalized_sentence.is_empty() {
            continue;
        }
        if normalized_answer.contains(&normalized_sentence) {
            return Err(ValidationError::BannedSentence {
                sentence: sentence.to_string(),
            });
        }
    }

    Ok(())
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_answer_containing_example_sentence() {
        let example = "This is a test. Another sentence.";
        let err = validate_answer("I wrote this is a test today", example).unwrap_err();
        assert_eq!(
            err,
            ValidationError::BannedSentence {
                sentence: "This is a test".to_string()
            }
        );
    }

    #[test]
    fn accepts_original_answer() {
        let example = "This is a test. Another sentence.";
        assert!(validate_answer("I wrote something totally original", example).is_ok());
    }

    #[test]
    fn comparison_ignores_case_and_whitespace() {
        let example = "Dear  team,\nplease find attached.";
        let err = validate_answer("dear team, please FIND   attached!", example).unwrap_err();
        assert!(matches!(err, ValidationError::BannedSentence { .. }));
    }

    #[test]
    fn check_is_one_directional() {
        // the whole answer appears inside a longer example sentence, but no
        // example sentence appears inside the answer
        let example = "The quarterly report shows strong growth in all regions.";
        assert!(validate_answer("strong growth", example).is_ok());
    }

    #[test]
    fn later_sentences_are_checked_too() {
        let example = "First idea. Second idea entirely.";
        let err = validate_answer("I believe second idea entirely", example).unwrap_err();
        assert_eq!(
            err,
            ValidationError::BannedSentence {
                sentence: "Second idea entirely".to_string()
            }
        );
    }

    #[test]
    fn empty_example_accepts_everything() {
        assert!(validate_answer("anything at all", "").is_ok());
        assert!(validate_answer("anything at all", " . . ").is_ok());
    }

    #[test]
    fn normalize_collapses_runs() {
        assert_eq!(normalize("  A\t\tB \n C  "), "a b c");
    }

    #[test]
    fn split_discards_empty_units() {
        assert_eq!(split_sentences("One. Two.. Three."), vec!["One", "Two", "Three"]);
    }
}
