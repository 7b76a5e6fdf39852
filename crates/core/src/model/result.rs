use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoreError {
    #[error("score {0} is outside 0..=100")]
    OutOfRange(f64),
}

/// Parsed grading response for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    score: f64,
    feedback_report: Option<String>,
    cefr_level: Option<String>,
}

impl SubmissionResult {
    /// Validates the score range and wraps the optional feedback fields.
    ///
    /// # Errors
    ///
    /// Returns `ScoreError::OutOfRange` if the score is not a finite value
    /// in `0.0..=100.0`.
    pub fn new(
        score: f64,
        feedback_report: Option<String>,
        cefr_level: Option<String>,
    ) -> Result<Self, ScoreError> {
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(ScoreError::OutOfRange(score));
        }
        Ok(Self {
            score,
            feedback_report,
            cefr_level,
        })
    }

    #[must_use]
    pub fn score(&self) -> f64 {
        self.score
    }

    #[must_use]
    pub fn feedback_report(&self) -> Option<&str> {
        self.feedback_report.as_deref()
    }

    #[must_use]
    pub fn cefr_level(&self) -> Option<&str> {
        self.cefr_level.as_deref()
    }

    /// True only for a score of exactly 0.0, the speaking rerecord gate.
    #[must_use]
    pub fn is_zero_score(&self) -> bool {
        self.score == 0.0
    }
}
