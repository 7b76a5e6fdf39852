//! Shared error types for the services crate.

use thiserror::Error;

use assess_core::model::{BlockId, ModuleKind, QuestionId, RecordingError, ScoreError};
use assess_core::model::SessionStateError;
use storage::repository::StorageError;

use crate::module_runner::ModuleStatus;

/// Transport-level failures talking to the remote assessment API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Test content could not be loaded. The module enters `Errored` with a
/// reload action exposed to the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContentError {
    #[error("no tests available for this vertical")]
    NoTestsAvailable,
    #[error("test has no content")]
    NoContent,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A grading request failed. The module stays submittable; there is no
/// automatic retry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Score(#[from] ScoreError),
}

/// Recoverable input problems. Progression or submission is blocked until
/// the candidate corrects the input.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("answer contains a sentence from the example: {sentence:?}")]
    BannedSentence { sentence: String },
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error("block {0} has no recording")]
    MissingRecording(BlockId),
}

/// Microphone capability failures. Recording stays unavailable until the
/// candidate resolves them; the module itself keeps running.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("no capture device available")]
    Unavailable,
    #[error("no capture in progress")]
    NotRecording,
    #[error("capture already in progress")]
    AlreadyRecording,
    #[error("audio encoding failed: {0}")]
    Encode(String),
}

/// Errors emitted by a `ModuleRunner`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModuleError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("operation not allowed while module is {0:?}")]
    InvalidStatus(ModuleStatus),
    #[error("module kind {0} does not support this operation")]
    UnsupportedKind(ModuleKind),
    #[error("unknown question {0} for this test")]
    UnknownQuestion(QuestionId),
    #[error("unknown block {0} for this test")]
    UnknownBlock(BlockId),
    #[error("option does not belong to question {0}")]
    UnknownOption(QuestionId),
}

/// Errors emitted by the `SessionController`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    State(#[from] SessionStateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Module(#[from] ModuleError),
}
