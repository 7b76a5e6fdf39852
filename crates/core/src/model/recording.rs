use thiserror::Error;

use crate::model::ids::BlockId;

/// Shortest clip the grader will accept, inclusive.
pub const MIN_RECORDING_SECONDS: f64 = 1.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordingError {
    #[error("recording is too short: {duration_seconds:.3}s (minimum {MIN_RECORDING_SECONDS}s)")]
    TooShort { duration_seconds: f64 },
    #[error("recording has no audio data")]
    Empty,
}

/// A finalized answer clip for one speaking block.
///
/// The duration is decoded from the audio itself, never trusted from the
/// caller, so a stored recording always satisfies the minimum length.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    block_id: BlockId,
    wav: Vec<u8>,
    duration_seconds: f64,
}

impl Recording {
    /// Validates and wraps a finalized clip.
    ///
    /// # Errors
    ///
    /// Returns `RecordingError::Empty` for zero-byte audio and
    /// `RecordingError::TooShort` when the decoded duration is below
    /// [`MIN_RECORDING_SECONDS`]. The boundary is inclusive: exactly 1.0 s
    /// is accepted.
    pub fn new(
        block_id: BlockId,
        wav: Vec<u8>,
        duration_seconds: f64,
    ) -> Result<Self, RecordingError> {
        if wav.is_empty() {
            return Err(RecordingError::Empty);
        }
        if duration_seconds < MIN_RECORDING_SECONDS {
            return Err(RecordingError::TooShort { duration_seconds });
        }
        Ok(Self {
            block_id,
            wav,
            duration_seconds,
        })
    }

    #[must_use]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Encoded WAV bytes, ready for upload.
    #[must_use]
    pub fn wav(&self) -> &[u8] {
        &self.wav
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    /// Upload part name for this clip, e.g. `block_12.wav`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("block_{}.wav", self.block_id)
    }
}
