use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use url::Url;

use crate::model::ids::{BlockId, OptionId, QuestionId, TestId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentModelError {
    #[error("invalid media url: {0}")]
    InvalidMediaUrl(String),
}

//
// ─── MEDIA ─────────────────────────────────────────────────────────────────────
//

/// Reference to an external media asset (video or audio prompt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef(Url);

impl MediaRef {
    /// Parses and validates a raw URL string.
    ///
    /// # Errors
    ///
    /// Returns `ContentModelError::InvalidMediaUrl` if the string is not an
    /// absolute URL.
    pub fn parse(raw: &str) -> Result<Self, ContentModelError> {
        Url::parse(raw)
            .map(MediaRef)
            .map_err(|_| ContentModelError::InvalidMediaUrl(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Serialize for MediaRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for MediaRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MediaRef::parse(&raw).map_err(D::Error::custom)
    }
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

/// One selectable answer for a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: OptionId,
    pub text: String,
}

/// A single-choice question; exactly one option is selectable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub options: Vec<AnswerOption>,
}

impl Question {
    /// True when the given option belongs to this question.
    #[must_use]
    pub fn has_option(&self, option: OptionId) -> bool {
        self.options.iter().any(|o| o.id == option)
    }
}

//
// ─── BLOCKS ────────────────────────────────────────────────────────────────────
//

/// Content of a block: either a question group (Listening/Reading) or a
/// free-response prompt (Speaking/Writing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockPayload {
    Questions {
        instructions: Option<String>,
        media: Option<MediaRef>,
        questions: Vec<Question>,
    },
    Prompt {
        text: String,
        instruction: String,
        example: Option<String>,
    },
}

/// A content unit within a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub payload: BlockPayload,
}

impl Block {
    /// Questions carried by this block; empty for prompt blocks.
    #[must_use]
    pub fn questions(&self) -> &[Question] {
        match &self.payload {
            BlockPayload::Questions { questions, .. } => questions,
            BlockPayload::Prompt { .. } => &[],
        }
    }

    /// Example text for prompt blocks, if the author supplied one.
    #[must_use]
    pub fn example(&self) -> Option<&str> {
        match &self.payload {
            BlockPayload::Prompt { example, .. } => example.as_deref(),
            BlockPayload::Questions { .. } => None,
        }
    }
}

//
// ─── TESTS (content) ───────────────────────────────────────────────────────────
//

/// Entry in the test catalog for a vertical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDescriptor {
    pub id: TestId,
    pub title: String,
}

/// Full test detail with its ordered blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestContent {
    pub id: TestId,
    pub title: String,
    pub description: Option<String>,
    pub blocks: Vec<Block>,
}

impl TestContent {
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Total number of questions across all blocks.
    #[must_use]
    pub fn total_questions(&self) -> usize {
        self.blocks.iter().map(|b| b.questions().len()).sum()
    }

    /// Looks up a block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
