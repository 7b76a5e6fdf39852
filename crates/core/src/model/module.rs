use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleKindError {
    #[error("unknown module kind: {0}")]
    Unknown(String),
}

//
// ─── MODULE KIND ───────────────────────────────────────────────────────────────
//

/// The four skill modules of a sitting, in their fixed order.
///
/// Declaration order is the assessment order; `Ord` therefore sorts kinds the
/// way the candidate encounters them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Listening,
    Speaking,
    Reading,
    Writing,
}

impl ModuleKind {
    /// The fixed module sequence of a sitting. Never reordered.
    pub const ORDER: [ModuleKind; 4] = [
        ModuleKind::Listening,
        ModuleKind::Speaking,
        ModuleKind::Reading,
        ModuleKind::Writing,
    ];

    /// Wire name used in API paths and store keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Listening => "listening",
            ModuleKind::Speaking => "speaking",
            ModuleKind::Reading => "reading",
            ModuleKind::Writing => "writing",
        }
    }

    /// True for kinds whose answers are recorded audio rather than text.
    #[must_use]
    pub fn records_audio(&self) -> bool {
        matches!(self, ModuleKind::Speaking)
    }

    /// True for kinds answered by picking one option per question.
    #[must_use]
    pub fn has_questions(&self) -> bool {
        matches!(self, ModuleKind::Listening | ModuleKind::Reading)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = ModuleKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listening" => Ok(ModuleKind::Listening),
            "speaking" => Ok(ModuleKind::Speaking),
            "reading" => Ok(ModuleKind::Reading),
            "writing" => Ok(ModuleKind::Writing),
            other => Err(ModuleKindError::Unknown(other.to_string())),
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
