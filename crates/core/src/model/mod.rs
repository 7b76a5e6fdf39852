mod content;
mod ids;
mod module;
mod recording;
mod result;
mod session;

pub use content::{
    AnswerOption, Block, BlockPayload, ContentModelError, MediaRef, Question, TestContent,
    TestDescriptor,
};
pub use ids::{
    BlockId, CandidateEmail, EmailError, OptionId, ParseIdError, QuestionId, SessionId, TestId,
    VerticalId,
};
pub use module::{ModuleKind, ModuleKindError};
pub use recording::{MIN_RECORDING_SECONDS, Recording, RecordingError};
pub use result::{ScoreError, SubmissionResult};
pub use session::{Session, SessionAdvance, SessionStateError, SessionStatus};
