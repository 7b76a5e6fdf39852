#![forbid(unsafe_code)]

pub mod answer_validator;
pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod integrity;
pub mod module_runner;
pub mod session_controller;
pub mod timer;

pub use assess_core::Clock;

pub use api::{ContentApi, GradingApi, HttpAssessmentClient, SubmissionPayload};
pub use capture::{
    AudioCaptureDevice, AudioClip, CpalCaptureDevice, DeniedCaptureDevice, RecordingCapture,
    UnavailableCaptureDevice,
};
pub use config::ApiConfig;
pub use error::{
    ApiError, CaptureError, ContentError, ModuleError, SessionError, SubmissionError,
    ValidationError,
};
pub use integrity::{IntegrityMonitor, ViolationNotice, Visibility, VisibilitySource};
pub use module_runner::{
    ModuleProgress, ModuleRunner, ModuleStatus, SubmitOutcome, SubmitTrigger,
};
pub use session_controller::{SessionController, SessionEvent};
pub use timer::{Countdown, MODULE_TIME_LIMIT_SECONDS, ModuleTimer, TickOutcome, TimerEvent};
