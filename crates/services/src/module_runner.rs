use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use assess_core::model::{
    Block, BlockId, CandidateEmail, ModuleKind, OptionId, QuestionId, Recording, Session,
    SessionId, SubmissionResult, TestContent, VerticalId,
};
use storage::repository::{ModuleRecord, SessionStore};

use crate::answer_validator::validate_answer;
use crate::api::{ContentApi, GradingApi, SubmissionPayload};
use crate::capture::{AudioCaptureDevice, RecordingCapture};
use crate::error::{ContentError, ModuleError, ValidationError};
use crate::timer::{MODULE_TIME_LIMIT_SECONDS, ModuleTimer, TimerEvent};

//
// ─── STATUS & OUTCOMES ─────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Loading,
    Ready,
    InProgress,
    Submitting,
    Completed,
    Errored,
}

/// How a submission was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    Manual,
    TimerExpired,
}

/// Outcome of a submission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Graded and completed.
    Completed(SubmissionResult),
    /// Speaking came back with exactly 0.0. The candidate must choose
    /// between discarding all recordings and accepting the score.
    ZeroScoreChoice(SubmissionResult),
    /// A second trigger arrived while a submission was in flight or done;
    /// no request was issued.
    AlreadySubmitted,
}

/// Answered/total counts for the progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleProgress {
    pub answered: usize,
    pub total: usize,
}

impl ModuleProgress {
    #[must_use]
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            (self.answered as f64 / self.total as f64 * 100.0).round() as u32
        }
    }
}

impl fmt::Display for ModuleProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} ({}%)", self.answered, self.total, self.percent())
    }
}

//
// ─── MODULE RUNNER ─────────────────────────────────────────────────────────────
//

/// Drives one module from content load to completion.
///
/// `Loading → Ready → InProgress → Submitting → Completed`, with `Errored`
/// reachable from `Loading` and `Submitting`. Submission is protected by an
/// explicit guard so a manual submit racing timer expiry issues at most one
/// grading request.
pub struct ModuleRunner {
    kind: ModuleKind,
    session_id: SessionId,
    candidate_email: CandidateEmail,
    vertical: VerticalId,
    content: Arc<dyn ContentApi>,
    grading: Arc<dyn GradingApi>,
    store: Arc<dyn SessionStore>,
    status: ModuleStatus,
    test: Option<TestContent>,
    answers: BTreeMap<QuestionId, OptionId>,
    essays: BTreeMap<BlockId, String>,
    capture: Option<RecordingCapture>,
    current_block: usize,
    time_remaining: u32,
    timer: Option<ModuleTimer>,
    submission_started: bool,
    pending_zero: Option<SubmissionResult>,
    result: Option<SubmissionResult>,
}

impl ModuleRunner {
    #[must_use]
    pub fn new(
        kind: ModuleKind,
        session: &Session,
        content: Arc<dyn ContentApi>,
        grading: Arc<dyn GradingApi>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            kind,
            session_id: session.id(),
            candidate_email: session.candidate_email().clone(),
            vertical: session.vertical(),
            content,
            grading,
            store,
            status: ModuleStatus::Loading,
            test: None,
            answers: BTreeMap::new(),
            essays: BTreeMap::new(),
            capture: None,
            current_block: 0,
            time_remaining: MODULE_TIME_LIMIT_SECONDS,
            timer: None,
            submission_started: false,
            pending_zero: None,
            result: None,
        }
    }

    /// Attaches a microphone capability. Required before recording.
    #[must_use]
    pub fn with_capture(mut self, device: Box<dyn AudioCaptureDevice>) -> Self {
        self.capture = Some(RecordingCapture::new(device));
        self
    }

    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    #[must_use]
    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    #[must_use]
    pub fn test(&self) -> Option<&TestContent> {
        self.test.as_ref()
    }

    #[must_use]
    pub fn result(&self) -> Option<&SubmissionResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    //
    // ─── LOADING ───────────────────────────────────────────────────────────────
    //

    /// Fetches the catalog and the first test's content.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` and leaves the module `Errored` when the
    /// catalog is empty, the fetch fails, or the test has no blocks.
    pub async fn load(&mut self) -> Result<(), ModuleError> {
        if self.status != ModuleStatus::Loading {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        match self.fetch_content().await {
            Ok(test) => {
                tracing::debug!(module = %self.kind, test = %test.id, blocks = test.block_count(), "content loaded");
                self.test = Some(test);
                self.status = ModuleStatus::Ready;
                Ok(())
            }
            Err(e) => {
                self.status = ModuleStatus::Errored;
                Err(e.into())
            }
        }
    }

    /// Retry action after a content load failure.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidStatus` unless the module errored before
    /// any content arrived; otherwise behaves like [`ModuleRunner::load`].
    pub async fn reload(&mut self) -> Result<(), ModuleError> {
        if self.status != ModuleStatus::Errored || self.test.is_some() {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        self.status = ModuleStatus::Loading;
        self.load().await
    }

    async fn fetch_content(&self) -> Result<TestContent, ContentError> {
        let tests = self.content.list_tests(self.kind, self.vertical).await?;
        let first = tests.first().ok_or(ContentError::NoTestsAvailable)?;
        let test = self.content.fetch_test(self.kind, first.id).await?;
        if test.blocks.is_empty() {
            return Err(ContentError::NoContent);
        }
        Ok(test)
    }

    //
    // ─── RUNNING ───────────────────────────────────────────────────────────────
    //

    /// Starts the module clock and moves to `InProgress`. Any previous timer
    /// is stopped first, so a runner never has two running.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidStatus` unless the module is `Ready`.
    pub fn begin(&mut self) -> Result<mpsc::UnboundedReceiver<TimerEvent>, ModuleError> {
        if self.status != ModuleStatus::Ready {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        if let Some(previous) = self.timer.take() {
            previous.stop();
        }
        let (timer, events) = ModuleTimer::start(self.time_remaining);
        self.timer = Some(timer);
        self.status = ModuleStatus::InProgress;
        tracing::debug!(module = %self.kind, seconds = self.time_remaining, "module started");
        Ok(events)
    }

    /// Applies a timer notification. Ticks keep `time_remaining`
    /// monotonically non-increasing; expiry forces a submission through the
    /// same guarded path as a manual submit.
    ///
    /// # Errors
    ///
    /// Propagates the forced submission's failure; the module is left
    /// `Errored` with no further automatic retry.
    pub async fn handle_timer(
        &mut self,
        event: TimerEvent,
    ) -> Result<Option<SubmitOutcome>, ModuleError> {
        match event {
            TimerEvent::Tick { remaining } => {
                self.time_remaining = self.time_remaining.min(remaining);
                Ok(None)
            }
            TimerEvent::Expired => {
                self.time_remaining = 0;
                if self.status == ModuleStatus::InProgress {
                    self.submit(SubmitTrigger::TimerExpired).await.map(Some)
                } else {
                    Ok(Some(SubmitOutcome::AlreadySubmitted))
                }
            }
        }
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn current_block_index(&self) -> usize {
        self.current_block
    }

    #[must_use]
    pub fn current_block(&self) -> Option<&Block> {
        self.test.as_ref().and_then(|t| t.blocks.get(self.current_block))
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.test.as_ref().map_or(0, TestContent::block_count)
    }

    #[must_use]
    pub fn is_final_block(&self) -> bool {
        self.block_count() > 0 && self.current_block + 1 == self.block_count()
    }

    /// Moves forward one block. For Writing the current block's answer is
    /// validated against the example first; rejection blocks the move.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::BannedSentence` when the Writing answer
    /// reuses an example sentence, or `ModuleError::InvalidStatus` outside
    /// `InProgress`.
    pub fn next_block(&mut self) -> Result<(), ModuleError> {
        if self.status != ModuleStatus::InProgress {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        if self.kind == ModuleKind::Writing {
            if let Some(block) = self.current_block() {
                if let Some(example) = block.example() {
                    let answer = self.essays.get(&block.id).map_or("", String::as_str);
                    validate_answer(answer, example)?;
                }
            }
        }
        if self.current_block + 1 < self.block_count() {
            self.current_block += 1;
        }
        Ok(())
    }

    /// Moves back one block; never gated.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidStatus` outside `InProgress`.
    pub fn previous_block(&mut self) -> Result<(), ModuleError> {
        if self.status != ModuleStatus::InProgress {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        self.current_block = self.current_block.saturating_sub(1);
        Ok(())
    }

    //
    // ─── ANSWERS ───────────────────────────────────────────────────────────────
    //

    /// Selects one option for a question; a later selection overwrites the
    /// earlier one.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::UnsupportedKind` for prompt-based modules,
    /// `UnknownQuestion`/`UnknownOption` for ids not in the test, and
    /// `InvalidStatus` outside `InProgress`.
    pub fn select_answer(
        &mut self,
        question: QuestionId,
        option: OptionId,
    ) -> Result<(), ModuleError> {
        if self.status != ModuleStatus::InProgress {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        if !self.kind.has_questions() {
            return Err(ModuleError::UnsupportedKind(self.kind));
        }
        let test = self.test.as_ref().ok_or(ModuleError::InvalidStatus(self.status))?;
        let found = test
            .blocks
            .iter()
            .flat_map(|b| b.questions())
            .find(|q| q.id == question)
            .ok_or(ModuleError::UnknownQuestion(question))?;
        if !found.has_option(option) {
            return Err(ModuleError::UnknownOption(question));
        }
        self.answers.insert(question, option);
        Ok(())
    }

    #[must_use]
    pub fn answer(&self, question: QuestionId) -> Option<OptionId> {
        self.answers.get(&question).copied()
    }

    /// Stores the free-text answer for a Writing block, replacing any
    /// previous text.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::UnsupportedKind` for other kinds,
    /// `UnknownBlock` for a block not in the test, and `InvalidStatus`
    /// outside `InProgress`.
    pub fn write_essay(
        &mut self,
        block: BlockId,
        text: impl Into<String>,
    ) -> Result<(), ModuleError> {
        if self.status != ModuleStatus::InProgress {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        if self.kind != ModuleKind::Writing {
            return Err(ModuleError::UnsupportedKind(self.kind));
        }
        let test = self.test.as_ref().ok_or(ModuleError::InvalidStatus(self.status))?;
        if test.block(block).is_none() {
            return Err(ModuleError::UnknownBlock(block));
        }
        self.essays.insert(block, text.into());
        Ok(())
    }

    #[must_use]
    pub fn essay(&self, block: BlockId) -> Option<&str> {
        self.essays.get(&block).map(String::as_str)
    }

    //
    // ─── RECORDING ─────────────────────────────────────────────────────────────
    //

    /// Begins recording for the current block.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedKind` for non-Speaking modules,
    /// `CaptureError::Unavailable` without an attached device, and the
    /// device's acquisition failures.
    pub async fn start_recording(&mut self) -> Result<(), ModuleError> {
        if self.status != ModuleStatus::InProgress {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        if !self.kind.records_audio() {
            return Err(ModuleError::UnsupportedKind(self.kind));
        }
        let block = self
            .current_block()
            .map(|b| b.id)
            .ok_or(ModuleError::InvalidStatus(self.status))?;
        let capture = self
            .capture
            .as_mut()
            .ok_or(crate::error::CaptureError::Unavailable)?;
        capture.start_recording(block).await?;
        Ok(())
    }

    /// Finalizes the running capture into the current block's recording.
    ///
    /// # Errors
    ///
    /// Returns the capture/validation failures of
    /// [`RecordingCapture::stop_recording`].
    pub async fn stop_recording(&mut self) -> Result<&Recording, ModuleError> {
        if self.status != ModuleStatus::InProgress {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        let capture = self
            .capture
            .as_mut()
            .ok_or(crate::error::CaptureError::Unavailable)?;
        capture.stop_recording().await
    }

    #[must_use]
    pub fn recording(&self, block: BlockId) -> Option<&Recording> {
        self.capture.as_ref().and_then(|c| c.recording(block))
    }

    //
    // ─── PROGRESS ──────────────────────────────────────────────────────────────
    //

    /// Progress for the module's indicator: questions answered for
    /// Listening/Reading, blocks recorded for Speaking, blocks written for
    /// Writing.
    #[must_use]
    pub fn progress(&self) -> ModuleProgress {
        let (answered, total) = match self.kind {
            ModuleKind::Listening | ModuleKind::Reading => (
                self.answers.len(),
                self.test.as_ref().map_or(0, TestContent::total_questions),
            ),
            ModuleKind::Speaking => (
                self.capture.as_ref().map_or(0, RecordingCapture::recorded_count),
                self.block_count(),
            ),
            ModuleKind::Writing => (self.essays.len(), self.block_count()),
        };
        ModuleProgress { answered, total }
    }

    //
    // ─── SUBMISSION ────────────────────────────────────────────────────────────
    //

    /// True when a manual submission would pass the pre-flight checks.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingRecording` naming the first
    /// Speaking block without a stored recording.
    pub fn ensure_submittable(&self) -> Result<(), ValidationError> {
        if self.kind.records_audio() {
            let blocks = self.test.as_ref().map_or(&[][..], |t| t.blocks.as_slice());
            match &self.capture {
                Some(capture) => {
                    if let Some(missing) = capture.first_missing(blocks) {
                        return Err(ValidationError::MissingRecording(missing));
                    }
                }
                None => {
                    if let Some(first) = blocks.first() {
                        return Err(ValidationError::MissingRecording(first.id));
                    }
                }
            }
        }
        Ok(())
    }

    /// Submits the collected answers for grading.
    ///
    /// The guard is set before the first grading call: a duplicate trigger
    /// (manual click racing timer expiry, double click, stale expiry event)
    /// returns `SubmitOutcome::AlreadySubmitted` without a second request.
    /// On failure the guard is released and the module lands in `Errored`,
    /// still submittable through [`ModuleRunner::retry_submit`].
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingRecording` for a manual Speaking
    /// submit with an unrecorded block, or the grading request's failure.
    pub async fn submit(&mut self, trigger: SubmitTrigger) -> Result<SubmitOutcome, ModuleError> {
        if self.submission_started {
            return Ok(SubmitOutcome::AlreadySubmitted);
        }
        if self.status != ModuleStatus::InProgress {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        if trigger == SubmitTrigger::Manual {
            self.ensure_submittable()?;
        }
        let test_id = self
            .test
            .as_ref()
            .map(|t| t.id)
            .ok_or(ModuleError::InvalidStatus(self.status))?;

        self.submission_started = true;
        self.status = ModuleStatus::Submitting;
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
        self.sync_answer_cache().await;

        let payload = self.build_payload();
        tracing::debug!(module = %self.kind, ?trigger, "submitting module");
        match self
            .grading
            .submit(self.kind, test_id, &self.candidate_email, &payload)
            .await
        {
            Ok(result) if self.kind.records_audio() && result.is_zero_score() => {
                self.pending_zero = Some(result.clone());
                Ok(SubmitOutcome::ZeroScoreChoice(result))
            }
            Ok(result) => self.finalize(result).await,
            Err(e) => {
                self.submission_started = false;
                self.status = ModuleStatus::Errored;
                Err(e.into())
            }
        }
    }

    /// Manual retry after a failed submission; re-enters `Submitting`.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidStatus` unless the module errored after
    /// its content had loaded.
    pub async fn retry_submit(&mut self) -> Result<SubmitOutcome, ModuleError> {
        if self.status != ModuleStatus::Errored || self.test.is_none() {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        self.status = ModuleStatus::InProgress;
        self.submit(SubmitTrigger::Manual).await
    }

    /// Accepts a pending zero score as the module's result.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidStatus` without a pending zero-score
    /// choice.
    pub async fn accept_zero_score(&mut self) -> Result<SubmitOutcome, ModuleError> {
        let Some(result) = self.pending_zero.take() else {
            return Err(ModuleError::InvalidStatus(self.status));
        };
        self.finalize(result).await
    }

    /// Discards every recording and rewinds the module so the candidate can
    /// rerecord: the clock resets to the full time limit and the submission
    /// guard rearms. The caller restarts with [`ModuleRunner::begin`].
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidStatus` without a pending zero-score
    /// choice.
    pub fn discard_and_rerecord(&mut self) -> Result<(), ModuleError> {
        if self.pending_zero.take().is_none() {
            return Err(ModuleError::InvalidStatus(self.status));
        }
        self.submission_started = false;
        if let Some(capture) = &mut self.capture {
            capture.clear();
        }
        self.time_remaining = MODULE_TIME_LIMIT_SECONDS;
        self.current_block = 0;
        self.status = ModuleStatus::Ready;
        Ok(())
    }

    async fn finalize(&mut self, result: SubmissionResult) -> Result<SubmitOutcome, ModuleError> {
        let record = ModuleRecord::completed(
            self.kind,
            result.score(),
            result.feedback_report().map(str::to_owned),
            result.cefr_level().map(str::to_owned),
        );
        if let Err(e) = self.store.save_module(self.session_id, &record).await {
            // the candidate's completion must not block on the store
            tracing::warn!(module = %self.kind, error = %e, "failed to persist module result");
        }
        self.pending_zero = None;
        self.status = ModuleStatus::Completed;
        self.result = Some(result.clone());
        tracing::info!(module = %self.kind, score = result.score(), "module completed");
        Ok(SubmitOutcome::Completed(result))
    }

    /// Best-effort write of the raw in-progress answers to the session
    /// store. Failures are logged and never block the candidate.
    pub async fn sync_answer_cache(&self) {
        let payload = self.answers_snapshot();
        if let Err(e) = self
            .store
            .cache_answers(self.session_id, self.kind, &payload)
            .await
        {
            tracing::warn!(module = %self.kind, error = %e, "failed to cache answers");
        }
    }

    fn answers_snapshot(&self) -> JsonValue {
        match self.kind {
            ModuleKind::Listening | ModuleKind::Reading => json!(
                self.answers
                    .iter()
                    .map(|(q, o)| (q.to_string(), o.value()))
                    .collect::<BTreeMap<_, _>>()
            ),
            ModuleKind::Writing => json!(
                self.essays
                    .iter()
                    .map(|(b, text)| (b.to_string(), text.clone()))
                    .collect::<BTreeMap<_, _>>()
            ),
            ModuleKind::Speaking => json!({
                "recorded_blocks": self
                    .capture
                    .as_ref()
                    .map(|c| c.recordings().iter().map(|r| r.block_id().value()).collect::<Vec<_>>())
                    .unwrap_or_default(),
            }),
        }
    }

    fn build_payload(&self) -> SubmissionPayload {
        match self.kind {
            ModuleKind::Listening | ModuleKind::Reading => {
                SubmissionPayload::Answers(self.answers.clone())
            }
            ModuleKind::Writing => {
                let blocks = self.test.as_ref().map_or(&[][..], |t| t.blocks.as_slice());
                let texts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|b| self.essays.get(&b.id).map(String::as_str))
                    .collect();
                SubmissionPayload::Essay(texts.join("\n\n"))
            }
            ModuleKind::Speaking => SubmissionPayload::Recordings(
                self.capture.as_ref().map(RecordingCapture::recordings).unwrap_or_default(),
            ),
        }
    }
}

impl fmt::Debug for ModuleRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRunner")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("current_block", &self.current_block)
            .field("answers_len", &self.answers.len())
            .field("time_remaining", &self.time_remaining)
            .field("submission_started", &self.submission_started)
            .finish_non_exhaustive()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::model::{
        AnswerOption, BlockPayload, Question, TestDescriptor, TestId,
    };
    use assess_core::time::fixed_now;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use storage::repository::InMemorySessionStore;

    use crate::capture::AudioClip;
    use crate::error::{ApiError, CaptureError, SubmissionError};

    struct FakeContent {
        tests: Mutex<Vec<TestDescriptor>>,
        content: Mutex<Option<TestContent>>,
    }

    impl FakeContent {
        fn serving(content: TestContent) -> Self {
            Self {
                tests: Mutex::new(vec![TestDescriptor {
                    id: content.id,
                    title: content.title.clone(),
                }]),
                content: Mutex::new(Some(content)),
            }
        }

        fn empty_catalog() -> Self {
            Self {
                tests: Mutex::new(Vec::new()),
                content: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ContentApi for FakeContent {
        async fn list_tests(
            &self,
            _kind: ModuleKind,
            _vertical: VerticalId,
        ) -> Result<Vec<TestDescriptor>, ContentError> {
            Ok(self.tests.lock().unwrap().clone())
        }

        async fn fetch_test(
            &self,
            _kind: ModuleKind,
            _id: TestId,
        ) -> Result<TestContent, ContentError> {
            self.content
                .lock()
                .unwrap()
                .clone()
                .ok_or(ContentError::NoContent)
        }
    }

    #[derive(Default)]
    struct FakeGrading {
        calls: Mutex<u32>,
        fail_next: Mutex<bool>,
        score: Mutex<f64>,
        last_answer_count: Mutex<Option<usize>>,
    }

    impl FakeGrading {
        fn scoring(score: f64) -> Self {
            Self {
                score: Mutex::new(score),
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }

        fn set_score(&self, score: f64) {
            *self.score.lock().unwrap() = score;
        }

        fn fail_next(&self) {
            *self.fail_next.lock().unwrap() = true;
        }
    }

    #[async_trait]
    impl GradingApi for FakeGrading {
        async fn submit(
            &self,
            _kind: ModuleKind,
            _test: TestId,
            _email: &CandidateEmail,
            payload: &SubmissionPayload,
        ) -> Result<SubmissionResult, SubmissionError> {
            *self.calls.lock().unwrap() += 1;
            if let SubmissionPayload::Answers(answers) = payload {
                *self.last_answer_count.lock().unwrap() = Some(answers.len());
            }
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(SubmissionError::Api(ApiError::Decode("boom".into())));
            }
            Ok(SubmissionResult::new(*self.score.lock().unwrap(), None, None).unwrap())
        }
    }

    /// Device yielding a fixed two-second clip on every capture.
    struct LoopDevice {
        recording: bool,
    }

    #[async_trait]
    impl crate::capture::AudioCaptureDevice for LoopDevice {
        async fn begin(&mut self) -> Result<(), CaptureError> {
            if self.recording {
                return Err(CaptureError::AlreadyRecording);
            }
            self.recording = true;
            Ok(())
        }

        async fn finish(&mut self) -> Result<AudioClip, CaptureError> {
            if !self.recording {
                return Err(CaptureError::NotRecording);
            }
            self.recording = false;
            Ok(AudioClip {
                samples: vec![0.1_f32; 32_000],
                sample_rate: 16_000,
            })
        }
    }

    fn question(id: u64) -> Question {
        Question {
            id: QuestionId::new(id),
            text: format!("Q{id}"),
            options: vec![
                AnswerOption {
                    id: OptionId::new(id * 10 + 1),
                    text: "A".into(),
                },
                AnswerOption {
                    id: OptionId::new(id * 10 + 2),
                    text: "B".into(),
                },
            ],
        }
    }

    fn listening_test() -> TestContent {
        TestContent {
            id: TestId::new(1),
            title: "Listening".into(),
            description: None,
            blocks: vec![
                Block {
                    id: BlockId::new(1),
                    payload: BlockPayload::Questions {
                        instructions: None,
                        media: None,
                        questions: (1..=5).map(question).collect(),
                    },
                },
                Block {
                    id: BlockId::new(2),
                    payload: BlockPayload::Questions {
                        instructions: None,
                        media: None,
                        questions: (6..=10).map(question).collect(),
                    },
                },
            ],
        }
    }

    fn prompt_test(example: Option<&str>) -> TestContent {
        let block = |id: u64| Block {
            id: BlockId::new(id),
            payload: BlockPayload::Prompt {
                text: format!("Prompt {id}"),
                instruction: "Respond.".into(),
                example: example.map(str::to_owned),
            },
        };
        TestContent {
            id: TestId::new(2),
            title: "Prompts".into(),
            description: None,
            blocks: vec![block(1), block(2)],
        }
    }

    fn session() -> Session {
        Session::new(
            SessionId::generate(),
            CandidateEmail::new("jane@example.com").unwrap(),
            VerticalId::new(1),
            fixed_now(),
        )
    }

    fn runner_with(
        kind: ModuleKind,
        content: Arc<FakeContent>,
        grading: Arc<FakeGrading>,
    ) -> ModuleRunner {
        ModuleRunner::new(
            kind,
            &session(),
            content,
            grading,
            Arc::new(InMemorySessionStore::new()),
        )
    }

    #[tokio::test]
    async fn empty_catalog_errors_and_reload_recovers() {
        let content = Arc::new(FakeContent::empty_catalog());
        let grading = Arc::new(FakeGrading::default());
        let mut runner = runner_with(ModuleKind::Listening, Arc::clone(&content), grading);

        let err = runner.load().await.unwrap_err();
        assert!(matches!(
            err,
            ModuleError::Content(ContentError::NoTestsAvailable)
        ));
        assert_eq!(runner.status(), ModuleStatus::Errored);

        // content appears, the retry action succeeds
        let test = listening_test();
        content.tests.lock().unwrap().push(TestDescriptor {
            id: test.id,
            title: test.title.clone(),
        });
        *content.content.lock().unwrap() = Some(test);

        runner.reload().await.unwrap();
        assert_eq!(runner.status(), ModuleStatus::Ready);
    }

    #[tokio::test]
    async fn zero_block_test_is_no_content() {
        let mut empty = listening_test();
        empty.blocks.clear();
        let content = Arc::new(FakeContent::serving(empty));
        let mut runner = runner_with(
            ModuleKind::Listening,
            content,
            Arc::new(FakeGrading::default()),
        );

        let err = runner.load().await.unwrap_err();
        assert!(matches!(err, ModuleError::Content(ContentError::NoContent)));
        assert_eq!(runner.status(), ModuleStatus::Errored);
    }

    #[tokio::test]
    async fn answers_validate_ids_and_overwrite() {
        let content = Arc::new(FakeContent::serving(listening_test()));
        let mut runner = runner_with(
            ModuleKind::Listening,
            content,
            Arc::new(FakeGrading::default()),
        );
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        let err = runner
            .select_answer(QuestionId::new(99), OptionId::new(1))
            .unwrap_err();
        assert!(matches!(err, ModuleError::UnknownQuestion(_)));

        let err = runner
            .select_answer(QuestionId::new(1), OptionId::new(999))
            .unwrap_err();
        assert!(matches!(err, ModuleError::UnknownOption(_)));

        runner
            .select_answer(QuestionId::new(1), OptionId::new(11))
            .unwrap();
        runner
            .select_answer(QuestionId::new(1), OptionId::new(12))
            .unwrap();
        assert_eq!(runner.answer(QuestionId::new(1)), Some(OptionId::new(12)));
        assert_eq!(runner.progress().answered, 1);
    }

    #[tokio::test]
    async fn writing_forward_navigation_is_gated() {
        let content = Arc::new(FakeContent::serving(prompt_test(Some(
            "This is a test. Another sentence.",
        ))));
        let mut runner = runner_with(
            ModuleKind::Writing,
            content,
            Arc::new(FakeGrading::default()),
        );
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        runner
            .write_essay(BlockId::new(1), "I wrote this is a test today")
            .unwrap();
        let err = runner.next_block().unwrap_err();
        assert!(matches!(
            err,
            ModuleError::Validation(ValidationError::BannedSentence { .. })
        ));
        assert_eq!(runner.current_block_index(), 0);

        runner
            .write_essay(BlockId::new(1), "I wrote something totally original")
            .unwrap();
        runner.next_block().unwrap();
        assert_eq!(runner.current_block_index(), 1);

        // backwards is never gated
        runner
            .write_essay(BlockId::new(2), "This is a test word for word")
            .unwrap();
        runner.previous_block().unwrap();
        assert_eq!(runner.current_block_index(), 0);
    }

    #[tokio::test]
    async fn manual_submit_racing_expiry_issues_one_request() {
        let content = Arc::new(FakeContent::serving(listening_test()));
        let grading = Arc::new(FakeGrading::scoring(82.5));
        let mut runner = runner_with(ModuleKind::Listening, content, Arc::clone(&grading));
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        let outcome = runner.submit(SubmitTrigger::Manual).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Completed(_)));
        assert_eq!(runner.status(), ModuleStatus::Completed);

        let outcome = runner.handle_timer(TimerEvent::Expired).await.unwrap();
        assert_eq!(outcome, Some(SubmitOutcome::AlreadySubmitted));
        assert_eq!(grading.calls(), 1);
    }

    #[tokio::test]
    async fn expiry_submits_once_despite_repeated_events() {
        let content = Arc::new(FakeContent::serving(listening_test()));
        let grading = Arc::new(FakeGrading::scoring(40.0));
        let mut runner = runner_with(ModuleKind::Listening, content, Arc::clone(&grading));
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        let outcome = runner.handle_timer(TimerEvent::Expired).await.unwrap();
        assert!(matches!(outcome, Some(SubmitOutcome::Completed(_))));

        for _ in 0..50 {
            let outcome = runner.handle_timer(TimerEvent::Expired).await.unwrap();
            assert_eq!(outcome, Some(SubmitOutcome::AlreadySubmitted));
        }
        assert_eq!(grading.calls(), 1);
        assert_eq!(runner.time_remaining(), 0);
    }

    #[tokio::test]
    async fn failed_submission_stays_submittable() {
        let content = Arc::new(FakeContent::serving(listening_test()));
        let grading = Arc::new(FakeGrading::scoring(55.0));
        let mut runner = runner_with(ModuleKind::Listening, content, Arc::clone(&grading));
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        grading.fail_next();
        let err = runner.submit(SubmitTrigger::Manual).await.unwrap_err();
        assert!(matches!(err, ModuleError::Submission(_)));
        assert_eq!(runner.status(), ModuleStatus::Errored);

        let outcome = runner.retry_submit().await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Completed(_)));
        assert_eq!(grading.calls(), 2);
    }

    #[tokio::test]
    async fn ticks_keep_time_monotonic_and_floored() {
        let content = Arc::new(FakeContent::serving(listening_test()));
        let mut runner = runner_with(
            ModuleKind::Listening,
            content,
            Arc::new(FakeGrading::default()),
        );
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        runner
            .handle_timer(TimerEvent::Tick { remaining: 899 })
            .await
            .unwrap();
        assert_eq!(runner.time_remaining(), 899);

        // a stale higher value never raises the clock
        runner
            .handle_timer(TimerEvent::Tick { remaining: 900 })
            .await
            .unwrap();
        assert_eq!(runner.time_remaining(), 899);
    }

    #[tokio::test]
    async fn progress_reports_answered_of_total() {
        let content = Arc::new(FakeContent::serving(listening_test()));
        let mut runner = runner_with(
            ModuleKind::Listening,
            content,
            Arc::new(FakeGrading::default()),
        );
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        for id in 1..=8 {
            runner
                .select_answer(QuestionId::new(id), OptionId::new(id * 10 + 1))
                .unwrap();
        }

        let progress = runner.progress();
        assert_eq!(progress.to_string(), "8 of 10 (80%)");
    }

    #[tokio::test]
    async fn speaking_gates_submission_until_every_block_recorded() {
        let content = Arc::new(FakeContent::serving(prompt_test(None)));
        let grading = Arc::new(FakeGrading::scoring(70.0));
        let mut runner = runner_with(ModuleKind::Speaking, content, Arc::clone(&grading))
            .with_capture(Box::new(LoopDevice { recording: false }));
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        let err = runner.submit(SubmitTrigger::Manual).await.unwrap_err();
        assert!(matches!(
            err,
            ModuleError::Validation(ValidationError::MissingRecording(b)) if b == BlockId::new(1)
        ));
        assert_eq!(grading.calls(), 0);

        runner.start_recording().await.unwrap();
        runner.stop_recording().await.unwrap();
        // navigation is free even with the second block unrecorded
        runner.next_block().unwrap();
        runner.start_recording().await.unwrap();
        runner.stop_recording().await.unwrap();

        let outcome = runner.submit(SubmitTrigger::Manual).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Completed(_)));
        assert_eq!(grading.calls(), 1);
    }

    #[tokio::test]
    async fn zero_score_offers_rerecord_or_accept() {
        let content = Arc::new(FakeContent::serving(prompt_test(None)));
        let grading = Arc::new(FakeGrading::scoring(0.0));
        let mut runner = runner_with(ModuleKind::Speaking, content, Arc::clone(&grading))
            .with_capture(Box::new(LoopDevice { recording: false }));
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        runner.start_recording().await.unwrap();
        runner.stop_recording().await.unwrap();
        runner.next_block().unwrap();
        runner.start_recording().await.unwrap();
        runner.stop_recording().await.unwrap();

        let outcome = runner.submit(SubmitTrigger::Manual).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::ZeroScoreChoice(_)));
        assert_ne!(runner.status(), ModuleStatus::Completed);

        // rerecord: recordings wiped, clock reset, guard rearmed
        runner.discard_and_rerecord().unwrap();
        assert_eq!(runner.status(), ModuleStatus::Ready);
        assert_eq!(runner.progress().answered, 0);
        assert_eq!(runner.time_remaining(), MODULE_TIME_LIMIT_SECONDS);

        let _events = runner.begin().unwrap();
        runner.start_recording().await.unwrap();
        runner.stop_recording().await.unwrap();
        runner.next_block().unwrap();
        runner.start_recording().await.unwrap();
        runner.stop_recording().await.unwrap();

        grading.set_score(45.0);
        let outcome = runner.submit(SubmitTrigger::Manual).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Completed(_)));
        assert_eq!(grading.calls(), 2);
    }

    #[tokio::test]
    async fn accepting_zero_score_completes_the_module() {
        let content = Arc::new(FakeContent::serving(prompt_test(None)));
        let grading = Arc::new(FakeGrading::scoring(0.0));
        let mut runner = runner_with(ModuleKind::Speaking, content, Arc::clone(&grading))
            .with_capture(Box::new(LoopDevice { recording: false }));
        runner.load().await.unwrap();
        let _events = runner.begin().unwrap();

        runner.start_recording().await.unwrap();
        runner.stop_recording().await.unwrap();
        runner.next_block().unwrap();
        runner.start_recording().await.unwrap();
        runner.stop_recording().await.unwrap();

        let outcome = runner.submit(SubmitTrigger::Manual).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::ZeroScoreChoice(_)));

        let outcome = runner.accept_zero_score().await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Completed(r) if r.score() == 0.0));
        assert_eq!(runner.status(), ModuleStatus::Completed);
        assert_eq!(grading.calls(), 1);
    }
}
