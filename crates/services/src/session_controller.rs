use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

use assess_core::Clock;
use assess_core::model::{ModuleKind, Session, SessionAdvance, SubmissionResult};
use storage::repository::{ModuleRecord, SessionRecord, SessionStore};

use crate::api::{ContentApi, GradingApi};
use crate::capture::AudioCaptureDevice;
use crate::error::SessionError;
use crate::integrity::{IntegrityMonitor, ViolationNotice, Visibility};
use crate::module_runner::ModuleRunner;

/// In-process notifications for UI observers, replacing any need to poll
/// the persisted store for completion changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ModuleCompleted { kind: ModuleKind, score: f64 },
    ActiveModuleChanged { kind: ModuleKind },
    Finished,
    Aborted,
}

/// Owns the fixed module sequence for one sitting.
///
/// Exactly zero or one `ModuleRunner` exists at a time; activating a module
/// replaces the previous runner, and completing or aborting drops it (which
/// also cancels its timer).
pub struct SessionController {
    clock: Clock,
    session: Session,
    store: Arc<dyn SessionStore>,
    content: Arc<dyn ContentApi>,
    grading: Arc<dyn GradingApi>,
    monitor: IntegrityMonitor,
    events: broadcast::Sender<SessionEvent>,
    runner: Option<ModuleRunner>,
}

impl SessionController {
    #[must_use]
    pub fn new(
        clock: Clock,
        session: Session,
        store: Arc<dyn SessionStore>,
        content: Arc<dyn ContentApi>,
        grading: Arc<dyn GradingApi>,
        visibility: watch::Receiver<Visibility>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            clock,
            session,
            store,
            content,
            grading,
            monitor: IntegrityMonitor::new(visibility),
            events,
            runner: None,
        }
    }

    /// Current session state.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The active module's runner, if one was activated.
    #[must_use]
    pub fn runner_mut(&mut self) -> Option<&mut ModuleRunner> {
        self.runner.as_mut()
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Persists the initial session record and arms the integrity monitor.
    /// The returned channel yields at most one notice; the driver reacts by
    /// calling [`SessionController::record_violation`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the initial record cannot be
    /// written.
    pub async fn start(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<ViolationNotice>, SessionError> {
        let record = SessionRecord::from_session(&self.session, self.clock.now());
        self.store.save(&record).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.monitor.arm(tx);
        tracing::info!(session = %self.session.id(), "session started");
        Ok(rx)
    }

    /// Activates a module: validates the switch, builds its runner, and
    /// loads its content. The runner is retained even when the load fails so
    /// the caller can expose the reload action.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::State` for a completed kind or an ended
    /// session, and the runner's load failure.
    pub async fn activate_module(
        &mut self,
        kind: ModuleKind,
        device: Option<Box<dyn AudioCaptureDevice>>,
    ) -> Result<&mut ModuleRunner, SessionError> {
        self.session.activate(kind)?;
        let _ = self.events.send(SessionEvent::ActiveModuleChanged { kind });

        let mut runner = ModuleRunner::new(
            kind,
            &self.session,
            Arc::clone(&self.content),
            Arc::clone(&self.grading),
            Arc::clone(&self.store),
        );
        if let Some(device) = device {
            runner = runner.with_capture(device);
        }

        let load_result = runner.load().await;
        let slot = self.runner.insert(runner);
        load_result?;
        Ok(slot)
    }

    /// Records a module completion: the kind joins the completed set, the
    /// completion is persisted, and the sequence advances to the earliest
    /// remaining module or finishes. The active runner is dropped either
    /// way.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::State` for a duplicate completion or ended
    /// session, and `SessionError::Storage` when persisting the updated
    /// session fails.
    pub async fn module_completed(
        &mut self,
        kind: ModuleKind,
        result: &SubmissionResult,
    ) -> Result<SessionAdvance, SessionError> {
        let advance = self.session.complete_module(kind)?;
        self.runner = None;

        let record = ModuleRecord::completed(
            kind,
            result.score(),
            result.feedback_report().map(str::to_owned),
            result.cefr_level().map(str::to_owned),
        );
        self.store.save_module(self.session.id(), &record).await?;
        self.store
            .save(&SessionRecord::from_session(&self.session, self.clock.now()))
            .await?;

        let _ = self.events.send(SessionEvent::ModuleCompleted {
            kind,
            score: result.score(),
        });
        match advance {
            SessionAdvance::NextModule(next) => {
                let _ = self.events.send(SessionEvent::ActiveModuleChanged { kind: next });
            }
            SessionAdvance::Finished => {
                self.monitor.disarm();
                let _ = self.events.send(SessionEvent::Finished);
                tracing::info!(session = %self.session.id(), "session finished");
            }
        }
        Ok(advance)
    }

    /// Aborts the sitting after an integrity violation. In-memory completion
    /// state is wiped immediately; the persisted wipe is best-effort and
    /// never blocks the abort. Dropping the active runner cancels its timer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::State` if the session already ended.
    pub async fn record_violation(&mut self) -> Result<(), SessionError> {
        self.session.record_violation()?;
        self.monitor.disarm();
        self.runner = None;

        if let Err(e) = self.store.clear(self.session.id()).await {
            tracing::warn!(session = %self.session.id(), error = %e, "failed to wipe module state");
        }
        if let Err(e) = self.store.mark_aborted(self.session.id()).await {
            tracing::warn!(session = %self.session.id(), error = %e, "failed to flag aborted session");
        }

        let _ = self.events.send(SessionEvent::Aborted);
        tracing::info!(session = %self.session.id(), "session aborted");
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::model::{CandidateEmail, SessionId, SessionStateError, SessionStatus, VerticalId};
    use assess_core::time::{fixed_clock, fixed_now};
    use async_trait::async_trait;
    use storage::repository::InMemorySessionStore;

    use crate::error::{ContentError, SubmissionError};
    use crate::integrity::VisibilitySource;
    use assess_core::model::{Block, BlockId, BlockPayload, TestContent, TestDescriptor, TestId};

    struct StubContent;

    #[async_trait]
    impl ContentApi for StubContent {
        async fn list_tests(
            &self,
            _kind: ModuleKind,
            _vertical: VerticalId,
        ) -> Result<Vec<TestDescriptor>, ContentError> {
            Ok(vec![TestDescriptor {
                id: TestId::new(1),
                title: "Stub".into(),
            }])
        }

        async fn fetch_test(
            &self,
            _kind: ModuleKind,
            _id: TestId,
        ) -> Result<TestContent, ContentError> {
            Ok(TestContent {
                id: TestId::new(1),
                title: "Stub".into(),
                description: None,
                blocks: vec![Block {
                    id: BlockId::new(1),
                    payload: BlockPayload::Prompt {
                        text: "t".into(),
                        instruction: "i".into(),
                        example: None,
                    },
                }],
            })
        }
    }

    struct StubGrading;

    #[async_trait]
    impl GradingApi for StubGrading {
        async fn submit(
            &self,
            _kind: ModuleKind,
            _test: TestId,
            _email: &CandidateEmail,
            _payload: &crate::api::SubmissionPayload,
        ) -> Result<SubmissionResult, SubmissionError> {
            Ok(SubmissionResult::new(50.0, None, None).unwrap())
        }
    }

    fn controller(store: Arc<InMemorySessionStore>, source: &VisibilitySource) -> SessionController {
        let session = Session::new(
            SessionId::generate(),
            CandidateEmail::new("jane@example.com").unwrap(),
            VerticalId::new(1),
            fixed_now(),
        );
        SessionController::new(
            fixed_clock(),
            session,
            store,
            Arc::new(StubContent),
            Arc::new(StubGrading),
            source.subscribe(),
        )
    }

    fn result(score: f64) -> SubmissionResult {
        SubmissionResult::new(score, None, None).unwrap()
    }

    #[tokio::test]
    async fn completion_advances_to_earliest_remaining_and_persists() {
        let store = Arc::new(InMemorySessionStore::new());
        let source = VisibilitySource::new();
        let mut controller = controller(Arc::clone(&store), &source);
        let mut events = controller.subscribe();
        controller.start().await.unwrap();

        let advance = controller
            .module_completed(ModuleKind::Reading, &result(70.0))
            .await
            .unwrap();
        assert_eq!(advance, SessionAdvance::NextModule(ModuleKind::Listening));
        assert_eq!(controller.session().active_module(), ModuleKind::Listening);

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::ModuleCompleted {
                kind: ModuleKind::Reading,
                score: 70.0
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::ActiveModuleChanged {
                kind: ModuleKind::Listening
            }
        );

        let modules = store.load_modules(controller.session().id()).await.unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].kind, ModuleKind::Reading);
        assert_eq!(modules[0].score, Some(70.0));
    }

    #[tokio::test]
    async fn all_four_completions_finish_the_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let source = VisibilitySource::new();
        let mut controller = controller(store, &source);
        controller.start().await.unwrap();

        for kind in [ModuleKind::Listening, ModuleKind::Speaking, ModuleKind::Reading] {
            let advance = controller.module_completed(kind, &result(60.0)).await.unwrap();
            assert_ne!(advance, SessionAdvance::Finished);
        }
        let advance = controller
            .module_completed(ModuleKind::Writing, &result(60.0))
            .await
            .unwrap();
        assert_eq!(advance, SessionAdvance::Finished);
        assert_eq!(controller.session().status(), SessionStatus::Finished);
        assert!(!controller.monitor.is_armed());
    }

    #[tokio::test]
    async fn completed_module_cannot_be_reactivated() {
        let store = Arc::new(InMemorySessionStore::new());
        let source = VisibilitySource::new();
        let mut controller = controller(store, &source);
        controller.start().await.unwrap();

        controller
            .module_completed(ModuleKind::Listening, &result(80.0))
            .await
            .unwrap();

        let err = controller
            .activate_module(ModuleKind::Listening, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::State(SessionStateError::AlreadyCompleted(ModuleKind::Listening))
        ));
    }

    #[tokio::test]
    async fn violation_wipes_store_and_ends_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let source = VisibilitySource::new();
        let mut controller = controller(Arc::clone(&store), &source);
        let mut violations = controller.start().await.unwrap();

        controller
            .module_completed(ModuleKind::Listening, &result(80.0))
            .await
            .unwrap();
        controller
            .activate_module(ModuleKind::Speaking, None)
            .await
            .unwrap();

        source.set(Visibility::Hidden);
        assert_eq!(violations.recv().await, Some(ViolationNotice));
        controller.record_violation().await.unwrap();

        let session = controller.session();
        assert!(session.integrity_violated());
        assert!(session.completed_modules().is_empty());
        assert_eq!(session.status(), SessionStatus::Aborted);

        assert!(store.load_modules(session.id()).await.unwrap().is_empty());
        assert!(store.load(session.id()).await.unwrap().unwrap().aborted);

        // nothing can restart without a fresh sitting
        let err = controller
            .activate_module(ModuleKind::Reading, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::State(SessionStateError::NotInProgress)
        ));
    }
}
