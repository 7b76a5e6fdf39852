use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::model::ids::{CandidateEmail, SessionId, VerticalId};
use crate::model::module::ModuleKind;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("session is no longer in progress")]
    NotInProgress,
    #[error("module {0} is already completed")]
    AlreadyCompleted(ModuleKind),
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    InProgress,
    Finished,
    Aborted,
}

/// Outcome of marking a module complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAdvance {
    /// The sequence moved on to the earliest remaining module.
    NextModule(ModuleKind),
    /// All four modules are complete.
    Finished,
}

/// One sitting of the four-module assessment.
///
/// Pure progression state: which modules are done, which is active, and
/// whether the sitting was invalidated. Persistence and monitoring live in
/// the services layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    candidate_email: CandidateEmail,
    vertical: VerticalId,
    completed: BTreeSet<ModuleKind>,
    active: ModuleKind,
    integrity_violated: bool,
    status: SessionStatus,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Starts a fresh sitting with the first module of the fixed order active.
    #[must_use]
    pub fn new(
        id: SessionId,
        candidate_email: CandidateEmail,
        vertical: VerticalId,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            candidate_email,
            vertical,
            completed: BTreeSet::new(),
            active: ModuleKind::ORDER[0],
            integrity_violated: false,
            status: SessionStatus::InProgress,
            started_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn candidate_email(&self) -> &CandidateEmail {
        &self.candidate_email
    }

    #[must_use]
    pub fn vertical(&self) -> VerticalId {
        self.vertical
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn active_module(&self) -> ModuleKind {
        self.active
    }

    #[must_use]
    pub fn integrity_violated(&self) -> bool {
        self.integrity_violated
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_modules(&self) -> &BTreeSet<ModuleKind> {
        &self.completed
    }

    #[must_use]
    pub fn is_completed(&self, kind: ModuleKind) -> bool {
        self.completed.contains(&kind)
    }

    /// Earliest entry of the fixed order not yet completed.
    #[must_use]
    pub fn earliest_incomplete(&self) -> Option<ModuleKind> {
        ModuleKind::ORDER
            .into_iter()
            .find(|kind| !self.completed.contains(kind))
    }

    /// Switches the active module. Candidates may move freely among
    /// not-yet-completed modules; completed ones stay disabled for the rest
    /// of the sitting.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::NotInProgress` after Finished/Aborted and
    /// `SessionStateError::AlreadyCompleted` for a completed kind.
    pub fn activate(&mut self, kind: ModuleKind) -> Result<(), SessionStateError> {
        if self.status != SessionStatus::InProgress {
            return Err(SessionStateError::NotInProgress);
        }
        if self.completed.contains(&kind) {
            return Err(SessionStateError::AlreadyCompleted(kind));
        }
        self.active = kind;
        Ok(())
    }

    /// Marks a module complete and advances forced-forward: the new active
    /// module is always the earliest remaining one, regardless of which
    /// module was just active.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::NotInProgress` after Finished/Aborted and
    /// `SessionStateError::AlreadyCompleted` when the kind was completed
    /// before.
    pub fn complete_module(&mut self, kind: ModuleKind) -> Result<SessionAdvance, SessionStateError> {
        if self.status != SessionStatus::InProgress {
            return Err(SessionStateError::NotInProgress);
        }
        if !self.completed.insert(kind) {
            return Err(SessionStateError::AlreadyCompleted(kind));
        }

        match self.earliest_incomplete() {
            Some(next) => {
                self.active = next;
                Ok(SessionAdvance::NextModule(next))
            }
            None => {
                self.status = SessionStatus::Finished;
                Ok(SessionAdvance::Finished)
            }
        }
    }

    /// Invalidates the sitting after an integrity violation: completion
    /// state is wiped and the session becomes terminally aborted. A fresh
    /// sitting is the only way forward.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::NotInProgress` if the sitting already
    /// ended.
    pub fn record_violation(&mut self) -> Result<(), SessionStateError> {
        if self.status != SessionStatus::InProgress {
            return Err(SessionStateError::NotInProgress);
        }
        self.integrity_violated = true;
        self.completed.clear();
        self.status = SessionStatus::Aborted;
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn session() -> Session {
        Session::new(
            SessionId::generate(),
            CandidateEmail::new("jane@example.com").unwrap(),
            VerticalId::new(3),
            fixed_now(),
        )
    }

    #[test]
    fn starts_on_first_module_with_nothing_complete() {
        let s = session();
        assert_eq!(s.active_module(), ModuleKind::Listening);
        assert!(s.completed_modules().is_empty());
        assert_eq!(s.status(), SessionStatus::InProgress);
    }

    #[test]
    fn advances_to_earliest_incomplete_regardless_of_completion_order() {
        let mut s = session();

        s.activate(ModuleKind::Reading).unwrap();
        assert_eq!(
            s.complete_module(ModuleKind::Reading).unwrap(),
            SessionAdvance::NextModule(ModuleKind::Listening)
        );

        assert_eq!(
            s.complete_module(ModuleKind::Writing).unwrap(),
            SessionAdvance::NextModule(ModuleKind::Listening)
        );

        assert_eq!(
            s.complete_module(ModuleKind::Listening).unwrap(),
            SessionAdvance::NextModule(ModuleKind::Speaking)
        );

        assert_eq!(
            s.complete_module(ModuleKind::Speaking).unwrap(),
            SessionAdvance::Finished
        );
        assert_eq!(s.status(), SessionStatus::Finished);
    }

    #[test]
    fn finishes_only_when_all_four_complete() {
        let mut s = session();
        for kind in [ModuleKind::Listening, ModuleKind::Speaking, ModuleKind::Reading] {
            assert_ne!(s.complete_module(kind).unwrap(), SessionAdvance::Finished);
            assert_eq!(s.status(), SessionStatus::InProgress);
        }
        assert_eq!(
            s.complete_module(ModuleKind::Writing).unwrap(),
            SessionAdvance::Finished
        );
    }

    #[test]
    fn completed_module_cannot_be_reactivated() {
        let mut s = session();
        s.complete_module(ModuleKind::Listening).unwrap();
        let err = s.activate(ModuleKind::Listening).unwrap_err();
        assert_eq!(err, SessionStateError::AlreadyCompleted(ModuleKind::Listening));
    }

    #[test]
    fn double_completion_is_rejected() {
        let mut s = session();
        s.complete_module(ModuleKind::Listening).unwrap();
        let err = s.complete_module(ModuleKind::Listening).unwrap_err();
        assert_eq!(err, SessionStateError::AlreadyCompleted(ModuleKind::Listening));
    }

    #[test]
    fn violation_wipes_completion_and_is_terminal() {
        let mut s = session();
        s.complete_module(ModuleKind::Listening).unwrap();
        s.complete_module(ModuleKind::Speaking).unwrap();

        s.record_violation().unwrap();

        assert!(s.integrity_violated());
        assert!(s.completed_modules().is_empty());
        assert_eq!(s.status(), SessionStatus::Aborted);

        assert_eq!(
            s.activate(ModuleKind::Reading).unwrap_err(),
            SessionStateError::NotInProgress
        );
        assert_eq!(
            s.complete_module(ModuleKind::Reading).unwrap_err(),
            SessionStateError::NotInProgress
        );
        assert_eq!(s.record_violation().unwrap_err(), SessionStateError::NotInProgress);
    }
}
