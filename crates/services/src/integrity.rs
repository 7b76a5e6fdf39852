use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Foreground visibility of the assessment view, as reported by the
/// embedding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Marker sent when an armed monitor observes the view going hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationNotice;

/// Publisher side of the visibility signal.
///
/// The embedding layer owns one of these and reports every foreground
/// change through [`VisibilitySource::set`].
pub struct VisibilitySource {
    tx: watch::Sender<Visibility>,
}

impl VisibilitySource {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Visibility::Visible);
        Self { tx }
    }

    /// Publishes the current visibility.
    pub fn set(&self, visibility: Visibility) {
        self.tx.send_replace(visibility);
    }

    /// A receiver for monitors to watch.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

impl Default for VisibilitySource {
    fn default() -> Self {
        Self::new()
    }
}

/// Watches the visibility signal for the first transition away from the
/// foreground.
///
/// While armed, the first `Hidden` observation sends exactly one
/// [`ViolationNotice`] and the watcher ends (auto-disarm). Arming again
/// replaces any previous watcher. The controller keeps this armed only
/// while the session is in progress, so the results screen cannot trip it.
pub struct IntegrityMonitor {
    visibility: watch::Receiver<Visibility>,
    watcher: Option<JoinHandle<()>>,
}

impl IntegrityMonitor {
    #[must_use]
    pub fn new(visibility: watch::Receiver<Visibility>) -> Self {
        Self {
            visibility,
            watcher: None,
        }
    }

    /// Arms the monitor. Must be called within a tokio runtime.
    pub fn arm(&mut self, notify: mpsc::UnboundedSender<ViolationNotice>) {
        self.disarm();
        let mut rx = self.visibility.clone();
        self.watcher = Some(tokio::spawn(async move {
            loop {
                if *rx.borrow_and_update() == Visibility::Hidden {
                    let _ = notify.send(ViolationNotice);
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancels the watcher. Idempotent.
    pub fn disarm(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.watcher.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl Drop for IntegrityMonitor {
    fn drop(&mut self) {
        self.disarm();
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
