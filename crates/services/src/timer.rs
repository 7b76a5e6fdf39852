use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

/// Seconds granted to a module run, uniform across all four kinds.
pub const MODULE_TIME_LIMIT_SECONDS: u32 = 900;

/// Result of applying one one-second tick to a countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still counting down.
    Tick { remaining: u32 },
    /// The countdown just reached zero. Returned exactly once per run.
    Expired,
    /// The countdown is stopped or already expired; the tick did nothing.
    Halted,
}

/// Pure countdown state machine.
///
/// Expiry fires exactly once: every tick after the countdown reached zero
/// returns `Halted`, never a second `Expired`.
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining: u32,
    expired: bool,
    stopped: bool,
}

impl Countdown {
    #[must_use]
    pub fn new(duration_seconds: u32) -> Self {
        Self {
            remaining: duration_seconds,
            expired: false,
            stopped: false,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Advances the countdown by one second.
    pub fn tick(&mut self) -> TickOutcome {
        if self.stopped || self.expired {
            return TickOutcome::Halted;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.expired = true;
            TickOutcome::Expired
        } else {
            TickOutcome::Tick {
                remaining: self.remaining,
            }
        }
    }

    /// Cancels the countdown. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Notification from a running module timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick { remaining: u32 },
    Expired,
}

/// Real-time driver for a [`Countdown`].
///
/// Emits one `Tick` per elapsed second and a single `Expired`, then halts
/// on its own. Dropping the handle cancels the task, so an owner that
/// starts a replacement timer never has two running at once.
pub struct ModuleTimer {
    task: JoinHandle<()>,
}

impl ModuleTimer {
    /// Spawns the countdown task. Must be called within a tokio runtime.
    #[must_use]
    pub fn start(duration_seconds: u32) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut countdown = Countdown::new(duration_seconds);
            let mut interval = time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first interval tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match countdown.tick() {
                    TickOutcome::Tick { remaining } => {
                        if tx.send(TimerEvent::Tick { remaining }).is_err() {
                            break;
                        }
                    }
                    TickOutcome::Expired => {
                        let _ = tx.send(TimerEvent::Expired);
                        break;
                    }
                    TickOutcome::Halted => break,
                }
            }
        });
        (Self { task }, rx)
    }

    /// Cancels the timer. Idempotent.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ModuleTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
