//! Inactivity and execution-time watchdogs
//!
//! Both watchdogs live exactly as long as one command. They share the last
//! activity timestamp and a pending timeout slot with the read loop; the first
//! watchdog to fire fills the slot and the read loop picks it up on its next poll.

use crate::command::Limits;
use crate::error::{TimeoutKind, timeout_message};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

/// How often the inactivity watchdog looks at the last activity timestamp
const INACTIVITY_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// A fired watchdog
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Trip {
    pub(crate) kind: TimeoutKind,
    pub(crate) limit: Duration,
    pub(crate) message: String,
}

struct WatchState {
    started: Instant,
    /// Milliseconds since `started` at which the last byte arrived
    last_activity_ms: AtomicU64,
    pending: Mutex<Option<Trip>>,
}

impl WatchState {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn idle(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    fn trip(&self, trip: Trip) {
        if let Ok(mut pending) = self.pending.lock()
            && pending.is_none()
        {
            warn!(kind = %trip.kind, "{}", trip.message);
            *pending = Some(trip);
        }
    }
}

/// Guard owning both watchdog tasks of one command; dropping it cancels them
pub(crate) struct WatchdogPair {
    state: Arc<WatchState>,
    tasks: Vec<JoinHandle<()>>,
}

impl WatchdogPair {
    pub(crate) fn start(command: &str, limits: Limits) -> Self {
        let state = Arc::new(WatchState {
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            pending: Mutex::new(None),
        });

        let inactivity = {
            let state = state.clone();
            let limit = limits.max_inactivity_time;
            let trip = Trip {
                kind: TimeoutKind::Inactivity,
                limit,
                message: timeout_message(&TimeoutKind::Inactivity, command, &limit),
            };
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(INACTIVITY_CHECK_INTERVAL);
                loop {
                    ticker.tick().await;
                    if state.idle() > limit {
                        state.trip(trip);
                        break;
                    }
                }
            })
        };

        let execution = {
            let state = state.clone();
            let limit = limits.max_execution_time;
            let trip = Trip {
                kind: TimeoutKind::Execution,
                limit,
                message: timeout_message(&TimeoutKind::Execution, command, &limit),
            };
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                state.trip(trip);
            })
        };

        Self {
            state,
            tasks: vec![inactivity, execution],
        }
    }

    /// Record that a byte was just received
    pub(crate) fn touch(&self) {
        self.state
            .last_activity_ms
            .store(self.state.elapsed_ms(), Ordering::Release);
    }

    /// The timeout that fired, if any
    pub(crate) fn tripped(&self) -> Option<Trip> {
        self.state
            .pending
            .lock()
            .ok()
            .and_then(|pending| pending.clone())
    }

    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.tasks.iter().all(|task| task.is_finished())
    }
}

impl Drop for WatchdogPair {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
