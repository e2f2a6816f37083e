use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct ClockState {
    running_since: Option<Instant>,
    accumulated: Duration,
}

/// The session's shared playback clock: a stopwatch that only advances while started.
///
/// Built on [`tokio::time::Instant`], so a paused tokio runtime drives it
/// deterministically in tests.
#[derive(Debug, Default)]
pub struct Clock {
    state: Mutex<ClockState>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        let state = self.state.lock();
        match state.running_since {
            Some(since) => state.accumulated + since.elapsed(),
            None => state.accumulated,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running_since.is_some()
    }

    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(since) = state.running_since.take() {
            state.accumulated += since.elapsed();
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = ClockState::default();
    }
}
