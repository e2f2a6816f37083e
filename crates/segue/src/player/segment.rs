use std::time::Duration;

use crate::{SegueError, SegueResult};

/// Maps playback time (packet timestamps) to clock time and back for the current
/// play position. A new value replaces the old one on every prepare, seek and
/// reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    /// Clock time at which playback of `start` begins.
    pub base: Duration,
    /// Playback time origin.
    pub start: Duration,
    /// Last playable position, `None` when open ended.
    pub stop: Option<Duration>,
}

impl Segment {
    pub fn new(base: Duration, start: Duration) -> Self {
        Self {
            base,
            start,
            stop: None,
        }
    }

    pub fn to_clock_time(&self, position: Duration) -> SegueResult<Duration> {
        let out_of_segment = || SegueError::OutOfSegment {
            position,
            start: self.start,
            stop: self.stop,
        };
        if self.stop.is_some_and(|stop| position > stop) {
            return Err(out_of_segment());
        }
        let offset = position.checked_sub(self.start).ok_or_else(out_of_segment)?;
        Ok(offset + self.base)
    }

    pub fn to_playback_time(&self, clock: Duration) -> Duration {
        (clock + self.start).saturating_sub(self.base)
    }
}
