use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::{clock::Clock, packet::Packet, segment::Segment};
use crate::mpd::ContentType;

/// A starvation transition of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferingSignal {
    pub content_type: ContentType,
    /// Generation passed to the last [`BufferingObserver::reset`].
    pub generation: u64,
    pub starving: bool,
}

#[derive(Debug, Default)]
struct ObserverState {
    segment: Segment,
    generation: u64,
    observing: bool,
    starving: bool,
    eos: bool,
    last_seen: Option<Duration>,
    pending: Option<CancellationToken>,
}

/// Detects when a stream runs out of buffered data.
///
/// The buffered lead of a stream is the gap between the timestamp of the newest
/// packet handed to the stream and the current playback time. A stream becomes
/// starving once the lead drops under `starving_threshold`, and stops starving
/// once it reaches `filled_threshold` again or the stream ends.
pub struct BufferingObserver {
    content_type: ContentType,
    clock: Arc<Clock>,
    starving_threshold: Duration,
    filled_threshold: Duration,
    state: Arc<Mutex<ObserverState>>,
    signals: mpsc::UnboundedSender<BufferingSignal>,
    span: Span,
}

impl BufferingObserver {
    pub fn new(
        content_type: ContentType,
        clock: Arc<Clock>,
        starving_threshold: Duration,
        filled_threshold: Duration,
        signals: mpsc::UnboundedSender<BufferingSignal>,
        span: Span,
    ) -> Self {
        Self {
            content_type,
            clock,
            starving_threshold,
            filled_threshold,
            state: Arc::new(Mutex::new(ObserverState::default())),
            signals,
            span,
        }
    }

    /// Stops observing and forgets everything seen for the previous segment.
    pub fn reset(&self, segment: Segment, generation: u64) {
        let mut state = self.state.lock();
        cancel_pending(&mut state);
        *state = ObserverState {
            segment,
            generation,
            ..Default::default()
        };
    }

    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.observing {
            return;
        }
        state.observing = true;
        self.evaluate(&mut state);
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.observing = false;
        cancel_pending(&mut state);
    }

    pub fn is_starving(&self) -> bool {
        self.state.lock().starving
    }

    /// Records a packet handed to the stream.
    pub fn update(&self, packet: &Packet) {
        let mut state = self.state.lock();
        if packet.is_eos() {
            state.eos = true;
        } else {
            state.last_seen = Some(packet.pts);
        }
        if state.observing {
            self.evaluate(&mut state);
        }
    }

    fn evaluate(&self, state: &mut ObserverState) {
        let _enter = self.span.enter();
        cancel_pending(state);

        let playback_time = state.segment.to_playback_time(self.clock.elapsed());
        let gap = state
            .last_seen
            .map(|pts| pts.saturating_sub(playback_time));

        if state.eos || gap.is_some_and(|gap| gap >= self.filled_threshold) {
            if state.starving {
                state.starving = false;
                self.emit(state, false);
            }
            if state.eos {
                return;
            }
        }

        let time_to_emit = gap
            .and_then(|gap| gap.checked_sub(self.starving_threshold))
            .filter(|delay| !delay.is_zero());
        let Some(delay) = time_to_emit else {
            if !state.starving {
                state.starving = true;
                self.emit(state, true);
            }
            return;
        };

        let token = CancellationToken::new();
        state.pending = Some(token.clone());
        let deadline = tokio::time::Instant::now() + delay;

        let shared = self.state.clone();
        let signals = self.signals.clone();
        let content_type = self.content_type;
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline) => {}
                }

                let mut state = shared.lock();
                // Cancellation happens under the lock, so this check is final.
                if token.is_cancelled() || state.starving {
                    return;
                }
                state.starving = true;
                state.pending = None;
                tracing::info!(?content_type, "stream is starving");
                let _ = signals.send(BufferingSignal {
                    content_type,
                    generation: state.generation,
                    starving: true,
                });
            }
            .instrument(self.span.clone()),
        );
    }

    fn emit(&self, state: &ObserverState, starving: bool) {
        tracing::info!(content_type = ?self.content_type, starving, "buffering state changed");
        let _ = self.signals.send(BufferingSignal {
            content_type: self.content_type,
            generation: state.generation,
            starving,
        });
    }
}

impl Drop for BufferingObserver {
    fn drop(&mut self) {
        cancel_pending(&mut self.state.lock());
    }
}

fn cancel_pending(state: &mut ObserverState) {
    if let Some(token) = state.pending.take() {
        token.cancel();
    }
}
