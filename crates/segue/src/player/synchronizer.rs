use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use super::{clock::Clock, packet::Packet, segment::Segment};
use crate::mpd::ContentType;

#[derive(Default)]
struct SyncState {
    queues: BTreeMap<ContentType, VecDeque<Packet>>,
    /// Packet chosen by an unfinished take.
    current: Option<Packet>,
    segment: Segment,
    /// Bumped by every flush.
    epoch: u64,
}

impl SyncState {
    fn pop_earliest(&mut self) -> Option<Packet> {
        let content_type = self
            .queues
            .iter()
            .filter_map(|(content_type, queue)| {
                let head = queue.front()?;
                let key = if head.is_eos() { Duration::ZERO } else { head.pts };
                Some((key, *content_type))
            })
            .min()
            .map(|(_, content_type)| content_type)?;
        self.queues.get_mut(&content_type)?.pop_front()
    }
}

/// Orders packets of several streams by presentation time and releases each one
/// `offset` ahead of its clock deadline.
///
/// Packets of one content type keep their arrival order.
pub struct PacketSynchronizer {
    clock: Arc<Clock>,
    offset: Duration,
    state: Mutex<SyncState>,
    wake: Notify,
    span: Span,
}

impl PacketSynchronizer {
    pub fn new(clock: Arc<Clock>, offset: Duration, span: Span) -> Self {
        Self {
            clock,
            offset,
            state: Mutex::new(SyncState::default()),
            wake: Notify::new(),
            span,
        }
    }

    pub fn set_segment(&self, segment: Segment) {
        self.state.lock().segment = segment;
    }

    pub fn add(&self, packet: Packet) {
        self.state
            .lock()
            .queues
            .entry(packet.content_type)
            .or_default()
            .push_back(packet);
        self.wake.notify_one();
    }

    /// Number of packets waiting, including one held by an unfinished take.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.queues.values().map(VecDeque::len).sum::<usize>() + state.current.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every pending packet. A take waiting on a dropped packet moves on to
    /// the packets added afterwards.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        let dropped = state.queues.values().map(VecDeque::len).sum::<usize>()
            + state.current.is_some() as usize;
        state.queues.clear();
        state.current = None;
        state.epoch += 1;
        drop(state);

        tracing::debug!(parent: &self.span, dropped, "flushed packets");
        self.wake.notify_one();
    }

    /// Waits for the next packet to be due. Returns `None` once `cancel` fires.
    ///
    /// A packet chosen before cancellation is kept and returned by the next take.
    pub async fn take(&self, cancel: &CancellationToken) -> Option<Packet> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let (delay, epoch) = {
                let mut state = self.state.lock();
                if state.current.is_none() {
                    state.current = state.pop_earliest();
                }
                let delay = match &state.current {
                    None => None,
                    Some(packet) if packet.is_eos() => Some(Duration::ZERO),
                    Some(packet) => Some(self.time_to_push(&state.segment, packet)),
                };
                (delay, state.epoch)
            };

            match delay {
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = self.wake.notified() => {}
                    }
                }
                Some(delay) if delay.is_zero() => {
                    let mut state = self.state.lock();
                    if state.epoch == epoch {
                        if let Some(packet) = state.current.take() {
                            return Some(packet);
                        }
                    }
                }
                Some(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.wake.notified() => {}
                    }
                }
            }
        }
    }

    fn time_to_push(&self, segment: &Segment, packet: &Packet) -> Duration {
        match segment.to_clock_time(packet.pts) {
            Ok(clock_time) => clock_time
                .saturating_sub(self.clock.elapsed())
                .saturating_sub(self.offset),
            Err(error) => {
                // Late packets are due immediately.
                tracing::debug!(parent: &self.span, %error, "packet outside of segment");
                Duration::ZERO
            }
        }
    }
}
