use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::{
    buffering::BufferingObserver,
    event::{FaultKind, StreamFault},
    packet::Packet,
    platform::{PlatformPlayer, SubmitResult},
    segment::Segment,
    synchronizer::PacketSynchronizer,
};
use crate::{mpd::ContentType, SegueError};

/// Where a chunk loader delivers demuxed packets.
#[derive(Clone)]
pub struct PacketSink {
    synchronizer: Arc<PacketSynchronizer>,
    observer: Arc<BufferingObserver>,
}

impl PacketSink {
    pub fn push(&self, packet: Packet) {
        tracing::trace!(content_type = ?packet.content_type, pts = ?packet.pts, "packet ready");
        self.observer.update(&packet);
        self.synchronizer.add(packet);
    }
}

struct PumpHandle {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct PumpState {
    next_id: u64,
    active: Option<PumpHandle>,
}

/// Pumps synchronized packets of one stream into the backend.
pub struct StreamRenderer {
    content_type: ContentType,
    synchronizer: Arc<PacketSynchronizer>,
    observer: Arc<BufferingObserver>,
    faults: mpsc::UnboundedSender<StreamFault>,
    pump: Arc<Mutex<PumpState>>,
    span: Span,
}

impl StreamRenderer {
    pub fn new(
        content_type: ContentType,
        synchronizer: Arc<PacketSynchronizer>,
        observer: Arc<BufferingObserver>,
        faults: mpsc::UnboundedSender<StreamFault>,
        span: Span,
    ) -> Self {
        Self {
            content_type,
            synchronizer,
            observer,
            faults,
            pump: Arc::new(Mutex::new(PumpState::default())),
            span,
        }
    }

    pub fn sink(&self) -> PacketSink {
        PacketSink {
            synchronizer: self.synchronizer.clone(),
            observer: self.observer.clone(),
        }
    }

    pub fn is_pushing_packets(&self) -> bool {
        self.pump.lock().active.is_some()
    }

    /// Starts the pump loop unless one is already running.
    pub fn start_pushing_packets(
        &self,
        segment: Segment,
        platform: Arc<dyn PlatformPlayer>,
        generation: u64,
    ) {
        let mut pump = self.pump.lock();
        if pump.active.is_some() {
            return;
        }

        self.synchronizer.set_segment(segment);
        let id = pump.next_id;
        pump.next_id += 1;
        let cancel = CancellationToken::new();

        let synchronizer = self.synchronizer.clone();
        let faults = self.faults.clone();
        let shared = self.pump.clone();
        let content_type = self.content_type;
        let token = cancel.clone();
        let task = tokio::spawn(
            async move {
                tracing::info!("start pushing packets");
                let result = loop {
                    let Some(packet) = synchronizer.take(&token).await else {
                        break Ok(());
                    };
                    let pts = packet.pts;
                    let result = platform.submit_packet(packet);
                    tracing::debug!(?pts, ?result, "submitted packet");
                    if result != SubmitResult::Success {
                        break Err(SegueError::SubmitFailed(result));
                    }
                    tokio::task::yield_now().await;
                };

                if let Err(error) = result {
                    tracing::error!(%error, "packet pump stopped");
                    let _ = faults.send(StreamFault {
                        generation,
                        content_type,
                        kind: FaultKind::Submit,
                        error,
                    });
                }

                let mut pump = shared.lock();
                if pump.active.as_ref().is_some_and(|active| active.id == id) {
                    pump.active = None;
                }
            }
            .instrument(self.span.clone()),
        );

        pump.active = Some(PumpHandle { id, cancel, task });
    }

    /// Stops the pump loop and waits for it to finish. A packet already being
    /// submitted completes first.
    pub async fn stop_pushing_packets(&self) {
        let Some(active) = self.pump.lock().active.take() else {
            return;
        };
        tracing::info!(parent: &self.span, "stop pushing packets");
        active.cancel.cancel();
        if let Err(error) = active.task.await {
            tracing::warn!(parent: &self.span, %error, "packet pump task failed");
        }
    }

    pub fn flush(&self) {
        self.synchronizer.flush();
    }
}

impl Drop for StreamRenderer {
    fn drop(&mut self) {
        if let Some(active) = self.pump.lock().active.take() {
            active.cancel.cancel();
        }
    }
}
