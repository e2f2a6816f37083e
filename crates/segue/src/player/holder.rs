use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::{
    buffering::{BufferingObserver, BufferingSignal},
    clock::Clock,
    event::{FaultKind, StreamFault},
    provider::{Stream, StreamProvider, StreamSelector},
    renderer::StreamRenderer,
    segment::Segment,
    synchronizer::PacketSynchronizer,
};
use crate::{config::PlayerConfig, mpd::StreamGroup};

/// Everything the session keeps for one selected content type.
pub(crate) struct StreamHolder {
    pub stream: Arc<dyn Stream>,
    pub group: StreamGroup,
    pub selector: Option<StreamSelector>,
    pub renderer: Arc<StreamRenderer>,
    pub observer: Arc<BufferingObserver>,
    loading: Option<JoinHandle<()>>,
    faults: mpsc::UnboundedSender<StreamFault>,
    span: Span,
}

impl StreamHolder {
    pub fn new(
        stream: Arc<dyn Stream>,
        group: StreamGroup,
        selector: Option<StreamSelector>,
        config: &PlayerConfig,
        clock: Arc<Clock>,
        buffering: mpsc::UnboundedSender<BufferingSignal>,
        faults: mpsc::UnboundedSender<StreamFault>,
    ) -> Self {
        let content_type = group.content_type;
        let span = tracing::info_span!("stream", %content_type);

        let synchronizer = Arc::new(PacketSynchronizer::new(
            clock.clone(),
            config.synchronizer_offset(),
            span.clone(),
        ));
        let observer = Arc::new(BufferingObserver::new(
            content_type,
            clock,
            config.starving_threshold(),
            config.filled_threshold(),
            buffering,
            span.clone(),
        ));
        let renderer = Arc::new(StreamRenderer::new(
            content_type,
            synchronizer,
            observer.clone(),
            faults.clone(),
            span.clone(),
        ));

        Self {
            stream,
            group,
            selector,
            renderer,
            observer,
            loading: None,
            faults,
            span,
        }
    }

    pub fn start_loading_chunks(
        &mut self,
        segment: Segment,
        cancel: CancellationToken,
        generation: u64,
    ) {
        let stream = self.stream.clone();
        let sink = self.renderer.sink();
        let faults = self.faults.clone();
        let content_type = self.group.content_type;

        let task = tokio::spawn(
            async move {
                tracing::info!(start = ?segment.start, "loading chunks");
                let result = stream.load_chunks(segment, sink, cancel.clone()).await;
                match result {
                    Err(error) if !cancel.is_cancelled() => {
                        tracing::error!(%error, "failed to load chunks");
                        let _ = faults.send(StreamFault {
                            generation,
                            content_type,
                            kind: FaultKind::Loading,
                            error,
                        });
                    }
                    Err(error) => tracing::debug!(%error, "chunk loading cancelled"),
                    Ok(()) => tracing::debug!("chunk loading finished"),
                }
            }
            .instrument(self.span.clone()),
        );
        self.loading = Some(task);
    }

    /// Waits for the chunk loader to return. The session token must have been
    /// cancelled before.
    pub async fn stop_loading_chunks(&mut self) {
        if let Some(task) = self.loading.take() {
            if let Err(error) = task.await {
                tracing::warn!(parent: &self.span, %error, "chunk loading task failed");
            }
        }
    }

    pub fn update_selector(&mut self, selector: Option<StreamSelector>) {
        tracing::info!(parent: &self.span, ?selector, "updating stream selector");
        self.stream.set_selector(selector.clone());
        self.selector = selector;
    }

    pub fn dispose(mut self, provider: &dyn StreamProvider) {
        tracing::info!(parent: &self.span, "disposing stream");
        if let Some(task) = self.loading.take() {
            task.abort();
        }
        self.observer.stop();
        provider.release_stream(&self.stream);
    }
}
