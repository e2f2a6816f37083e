use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::try_join_all;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::{
    buffering::BufferingSignal,
    clock::Clock,
    event::{FaultKind, PlayerEvent, StreamFault},
    holder::StreamHolder,
    platform::{PlatformFactory, PlatformPlayer, PlayerState, ReadySender, StreamConfig},
    provider::{StreamProvider, StreamSelector},
    renderer::StreamRenderer,
    segment::Segment,
    select::{select_default_groups, verify_stream_groups},
};
use crate::{
    config::{Capabilities, PlayerConfig},
    mpd::{ContentType, Manifest, Period, StreamGroup},
    SegueError, SegueResult,
};

#[derive(Default)]
struct Session {
    manifest: Option<Arc<Manifest>>,
    period: Option<Period>,
    platform: Option<Arc<dyn PlatformPlayer>>,
    holders: BTreeMap<ContentType, StreamHolder>,
    segment: Segment,
    cancel: CancellationToken,
    /// Number of streams currently starving.
    starving: usize,
    readiness_task: Option<JoinHandle<()>>,
    eos_task: Option<JoinHandle<()>>,
    disposed: bool,
}

impl Session {
    fn platform(&self) -> SegueResult<Arc<dyn PlatformPlayer>> {
        if self.disposed {
            return Err(SegueError::InvalidState("player is disposed"));
        }
        self.platform
            .clone()
            .ok_or(SegueError::InvalidState("prepare not called"))
    }

    fn period(&self) -> SegueResult<Period> {
        self.period
            .clone()
            .ok_or(SegueError::InvalidState("prepare not called"))
    }
}

type SignalReceivers = (
    mpsc::UnboundedReceiver<BufferingSignal>,
    mpsc::UnboundedReceiver<StreamFault>,
);

struct PlayerInner {
    config: PlayerConfig,
    capabilities: Capabilities,
    provider: Arc<dyn StreamProvider>,
    factory: Box<dyn PlatformFactory>,
    clock: Arc<Clock>,
    /// Bumped whenever streaming stops. Background work of an older generation is
    /// ignored.
    generation: Arc<AtomicU64>,
    session: Mutex<Session>,

    events: parking_lot::Mutex<Option<mpsc::UnboundedSender<PlayerEvent>>>,
    event_receiver: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<PlayerEvent>>>,
    buffering: mpsc::UnboundedSender<BufferingSignal>,
    faults: mpsc::UnboundedSender<StreamFault>,
    signal_receivers: parking_lot::Mutex<Option<SignalReceivers>>,

    span: Span,
}

/// A multi-stream playback session.
///
/// The player selects stream groups of the first period, loads their chunks
/// through the [`StreamProvider`] and paces the resulting packets into a
/// [`PlatformPlayer`] against a shared [`Clock`]. Playback halts while any stream
/// starves and resumes once all of them recovered.
///
/// Every operation is serialized. Failures of background work are reported as
/// [`PlayerEvent::Exception`] on [`Player::events`].
///
/// ```text
/// ┌──────────────┐  SegmentIndex   ┌──────────────┐  PacketSink   ┌────────────────────┐
/// │              ├────────────────►│              ├──────────────►│ PacketSynchronizer │
/// │   Manifest   │   UrlTemplate   │    Stream    │               │   (per stream,     │
/// │              │                 │  (external)  │               │    shared clock)   │
/// └──────────────┘                 └──────┬───────┘               └─────────┬──────────┘
///                                         │ packets                         │ take
///                                  ┌──────▼────────────┐          ┌─────────▼──────────┐
///                                  │ BufferingObserver │          │   StreamRenderer   │
///                                  └──────┬────────────┘          └─────────┬──────────┘
///                                         │ starving / filled               │ submit
///                                  ┌──────▼────────────┐          ┌─────────▼──────────┐
///                                  │      Player       ├─────────►│   PlatformPlayer   │
///                                  └───────────────────┘  pause / └────────────────────┘
///                                                         resume
/// ```
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    pub fn new(
        config: PlayerConfig,
        capabilities: Capabilities,
        provider: Arc<dyn StreamProvider>,
        factory: impl PlatformFactory + 'static,
    ) -> Self {
        Self::with_span(
            config,
            capabilities,
            provider,
            factory,
            tracing::info_span!("player"),
        )
    }

    pub fn with_span(
        config: PlayerConfig,
        capabilities: Capabilities,
        provider: Arc<dyn StreamProvider>,
        factory: impl PlatformFactory + 'static,
        span: Span,
    ) -> Self {
        let (events, event_receiver) = mpsc::unbounded_channel();
        let (buffering, buffering_receiver) = mpsc::unbounded_channel();
        let (faults, fault_receiver) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(PlayerInner {
                config,
                capabilities,
                provider,
                factory: Box::new(factory),
                clock: Arc::new(Clock::new()),
                generation: Arc::new(AtomicU64::new(0)),
                session: Mutex::new(Session::default()),
                events: parking_lot::Mutex::new(Some(events)),
                event_receiver: parking_lot::Mutex::new(Some(event_receiver)),
                buffering,
                faults,
                signal_receivers: parking_lot::Mutex::new(Some((
                    buffering_receiver,
                    fault_receiver,
                ))),
                span,
            }),
        }
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<PlayerEvent>> {
        self.inner.event_receiver.lock().take()
    }

    pub fn clock(&self) -> Arc<Clock> {
        self.inner.clock.clone()
    }

    pub async fn prepare(&self) -> SegueResult<()> {
        self.inner.spawn_signal_handlers();
        self.inner.prepare().await
    }

    pub async fn play(&self) -> SegueResult<()> {
        let mut session = self.inner.session.lock().await;
        self.inner.play(&mut session)
    }

    pub async fn pause(&self) -> SegueResult<()> {
        self.inner.pause().await
    }

    pub async fn seek(&self, position: Duration) -> SegueResult<()> {
        self.inner.seek(position).await
    }

    /// Replaces the selected stream groups. `selectors[i]` applies to `groups[i]`,
    /// `None` leaves quality selection to the stream provider.
    pub async fn set_stream_groups(
        &self,
        groups: Vec<StreamGroup>,
        selectors: Vec<Option<StreamSelector>>,
    ) -> SegueResult<()> {
        self.inner.set_stream_groups(groups, selectors).await
    }

    pub async fn dispose(&self) {
        self.inner.dispose().await
    }

    pub async fn state(&self) -> PlayerState {
        let session = self.inner.session.lock().await;
        session
            .platform
            .as_ref()
            .map(|platform| platform.state())
            .unwrap_or_default()
    }

    /// The backend position, or the start of the current segment when the backend
    /// cannot tell. `None` before prepare.
    pub async fn position(&self) -> Option<Duration> {
        let session = self.inner.session.lock().await;
        let platform = session.platform.as_ref()?;
        Some(platform.position().unwrap_or(session.segment.start))
    }

    pub async fn duration(&self) -> Option<Duration> {
        let session = self.inner.session.lock().await;
        session.manifest.as_ref()?.duration
    }

    /// All stream groups of the current period.
    pub async fn stream_groups(&self) -> Vec<StreamGroup> {
        let session = self.inner.session.lock().await;
        session
            .period
            .as_ref()
            .map(|period| period.stream_groups.clone())
            .unwrap_or_default()
    }

    pub async fn selected_stream_groups(&self) -> (Vec<StreamGroup>, Vec<Option<StreamSelector>>) {
        let session = self.inner.session.lock().await;
        session
            .holders
            .values()
            .map(|holder| (holder.group.clone(), holder.selector.clone()))
            .unzip()
    }
}

impl PlayerInner {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn emit(&self, event: PlayerEvent) {
        tracing::debug!(parent: &self.span, ?event, "player event");
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    fn spawn_signal_handlers(self: &Arc<Self>) {
        let Some((mut buffering, mut faults)) = self.signal_receivers.lock().take() else {
            return;
        };

        let weak = Arc::downgrade(self);
        tokio::spawn(
            async move {
                while let Some(signal) = buffering.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    inner.on_buffering(signal).await;
                }
            }
            .instrument(self.span.clone()),
        );

        let weak = Arc::downgrade(self);
        tokio::spawn(
            async move {
                while let Some(fault) = faults.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    inner.on_fault(fault).await;
                }
            }
            .instrument(self.span.clone()),
        );
    }

    async fn prepare(&self) -> SegueResult<()> {
        let mut session = self.session.lock().await;
        if session.disposed {
            return Err(SegueError::InvalidState("player is disposed"));
        }
        if session.platform.is_some() {
            // Recovering from a failed session
            self.tear_down(&mut session).await;
        }
        tracing::info!(parent: &self.span, "preparing");

        session.cancel = CancellationToken::new();
        session.platform = Some(self.factory.create());

        let manifest = self.provider.prepare().await?;
        let period = manifest
            .periods
            .first()
            .cloned()
            .ok_or(SegueError::Missing("Period"))?;
        session.manifest = Some(manifest);

        let groups = select_default_groups(
            &period.stream_groups,
            self.config.preferred_audio_language.as_deref(),
        );
        for group in groups {
            let holder = self.create_holder(&period, group, None)?;
            session.holders.insert(holder.group.content_type, holder);
        }
        session.period = Some(period);
        self.prepare_streams(&session).await?;

        let mut start_time = session.period()?.start;
        if let Some(requested) = self.config.start_time() {
            start_time = start_time.max(requested);
        }
        self.update_segment(&mut session, start_time).await?;
        self.load_chunks(&mut session);

        let configs = self.stream_configs(&session).await?;
        self.prepare_player(&mut session, &configs).await
    }

    fn play(&self, session: &mut Session) -> SegueResult<()> {
        let platform = session.platform()?;
        tracing::info!(parent: &self.span, starving = session.starving, "play");
        if session.starving == 0 {
            self.start_player(&platform)?;
        }

        let generation = self.current_generation();
        for holder in session.holders.values() {
            holder
                .renderer
                .start_pushing_packets(session.segment, platform.clone(), generation);
            holder.observer.start();
        }
        Ok(())
    }

    async fn pause(&self) -> SegueResult<()> {
        let session = self.session.lock().await;
        let platform = session.platform()?;
        tracing::info!(parent: &self.span, "pause");

        for holder in session.holders.values() {
            holder.observer.stop();
        }
        self.pause_player(&platform)?;
        for holder in session.holders.values() {
            holder.renderer.stop_pushing_packets().await;
        }
        Ok(())
    }

    async fn seek(&self, position: Duration) -> SegueResult<()> {
        let mut session = self.session.lock().await;
        let platform = session.platform()?;
        tracing::info!(parent: &self.span, ?position, "seek");

        let state_before = platform.state();
        if state_before == PlayerState::Playing {
            self.pause_player(&platform)?;
        }
        self.stop_streaming(&mut session).await;

        self.update_segment(&mut session, position).await?;
        let position = session.segment.start;
        self.load_chunks(&mut session);
        self.seek_player(&mut session, position).await?;

        if state_before == PlayerState::Playing {
            self.play(&mut session)?;
        }
        Ok(())
    }

    async fn set_stream_groups(
        &self,
        groups: Vec<StreamGroup>,
        selectors: Vec<Option<StreamSelector>>,
    ) -> SegueResult<()> {
        verify_stream_groups(&groups, &selectors, &self.capabilities)?;

        let mut session = self.session.lock().await;
        let platform = session.platform()?;
        let period = session.period()?;
        tracing::info!(parent: &self.span, count = groups.len(), "changing stream groups");

        let state_before = platform.state();
        if state_before == PlayerState::Playing {
            self.pause_player(&platform)?;
        }
        let position = match platform.state() {
            PlayerState::Ready => session.segment.start,
            _ => platform.position().unwrap_or(session.segment.start),
        };
        self.stop_streaming(&mut session).await;

        let mut previous = std::mem::take(&mut session.holders);
        let mut holders = BTreeMap::new();
        let mut recreate_player = false;
        for (group, selector) in groups.into_iter().zip(selectors) {
            let content_type = group.content_type;
            let reused = match previous.remove(&content_type) {
                None => None,
                Some(old) if old.group != group => {
                    old.dispose(self.provider.as_ref());
                    None
                }
                Some(old)
                    if content_type == ContentType::Audio
                        && !self.capabilities.supports_seamless_audio_change
                        && old.selector != selector =>
                {
                    old.dispose(self.provider.as_ref());
                    None
                }
                Some(old) => Some(old),
            };

            let holder = match reused {
                Some(mut holder) => {
                    holder.update_selector(selector);
                    holder
                }
                None => {
                    recreate_player = true;
                    match self.create_holder(&period, group, selector) {
                        Ok(holder) => holder,
                        Err(error) => {
                            previous
                                .into_values()
                                .chain(holders.into_values())
                                .for_each(|holder| holder.dispose(self.provider.as_ref()));
                            return Err(error);
                        }
                    }
                }
            };
            holders.insert(content_type, holder);
        }

        // Deselected streams
        if !previous.is_empty() {
            recreate_player = true;
            for holder in previous.into_values() {
                holder.dispose(self.provider.as_ref());
            }
        }
        session.holders = holders;

        self.prepare_streams(&session).await?;
        self.update_segment(&mut session, position).await?;
        self.load_chunks(&mut session);

        if recreate_player {
            tracing::info!(parent: &self.span, "recreating platform player");
            if let Some(task) = session.eos_task.take() {
                task.abort();
            }
            if let Err(error) = platform.close() {
                tracing::warn!(parent: &self.span, %error, "failed to close platform player");
            }
            session.platform = Some(self.factory.create());
            let configs = self.stream_configs(&session).await?;
            self.prepare_player(&mut session, &configs).await?;
        } else {
            let start = session.segment.start;
            self.seek_player(&mut session, start).await?;
        }

        if state_before == PlayerState::Playing {
            self.play(&mut session)?;
        }
        Ok(())
    }

    async fn dispose(&self) {
        let mut session = self.session.lock().await;
        if session.disposed {
            return;
        }
        tracing::info!(parent: &self.span, "disposing");

        self.tear_down(&mut session).await;
        self.provider.dispose();
        session.disposed = true;
        self.events.lock().take();
    }

    async fn tear_down(&self, session: &mut Session) {
        self.stop_streaming(session).await;
        for holder in std::mem::take(&mut session.holders).into_values() {
            holder.dispose(self.provider.as_ref());
        }
        if let Some(task) = session.eos_task.take() {
            task.abort();
        }
        if let Some(platform) = session.platform.take() {
            if let Err(error) = platform.close() {
                tracing::warn!(parent: &self.span, %error, "failed to close platform player");
            }
        }
        session.manifest = None;
        session.period = None;
        session.starving = 0;
    }

    fn create_holder(
        &self,
        period: &Period,
        group: StreamGroup,
        selector: Option<StreamSelector>,
    ) -> SegueResult<StreamHolder> {
        let stream = self.provider.create_stream(period, &group, selector.clone())?;
        Ok(StreamHolder::new(
            stream,
            group,
            selector,
            &self.config,
            self.clock.clone(),
            self.buffering.clone(),
            self.faults.clone(),
        ))
    }

    async fn prepare_streams(&self, session: &Session) -> SegueResult<()> {
        try_join_all(session.holders.values().map(|holder| holder.stream.prepare())).await?;
        Ok(())
    }

    async fn stream_configs(&self, session: &Session) -> SegueResult<Vec<StreamConfig>> {
        try_join_all(
            session
                .holders
                .values()
                .map(|holder| holder.stream.stream_config(session.cancel.clone())),
        )
        .await
    }

    async fn update_segment(&self, session: &mut Session, start: Duration) -> SegueResult<()> {
        let mut start = start;
        if let Some(video) = session.holders.get(&ContentType::Video) {
            let adjusted = video.stream.adjusted_seek_position(start).await?;
            if adjusted > start {
                tracing::warn!(
                    parent: &self.span,
                    requested = ?start,
                    ?adjusted,
                    "seek to a previous key frame is not supported"
                );
            }
            start = adjusted;
        }
        tracing::info!(parent: &self.span, ?start, "new segment");

        session.segment = Segment::new(self.clock.elapsed(), start);
        let generation = self.current_generation();
        for holder in session.holders.values() {
            holder.observer.reset(session.segment, generation);
        }
        session.starving = 0;
        Ok(())
    }

    fn load_chunks(&self, session: &mut Session) {
        let generation = self.current_generation();
        let segment = session.segment;
        let cancel = session.cancel.clone();
        for holder in session.holders.values_mut() {
            holder.start_loading_chunks(segment, cancel.clone(), generation);
        }
    }

    /// Starts packet pushing for each content type the backend reports ready.
    fn spawn_readiness_handler(
        &self,
        session: &mut Session,
        platform: Arc<dyn PlatformPlayer>,
    ) -> ReadySender {
        let (ready, mut receiver) = mpsc::unbounded_channel::<ContentType>();
        let renderers: BTreeMap<ContentType, Arc<StreamRenderer>> = session
            .holders
            .iter()
            .map(|(content_type, holder)| (*content_type, holder.renderer.clone()))
            .collect();
        let segment = session.segment;
        let cancel = session.cancel.clone();
        let generation = self.generation.clone();
        let current = generation.load(Ordering::SeqCst);

        let task = tokio::spawn(
            async move {
                loop {
                    let content_type = tokio::select! {
                        _ = cancel.cancelled() => break,
                        content_type = receiver.recv() => match content_type {
                            Some(content_type) => content_type,
                            None => break,
                        },
                    };
                    if generation.load(Ordering::SeqCst) != current {
                        break;
                    }
                    tracing::info!(%content_type, "stream ready");
                    match renderers.get(&content_type) {
                        Some(renderer) => {
                            renderer.start_pushing_packets(segment, platform.clone(), current)
                        }
                        None => tracing::warn!(%content_type, "readiness for an unknown stream"),
                    }
                }
            }
            .instrument(self.span.clone()),
        );
        if let Some(previous) = session.readiness_task.replace(task) {
            previous.abort();
        }
        ready
    }

    async fn prepare_player(
        &self,
        session: &mut Session,
        configs: &[StreamConfig],
    ) -> SegueResult<()> {
        let platform = session.platform()?;
        tracing::info!(parent: &self.span, streams = configs.len(), "opening platform player");
        platform.open(configs)?;

        let mut eos = platform.subscribe_eos();
        let events = self.events.lock().clone();
        let task = tokio::spawn(
            async move {
                while eos.recv().await.is_some() {
                    tracing::info!("end of stream");
                    if let Some(events) = &events {
                        let _ = events.send(PlayerEvent::Eos);
                    }
                }
            }
            .instrument(self.span.clone()),
        );
        if let Some(previous) = session.eos_task.replace(task) {
            previous.abort();
        }

        let ready = self.spawn_readiness_handler(session, platform.clone());
        platform.prepare(ready, session.cancel.clone()).await
    }

    async fn seek_player(&self, session: &mut Session, position: Duration) -> SegueResult<()> {
        let platform = session.platform()?;
        let ready = self.spawn_readiness_handler(session, platform.clone());
        platform
            .seek(position, ready, session.cancel.clone())
            .await
    }

    fn start_player(&self, platform: &Arc<dyn PlatformPlayer>) -> SegueResult<()> {
        match platform.state() {
            PlayerState::Ready => platform.start()?,
            PlayerState::Paused => platform.resume()?,
            _ => return Ok(()),
        }
        self.clock.start();
        Ok(())
    }

    fn pause_player(&self, platform: &Arc<dyn PlatformPlayer>) -> SegueResult<()> {
        platform.pause()?;
        self.clock.stop();
        Ok(())
    }

    /// Cancels all background work of the current generation and waits for it.
    async fn stop_streaming(&self, session: &mut Session) {
        tracing::info!(parent: &self.span, "stop streaming");
        self.clock.stop();
        self.generation.fetch_add(1, Ordering::SeqCst);
        session.cancel.cancel();
        session.cancel = CancellationToken::new();

        if let Some(task) = session.readiness_task.take() {
            if let Err(error) = task.await {
                tracing::warn!(parent: &self.span, %error, "readiness task failed");
            }
        }
        for holder in session.holders.values_mut() {
            holder.stop_loading_chunks().await;
        }
        for holder in session.holders.values() {
            holder.renderer.stop_pushing_packets().await;
            holder.renderer.flush();
        }
    }

    async fn on_buffering(&self, signal: BufferingSignal) {
        let mut session = self.session.lock().await;
        if session.disposed || signal.generation != self.current_generation() {
            tracing::debug!(parent: &self.span, ?signal, "ignoring stale buffering signal");
            return;
        }
        let Ok(platform) = session.platform() else {
            return;
        };

        let was_buffering = session.starving > 0;
        if signal.starving {
            session.starving += 1;
        } else if session.starving == 0 {
            tracing::error!(parent: &self.span, ?signal, "starving stream count went negative");
            self.stop_streaming(&mut session).await;
            self.emit(PlayerEvent::Exception(Arc::new(SegueError::InvalidState(
                "starving stream count went negative",
            ))));
            return;
        } else {
            session.starving -= 1;
        }
        tracing::info!(
            parent: &self.span,
            content_type = %signal.content_type,
            starving = session.starving,
            "buffering changed"
        );

        let result = if session.starving == 1 && !was_buffering {
            let result = self.pause_player(&platform);
            self.emit(PlayerEvent::Buffering(true));
            result
        } else if session.starving == 0 {
            let result = self.start_player(&platform);
            self.emit(PlayerEvent::Buffering(false));
            result
        } else {
            Ok(())
        };
        if let Err(error) = result {
            tracing::error!(parent: &self.span, %error, "failed to switch buffering state");
        }
    }

    async fn on_fault(&self, fault: StreamFault) {
        let mut session = self.session.lock().await;
        if session.disposed || fault.generation != self.current_generation() {
            tracing::debug!(parent: &self.span, ?fault, "ignoring stale stream fault");
            return;
        }
        tracing::error!(
            parent: &self.span,
            content_type = %fault.content_type,
            kind = ?fault.kind,
            error = %fault.error,
            "stream failed"
        );
        if fault.kind == FaultKind::Loading {
            self.stop_streaming(&mut session).await;
        }
        self.emit(PlayerEvent::Exception(Arc::new(fault.error)));
    }
}
