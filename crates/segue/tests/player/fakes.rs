use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use segue::{
    mpd::{parse_manifest, ContentType, Manifest, Period, StreamGroup},
    player::{
        Packet, PacketSink, PlatformFactory, PlatformPlayer, PlayerState, ReadySender, Segment,
        Stream, StreamConfig, StreamProvider, StreamSelector, SubmitResult,
    },
    SegueError, SegueResult,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A backend that accepts every packet and reports every opened stream ready.
#[derive(Default)]
pub struct FakePlatform {
    pub configs: Mutex<Vec<StreamConfig>>,
    pub state: Mutex<PlayerState>,
    pub submitted: Mutex<Vec<Packet>>,
    pub seeks: Mutex<Vec<Duration>>,
    pub calls: Mutex<Vec<&'static str>>,
    eos: Mutex<Option<mpsc::UnboundedSender<()>>>,
    open_calls: Arc<AtomicUsize>,
}

impl FakePlatform {
    fn set(&self, call: &'static str, state: PlayerState) -> SegueResult<()> {
        self.calls.lock().push(call);
        *self.state.lock() = state;
        Ok(())
    }

    fn report_ready(&self, ready: &ReadySender) {
        for config in self.configs.lock().iter() {
            let _ = ready.send(config.content_type);
        }
    }

    pub fn submitted_pts(&self, content_type: ContentType) -> Vec<Duration> {
        self.submitted
            .lock()
            .iter()
            .filter(|packet| packet.content_type == content_type)
            .map(|packet| packet.pts)
            .collect()
    }

    pub fn fire_eos(&self) {
        if let Some(eos) = self.eos.lock().as_ref() {
            let _ = eos.send(());
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PlatformPlayer for FakePlatform {
    fn open(&self, configs: &[StreamConfig]) -> SegueResult<()> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        *self.configs.lock() = configs.to_vec();
        self.set("open", PlayerState::Idle)
    }

    async fn prepare(&self, ready: ReadySender, _cancel: CancellationToken) -> SegueResult<()> {
        self.report_ready(&ready);
        self.set("prepare", PlayerState::Ready)
    }

    async fn seek(
        &self,
        position: Duration,
        ready: ReadySender,
        _cancel: CancellationToken,
    ) -> SegueResult<()> {
        self.seeks.lock().push(position);
        self.calls.lock().push("seek");
        self.report_ready(&ready);
        Ok(())
    }

    fn start(&self) -> SegueResult<()> {
        self.set("start", PlayerState::Playing)
    }

    fn pause(&self) -> SegueResult<()> {
        self.set("pause", PlayerState::Paused)
    }

    fn resume(&self) -> SegueResult<()> {
        self.set("resume", PlayerState::Playing)
    }

    fn close(&self) -> SegueResult<()> {
        self.eos.lock().take();
        self.set("close", PlayerState::None)
    }

    fn submit_packet(&self, packet: Packet) -> SubmitResult {
        self.submitted.lock().push(packet);
        SubmitResult::Success
    }

    fn state(&self) -> PlayerState {
        *self.state.lock()
    }

    fn position(&self) -> Option<Duration> {
        None
    }

    fn subscribe_eos(&self) -> mpsc::UnboundedReceiver<()> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.eos.lock() = Some(sender);
        receiver
    }
}

/// Hands out fresh [`FakePlatform`]s and keeps every one of them.
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub platforms: Arc<Mutex<Vec<Arc<FakePlatform>>>>,
    pub open_calls: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn current(&self) -> Arc<FakePlatform> {
        self.platforms.lock().last().cloned().expect("no platform created")
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

impl PlatformFactory for FakeFactory {
    fn create(&self) -> Arc<dyn PlatformPlayer> {
        let platform = Arc::new(FakePlatform {
            open_calls: self.open_calls.clone(),
            ..Default::default()
        });
        self.platforms.lock().push(platform.clone());
        platform
    }
}

/// Feeds packets every 100ms for `buffered` from the segment start, then waits
/// for cancellation.
pub struct FakeStream {
    pub content_type: ContentType,
    pub buffered: Duration,
    pub fail_loading: bool,
    pub loads: Mutex<Vec<Segment>>,
    pub selector: Mutex<Option<StreamSelector>>,
}

const PACKET_INTERVAL: Duration = Duration::from_millis(100);
const KEY_FRAME_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
impl Stream for FakeStream {
    async fn prepare(&self) -> SegueResult<()> {
        Ok(())
    }

    async fn stream_config(&self, _cancel: CancellationToken) -> SegueResult<StreamConfig> {
        Ok(StreamConfig {
            content_type: self.content_type,
            mime_type: None,
            codecs: None,
            bandwidth: None,
            width: None,
            height: None,
            sample_rate: None,
            extra_data: Bytes::new(),
        })
    }

    async fn adjusted_seek_position(&self, position: Duration) -> SegueResult<Duration> {
        let key_frames = position.as_millis() / KEY_FRAME_INTERVAL.as_millis();
        Ok(KEY_FRAME_INTERVAL * key_frames as u32)
    }

    async fn load_chunks(
        &self,
        segment: Segment,
        sink: PacketSink,
        cancel: CancellationToken,
    ) -> SegueResult<()> {
        self.loads.lock().push(segment);
        if self.fail_loading {
            return Err(SegueError::Stream("chunk download failed".to_string()));
        }

        let mut pts = segment.start;
        while pts < segment.start + self.buffered {
            sink.push(Packet::new(self.content_type, pts, Bytes::from_static(b"frame")));
            pts += PACKET_INTERVAL;
        }
        cancel.cancelled().await;
        Ok(())
    }

    fn set_selector(&self, selector: Option<StreamSelector>) {
        *self.selector.lock() = selector;
    }
}

/// Serves the template fixture and creates [`FakeStream`]s.
pub struct FakeProvider {
    pub buffered: Duration,
    pub fail_loading: bool,
    pub streams: Mutex<Vec<Arc<FakeStream>>>,
    pub released: AtomicUsize,
    pub disposed: AtomicUsize,
}

impl FakeProvider {
    pub fn new(buffered: Duration) -> Self {
        Self {
            buffered,
            fail_loading: false,
            streams: Mutex::new(Vec::new()),
            released: AtomicUsize::new(0),
            disposed: AtomicUsize::new(0),
        }
    }

    pub fn stream(&self, content_type: ContentType) -> Arc<FakeStream> {
        self.streams
            .lock()
            .iter()
            .rev()
            .find(|stream| stream.content_type == content_type)
            .cloned()
            .expect("no stream of this content type")
    }

    pub fn created(&self) -> usize {
        self.streams.lock().len()
    }
}

#[async_trait]
impl StreamProvider for FakeProvider {
    async fn prepare(&self) -> SegueResult<Arc<Manifest>> {
        let data = include_str!("../fixtures/template.mpd");
        Ok(Arc::new(parse_manifest(data, None)?))
    }

    fn create_stream(
        &self,
        _period: &Period,
        group: &StreamGroup,
        selector: Option<StreamSelector>,
    ) -> SegueResult<Arc<dyn Stream>> {
        let stream = Arc::new(FakeStream {
            content_type: group.content_type,
            buffered: self.buffered,
            fail_loading: self.fail_loading,
            loads: Mutex::new(Vec::new()),
            selector: Mutex::new(selector),
        });
        self.streams.lock().push(stream.clone());
        Ok(stream)
    }

    fn release_stream(&self, _stream: &Arc<dyn Stream>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
