use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::packet::Packet;
use crate::{mpd::ContentType, SegueResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    Success,
    NotPrepared,
    InvalidPacket,
    OutOfMemory,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    None,
    Idle,
    Ready,
    Playing,
    Paused,
}

/// Decoder configuration of one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub content_type: ContentType,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub bandwidth: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    /// Codec private data, e.g. `avcC` contents.
    pub extra_data: Bytes,
}

/// Receives one content type per stream once the backend wants its packets.
pub type ReadySender = mpsc::UnboundedSender<ContentType>;

/// The decoding backend. Owned by the player; renderers only submit through it.
#[async_trait]
pub trait PlatformPlayer: Send + Sync {
    fn open(&self, configs: &[StreamConfig]) -> SegueResult<()>;

    /// Prepares the opened streams. Sends each opened content type on `ready`
    /// exactly once when that stream can accept packets.
    async fn prepare(&self, ready: ReadySender, cancel: CancellationToken) -> SegueResult<()>;

    /// Seeks to `position`, with the same readiness contract as [`Self::prepare`].
    async fn seek(
        &self,
        position: Duration,
        ready: ReadySender,
        cancel: CancellationToken,
    ) -> SegueResult<()>;

    fn start(&self) -> SegueResult<()>;

    fn pause(&self) -> SegueResult<()>;

    fn resume(&self) -> SegueResult<()>;

    fn close(&self) -> SegueResult<()>;

    fn submit_packet(&self, packet: Packet) -> SubmitResult;

    fn state(&self) -> PlayerState;

    /// `None` when the backend cannot report a position.
    fn position(&self) -> Option<Duration>;

    /// End of stream notifications. Called once per opened backend.
    fn subscribe_eos(&self) -> mpsc::UnboundedReceiver<()>;
}

/// Creates a fresh backend, used on prepare and whenever the set of elementary
/// streams changes.
pub trait PlatformFactory: Send + Sync {
    fn create(&self) -> Arc<dyn PlatformPlayer>;
}

impl<F> PlatformFactory for F
where
    F: Fn() -> Arc<dyn PlatformPlayer> + Send + Sync,
{
    fn create(&self) -> Arc<dyn PlatformPlayer> {
        self()
    }
}
