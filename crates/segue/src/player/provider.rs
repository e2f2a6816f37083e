use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{platform::StreamConfig, renderer::PacketSink, segment::Segment};
use crate::{
    mpd::{Manifest, Period, StreamGroup},
    SegueResult,
};

/// Quality selection policy of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSelector {
    /// Always use one representation.
    Fixed { representation_id: String },
    /// Adapt to measured throughput.
    ThroughputHistory,
}

/// A loader of one stream group: downloads and demuxes chunks into packets.
#[async_trait]
pub trait Stream: Send + Sync {
    async fn prepare(&self) -> SegueResult<()>;

    async fn stream_config(&self, cancel: CancellationToken) -> SegueResult<StreamConfig>;

    /// The nearest position at or before `position` where playback can start,
    /// e.g. the preceding key frame.
    async fn adjusted_seek_position(&self, position: Duration) -> SegueResult<Duration>;

    /// Loads chunks from `segment.start` on and hands their packets to `sink`,
    /// until the stream ends or `cancel` fires. An error ends the session.
    async fn load_chunks(
        &self,
        segment: Segment,
        sink: PacketSink,
        cancel: CancellationToken,
    ) -> SegueResult<()>;

    /// Replaces the quality selector of a live stream.
    fn set_selector(&self, selector: Option<StreamSelector>);
}

#[async_trait]
pub trait StreamProvider: Send + Sync {
    async fn prepare(&self) -> SegueResult<Arc<Manifest>>;

    fn create_stream(
        &self,
        period: &Period,
        group: &StreamGroup,
        selector: Option<StreamSelector>,
    ) -> SegueResult<Arc<dyn Stream>>;

    fn release_stream(&self, stream: &Arc<dyn Stream>);

    fn dispose(&self);
}
