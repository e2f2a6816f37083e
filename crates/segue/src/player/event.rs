use std::sync::Arc;

use crate::{mpd::ContentType, SegueError};

/// Session events delivered to the application.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// `true` when playback halts because a stream starves, `false` once every
    /// stream has recovered.
    Buffering(bool),
    Eos,
    /// Playback stopped. The session has to be prepared again.
    Exception(Arc<SegueError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The chunk loader failed.
    Loading,
    /// The backend rejected a packet.
    Submit,
}

/// A failure raised by a stream's background work.
#[derive(Debug)]
pub struct StreamFault {
    pub generation: u64,
    pub content_type: ContentType,
    pub kind: FaultKind,
    pub error: SegueError,
}
