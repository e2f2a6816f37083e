use std::time::Duration;

use bytes::Bytes;

use crate::mpd::ContentType;

/// Opaque handle to a sample decrypted into backend memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecryptedHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    Normal(Bytes),
    Decrypted(DecryptedHandle),
    /// End of stream marker. Carries no data and is never paced.
    Eos,
}

/// A demuxed elementary stream packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub content_type: ContentType,
    pub pts: Duration,
    pub dts: Duration,
    pub duration: Duration,
    pub is_key_frame: bool,
    pub kind: PacketKind,
}

impl Packet {
    pub fn new(content_type: ContentType, pts: Duration, data: Bytes) -> Self {
        Self {
            content_type,
            pts,
            dts: pts,
            duration: Duration::ZERO,
            is_key_frame: false,
            kind: PacketKind::Normal(data),
        }
    }

    pub fn eos(content_type: ContentType) -> Self {
        Self {
            content_type,
            pts: Duration::ZERO,
            dts: Duration::ZERO,
            duration: Duration::ZERO,
            is_key_frame: false,
            kind: PacketKind::Eos,
        }
    }

    pub fn is_eos(&self) -> bool {
        matches!(self.kind, PacketKind::Eos)
    }
}
