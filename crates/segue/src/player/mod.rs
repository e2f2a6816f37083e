//! Playback session: per stream chunk loading, starvation detection and packet
//! pacing against one shared clock, driven by [`Player`].
mod buffering;
mod clock;
mod event;
mod holder;
mod packet;
mod platform;
mod provider;
mod renderer;
mod segment;
mod select;
mod session;
mod synchronizer;

pub use buffering::{BufferingObserver, BufferingSignal};
pub use clock::Clock;
pub use event::{FaultKind, PlayerEvent, StreamFault};
pub use packet::{DecryptedHandle, Packet, PacketKind};
pub use platform::{
    PlatformFactory, PlatformPlayer, PlayerState, ReadySender, StreamConfig, SubmitResult,
};
pub use provider::{Stream, StreamProvider, StreamSelector};
pub use renderer::{PacketSink, StreamRenderer};
pub use segment::Segment;
pub use select::{select_default, select_default_groups, verify_stream_groups};
pub use session::Player;
pub use synchronizer::PacketSynchronizer;
