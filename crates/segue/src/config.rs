use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Playback session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Requested start position. Playback never starts before the period start.
    pub start_time_ms: Option<u64>,
    pub preferred_audio_language: Option<String>,
    /// A stream is starving once its buffered lead stays below this.
    pub starving_threshold_ms: u64,
    /// A starving stream recovers once its buffered lead reaches this.
    pub filled_threshold_ms: u64,
    /// How far ahead of its deadline a packet is released to the backend.
    pub synchronizer_offset_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            start_time_ms: None,
            preferred_audio_language: None,
            starving_threshold_ms: 200,
            filled_threshold_ms: 800,
            synchronizer_offset_ms: 1000,
        }
    }
}

impl PlayerConfig {
    pub fn start_time(&self) -> Option<Duration> {
        self.start_time_ms.map(Duration::from_millis)
    }

    pub fn starving_threshold(&self) -> Duration {
        Duration::from_millis(self.starving_threshold_ms)
    }

    pub fn filled_threshold(&self) -> Duration {
        Duration::from_millis(self.filled_threshold_ms)
    }

    pub fn synchronizer_offset(&self) -> Duration {
        Duration::from_millis(self.synchronizer_offset_ms)
    }
}

/// What the decoding platform can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether the audio stream can be switched without reopening the backend.
    pub supports_seamless_audio_change: bool,
}
