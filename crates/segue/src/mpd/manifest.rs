use std::{fmt, ops::BitOr, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use super::{
    segment_base::{LiveTiming, SegmentBase, SegmentIndex},
    url::RangedUri,
};
use crate::{SegueError, SegueResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Audio,
    Video,
    Text,
    Application,
    Unknown,
}

impl ContentType {
    /// Derives the content type from a mime type such as `video/mp4`.
    pub fn from_mime_type(mime_type: &str) -> Self {
        let kind = mime_type.split('/').next().unwrap_or_default();
        Self::from_name(kind)
    }

    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "audio" => ContentType::Audio,
            "video" => ContentType::Video,
            "text" => ContentType::Text,
            "application" => ContentType::Application,
            _ => ContentType::Unknown,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::Audio => "audio",
            ContentType::Video => "video",
            ContentType::Text => "text",
            ContentType::Application => "application",
            ContentType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

macro_rules! flags {
    ($name:ident { $($flag:ident = $bit:expr),* $(,)? }) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
        pub struct $name(u16);

        impl $name {
            pub const NONE: Self = Self(0);
            $(pub const $flag: Self = Self(1 << $bit);)*

            pub fn contains(self, other: Self) -> bool {
                other.0 != 0 && self.0 & other.0 == other.0
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

flags!(SelectionFlags {
    DEFAULT = 0,
    FORCED = 1,
    AUTOSELECT = 2,
});

flags!(RoleFlags {
    MAIN = 0,
    ALTERNATE = 1,
    SUPPLEMENTARY = 2,
    COMMENTARY = 3,
    DUB = 4,
    EMERGENCY = 5,
    CAPTION = 6,
    SUBTITLE = 7,
    SIGN = 8,
    DESCRIBES_VIDEO = 9,
});

impl RoleFlags {
    /// Maps a `urn:mpeg:dash:role:2011` value.
    pub fn from_role(value: &str) -> Self {
        match value {
            "main" => RoleFlags::MAIN,
            "alternate" => RoleFlags::ALTERNATE,
            "supplementary" => RoleFlags::SUPPLEMENTARY,
            "commentary" => RoleFlags::COMMENTARY,
            "dub" => RoleFlags::DUB,
            "emergency" => RoleFlags::EMERGENCY,
            "caption" => RoleFlags::CAPTION,
            "subtitle" => RoleFlags::SUBTITLE,
            "sign" => RoleFlags::SIGN,
            "description" => RoleFlags::DESCRIBES_VIDEO,
            _ => RoleFlags::NONE,
        }
    }
}

/// A `(schemeIdUri, value)` pair, e.g. `UTCTiming` or `SupplementalProperty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    pub scheme_id_uri: String,
    pub value: Option<String>,
}

/// Format and codec metadata of a representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Format {
    pub id: Option<String>,
    pub bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<String>,
    pub sample_rate: Option<u32>,
    pub language: Option<String>,
    pub role_flags: RoleFlags,
    pub selection_flags: SelectionFlags,
}

impl Format {
    pub fn is_default_or_main(&self) -> bool {
        self.selection_flags.contains(SelectionFlags::DEFAULT)
            || self.role_flags.contains(RoleFlags::MAIN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Representation {
    pub format: Format,
    /// Fully merged base URL. `None` when the manifest was parsed without a location
    /// and declares no absolute `BaseURL`.
    pub base_url: Option<Url>,
    pub segment_base: SegmentBase,
}

impl Representation {
    pub fn segment_index(&self) -> &dyn SegmentIndex {
        &self.segment_base
    }

    pub fn initialization_uri(&self) -> Option<RangedUri> {
        self.segment_base.initialization()
    }

    pub fn index_uri(&self) -> Option<RangedUri> {
        match &self.segment_base {
            SegmentBase::Single(base) => base.index(),
            _ => None,
        }
    }

    /// Dereferences `uri` against the representation base URL.
    pub fn resolve(&self, uri: &RangedUri) -> SegueResult<Url> {
        let base = self.base_url.as_ref();
        match (base, uri.url.as_deref()) {
            (Some(base), _) => uri.resolve(base),
            (None, Some(url)) => Ok(Url::parse(url)?),
            (None, None) => Err(SegueError::Missing("BaseURL")),
        }
    }
}

/// An `AdaptationSet`: interchangeable representations of one content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamGroup {
    pub id: Option<String>,
    pub content_type: ContentType,
    pub language: Option<String>,
    pub representations: Vec<Representation>,
}

impl StreamGroup {
    pub fn formats(&self) -> impl Iterator<Item = &Format> {
        self.representations.iter().map(|r| &r.format)
    }

    pub fn representation(&self, id: &str) -> Option<&Representation> {
        self.representations
            .iter()
            .find(|r| r.format.id.as_deref() == Some(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Period {
    pub id: Option<String>,
    pub start: Duration,
    /// Declared `Period@duration`, if any.
    pub duration: Option<Duration>,
    pub base_url: Option<Url>,
    pub stream_groups: Vec<StreamGroup>,
}

/// A parsed manifest. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub dynamic: bool,
    pub duration: Option<Duration>,
    pub availability_start_time: Option<DateTime<Utc>>,
    pub publish_time: Option<DateTime<Utc>>,
    pub min_buffer_time: Option<Duration>,
    pub time_shift_buffer_depth: Option<Duration>,
    pub suggested_presentation_delay: Option<Duration>,
    pub minimum_update_period: Option<Duration>,
    pub program_title: Option<String>,
    pub utc_timing: Vec<Descriptor>,
    /// Redirect target from `MPD.Location`.
    pub location: Option<Url>,
    pub base_url: Option<Url>,
    pub periods: Vec<Period>,
}

impl Manifest {
    /// Duration of period `index`: the gap to the next period's start, or the
    /// remaining manifest duration for the last period.
    pub fn period_duration(&self, index: usize) -> Option<Duration> {
        let period = self.periods.get(index)?;
        match self.periods.get(index + 1) {
            Some(next) => Some(next.start.saturating_sub(period.start)),
            None => self
                .duration
                .map(|duration| duration.saturating_sub(period.start)),
        }
    }

    /// Live position inside period `index` at wall clock time `now`.
    ///
    /// `None` for static manifests, without `availabilityStartTime`, or before
    /// the period starts. The presentation delay is `suggestedPresentationDelay`,
    /// falling back to `minBufferTime`, and never exceeds the time shift buffer.
    pub fn live_timing(&self, index: usize, now: DateTime<Utc>) -> Option<LiveTiming> {
        if !self.dynamic {
            return None;
        }
        let period = self.periods.get(index)?;
        let elapsed = (now - self.availability_start_time?).to_std().ok()?;

        let mut presentation_delay = self
            .suggested_presentation_delay
            .or(self.min_buffer_time)
            .unwrap_or_default();
        if let Some(depth) = self.time_shift_buffer_depth {
            presentation_delay = presentation_delay.min(depth);
        }

        Some(LiveTiming {
            now: elapsed.checked_sub(period.start)?,
            period_duration: self.period_duration(index),
            time_shift_buffer_depth: self.time_shift_buffer_depth,
            presentation_delay,
        })
    }
}
