//! # MPEG-DASH manifests
//!
//! [`parse_manifest`] turns an MPD document into a [`Manifest`]. Each
//! [`Representation`] carries a [`SegmentBase`] which implements [`SegmentIndex`]:
//! segment count, segment number for a time, start time, duration and URL of
//! every media segment, for all three addressing schemes (single segment,
//! `SegmentList`, `SegmentTemplate`) with either a fixed duration grid or a
//! `SegmentTimeline`. For dynamic manifests, [`Manifest::live_timing`] and
//! [`SegmentIndex::live_segment_range`] locate the segments around the live edge.
//!
//! Nothing here performs I/O. See [`crate::fetch`] for loading a manifest over HTTP.
pub mod manifest;
pub mod parser;
pub mod segment_base;
pub mod template;
pub mod url;
mod xml;

pub use manifest::*;
pub use parser::parse_manifest;
pub use segment_base::{
    segment_schedule, LiveTiming, MultiSegmentBase, SegmentBase, SegmentIndex, SegmentInfo,
    SegmentList, SegmentTemplate, SegmentTimeline, SingleSegmentBase, TimelineEntry,
};
pub use template::UrlTemplate;
pub use url::RangedUri;
