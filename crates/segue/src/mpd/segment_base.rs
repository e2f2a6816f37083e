//! Segment addressing.
//!
//! A representation describes its media segments in one of three ways:
//!
//! * [`SingleSegmentBase`]: the whole representation is one resource, optionally
//!   with an index range (`SegmentBase@indexRange`).
//! * [`SegmentList`]: an explicit list of segment URLs.
//! * [`SegmentTemplate`]: URLs built from a [`UrlTemplate`].
//!
//! Lists and templates share [`MultiSegmentBase`], which numbers segments from
//! `startNumber` and places them either on a fixed `@duration` grid or on an
//! explicit [`SegmentTimeline`]. The timeline always wins over the grid.
//!
//! All times returned by [`SegmentIndex`] are relative to the period start.
//!
//! For dynamic presentations [`SegmentIndex::live_segment_range`] narrows the
//! numbers down to the segments the server offers at a given [`LiveTiming`].
use std::{ops::RangeInclusive, time::Duration};

use serde::Serialize;

use super::{template::UrlTemplate, url::RangedUri};
use crate::util::range::ByteRange;

const NANOS_PER_SEC: u128 = 1_000_000_000;

pub(crate) fn ticks_to_duration(ticks: u64, timescale: u64) -> Duration {
    let nanos = ticks as u128 * NANOS_PER_SEC / timescale.max(1) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

pub(crate) fn duration_to_ticks(duration: Duration, timescale: u64) -> u64 {
    let ticks = duration.as_nanos() * timescale.max(1) as u128 / NANOS_PER_SEC;
    ticks.min(u64::MAX as u128) as u64
}

/// One expanded `S` entry, in timescale units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub start: u64,
    pub duration: u64,
}

/// Expanded `SegmentTimeline`. Entry `i` belongs to segment number `startNumber + i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SegmentTimeline {
    entries: Vec<TimelineEntry>,
}

impl SegmentTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, start: u64, duration: u64) {
        self.entries.push(TimelineEntry { start, duration });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TimelineEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }
}

impl FromIterator<(u64, u64)> for SegmentTimeline {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(start, duration)| TimelineEntry { start, duration })
                .collect(),
        }
    }
}

/// Wall clock position inside a period of a dynamic presentation.
///
/// Built by [`Manifest::live_timing`](super::Manifest::live_timing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveTiming {
    /// Time since the period became available.
    pub now: Duration,
    pub period_duration: Option<Duration>,
    /// `None` keeps every published segment available.
    pub time_shift_buffer_depth: Option<Duration>,
    /// Distance kept from the live edge when playback starts.
    pub presentation_delay: Duration,
}

impl LiveTiming {
    /// Whether a segment spanning `[start, start + duration)` can be requested.
    fn is_available(&self, start: Duration, duration: Duration) -> bool {
        let end = start.saturating_add(duration);
        end <= self.now
            && self.time_shift_buffer_depth.map_or(true, |depth| {
                self.now < end.saturating_add(depth).saturating_add(duration)
            })
    }
}

/// Addressing operations over a representation's segments.
pub trait SegmentIndex {
    /// Number of the first segment.
    fn first_segment_number(&self) -> u64;

    /// `None` when the count cannot be derived, e.g. a template without a
    /// timeline, `endNumber` or known period duration.
    fn segment_count(&self, period_duration: Option<Duration>) -> Option<u64>;

    /// The segment containing `time`, clamped to the valid number range.
    fn segment_number(&self, time: Duration, period_duration: Option<Duration>) -> u64;

    fn start_time(&self, number: u64) -> Option<Duration>;

    fn duration(&self, number: u64, period_duration: Option<Duration>) -> Option<Duration>;

    fn segment_url(&self, number: u64) -> Option<RangedUri>;

    fn initialization(&self) -> Option<RangedUri>;

    /// Numbers of the segments available at `live`. `None` when no segment has
    /// been published yet or all of them left the time shift buffer.
    fn live_segment_range(&self, live: &LiveTiming) -> Option<RangeInclusive<u64>>;

    /// The segment live playback starts with: the one containing
    /// `now - presentation_delay`, kept inside [`Self::live_segment_range`].
    fn live_start_number(&self, live: &LiveTiming) -> Option<u64> {
        let range = self.live_segment_range(live)?;
        let target = live.now.saturating_sub(live.presentation_delay);
        let number = self.segment_number(target, live.period_duration);
        Some(number.clamp(*range.start(), *range.end()))
    }
}

/// A resolved media segment of a representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub number: u64,
    pub start: Duration,
    pub duration: Option<Duration>,
    pub uri: RangedUri,
}

/// Lists every segment of `index`. Returns `None` when the segment count is unknown.
pub fn segment_schedule(
    index: &dyn SegmentIndex,
    period_duration: Option<Duration>,
) -> Option<Vec<SegmentInfo>> {
    let count = index.segment_count(period_duration)?;
    let first = index.first_segment_number();
    (first..first.saturating_add(count))
        .map(|number| {
            Some(SegmentInfo {
                number,
                start: index.start_time(number)?,
                duration: index.duration(number, period_duration),
                uri: index.segment_url(number)?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SingleSegmentBase {
    pub initialization: Option<RangedUri>,
    pub index_range: Option<ByteRange>,
    pub timescale: u64,
    pub presentation_time_offset: u64,
    /// Declared size of the resource, if known.
    pub content_length: Option<u64>,
}

impl Default for SingleSegmentBase {
    fn default() -> Self {
        Self {
            initialization: None,
            index_range: None,
            timescale: 1,
            presentation_time_offset: 0,
            content_length: None,
        }
    }
}

impl SingleSegmentBase {
    /// The index (`sidx`) reference, present only for a non-empty index range.
    pub fn index(&self) -> Option<RangedUri> {
        self.index_range
            .filter(|range| range.length.is_some_and(|length| length > 0))
            .map(|range| RangedUri::new(None, Some(range)))
    }
}

impl SegmentIndex for SingleSegmentBase {
    fn first_segment_number(&self) -> u64 {
        0
    }

    fn segment_count(&self, _period_duration: Option<Duration>) -> Option<u64> {
        Some(1)
    }

    fn segment_number(&self, _time: Duration, _period_duration: Option<Duration>) -> u64 {
        0
    }

    fn start_time(&self, number: u64) -> Option<Duration> {
        (number == 0).then_some(Duration::ZERO)
    }

    fn duration(&self, number: u64, period_duration: Option<Duration>) -> Option<Duration> {
        if number == 0 {
            period_duration
        } else {
            None
        }
    }

    fn segment_url(&self, number: u64) -> Option<RangedUri> {
        if number != 0 {
            return None;
        }
        let range = self
            .content_length
            .filter(|length| *length > 0)
            .map(|length| ByteRange::new(0, Some(length)));
        Some(RangedUri::new(None, range))
    }

    fn initialization(&self) -> Option<RangedUri> {
        self.initialization.clone()
    }

    fn live_segment_range(&self, _live: &LiveTiming) -> Option<RangeInclusive<u64>> {
        Some(0..=0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiSegmentBase {
    pub initialization: Option<RangedUri>,
    pub timescale: u64,
    pub presentation_time_offset: u64,
    pub start_number: u64,
    /// Fixed segment duration in timescale units.
    pub duration: Option<u64>,
    pub timeline: Option<SegmentTimeline>,
}

impl Default for MultiSegmentBase {
    fn default() -> Self {
        Self {
            initialization: None,
            timescale: 1,
            presentation_time_offset: 0,
            start_number: 1,
            duration: None,
            timeline: None,
        }
    }
}

impl MultiSegmentBase {
    fn timeline_entry(&self, number: u64) -> Option<&TimelineEntry> {
        let timeline = self.timeline.as_ref()?;
        let index = number.checked_sub(self.start_number)?;
        timeline.get(usize::try_from(index).ok()?)
    }

    fn grid_count(&self, period_duration: Option<Duration>) -> Option<u64> {
        let duration = self.duration.filter(|d| *d > 0)?;
        let period = period_duration?;
        // ceil(period * timescale / duration), kept in integers so the last
        // segment closes the period exactly.
        let numerator = period.as_nanos() * self.timescale.max(1) as u128;
        let denominator = duration as u128 * NANOS_PER_SEC;
        Some(numerator.div_ceil(denominator) as u64)
    }

    /// Start of segment `number` in timescale units. Timeline entries carry media
    /// time, grid positions are relative to the period.
    fn segment_time(&self, number: u64) -> Option<u64> {
        if self.timeline.is_some() {
            return self.timeline_entry(number).map(|entry| entry.start);
        }
        let index = number.checked_sub(self.start_number)?;
        index.checked_mul(self.duration.unwrap_or(0))
    }

    fn number_for(&self, time: Duration, count: Option<u64>, period: Option<Duration>) -> u64 {
        if count == Some(0) {
            return self.start_number;
        }

        if let Some(timeline) = &self.timeline {
            let last = self.start_number.saturating_add(timeline.len() as u64);
            for number in self.start_number..last {
                let Some(start) = self.start_of(number) else {
                    break;
                };
                if time < start {
                    return number;
                }
                match self.duration_of(number, count, period) {
                    Some(duration) if time < start + duration => return number,
                    _ => {}
                }
            }
            return last.saturating_sub(1).max(self.start_number);
        }

        let Some(duration) = self.duration.filter(|d| *d > 0) else {
            return self.start_number;
        };
        let number = self
            .start_number
            .saturating_add(duration_to_ticks(time, self.timescale) / duration);
        match count {
            Some(count) => number.min(self.start_number.saturating_add(count - 1)),
            None => number,
        }
    }

    fn start_of(&self, number: u64) -> Option<Duration> {
        let mut time = self.segment_time(number)?;
        if self.timeline.is_some() {
            time = time.saturating_sub(self.presentation_time_offset);
        }
        Some(ticks_to_duration(time, self.timescale))
    }

    fn duration_of(
        &self,
        number: u64,
        count: Option<u64>,
        period_duration: Option<Duration>,
    ) -> Option<Duration> {
        if self.timeline.is_some() {
            return self
                .timeline_entry(number)
                .map(|entry| ticks_to_duration(entry.duration, self.timescale));
        }

        let count = count?;
        let end = self.start_number.saturating_add(count);
        if number < self.start_number || number >= end {
            return None;
        }
        if number == end - 1 {
            if let Some(period) = period_duration {
                return Some(period.saturating_sub(self.start_of(number)?));
            }
        }
        self.duration
            .map(|duration| ticks_to_duration(duration, self.timescale))
    }

    fn live_range(&self, live: &LiveTiming, count: Option<u64>) -> Option<RangeInclusive<u64>> {
        if count == Some(0) {
            return None;
        }

        if let Some(timeline) = &self.timeline {
            let len = count.map_or(timeline.len() as u64, |count| {
                count.min(timeline.len() as u64)
            });
            let end = self.start_number.saturating_add(len);
            let mut available = (self.start_number..end).filter(|number| {
                match (self.start_of(*number), self.duration_of(*number, count, None)) {
                    (Some(start), Some(duration)) => live.is_available(start, duration),
                    _ => false,
                }
            });
            let first = available.next()?;
            let last = available.last().unwrap_or(first);
            return Some(first..=last);
        }

        let duration = self.duration.filter(|d| *d > 0)?;
        let now = duration_to_ticks(live.now, self.timescale);
        // Segments whose end has passed
        let published = now / duration;
        if published == 0 {
            return None;
        }
        let mut last = self.start_number.saturating_add(published - 1);
        if let Some(count) = count {
            last = last.min(self.start_number.saturating_add(count - 1));
        }
        let first = match live.time_shift_buffer_depth {
            Some(depth) => {
                let oldest = now.saturating_sub(duration_to_ticks(depth, self.timescale)) / duration;
                self.start_number.saturating_add(oldest.saturating_sub(1))
            }
            None => self.start_number,
        };
        (first <= last).then_some(first..=last)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentList {
    pub base: MultiSegmentBase,
    pub media: Vec<RangedUri>,
}

impl SegmentIndex for SegmentList {
    fn first_segment_number(&self) -> u64 {
        self.base.start_number
    }

    fn segment_count(&self, _period_duration: Option<Duration>) -> Option<u64> {
        let count = match &self.base.timeline {
            Some(timeline) => self.media.len().min(timeline.len()),
            None => self.media.len(),
        };
        Some(count as u64)
    }

    fn segment_number(&self, time: Duration, period_duration: Option<Duration>) -> u64 {
        let count = self.segment_count(period_duration);
        self.base.number_for(time, count, period_duration)
    }

    fn start_time(&self, number: u64) -> Option<Duration> {
        self.base.start_of(number)
    }

    fn duration(&self, number: u64, period_duration: Option<Duration>) -> Option<Duration> {
        let count = self.segment_count(period_duration);
        self.base.duration_of(number, count, period_duration)
    }

    fn segment_url(&self, number: u64) -> Option<RangedUri> {
        let index = number.checked_sub(self.base.start_number)?;
        self.media.get(usize::try_from(index).ok()?).cloned()
    }

    fn initialization(&self) -> Option<RangedUri> {
        self.base.initialization.clone()
    }

    fn live_segment_range(&self, live: &LiveTiming) -> Option<RangeInclusive<u64>> {
        let count = self.segment_count(live.period_duration);
        self.base.live_range(live, count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentTemplate {
    pub base: MultiSegmentBase,
    #[serde(skip)]
    pub media: Option<UrlTemplate>,
    #[serde(skip)]
    pub initialization_template: Option<UrlTemplate>,
    /// Last segment number, from the `last-segment-number` property.
    pub end_number: Option<u64>,
    pub representation_id: Option<String>,
    pub bandwidth: Option<u64>,
}

impl SegmentTemplate {
    /// Binds the representation parameters used when rendering URLs.
    pub fn bind(&mut self, representation_id: Option<&str>, bandwidth: Option<u64>) {
        self.representation_id = representation_id.map(str::to_string);
        self.bandwidth = bandwidth;
    }
}

impl SegmentIndex for SegmentTemplate {
    fn first_segment_number(&self) -> u64 {
        self.base.start_number
    }

    fn segment_count(&self, period_duration: Option<Duration>) -> Option<u64> {
        if let Some(timeline) = &self.base.timeline {
            return Some(timeline.len() as u64);
        }
        if let Some(end_number) = self.end_number {
            return Some(end_number.saturating_add(1).saturating_sub(self.base.start_number));
        }
        self.base.grid_count(period_duration)
    }

    fn segment_number(&self, time: Duration, period_duration: Option<Duration>) -> u64 {
        let count = self.segment_count(period_duration);
        self.base.number_for(time, count, period_duration)
    }

    fn start_time(&self, number: u64) -> Option<Duration> {
        self.base.start_of(number)
    }

    fn duration(&self, number: u64, period_duration: Option<Duration>) -> Option<Duration> {
        let count = self.segment_count(period_duration);
        self.base.duration_of(number, count, period_duration)
    }

    fn segment_url(&self, number: u64) -> Option<RangedUri> {
        let media = self.media.as_ref()?;
        let time = self.base.segment_time(number)?;
        let url = media.get(
            self.bandwidth,
            self.representation_id.as_deref(),
            number,
            time,
        );
        Some(RangedUri::new(Some(url), None))
    }

    fn initialization(&self) -> Option<RangedUri> {
        match &self.initialization_template {
            Some(template) => {
                let url = template.get(self.bandwidth, self.representation_id.as_deref(), 0, 0);
                Some(RangedUri::new(Some(url), None))
            }
            None => self.base.initialization.clone(),
        }
    }

    fn live_segment_range(&self, live: &LiveTiming) -> Option<RangeInclusive<u64>> {
        let count = self.segment_count(live.period_duration);
        self.base.live_range(live, count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentBase {
    Single(SingleSegmentBase),
    List(SegmentList),
    Template(SegmentTemplate),
}

impl SegmentBase {
    fn index(&self) -> &dyn SegmentIndex {
        match self {
            SegmentBase::Single(base) => base,
            SegmentBase::List(list) => list,
            SegmentBase::Template(template) => template,
        }
    }

    pub fn is_single_segment(&self) -> bool {
        matches!(self, SegmentBase::Single(_))
    }

    pub fn timescale(&self) -> u64 {
        match self {
            SegmentBase::Single(base) => base.timescale,
            SegmentBase::List(list) => list.base.timescale,
            SegmentBase::Template(template) => template.base.timescale,
        }
    }

    pub fn presentation_time_offset(&self) -> Duration {
        let (offset, timescale) = match self {
            SegmentBase::Single(base) => (base.presentation_time_offset, base.timescale),
            SegmentBase::List(list) => (list.base.presentation_time_offset, list.base.timescale),
            SegmentBase::Template(template) => (
                template.base.presentation_time_offset,
                template.base.timescale,
            ),
        };
        ticks_to_duration(offset, timescale)
    }
}

impl SegmentIndex for SegmentBase {
    fn first_segment_number(&self) -> u64 {
        self.index().first_segment_number()
    }

    fn segment_count(&self, period_duration: Option<Duration>) -> Option<u64> {
        self.index().segment_count(period_duration)
    }

    fn segment_number(&self, time: Duration, period_duration: Option<Duration>) -> u64 {
        self.index().segment_number(time, period_duration)
    }

    fn start_time(&self, number: u64) -> Option<Duration> {
        self.index().start_time(number)
    }

    fn duration(&self, number: u64, period_duration: Option<Duration>) -> Option<Duration> {
        self.index().duration(number, period_duration)
    }

    fn segment_url(&self, number: u64) -> Option<RangedUri> {
        self.index().segment_url(number)
    }

    fn initialization(&self) -> Option<RangedUri> {
        self.index().initialization()
    }

    fn live_segment_range(&self, live: &LiveTiming) -> Option<RangeInclusive<u64>> {
        self.index().live_segment_range(live)
    }
}
