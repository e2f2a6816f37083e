//! DASH MPD parsing.
//!
//! The document is first read into a small element tree, then walked from `MPD`
//! down to `Representation`. Segment descriptions are inherited along
//! `Period -> AdaptationSet -> Representation`: attributes a lower level omits are
//! taken from the level above it.
use std::{str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use url::Url;

use super::{
    manifest::{
        ContentType, Descriptor, Format, Manifest, Period, Representation, RoleFlags,
        SelectionFlags, StreamGroup,
    },
    segment_base::{
        duration_to_ticks, MultiSegmentBase, SegmentBase, SegmentList, SegmentTemplate,
        SegmentTimeline, SingleSegmentBase,
    },
    template::UrlTemplate,
    url::{is_absolute_url, merge_baseurls, RangedUri},
    xml::{parse_document, Element},
};
use crate::{util::range::ByteRange, SegueError, SegueResult};

const LAST_SEGMENT_NUMBER_SCHEME: &str = "http://dashif.org/guidelines/last-segment-number";
const ROLE_SCHEME: &str = "urn:mpeg:dash:role:2011";

fn parse_attr<T: FromStr>(element: &Element, name: &'static str) -> SegueResult<Option<T>> {
    element
        .attr(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| SegueError::InvalidAttribute {
                    field: name,
                    value: value.to_string(),
                })
        })
        .transpose()
}

fn parse_duration(element: &Element, name: &'static str) -> SegueResult<Option<Duration>> {
    let Some(value) = element.attr(name) else {
        return Ok(None);
    };
    let invalid = || SegueError::InvalidAttribute {
        field: name,
        value: value.to_string(),
    };
    let duration = iso8601_duration::Duration::parse(value.trim()).map_err(|_| invalid())?;
    duration.to_std().map(Some).ok_or_else(invalid)
}

fn parse_date(element: &Element, name: &'static str) -> SegueResult<Option<DateTime<Utc>>> {
    parse_attr::<DateTime<Utc>>(element, name)
}

fn parse_range(element: &Element, name: &'static str) -> SegueResult<Option<ByteRange>> {
    element.attr(name).map(ByteRange::parse).transpose()
}

/// Resolves the first `BaseURL` child of `element` against `parent`.
fn join_base_url(parent: Option<&Url>, element: &Element) -> SegueResult<Option<Url>> {
    let Some(text) = element.child("BaseURL").and_then(Element::text) else {
        return Ok(parent.cloned());
    };
    match parent {
        Some(parent) => merge_baseurls(parent, text).map(Some),
        None if is_absolute_url(text) => Ok(Some(Url::parse(text)?)),
        None => Ok(None),
    }
}

fn descriptors(element: &Element, name: &str) -> Vec<Descriptor> {
    element
        .children_named(name)
        .filter_map(|child| {
            Some(Descriptor {
                scheme_id_uri: child.attr("schemeIdUri")?.to_string(),
                value: child.attr("value").map(str::to_string),
            })
        })
        .collect()
}

fn last_segment_number(element: &Element) -> SegueResult<Option<u64>> {
    let property = element
        .children
        .iter()
        .filter(|c| c.name == "SupplementalProperty" || c.name == "EssentialProperty")
        .find(|c| c.attr("schemeIdUri") == Some(LAST_SEGMENT_NUMBER_SCHEME));
    match property {
        Some(property) => parse_attr(property, "value"),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescriptionKind {
    Base,
    List,
    Template,
}

/// An `S` element as written in the manifest.
#[derive(Debug, Clone, Copy)]
struct TimelineElement {
    t: Option<u64>,
    d: u64,
    r: i64,
}

/// Segment description attributes collected along the inheritance chain.
#[derive(Debug, Clone, Default)]
struct SegmentDescription {
    kind: Option<DescriptionKind>,
    timescale: Option<u64>,
    presentation_time_offset: Option<u64>,
    start_number: Option<u64>,
    duration: Option<u64>,
    index_range: Option<ByteRange>,
    initialization: Option<RangedUri>,
    timeline: Option<Vec<TimelineElement>>,
    media_list: Option<Vec<RangedUri>>,
    media_template: Option<String>,
    initialization_template: Option<String>,
}

impl SegmentDescription {
    fn read(element: &Element) -> SegueResult<Self> {
        let found = [
            ("SegmentTemplate", DescriptionKind::Template),
            ("SegmentList", DescriptionKind::List),
            ("SegmentBase", DescriptionKind::Base),
        ]
        .into_iter()
        .find_map(|(name, kind)| element.child(name).map(|child| (child, kind)));
        let Some((node, kind)) = found else {
            return Ok(Self::default());
        };

        let initialization = match node.child("Initialization") {
            Some(init) => Some(RangedUri::new(
                init.attr("sourceURL").map(str::to_string),
                parse_range(init, "range")?,
            )),
            None => None,
        };

        let timeline = match node.child("SegmentTimeline") {
            Some(timeline) => Some(
                timeline
                    .children_named("S")
                    .map(|s| {
                        Ok(TimelineElement {
                            t: parse_attr(s, "t")?,
                            d: parse_attr(s, "d")?.ok_or(SegueError::Missing("S@d"))?,
                            r: parse_attr(s, "r")?.unwrap_or(0),
                        })
                    })
                    .collect::<SegueResult<Vec<_>>>()?,
            ),
            None => None,
        };

        let media_list = if kind == DescriptionKind::List {
            Some(
                node.children_named("SegmentURL")
                    .map(|url| {
                        Ok(RangedUri::new(
                            url.attr("media").map(str::to_string),
                            parse_range(url, "mediaRange")?,
                        ))
                    })
                    .collect::<SegueResult<Vec<_>>>()?,
            )
        } else {
            None
        };

        Ok(Self {
            kind: Some(kind),
            timescale: parse_attr(node, "timescale")?,
            presentation_time_offset: parse_attr(node, "presentationTimeOffset")?,
            start_number: parse_attr(node, "startNumber")?,
            duration: parse_attr(node, "duration")?,
            index_range: parse_range(node, "indexRange")?,
            initialization,
            timeline,
            media_list,
            media_template: node.attr("media").map(str::to_string),
            initialization_template: node.attr("initialization").map(str::to_string),
        })
    }

    /// `self` is the more specific description; missing values come from `parent`.
    fn inherit(self, parent: &Self) -> Self {
        Self {
            kind: self.kind.or(parent.kind),
            timescale: self.timescale.or(parent.timescale),
            presentation_time_offset: self
                .presentation_time_offset
                .or(parent.presentation_time_offset),
            start_number: self.start_number.or(parent.start_number),
            duration: self.duration.or(parent.duration),
            index_range: self.index_range.or(parent.index_range),
            initialization: self.initialization.or_else(|| parent.initialization.clone()),
            timeline: self.timeline.or_else(|| parent.timeline.clone()),
            media_list: self.media_list.or_else(|| parent.media_list.clone()),
            media_template: self.media_template.or_else(|| parent.media_template.clone()),
            initialization_template: self
                .initialization_template
                .or_else(|| parent.initialization_template.clone()),
        }
    }

    fn multi_base(&self, period_duration: Option<Duration>) -> SegueResult<MultiSegmentBase> {
        let timescale = self.timescale.unwrap_or(1).max(1);
        let timeline = match &self.timeline {
            Some(elements) => Some(expand_timeline(elements, timescale, period_duration)?),
            None => None,
        };
        Ok(MultiSegmentBase {
            initialization: self.initialization.clone(),
            timescale,
            presentation_time_offset: self.presentation_time_offset.unwrap_or(0),
            start_number: self.start_number.unwrap_or(1),
            duration: self.duration,
            timeline,
        })
    }

    fn build(
        &self,
        period_duration: Option<Duration>,
        end_number: Option<u64>,
        format: &Format,
    ) -> SegueResult<SegmentBase> {
        let segment_base = match self.kind {
            None => SegmentBase::Single(SingleSegmentBase::default()),
            Some(DescriptionKind::Base) => SegmentBase::Single(SingleSegmentBase {
                initialization: self.initialization.clone(),
                index_range: self.index_range,
                timescale: self.timescale.unwrap_or(1).max(1),
                presentation_time_offset: self.presentation_time_offset.unwrap_or(0),
                content_length: None,
            }),
            Some(DescriptionKind::List) => SegmentBase::List(SegmentList {
                base: self.multi_base(period_duration)?,
                media: self.media_list.clone().unwrap_or_default(),
            }),
            Some(DescriptionKind::Template) => {
                let mut template = SegmentTemplate {
                    base: self.multi_base(period_duration)?,
                    media: self.media_template.as_deref().map(UrlTemplate::parse),
                    initialization_template: self
                        .initialization_template
                        .as_deref()
                        .map(UrlTemplate::parse),
                    end_number,
                    representation_id: None,
                    bandwidth: None,
                };
                if template.media.is_none() {
                    return Err(SegueError::Missing("SegmentTemplate@media"));
                }
                template.bind(format.id.as_deref(), format.bandwidth);
                SegmentBase::Template(template)
            }
        };
        Ok(segment_base)
    }
}

/// Expands `S` elements into one entry per segment. A negative `@r` repeats until
/// the next `S@t`, or the end of the period.
/// Upper bound on expanded `S` entries per timeline.
const MAX_TIMELINE_ENTRIES: u64 = 1 << 20;

fn expand_timeline(
    elements: &[TimelineElement],
    timescale: u64,
    period_duration: Option<Duration>,
) -> SegueResult<SegmentTimeline> {
    let period_end = period_duration.map(|d| duration_to_ticks(d, timescale));
    let mut timeline = SegmentTimeline::new();
    let mut time = 0u64;

    for (i, s) in elements.iter().enumerate() {
        if s.d == 0 {
            return Err(SegueError::InvalidAttribute {
                field: "S@d",
                value: "0".to_string(),
            });
        }
        if let Some(t) = s.t {
            time = t;
        }

        let repeats = if s.r >= 0 {
            s.r as u64
        } else {
            let until = elements.get(i + 1).and_then(|next| next.t).or(period_end);
            match until {
                Some(until) => until.saturating_sub(time).div_ceil(s.d).saturating_sub(1),
                None => {
                    tracing::warn!(index = i, "open ended S@r without a known end, using a single segment");
                    0
                }
            }
        };

        let total = (timeline.len() as u64).saturating_add(repeats).saturating_add(1);
        if total > MAX_TIMELINE_ENTRIES {
            return Err(SegueError::InvalidAttribute {
                field: "S@r",
                value: s.r.to_string(),
            });
        }
        for _ in 0..=repeats {
            timeline.push(time, s.d);
            time = time.checked_add(s.d).ok_or_else(|| SegueError::InvalidAttribute {
                field: "S@t",
                value: time.to_string(),
            })?;
        }
    }

    Ok(timeline)
}

struct PeriodHead<'a> {
    element: &'a Element,
    start: Duration,
    duration: Option<Duration>,
}

fn content_type_of(set: &Element) -> ContentType {
    if let Some(content_type) = set.attr("contentType") {
        return ContentType::from_name(content_type);
    }
    set.attr("mimeType")
        .or_else(|| {
            set.children_named("Representation")
                .find_map(|r| r.attr("mimeType"))
        })
        .map(ContentType::from_mime_type)
        .unwrap_or(ContentType::Unknown)
}

fn parse_representation(
    element: &Element,
    set: &Element,
    set_format: &Format,
    set_description: &SegmentDescription,
    set_end_number: Option<u64>,
    set_base: Option<&Url>,
    period_duration: Option<Duration>,
) -> SegueResult<Representation> {
    // Common attributes may be declared on the adaptation set.
    let inherited = |name: &'static str| element.attr(name).or_else(|| set.attr(name));

    let format = Format {
        id: element.attr("id").map(str::to_string),
        bandwidth: parse_attr(element, "bandwidth")?,
        codecs: inherited("codecs").map(str::to_string),
        mime_type: inherited("mimeType").map(str::to_string),
        width: match parse_attr(element, "width")? {
            Some(width) => Some(width),
            None => parse_attr(set, "width")?,
        },
        height: match parse_attr(element, "height")? {
            Some(height) => Some(height),
            None => parse_attr(set, "height")?,
        },
        frame_rate: inherited("frameRate").map(str::to_string),
        sample_rate: match parse_attr(element, "audioSamplingRate")? {
            Some(rate) => Some(rate),
            None => parse_attr(set, "audioSamplingRate")?,
        },
        ..set_format.clone()
    };

    let base_url = join_base_url(set_base, element)?;
    let description = SegmentDescription::read(element)?.inherit(set_description);
    let end_number = last_segment_number(element)?.or(set_end_number);
    let segment_base = description.build(period_duration, end_number, &format)?;

    Ok(Representation {
        format,
        base_url,
        segment_base,
    })
}

fn parse_stream_group(
    set: &Element,
    period_description: &SegmentDescription,
    period_base: Option<&Url>,
    period_duration: Option<Duration>,
) -> SegueResult<StreamGroup> {
    let content_type = content_type_of(set);
    let language = set.attr("lang").map(str::to_string);

    let mut role_flags = RoleFlags::NONE;
    for role in descriptors(set, "Role") {
        if role.scheme_id_uri == ROLE_SCHEME {
            if let Some(value) = role.value.as_deref() {
                role_flags = role_flags | RoleFlags::from_role(value);
            }
        }
    }
    let selection_flags = if role_flags.contains(RoleFlags::MAIN) {
        SelectionFlags::DEFAULT
    } else {
        SelectionFlags::NONE
    };

    let set_format = Format {
        language: language.clone(),
        role_flags,
        selection_flags,
        ..Default::default()
    };
    let set_base = join_base_url(period_base, set)?;
    let set_description = SegmentDescription::read(set)?.inherit(period_description);
    let set_end_number = last_segment_number(set)?;

    let representations = set
        .children_named("Representation")
        .map(|element| {
            parse_representation(
                element,
                set,
                &set_format,
                &set_description,
                set_end_number,
                set_base.as_ref(),
                period_duration,
            )
        })
        .collect::<SegueResult<Vec<_>>>()?;

    Ok(StreamGroup {
        id: set.attr("id").map(str::to_string),
        content_type,
        language,
        representations,
    })
}

/// Parses an MPD document. `location` is the URL the manifest was fetched from and
/// is the outermost base for relative URLs.
pub fn parse_manifest(xml: &str, location: Option<&Url>) -> SegueResult<Manifest> {
    let mpd = parse_document(xml)?;
    if mpd.name != "MPD" {
        return Err(SegueError::MpdParsing(format!(
            "unexpected root element {}",
            mpd.name
        )));
    }

    let dynamic = mpd.attr("type") == Some("dynamic");
    let base_url = join_base_url(location, &mpd)?;
    let redirect = match mpd.child("Location").and_then(Element::text) {
        Some(text) => match location {
            Some(location) => Some(merge_baseurls(location, text)?),
            None => Some(Url::parse(text)?),
        },
        None => None,
    };

    // Period starts must be known before any timeline can be expanded.
    let mut heads: Vec<PeriodHead> = Vec::new();
    for (index, element) in mpd.children_named("Period").enumerate() {
        let declared = parse_duration(element, "start")?;
        let previous_end = heads
            .last()
            .and_then(|previous| Some(previous.start + previous.duration?));
        let start = match (declared, previous_end) {
            (Some(start), _) => start,
            (None, Some(end)) => end,
            (None, None) if index == 0 && !dynamic => Duration::ZERO,
            (None, None) if dynamic => {
                tracing::warn!(index, "skipping early access period without a start");
                break;
            }
            (None, None) => return Err(SegueError::Missing("Period@start")),
        };
        heads.push(PeriodHead {
            element,
            start,
            duration: parse_duration(element, "duration")?,
        });
    }

    let duration = match parse_duration(&mpd, "mediaPresentationDuration")? {
        Some(duration) => Some(duration),
        None => heads
            .last()
            .and_then(|last| Some(last.start + last.duration?)),
    };
    if duration.is_none() && !dynamic {
        return Err(SegueError::Missing("MPD@mediaPresentationDuration"));
    }

    let mut periods = Vec::with_capacity(heads.len());
    for (index, head) in heads.iter().enumerate() {
        let period_duration = match heads.get(index + 1) {
            Some(next) => Some(next.start.saturating_sub(head.start)),
            None => duration.map(|d| d.saturating_sub(head.start)),
        };
        let period_base = join_base_url(base_url.as_ref(), head.element)?;
        let description = SegmentDescription::read(head.element)?;

        let stream_groups = head
            .element
            .children_named("AdaptationSet")
            .map(|set| {
                parse_stream_group(set, &description, period_base.as_ref(), period_duration)
            })
            .collect::<SegueResult<Vec<_>>>()?;

        tracing::debug!(
            index,
            start = ?head.start,
            duration = ?period_duration,
            groups = stream_groups.len(),
            "parsed period"
        );
        periods.push(Period {
            id: head.element.attr("id").map(str::to_string),
            start: head.start,
            duration: head.duration,
            base_url: period_base,
            stream_groups,
        });
    }

    Ok(Manifest {
        dynamic,
        duration,
        availability_start_time: parse_date(&mpd, "availabilityStartTime")?,
        publish_time: parse_date(&mpd, "publishTime")?,
        min_buffer_time: parse_duration(&mpd, "minBufferTime")?,
        time_shift_buffer_depth: parse_duration(&mpd, "timeShiftBufferDepth")?,
        suggested_presentation_delay: parse_duration(&mpd, "suggestedPresentationDelay")?,
        minimum_update_period: parse_duration(&mpd, "minimumUpdatePeriod")?,
        program_title: mpd
            .child("ProgramInformation")
            .and_then(|info| info.child("Title"))
            .and_then(Element::text)
            .map(str::to_string),
        utc_timing: descriptors(&mpd, "UTCTiming"),
        location: redirect,
        base_url,
        periods,
    })
}
