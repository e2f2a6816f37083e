use std::time::Duration;

use chrono::{DateTime, Utc};

use segue::{
    mpd::{parse_manifest, segment_schedule, ContentType, RoleFlags, SegmentBase, SelectionFlags},
    player::select_default_groups,
    util::range::ByteRange,
};
use url::Url;

use crate::AssertWrapper;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[test]
fn test_template_manifest() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/template.mpd");
    let location = Url::parse("https://example.com/dash/manifest.mpd")?;
    let manifest = parse_manifest(data, Some(&location))?;

    assert!(!manifest.dynamic);
    assert_eq!(manifest.duration, Some(secs(10)));
    assert_eq!(manifest.min_buffer_time, Some(secs(2)));
    assert_eq!(manifest.program_title.as_deref(), Some("Segue test stream"));
    assert_eq!(manifest.periods.len(), 1);
    assert_eq!(manifest.period_duration(0), Some(secs(10)));

    let period = &manifest.periods[0];
    let video = &period.stream_groups[0];
    assert_eq!(video.content_type, ContentType::Video);
    assert_eq!(video.representations.len(), 2);

    let v0 = &video.representations[0];
    assert_eq!(v0.format.id.as_deref(), Some("v0"));
    assert_eq!(v0.format.codecs.as_deref(), Some("avc1.64001f"));
    assert_eq!(v0.format.mime_type.as_deref(), Some("video/mp4"));
    assert_eq!((v0.format.width, v0.format.height), (Some(640), Some(360)));
    assert!(v0.format.role_flags.contains(RoleFlags::MAIN));
    assert!(v0.format.selection_flags.contains(SelectionFlags::DEFAULT));

    let index = v0.segment_index();
    let period_duration = manifest.period_duration(0);
    assert_eq!(index.segment_count(period_duration), Some(5));
    assert_eq!(index.segment_number(Duration::ZERO, period_duration), 1);
    assert_eq!(index.segment_number(Duration::from_millis(3500), period_duration), 2);
    assert_eq!(index.segment_number(secs(60), period_duration), 5);

    let url = v0.resolve(&index.segment_url(3).assert_success())?;
    assert_eq!(url.as_str(), "https://example.com/dash/media/v0/00003.m4s");
    let init = v0.resolve(&v0.initialization_uri().assert_success())?;
    assert_eq!(init.as_str(), "https://example.com/dash/media/v0/init.mp4");

    // The last segment closes the period
    let schedule = segment_schedule(index, period_duration).assert_success();
    let last = schedule.last().assert_success();
    assert_eq!(last.start + last.duration.assert_success(), secs(10));

    Ok(())
}

#[test]
fn test_timeline_until_period_end() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/template.mpd");
    let manifest = parse_manifest(data, None)?;
    let period_duration = manifest.period_duration(0);

    let audio = &manifest.periods[0].stream_groups[1];
    assert_eq!(audio.content_type, ContentType::Audio);
    assert_eq!(audio.language.as_deref(), Some("en"));

    let representation = &audio.representations[0];
    assert_eq!(representation.format.sample_rate, Some(48000));
    let SegmentBase::Template(template) = &representation.segment_base else {
        panic!("expected a segment template");
    };
    let timeline = template.base.timeline.as_ref().assert_success();
    assert_eq!(timeline.len(), 5);

    let index = representation.segment_index();
    assert_eq!(index.segment_count(period_duration), Some(5));
    for (time, number) in [(0, 1), (1, 1), (2, 2), (9, 5), (60, 5)] {
        let found = index.segment_number(secs(time), period_duration);
        assert_eq!(found, number, "segment at {time}s");
    }
    assert_eq!(index.start_time(3), Some(secs(4)));
    assert_eq!(index.duration(5, period_duration), Some(secs(2)));
    assert_eq!(
        index.segment_url(3).assert_success().url.as_deref(),
        Some("audio/128000/192000.m4s")
    );

    Ok(())
}

#[test]
fn test_default_groups() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/template.mpd");
    let manifest = parse_manifest(data, None)?;
    let groups = &manifest.periods[0].stream_groups;

    let selected = select_default_groups(groups, None);
    let ids: Vec<_> = selected.iter().filter_map(|g| g.id.as_deref()).collect();
    assert_eq!(ids, ["2", "1"]);

    let selected = select_default_groups(groups, Some("de"));
    assert_eq!(selected[0].id.as_deref(), Some("3"));

    Ok(())
}

#[test]
fn test_multi_period_manifest() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/multi-period.mpd");
    let location = Url::parse("https://origin.example.com/manifest.mpd")?;
    let manifest = parse_manifest(data, Some(&location))?;

    assert_eq!(
        manifest.location.as_ref().map(Url::as_str),
        Some("https://redirect.example.com/live/manifest.mpd")
    );
    assert_eq!(manifest.periods.len(), 2);
    assert_eq!(manifest.periods[1].start, secs(10));
    assert_eq!(manifest.period_duration(0), Some(secs(10)));
    assert_eq!(manifest.period_duration(1), Some(secs(20)));

    // SegmentBase with an index range
    let intro = &manifest.periods[0].stream_groups[0].representations[0];
    assert_eq!(intro.segment_index().segment_count(None), Some(1));
    let index = intro.index_uri().assert_success();
    assert_eq!(index.range, Some(ByteRange::new(800, Some(1200))));
    assert_eq!(
        intro.resolve(&index)?.as_str(),
        "https://cdn.example.com/vod/intro.mp4"
    );
    let init = intro.initialization_uri().assert_success();
    assert_eq!(init.http_range().as_deref(), Some("bytes=0-799"));

    // SegmentList
    let period_duration = manifest.period_duration(1);
    let main = &manifest.periods[1].stream_groups[0].representations[0];
    let index = main.segment_index();
    assert_eq!(index.segment_count(period_duration), Some(3));
    assert_eq!(index.segment_number(secs(5), period_duration), 2);
    let second = index.segment_url(2).assert_success();
    assert_eq!(second.http_range().as_deref(), Some("bytes=100-199"));
    assert_eq!(
        main.resolve(&second)?.as_str(),
        "https://cdn.example.com/vod/main/2.m4s"
    );
    index.segment_url(4).assert_error();

    // endNumber from the last segment number property
    let audio = &manifest.periods[1].stream_groups[1].representations[0];
    let index = audio.segment_index();
    assert_eq!(index.first_segment_number(), 3);
    assert_eq!(index.segment_count(period_duration), Some(5));
    assert_eq!(
        index.segment_url(7).assert_success().url.as_deref(),
        Some("audio/7.m4s")
    );

    Ok(())
}

#[test]
fn test_live_template_window() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/live.mpd");
    let manifest = parse_manifest(data, None)?;
    assert!(manifest.dynamic);

    let start: DateTime<Utc> = "2024-05-01T10:00:00Z".parse()?;
    let representation = &manifest.periods[0].stream_groups[0].representations[0];
    let index = representation.segment_index();
    assert_eq!(index.segment_count(manifest.period_duration(0)), None);

    // The period is not available yet
    assert!(manifest.live_timing(0, start + chrono::Duration::seconds(5)).is_none());

    // 60s into the period: 30 segments of 2s are out, 30s of them are kept
    let live = manifest
        .live_timing(0, start + chrono::Duration::seconds(70))
        .assert_success();
    assert_eq!(live.now, secs(60));
    assert_eq!(live.presentation_delay, secs(6));

    let range = index.live_segment_range(&live).assert_success();
    assert_eq!(range, 114..=129);
    // The segment holding 54s, six seconds behind the edge
    assert_eq!(index.live_start_number(&live), Some(127));
    assert_eq!(index.start_time(127), Some(secs(54)));
    assert_eq!(
        index.segment_url(127).assert_success().url.as_deref(),
        Some("v0/127.m4s")
    );

    // Static manifests have no live window
    let data = include_str!("../fixtures/template.mpd");
    let manifest = parse_manifest(data, None)?;
    assert!(manifest.live_timing(0, Utc::now()).is_none());

    Ok(())
}

#[test]
fn test_invalid_manifest() {
    parse_manifest("<NotAnMpd/>", None).assert_error();
    parse_manifest(
        r#"<MPD type="static"><Period><AdaptationSet><SegmentTemplate/><Representation id="r"/></AdaptationSet></Period></MPD>"#,
        None,
    )
    .assert_error();
}
