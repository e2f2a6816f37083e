use crate::{
    config::Capabilities,
    mpd::{ContentType, StreamGroup},
    SegueError, SegueResult,
};

use super::provider::StreamSelector;

/// Picks the group of `content_type` that plays by default.
///
/// For audio, the first group with a representation in `preferred_language` wins.
/// Otherwise the first group flagged default or main, otherwise the first group.
pub fn select_default<'a>(
    groups: &'a [StreamGroup],
    content_type: ContentType,
    preferred_language: Option<&str>,
) -> Option<&'a StreamGroup> {
    let mut candidates = groups.iter().filter(|g| g.content_type == content_type);

    if let (ContentType::Audio, Some(language)) = (content_type, preferred_language) {
        let preferred = candidates.clone().find(|g| {
            g.formats()
                .any(|format| format.language.as_deref() == Some(language))
        });
        if preferred.is_some() {
            return preferred;
        }
    }

    candidates
        .clone()
        .find(|g| g.formats().any(|format| format.is_default_or_main()))
        .or_else(|| candidates.next())
}

/// Default audio and video groups, in that order.
pub fn select_default_groups(
    groups: &[StreamGroup],
    preferred_language: Option<&str>,
) -> Vec<StreamGroup> {
    [ContentType::Audio, ContentType::Video]
        .into_iter()
        .filter_map(|content_type| select_default(groups, content_type, preferred_language))
        .cloned()
        .collect()
}

/// Rejects a selection the session cannot play.
pub fn verify_stream_groups(
    groups: &[StreamGroup],
    selectors: &[Option<StreamSelector>],
    capabilities: &Capabilities,
) -> SegueResult<()> {
    let invalid = |reason: String| Err(SegueError::InvalidStreamGroups(reason));

    if groups.is_empty() {
        return invalid("no stream group selected".to_string());
    }
    if groups.len() != selectors.len() {
        return invalid(format!(
            "{} stream groups but {} selectors",
            groups.len(),
            selectors.len()
        ));
    }

    let mut audio = 0;
    let mut video = 0;
    for (group, selector) in groups.iter().zip(selectors) {
        match group.content_type {
            ContentType::Audio => {
                audio += 1;
                if !capabilities.supports_seamless_audio_change
                    && matches!(selector, Some(StreamSelector::ThroughputHistory))
                {
                    return invalid(
                        "throughput based selection of audio is not supported by the platform"
                            .to_string(),
                    );
                }
            }
            ContentType::Video => video += 1,
            other => return invalid(format!("{other} is not supported")),
        }
    }

    if audio > 1 {
        return invalid(format!("{audio} audio stream groups, allowed 0 or 1"));
    }
    if video > 1 {
        return invalid(format!("{video} video stream groups, allowed 0 or 1"));
    }
    Ok(())
}
