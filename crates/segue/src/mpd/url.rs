use serde::Serialize;
use url::Url;

use crate::{util::range::ByteRange, SegueResult};

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

pub(crate) fn merge_baseurls(current: &Url, new: &str) -> SegueResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        // The query of the current URL (the manifest URL or an outer BaseURL) is carried
        // over unless the new URL has its own.
        //
        // merge_baseurls(https://example.com/manifest.mpd?auth=secret, /video42.mp4) =>
        //   https://example.com/video42.mp4?auth=secret
        //
        // merge_baseurls(https://example.com/manifest.mpd?auth=old, /video42.mp4?auth=new) =>
        //   https://example.com/video42.mp4?auth=new
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}

/// A reference to (part of) a resource. The reference stays unresolved until it
/// is dereferenced against the base URL of its representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangedUri {
    /// `None` refers to the base URL itself.
    pub url: Option<String>,
    pub range: Option<ByteRange>,
}

impl RangedUri {
    pub fn new(url: Option<String>, range: Option<ByteRange>) -> Self {
        Self { url, range }
    }

    pub fn resolve(&self, base: &Url) -> SegueResult<Url> {
        match &self.url {
            Some(url) => merge_baseurls(base, url),
            None => Ok(base.clone()),
        }
    }

    pub fn http_range(&self) -> Option<String> {
        self.range.as_ref().map(ByteRange::to_http_range)
    }
}
