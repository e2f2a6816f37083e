use serde::Serialize;

use crate::{SegueError, SegueResult};

/// A contiguous byte range inside a resource. `length` is open when the range
/// runs to the end of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// A zero length has no last byte and is sent as an open range.
    pub fn to_http_range(&self) -> String {
        match self.length.filter(|length| *length > 0) {
            Some(length) => format!(
                "bytes={}-{}",
                self.offset,
                self.offset.saturating_add(length - 1)
            ),
            None => format!("bytes={}-", self.offset),
        }
    }

    /// Parses a byte-range-spec in the form of RFC 7233 subclause 2.1, as used by
    /// `@indexRange`, `@mediaRange` and `Initialization@range`.
    pub fn parse(s: &str) -> SegueResult<Self> {
        let invalid = || SegueError::InvalidAttribute {
            field: "range",
            value: s.to_string(),
        };

        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let offset = start.parse::<u64>().map_err(|_| invalid())?;
        let length = if end.is_empty() {
            None
        } else {
            let last = end.parse::<u64>().map_err(|_| invalid())?;
            if last < offset {
                return Err(invalid());
            }
            // 0-500 means 501 bytes
            Some(last - offset + 1)
        };

        Ok(Self { offset, length })
    }
}
