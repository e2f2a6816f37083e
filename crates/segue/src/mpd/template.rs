// References:
// 1. https://github.com/clitic/vsd/blob/30ca1985e4a467ea3304b11c08d3176deaafd22a/vsd/src/dash/template.rs
// 2. ISO/IEC 23009-1, 5.3.9.4.4 Template-based Segment URL construction

use regex::Regex;
use std::{fmt, sync::LazyLock};

// "$RepresentationID$/$Number%06d$.m4s"
// `$$` has an empty key and renders a single dollar sign.
static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([^$%]*)(?:%([^$]*))?\$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    Literal(String),
    Token(Formatter),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Formatter {
    key: String,
    fill: char,
    width: usize,
}

impl Formatter {
    fn new(key: &str, format: Option<&str>) -> Self {
        let mut fill = '0';
        let mut width = 1;

        if let Some(format) = format.filter(|f| !f.is_empty()) {
            let mut chars = format.chars().peekable();
            if let Some(first) = chars.peek().copied() {
                if !('1'..='9').contains(&first) {
                    fill = first;
                    chars.next();
                }
            }

            width = 0;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                width = width * 10 + digit as usize;
                chars.next();
            }
            width = width.max(1);
        }

        Self {
            key: key.to_string(),
            fill,
            width,
        }
    }

    fn write(&self, value: Option<&str>, dst: &mut String) {
        match value {
            Some(value) => {
                let len = value.chars().count();
                for _ in len..self.width {
                    dst.push(self.fill);
                }
                dst.push_str(value);
            }
            None if self.key.is_empty() => dst.push('$'),
            None => {
                dst.push('$');
                dst.push_str(&self.key);
                dst.push('$');
            }
        }
    }
}

/// A parsed `SegmentTemplate@media` or `SegmentTemplate@initialization` pattern.
///
/// Rendering is deterministic: the same arguments always produce the same string,
/// so rendered URLs can be used as cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    chunks: Vec<Chunk>,
}

impl UrlTemplate {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn parse(text: &str) -> Self {
        let mut chunks = Vec::new();
        let mut last = 0;
        for caps in TOKEN_REGEX.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                chunks.push(Chunk::Literal(text[last..whole.start()].to_string()));
            }
            let key = caps.get(1).map_or("", |m| m.as_str());
            let format = caps.get(2).map(|m| m.as_str());
            chunks.push(Chunk::Token(Formatter::new(key, format)));
            last = whole.end();
        }
        if last < text.len() {
            chunks.push(Chunk::Literal(text[last..].to_string()));
        }

        Self { chunks }
    }

    /// Renders a media segment URL.
    pub fn get(
        &self,
        bandwidth: Option<u64>,
        representation_id: Option<&str>,
        number: u64,
        time: u64,
    ) -> String {
        self.render(|key| match key {
            Self::BANDWIDTH => bandwidth.map(|b| b.to_string()),
            Self::REPRESENTATION_ID => representation_id.map(str::to_string),
            Self::NUMBER => Some(number.to_string()),
            Self::TIME => Some(time.to_string()),
            _ => None,
        })
    }

    /// Renders a URL that does not depend on a segment, leaving `$Number$` and
    /// `$Time$` untouched.
    pub fn get_static(&self, bandwidth: Option<u64>, representation_id: Option<&str>) -> String {
        self.render(|key| match key {
            Self::BANDWIDTH => bandwidth.map(|b| b.to_string()),
            Self::REPRESENTATION_ID => representation_id.map(str::to_string),
            _ => None,
        })
    }

    fn render<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut result = String::new();
        for chunk in &self.chunks {
            match chunk {
                Chunk::Literal(s) => result.push_str(s),
                Chunk::Token(formatter) => {
                    formatter.write(lookup(&formatter.key).as_deref(), &mut result)
                }
            }
        }
        result
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(|_| None))
    }
}
