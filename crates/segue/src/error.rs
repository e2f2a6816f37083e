use std::time::Duration;

use thiserror::Error;

use crate::player::SubmitResult;

#[derive(Error, Debug)]
pub enum SegueError {
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    // Manifest errors
    #[error(transparent)]
    XmlError(#[from] quick_xml::Error),

    #[error(transparent)]
    XmlAttrError(#[from] quick_xml::events::attributes::AttrError),

    #[error("Invalid manifest: {0}")]
    MpdParsing(String),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidAttribute { field: &'static str, value: String },

    #[error("Missing {0}")]
    Missing(&'static str),

    // Playback session errors
    #[error("Position {position:?} is outside of segment [{start:?}, {stop:?}]")]
    OutOfSegment {
        position: Duration,
        start: Duration,
        stop: Option<Duration>,
    },

    #[error("Invalid stream group selection: {0}")]
    InvalidStreamGroups(String),

    #[error("Backend rejected packet: {0:?}")]
    SubmitFailed(SubmitResult),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid player state: {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

pub type SegueResult<T> = Result<T, SegueError>;
