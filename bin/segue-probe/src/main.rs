mod config;

use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT},
    Client,
};
use segue::{
    fetch::fetch_manifest,
    mpd::{parse_manifest, LiveTiming, Manifest, Representation, SegmentInfo},
    player::select_default_groups,
};
use url::Url;

use crate::config::Config;

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct ProbeArgs {
    /// Manifest URL or path
    input: String,

    /// TOML configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Index of the period to inspect
    #[clap(short, long, default_value = "0")]
    period: usize,

    /// Preferred audio language, overrides the configuration file
    #[clap(long)]
    language: Option<String>,

    /// List every segment of the default representations. For dynamic
    /// manifests only the segments currently available are listed.
    #[clap(long)]
    segments: bool,

    /// Dump the parsed manifest as JSON
    #[clap(long)]
    json: bool,

    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,
}

fn build_client(config: &Config) -> anyhow::Result<Client> {
    let mut headers = HeaderMap::new();
    for header in config.http.headers.iter() {
        let (key, value) = header
            .split_once(':')
            .with_context(|| format!("invalid header: {header}"))?;
        headers.insert(
            HeaderName::from_str(key.trim())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
    if let Some(user_agent) = &config.http.user_agent {
        headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    }

    Ok(Client::builder().default_headers(headers).build()?)
}

async fn load_manifest(input: &str, config: &Config) -> anyhow::Result<Manifest> {
    if let Ok(url) = Url::parse(input) {
        if url.scheme() == "http" || url.scheme() == "https" {
            let client = build_client(config)?;
            return Ok(fetch_manifest(&client, url).await?);
        }
    }

    let path = std::fs::canonicalize(input)?;
    let data = std::fs::read_to_string(&path)?;
    let location = Url::from_file_path(&path).ok();
    Ok(parse_manifest(&data, location.as_ref())?)
}

fn print_representation(
    representation: &Representation,
    period_duration: Option<Duration>,
    live: Option<&LiveTiming>,
) {
    let format = &representation.format;
    let resolution = match (format.width, format.height) {
        (Some(width), Some(height)) => format!(" {width}x{height}"),
        _ => String::new(),
    };
    let index = representation.segment_index();
    let count = match live {
        Some(live) => match (index.live_segment_range(live), index.live_start_number(live)) {
            (Some(range), Some(start)) => {
                format!("{}..={} start={start}", range.start(), range.end())
            }
            _ => "none available".to_string(),
        },
        None => index
            .segment_count(period_duration)
            .map(|count| count.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    };
    println!(
        "    {} {}bps {}{} segments={}",
        format.id.as_deref().unwrap_or("-"),
        format.bandwidth.unwrap_or_default(),
        format.codecs.as_deref().unwrap_or("-"),
        resolution,
        count,
    );
}

/// Segments of `representation`, limited to the live window when there is one.
fn list_segments(
    representation: &Representation,
    period_duration: Option<Duration>,
    live: Option<&LiveTiming>,
) -> Option<Vec<SegmentInfo>> {
    let index = representation.segment_index();
    let numbers = match live {
        Some(live) => index.live_segment_range(live)?,
        None => {
            let count = index.segment_count(period_duration)?;
            let first = index.first_segment_number();
            first..=first.checked_add(count)?.checked_sub(1)?
        }
    };
    numbers
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

fn print_segments(
    representation: &Representation,
    period_duration: Option<Duration>,
    live: Option<&LiveTiming>,
) {
    let Some(schedule) = list_segments(representation, period_duration, live) else {
        println!("      no segments to list");
        return;
    };

    if let Some(init) = representation.initialization_uri() {
        match representation.resolve(&init) {
            Ok(url) => println!("      init {url} {}", init.http_range().unwrap_or_default()),
            Err(error) => tracing::warn!(%error, "failed to resolve initialization"),
        }
    }
    for segment in schedule {
        let url = match representation.resolve(&segment.uri) {
            Ok(url) => url.to_string(),
            Err(error) => {
                tracing::warn!(number = segment.number, %error, "failed to resolve segment");
                continue;
            }
        };
        println!(
            "      #{} {:?}+{:?} {url} {}",
            segment.number,
            segment.start,
            segment.duration.unwrap_or_default(),
            segment.uri.http_range().unwrap_or_default(),
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ProbeArgs::parse();

    let level = if args.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(language) = args.language {
        config.player.preferred_audio_language = Some(language);
    }

    let manifest = load_manifest(&args.input, &config).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    let Some(period) = manifest.periods.get(args.period) else {
        bail!(
            "period {} does not exist, the manifest has {}",
            args.period,
            manifest.periods.len()
        );
    };
    let period_duration = manifest.period_duration(args.period);
    let live = manifest.live_timing(args.period, chrono::Utc::now());

    println!(
        "{} manifest, duration {:?}, {} period(s)",
        if manifest.dynamic { "dynamic" } else { "static" },
        manifest.duration,
        manifest.periods.len()
    );
    if let Some(title) = &manifest.program_title {
        println!("title: {title}");
    }
    if let Some(location) = &manifest.location {
        println!("location: {location}");
    }
    if let Some(live) = &live {
        println!(
            "live position {:?}, time shift buffer {:?}, delay {:?}",
            live.now, live.time_shift_buffer_depth, live.presentation_delay
        );
    }
    println!(
        "period {} ({}) start {:?} duration {:?}",
        args.period,
        period.id.as_deref().unwrap_or("-"),
        period.start,
        period_duration
    );

    let selected = select_default_groups(
        &period.stream_groups,
        config.player.preferred_audio_language.as_deref(),
    );
    for group in period.stream_groups.iter() {
        let marker = if selected.contains(group) { "*" } else { " " };
        println!(
            "{marker} {} group {} lang={}",
            group.content_type,
            group.id.as_deref().unwrap_or("-"),
            group.language.as_deref().unwrap_or("-"),
        );
        for representation in group.representations.iter() {
            print_representation(representation, period_duration, live.as_ref());
        }
    }

    if args.segments {
        for group in selected.iter() {
            let Some(representation) = group.representations.first() else {
                continue;
            };
            println!(
                "{} {}:",
                group.content_type,
                representation.format.id.as_deref().unwrap_or("-")
            );
            print_segments(representation, period_duration, live.as_ref());
        }
    }

    Ok(())
}
