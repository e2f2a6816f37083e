use reqwest::{header::RANGE, Client};
use url::Url;

use crate::{
    mpd::{parse_manifest, Manifest, RangedUri, Representation},
    SegueError, SegueResult,
};

async fn get(client: &Client, url: Url, range: Option<String>) -> SegueResult<reqwest::Response> {
    let mut request = client.get(url);
    if let Some(range) = range {
        request = request.header(RANGE, range);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        if let Ok(body) = response.text().await {
            tracing::warn!("Error body: {body}");
        }
        return Err(SegueError::HttpStatus(status));
    }
    Ok(response)
}

/// Downloads and parses a manifest. Relative URLs inside the document resolve
/// against the final URL after HTTP redirects.
pub async fn fetch_manifest(client: &Client, url: Url) -> SegueResult<Manifest> {
    let response = get(client, url, None).await?;
    let location = response.url().clone();
    let body = response.text().await?;

    let manifest = parse_manifest(&body, Some(&location))?;
    if let Some(redirect) = &manifest.location {
        tracing::info!(%redirect, "manifest declares a new location");
    }
    Ok(manifest)
}

/// Downloads a segment, initialization or index resource of `representation`.
pub async fn fetch_resource(
    client: &Client,
    representation: &Representation,
    uri: &RangedUri,
) -> SegueResult<bytes::Bytes> {
    let url = representation.resolve(uri)?;
    let response = get(client, url, uri.http_range()).await?;
    Ok(response.bytes().await?)
}
