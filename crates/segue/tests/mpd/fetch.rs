use segue::{
    fetch::{fetch_manifest, fetch_resource},
    mpd::ContentType,
    SegueError,
};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{mpd::setup_mock_server, AssertWrapper};

#[tokio::test]
async fn test_fetch_manifest_resolves_against_location() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/template.mpd");
    let (manifest_uri, server) = setup_mock_server(data).await;

    let client = reqwest::Client::new();
    let manifest = fetch_manifest(&client, manifest_uri.parse()?).await?;
    let video = &manifest.periods[0].stream_groups[0];
    assert_eq!(video.content_type, ContentType::Video);

    let representation = &video.representations[1];
    let uri = representation.segment_index().segment_url(2).assert_success();
    let url = representation.resolve(&uri)?;
    assert_eq!(url.as_str(), format!("{}/dash/media/v1/00002.m4s", server.uri()));

    Ok(())
}

#[tokio::test]
async fn test_fetch_manifest_http_error() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.mpd"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let result = fetch_manifest(&client, format!("{}/missing.mpd", server.uri()).parse()?).await;
    assert!(matches!(result, Err(SegueError::HttpStatus(status)) if status.as_u16() == 404));

    Ok(())
}

#[tokio::test]
async fn test_fetch_ranged_resource() -> anyhow::Result<()> {
    let data = include_str!("../fixtures/multi-period.mpd")
        .replace("https://cdn.example.com/vod/", "vod/");
    let (manifest_uri, server) = setup_mock_server(&data).await;
    Mock::given(method("GET"))
        .and(path("/dash/vod/main/2.m4s"))
        .and(header("range", "bytes=100-199"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![7u8; 100]))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let manifest = fetch_manifest(&client, manifest_uri.parse()?).await?;
    let representation = &manifest.periods[1].stream_groups[0].representations[0];
    let uri = representation.segment_index().segment_url(2).assert_success();

    let body = fetch_resource(&client, representation, &uri).await?;
    assert_eq!(body.len(), 100);

    Ok(())
}
