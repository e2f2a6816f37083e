mod fakes;

use std::{sync::atomic::Ordering, sync::Arc, time::Duration};

use segue::{
    config::{Capabilities, PlayerConfig},
    mpd::ContentType,
    player::{PlatformPlayer, PlayerEvent, PlayerState, StreamSelector},
    Player, SegueError,
};

use crate::AssertWrapper;
use fakes::{FakeFactory, FakeProvider};

fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("segue=debug")
        .with_test_writer()
        .try_init();
}

fn new_player(provider: &Arc<FakeProvider>, factory: &FakeFactory, capabilities: Capabilities) -> Player {
    init_test_tracing();
    Player::new(
        PlayerConfig::default(),
        capabilities,
        provider.clone(),
        factory.clone(),
    )
}

async fn prepared(buffered: Duration) -> anyhow::Result<(Player, Arc<FakeProvider>, FakeFactory)> {
    let provider = Arc::new(FakeProvider::new(buffered));
    let factory = FakeFactory::default();
    let player = new_player(&provider, &factory, Capabilities::default());
    player.prepare().await?;
    Ok((player, provider, factory))
}

#[tokio::test(start_paused = true)]
async fn test_prepare_selects_defaults() -> anyhow::Result<()> {
    let (player, provider, factory) = prepared(Duration::from_secs(5)).await?;

    assert_eq!(factory.open_calls(), 1);
    let platform = factory.current();
    let opened: Vec<_> = platform.configs.lock().iter().map(|c| c.content_type).collect();
    assert_eq!(opened, [ContentType::Audio, ContentType::Video]);

    assert_eq!(player.state().await, PlayerState::Ready);
    assert_eq!(player.duration().await, Some(Duration::from_secs(10)));
    assert_eq!(player.position().await, Some(Duration::ZERO));
    assert_eq!(player.stream_groups().await.len(), 3);

    let (groups, selectors) = player.selected_stream_groups().await;
    let ids: Vec<_> = groups.iter().filter_map(|g| g.id.as_deref()).collect();
    assert_eq!(ids, ["2", "1"]);
    assert_eq!(selectors, [None, None]);

    let video = provider.stream(ContentType::Video);
    assert_eq!(video.loads.lock().len(), 1);
    assert_eq!(video.loads.lock()[0].start, Duration::ZERO);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_start_time_is_adjusted_to_key_frame() -> anyhow::Result<()> {
    let provider = Arc::new(FakeProvider::new(Duration::from_secs(5)));
    let factory = FakeFactory::default();
    let config = PlayerConfig {
        start_time_ms: Some(3500),
        ..Default::default()
    };
    let player = Player::new(config, Capabilities::default(), provider.clone(), factory.clone());
    player.prepare().await?;

    assert_eq!(player.position().await, Some(Duration::from_secs(2)));
    let audio = provider.stream(ContentType::Audio);
    assert_eq!(audio.loads.lock()[0].start, Duration::from_secs(2));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_play_paces_packets() -> anyhow::Result<()> {
    let (player, _provider, factory) = prepared(Duration::from_secs(5)).await?;
    player.play().await?;
    assert_eq!(player.state().await, PlayerState::Playing);
    assert!(player.clock().is_running());

    tokio::time::sleep(ms(1500)).await;

    // Released up to one second ahead of the clock
    let platform = factory.current();
    for content_type in [ContentType::Audio, ContentType::Video] {
        let pts = platform.submitted_pts(content_type);
        assert!(pts.windows(2).all(|w| w[0] < w[1]), "{content_type} out of order");
        assert!(pts.len() >= 24, "{content_type}: {} packets", pts.len());
        assert!(pts.last().assert_success() <= &ms(2500));
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_starvation_pauses_backend() -> anyhow::Result<()> {
    let (player, _provider, factory) = prepared(Duration::from_secs(5)).await?;
    let mut events = player.events().assert_success();
    player.play().await?;

    let event = events.recv().await.assert_success();
    assert!(matches!(event, PlayerEvent::Buffering(true)));

    let platform = factory.current();
    assert_eq!(platform.state(), PlayerState::Paused);
    assert!(!player.clock().is_running());
    // Both streams starve, the backend is paused once
    tokio::time::sleep(ms(10)).await;
    assert_eq!(platform.calls().iter().filter(|c| **c == "pause").count(), 1);
    assert!(events.try_recv().is_err());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_same_selection_reuses_backend() -> anyhow::Result<()> {
    let (player, provider, factory) = prepared(Duration::from_secs(5)).await?;
    let (groups, selectors) = player.selected_stream_groups().await;

    player.set_stream_groups(groups.clone(), selectors).await?;
    assert_eq!(factory.open_calls(), 1);
    assert_eq!(provider.created(), 2);
    assert_eq!(factory.current().seeks.lock().as_slice(), [Duration::ZERO]);

    // A different video group needs a new backend
    let mut video = groups[1].clone();
    video.id = Some("alternative".to_string());
    player
        .set_stream_groups(vec![groups[0].clone(), video], vec![None, None])
        .await?;
    assert_eq!(factory.open_calls(), 2);
    assert_eq!(provider.created(), 3);
    assert_eq!(provider.released.load(Ordering::SeqCst), 1);
    assert_eq!(factory.platforms.lock()[0].calls().last(), Some(&"close"));
    assert_eq!(player.state().await, PlayerState::Ready);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_deselecting_stream_reopens_backend() -> anyhow::Result<()> {
    let (player, provider, factory) = prepared(Duration::from_secs(5)).await?;
    let (groups, _) = player.selected_stream_groups().await;

    player.set_stream_groups(vec![groups[1].clone()], vec![None]).await?;
    assert_eq!(factory.open_calls(), 2);
    assert_eq!(provider.released.load(Ordering::SeqCst), 1);
    let opened: Vec<_> = factory
        .current()
        .configs
        .lock()
        .iter()
        .map(|c| c.content_type)
        .collect();
    assert_eq!(opened, [ContentType::Video]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_audio_selector_change() -> anyhow::Result<()> {
    let fixed = Some(StreamSelector::Fixed {
        representation_id: "a-en".to_string(),
    });

    // Without seamless audio change the audio stream is recreated
    let (player, provider, factory) = prepared(Duration::from_secs(5)).await?;
    let (groups, _) = player.selected_stream_groups().await;
    player
        .set_stream_groups(groups.clone(), vec![fixed.clone(), None])
        .await?;
    assert_eq!(factory.open_calls(), 2);
    assert_eq!(provider.created(), 3);

    // With it, only the selector is replaced
    let provider = Arc::new(FakeProvider::new(Duration::from_secs(5)));
    let factory = FakeFactory::default();
    let seamless = Capabilities {
        supports_seamless_audio_change: true,
    };
    let player = new_player(&provider, &factory, seamless);
    player.prepare().await?;
    player
        .set_stream_groups(groups, vec![Some(StreamSelector::ThroughputHistory), None])
        .await?;
    assert_eq!(factory.open_calls(), 1);
    assert_eq!(provider.created(), 2);
    assert_eq!(
        *provider.stream(ContentType::Audio).selector.lock(),
        Some(StreamSelector::ThroughputHistory)
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalid_selection_is_rejected() -> anyhow::Result<()> {
    let provider = Arc::new(FakeProvider::new(Duration::from_secs(5)));
    let factory = FakeFactory::default();
    let player = new_player(&provider, &factory, Capabilities::default());

    let result = player.set_stream_groups(Vec::new(), Vec::new()).await;
    assert!(matches!(result, Err(SegueError::InvalidStreamGroups(_))));

    player.prepare().await?;
    let (groups, _) = player.selected_stream_groups().await;
    let video = groups[1].clone();
    let result = player
        .set_stream_groups(vec![video.clone(), video], vec![None, None])
        .await;
    assert!(matches!(result, Err(SegueError::InvalidStreamGroups(_))));

    let result = player
        .set_stream_groups(vec![groups[0].clone()], vec![Some(StreamSelector::ThroughputHistory)])
        .await;
    assert!(matches!(result, Err(SegueError::InvalidStreamGroups(_))));

    // Nothing changed
    assert_eq!(factory.open_calls(), 1);
    assert_eq!(provider.created(), 2);
    assert!(factory.current().seeks.lock().is_empty());
    assert_eq!(player.selected_stream_groups().await.0, groups);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_seek_restores_playing_state() -> anyhow::Result<()> {
    let (player, provider, factory) = prepared(Duration::from_secs(5)).await?;
    player.play().await?;
    tokio::time::sleep(ms(200)).await;

    player.seek(ms(5300)).await?;
    let platform = factory.current();
    assert_eq!(platform.seeks.lock().as_slice(), [Duration::from_secs(4)]);
    assert_eq!(platform.calls(), ["open", "prepare", "start", "pause", "seek", "resume"]);
    assert_eq!(player.state().await, PlayerState::Playing);
    assert_eq!(player.position().await, Some(Duration::from_secs(4)));

    let audio = provider.stream(ContentType::Audio);
    let loads: Vec<_> = audio.loads.lock().iter().map(|s| s.start).collect();
    assert_eq!(loads, [Duration::ZERO, Duration::from_secs(4)]);

    tokio::time::sleep(ms(10)).await;
    let pts = platform.submitted_pts(ContentType::Video);
    assert!(pts.last().assert_success() >= &Duration::from_secs(4));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_seek_while_paused_stays_paused() -> anyhow::Result<()> {
    let (player, _provider, factory) = prepared(Duration::from_secs(5)).await?;
    player.play().await?;
    player.pause().await?;
    assert!(!player.clock().is_running());

    player.seek(Duration::from_secs(1)).await?;
    assert_eq!(player.state().await, PlayerState::Paused);
    assert_eq!(factory.current().calls().last(), Some(&"seek"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_end_of_stream_event() -> anyhow::Result<()> {
    let (player, _provider, factory) = prepared(Duration::from_secs(5)).await?;
    let mut events = player.events().assert_success();
    player.events().assert_error();

    factory.current().fire_eos();
    assert!(matches!(events.recv().await, Some(PlayerEvent::Eos)));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_loading_failure_stops_session() -> anyhow::Result<()> {
    let mut provider = FakeProvider::new(Duration::from_secs(5));
    provider.fail_loading = true;
    let provider = Arc::new(provider);
    let factory = FakeFactory::default();
    let player = new_player(&provider, &factory, Capabilities::default());
    let mut events = player.events().assert_success();

    player.prepare().await?;
    let event = events.recv().await.assert_success();
    assert!(matches!(
        event,
        PlayerEvent::Exception(ref error) if matches!(**error, SegueError::Stream(_))
    ));
    // The second failing stream belongs to the stopped generation
    tokio::time::sleep(ms(10)).await;
    assert!(events.try_recv().is_err());

    // A failed session can be prepared again
    player.prepare().await?;
    assert_eq!(factory.open_calls(), 2);
    assert_eq!(provider.released.load(Ordering::SeqCst), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dispose() -> anyhow::Result<()> {
    let (player, provider, factory) = prepared(Duration::from_secs(5)).await?;
    let mut events = player.events().assert_success();

    player.dispose().await;
    assert_eq!(factory.current().calls().last(), Some(&"close"));
    assert_eq!(provider.released.load(Ordering::SeqCst), 2);
    assert_eq!(provider.disposed.load(Ordering::SeqCst), 1);
    assert!(events.recv().await.is_none());

    assert!(matches!(player.play().await, Err(SegueError::InvalidState(_))));
    assert_eq!(player.state().await, PlayerState::None);
    // Disposing twice is harmless
    player.dispose().await;

    Ok(())
}
