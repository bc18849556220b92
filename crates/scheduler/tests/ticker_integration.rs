//! Scheduler integration tests.
//!
//! These tests drive real channels in a temporary data directory through
//! the ticker and the spawned loops.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tagplay_common::config::StorageConfig;
use tagplay_common::{AppResult, Config, ProbeResponse, UrlProbe};
use tagplay_core::{
    AutoplayNotice, AutoplaySelection, AutoplaySettings, ChannelRegistry, ImportNotice, Notice,
    NoticePublisher, SweepNotice,
};
use tagplay_scheduler::{ChannelTicker, SchedulerConfig, TickExecutor, run_scheduler};
use tokio::sync::Mutex;

/// Answers 200 for everything except URLs containing `dead`.
struct FakeProbe;

#[async_trait]
impl UrlProbe for FakeProbe {
    async fn probe(&self, url: &str) -> AppResult<ProbeResponse> {
        let status = if url.contains("dead") { 404 } else { 200 };
        Ok(ProbeResponse::status(status))
    }
}

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, Notice)>>,
}

#[async_trait]
impl NoticePublisher for RecordingPublisher {
    async fn publish(&self, channel: &str, notice: &Notice) -> AppResult<()> {
        self.sent
            .lock()
            .await
            .push((channel.to_string(), notice.clone()));
        Ok(())
    }
}

async fn setup(
    dir: &tempfile::TempDir,
    channels: &[&str],
) -> (Arc<ChannelRegistry>, Arc<RecordingPublisher>, ChannelTicker) {
    let config = Config {
        storage: StorageConfig {
            data_dir: dir.path().to_path_buf(),
        },
        channels: channels.iter().map(|c| (*c).to_string()).collect(),
        ..Config::default()
    };
    let registry = Arc::new(ChannelRegistry::new(config, Arc::new(FakeProbe)));
    registry.open_all().await.unwrap();
    let publisher = Arc::new(RecordingPublisher::default());
    let ticker = ChannelTicker::new(registry.clone(), publisher.clone());
    (registry, publisher, ticker)
}

#[tokio::test]
async fn test_clock_tick_publishes_autoplay() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, publisher, ticker) = setup(&dir, &["#pics"]).await;
    let pics = registry.get("#pics").await.unwrap();
    pics.add_image("http://a.png", &["sun"]).await.unwrap();

    let settings = AutoplaySettings {
        delay: 1,
        sequential: true,
        count_up: true,
        looping: false,
    };
    let all = AutoplaySelection::Range {
        begin: None,
        end: None,
    };
    assert!(pics.start_autoplay(settings, Some(1), &all).await);

    assert_eq!(ticker.clock_tick().await.unwrap(), 1);
    assert_eq!(ticker.clock_tick().await.unwrap(), 1);
    assert_eq!(ticker.clock_tick().await.unwrap(), 0);

    let sent = publisher.sent.lock().await;
    assert_eq!(
        *sent,
        vec![
            (
                "#pics".to_string(),
                Notice::Autoplay(AutoplayNotice::Show {
                    id: 1,
                    url: "http://a.png".to_string()
                })
            ),
            ("#pics".to_string(), Notice::Autoplay(AutoplayNotice::Complete)),
        ]
    );
}

#[tokio::test]
async fn test_liveness_tick_sweeps_one_channel_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, publisher, ticker) = setup(&dir, &["#art", "#pics"]).await;
    let art = registry.get("#art").await.unwrap();
    let pics = registry.get("#pics").await.unwrap();
    art.add_image("http://dead.png", &[]).await.unwrap();
    pics.add_image("http://fine.png", &[]).await.unwrap();
    art.sweeper().enable().await;
    pics.sweeper().enable().await;

    // art: probe, then complete; pics only afterwards.
    for _ in 0..4 {
        ticker.liveness_tick().await.unwrap();
    }
    assert!(art.images().is_empty().await);
    assert_eq!(art.images().deleted_ids().await.unwrap(), vec![1]);
    assert!(!art.sweeper().is_active().await);
    assert!(!pics.sweeper().is_active().await);

    let sent = publisher.sent.lock().await;
    let notices: Vec<(&str, &Notice)> = sent.iter().map(|(c, n)| (c.as_str(), n)).collect();
    assert_eq!(
        notices,
        vec![
            ("#art", &Notice::Sweep(SweepNotice::Complete { remaining: 0 })),
            ("#pics", &Notice::Sweep(SweepNotice::Complete { remaining: 1 })),
        ]
    );
}

#[tokio::test]
async fn test_import_tick_and_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, publisher, ticker) = setup(&dir, &["#pics"]).await;
    let pics = registry.get("#pics").await.unwrap();
    pics.imports()
        .enqueue(["add http://a.png sun", "add http://b.png moon"])
        .await;

    for _ in 0..3 {
        ticker.import_tick().await.unwrap();
    }
    assert_eq!(pics.images().len().await, 2);
    assert_eq!(
        publisher.sent.lock().await.last().map(|(_, n)| n.clone()),
        Some(Notice::Import(ImportNotice::Complete { processed: 2 }))
    );

    ticker.checkpoint().await.unwrap();
    let saved = tokio::fs::read_to_string(dir.path().join("pics_images.csv"))
        .await
        .unwrap();
    assert_eq!(saved, "1 http://a.png 1 1\n2 http://b.png 2 1\n");
}

#[derive(Default)]
struct CountingExecutor {
    clock: AtomicUsize,
    liveness: AtomicUsize,
    imports: AtomicUsize,
    checkpoints: AtomicUsize,
}

#[async_trait]
impl TickExecutor for CountingExecutor {
    async fn clock_tick(&self) -> AppResult<usize> {
        self.clock.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn liveness_tick(&self) -> AppResult<usize> {
        self.liveness.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn import_tick(&self) -> AppResult<usize> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn checkpoint(&self) -> AppResult<()> {
        self.checkpoints.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_scheduler_intervals() {
    let executor = Arc::new(CountingExecutor::default());
    let config = SchedulerConfig {
        tick_interval: Duration::from_secs(1),
        liveness_interval: Duration::from_secs(2),
        import_interval: Duration::from_secs(2),
        checkpoint_interval: Duration::from_secs(10),
    };
    let handle = run_scheduler(&config, executor.clone());
    assert_eq!(handle.len(), 4);

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    handle.shutdown().await;

    assert_eq!(executor.clock.load(Ordering::SeqCst), 11);
    assert_eq!(executor.liveness.load(Ordering::SeqCst), 6);
    assert_eq!(executor.imports.load(Ordering::SeqCst), 6);
    assert_eq!(executor.checkpoints.load(Ordering::SeqCst), 1);
}
