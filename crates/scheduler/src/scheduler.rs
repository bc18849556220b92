//! Periodic tick loops.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tagplay_common::AppResult;
use tagplay_common::config::SchedulerSettings;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Game and autoplay clock (default: 1 second).
    pub tick_interval: Duration,
    /// Between two liveness probes (default: 2 seconds).
    pub liveness_interval: Duration,
    /// Between two imported lines (default: 2 seconds).
    pub import_interval: Duration,
    /// Between full checkpoints (default: 15 minutes).
    pub checkpoint_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            tick_interval: Duration::from_millis(settings.tick_interval_ms.max(1)),
            liveness_interval: Duration::from_millis(settings.liveness_interval_ms.max(1)),
            import_interval: Duration::from_millis(settings.import_interval_ms.max(1)),
            checkpoint_interval: Duration::from_secs(settings.checkpoint_interval_secs.max(1)),
        }
    }
}

/// Work done on each tick.
#[async_trait::async_trait]
pub trait TickExecutor: Send + Sync {
    /// Advance games and autoplay by one clock tick. Returns notices sent.
    async fn clock_tick(&self) -> AppResult<usize>;

    /// Probe one URL of an active sweep. Returns notices sent.
    async fn liveness_tick(&self) -> AppResult<usize>;

    /// Import one queued line per channel. Returns notices sent.
    async fn import_tick(&self) -> AppResult<usize>;

    /// Write every store to disk.
    async fn checkpoint(&self) -> AppResult<()>;
}

/// Running tick loops.
#[derive(Debug)]
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Number of spawned loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop every loop and wait for them to unwind.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Run the scheduler with the given configuration and executor.
pub fn run_scheduler<E: TickExecutor + 'static>(
    config: &SchedulerConfig,
    executor: Arc<E>,
) -> SchedulerHandle {
    let executor_clock = executor.clone();
    let executor_liveness = executor.clone();
    let executor_import = executor.clone();
    let executor_checkpoint = executor;

    let clock_interval = config.tick_interval;
    let liveness_interval = config.liveness_interval;
    let import_interval = config.import_interval;
    let checkpoint_interval = config.checkpoint_interval;

    let mut tasks = Vec::with_capacity(4);

    // Game and autoplay clock
    tasks.push(tokio::spawn(async move {
        let mut interval = interval(clock_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match executor_clock.clock_tick().await {
                Ok(count) => {
                    if count > 0 {
                        tracing::trace!(count, "Clock tick published notices");
                    }
                }
                Err(e) => e.log("clock tick"),
            }
        }
    }));

    // Liveness sweep
    tasks.push(tokio::spawn(async move {
        let mut interval = interval(liveness_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = executor_liveness.liveness_tick().await {
                e.log("liveness tick");
            }
        }
    }));

    // Bulk import
    tasks.push(tokio::spawn(async move {
        let mut interval = interval(import_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = executor_import.import_tick().await {
                e.log("import tick");
            }
        }
    }));

    // Periodic checkpoint; the first tick is skipped since stores were just loaded.
    tasks.push(tokio::spawn(async move {
        let mut interval = interval(checkpoint_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            match executor_checkpoint.checkpoint().await {
                Ok(()) => tracing::debug!("Checkpointed channels"),
                Err(e) => e.log("checkpoint"),
            }
        }
    }));

    tracing::info!(
        clock_ms = clock_interval.as_millis() as u64,
        liveness_ms = liveness_interval.as_millis() as u64,
        import_ms = import_interval.as_millis() as u64,
        checkpoint_secs = checkpoint_interval.as_secs(),
        "Scheduler started"
    );

    SchedulerHandle { tasks }
}
