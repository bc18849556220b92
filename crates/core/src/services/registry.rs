//! Open channels, keyed by storage key.

use std::collections::HashMap;
use std::sync::Arc;

use tagplay_common::{AppResult, Config, SharedUrlProbe};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::services::channel::{Channel, channel_key};
use crate::services::liveness::LinkChecker;

/// Owns every open [`Channel`].
pub struct ChannelRegistry {
    config: Config,
    checker: Arc<LinkChecker>,
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl ChannelRegistry {
    /// Create an empty registry. Channels share one link checker.
    #[must_use]
    pub fn new(config: Config, probe: SharedUrlProbe) -> Self {
        let checker = Arc::new(LinkChecker::new(&config.liveness, probe));
        Self {
            config,
            checker,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Open a channel, or return it if already open.
    pub async fn open(&self, name: &str) -> AppResult<Arc<Channel>> {
        let key = channel_key(name);
        if let Some(channel) = self.channels.read().await.get(&key) {
            return Ok(channel.clone());
        }

        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get(&key) {
            return Ok(channel.clone());
        }
        let channel = Arc::new(Channel::open(name, &self.config, self.checker.clone()).await?);
        channels.insert(key, channel.clone());
        Ok(channel)
    }

    /// Open every configured channel.
    pub async fn open_all(&self) -> AppResult<usize> {
        for name in &self.config.channels {
            self.open(name).await?;
        }
        let count = self.channels.read().await.len();
        info!(count, "Opened configured channels");
        Ok(count)
    }

    /// Look up an open channel by name or key.
    pub async fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.read().await.get(&channel_key(name)).cloned()
    }

    /// Open channels in key order.
    pub async fn channels(&self) -> Vec<Arc<Channel>> {
        let mut channels: Vec<Arc<Channel>> = self.channels.read().await.values().cloned().collect();
        channels.sort_by(|a, b| a.key().cmp(b.key()));
        channels
    }

    /// Checkpoint every channel, continuing past failures.
    ///
    /// Returns the first error.
    pub async fn checkpoint_all(&self) -> AppResult<()> {
        let mut first_error = None;
        for channel in self.channels().await {
            if let Err(e) = channel.checkpoint().await {
                error!(channel = %channel.key(), error = %e, "Checkpoint failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Close and forget every channel.
    pub async fn close_all(&self) -> AppResult<()> {
        let channels: Vec<Arc<Channel>> = self.channels.write().await.drain().map(|(_, c)| c).collect();
        let mut first_error = None;
        for channel in channels {
            if let Err(e) = channel.close().await {
                error!(channel = %channel.key(), error = %e, "Close failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
