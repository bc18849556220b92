//! [`TickExecutor`] over every open channel.

use std::sync::Arc;

use async_trait::async_trait;
use tagplay_common::AppResult;
use tagplay_core::{Channel, ChannelRegistry, Notice, NoticePublisherService};
use tracing::{error, warn};

use crate::scheduler::TickExecutor;

/// Drives the engines of every channel in a registry.
pub struct ChannelTicker {
    registry: Arc<ChannelRegistry>,
    publisher: NoticePublisherService,
}

impl ChannelTicker {
    /// Create a ticker that publishes through `publisher`.
    #[must_use]
    pub fn new(registry: Arc<ChannelRegistry>, publisher: NoticePublisherService) -> Self {
        Self {
            registry,
            publisher,
        }
    }

    async fn publish(&self, channel: &Channel, notice: impl Into<Notice>) -> usize {
        let notice = notice.into();
        match self.publisher.publish(channel.name(), &notice).await {
            Ok(()) => 1,
            Err(e) => {
                warn!(channel = %channel.key(), error = %e, "Failed to publish notice");
                0
            }
        }
    }
}

#[async_trait]
impl TickExecutor for ChannelTicker {
    async fn clock_tick(&self) -> AppResult<usize> {
        let mut sent = 0;
        for channel in self.registry.channels().await {
            match channel.game_tick().await {
                Ok(notices) => {
                    for notice in notices {
                        sent += self.publish(&channel, notice).await;
                    }
                }
                Err(e) => error!(channel = %channel.key(), error = %e, "Game tick failed"),
            }
            if let Some(notice) = channel.autoplay_tick().await {
                sent += self.publish(&channel, notice).await;
            }
        }
        Ok(sent)
    }

    /// Only the first channel with an active sweep is probed.
    async fn liveness_tick(&self) -> AppResult<usize> {
        for channel in self.registry.channels().await {
            if !channel.sweeper().is_active().await {
                continue;
            }
            let sent = match channel.liveness_tick().await? {
                Some(notice) => self.publish(&channel, notice).await,
                None => 0,
            };
            return Ok(sent);
        }
        Ok(0)
    }

    async fn import_tick(&self) -> AppResult<usize> {
        let mut sent = 0;
        for channel in self.registry.channels().await {
            match channel.import_tick().await {
                Ok(Some(notice)) => sent += self.publish(&channel, notice).await,
                Ok(None) => {}
                Err(e) => error!(channel = %channel.key(), error = %e, "Import tick failed"),
            }
        }
        Ok(sent)
    }

    async fn checkpoint(&self) -> AppResult<()> {
        self.registry.checkpoint_all().await
    }
}
