//! Notice publisher that writes to the log.

use async_trait::async_trait;
use tagplay_common::AppResult;
use tagplay_core::{Notice, NoticePublisher};
use tracing::info;

/// Logs every notice with its channel and JSON payload.
#[derive(Clone, Default)]
pub struct LogNoticePublisher;

#[async_trait]
impl NoticePublisher for LogNoticePublisher {
    async fn publish(&self, channel: &str, notice: &Notice) -> AppResult<()> {
        let payload = serde_json::to_string(notice)?;
        info!(channel, %notice, %payload, "Notice");
        Ok(())
    }
}
