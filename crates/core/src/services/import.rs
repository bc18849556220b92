//! Bulk import of `add <url> <keywords...>` lines.
//!
//! Lines are queued per channel and drained one per scheduler tick so a
//! large import does not stall the channel.

use std::collections::VecDeque;

use tagplay_common::unquote_plus;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::services::notice::ImportNotice;

/// Lines between two progress notices.
pub const PROGRESS_EVERY: usize = 100;

/// One parsed import line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCommand {
    /// Image URL.
    pub url: String,
    /// Keywords to vote for, decoded.
    pub keywords: Vec<String>,
}

/// Parse `add <url> <k1,k2> <k3>...`.
///
/// Keywords may be comma-separated and `+`/percent encoded. `None` for
/// anything that is not an `add` line with a URL.
#[must_use]
pub fn parse_import_line(line: &str) -> Option<ImportCommand> {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next()?;
    if !verb.trim_start_matches(['!', '.']).eq_ignore_ascii_case("add") {
        return None;
    }
    let url = tokens.next()?.to_string();
    let keywords = split_keywords(tokens);
    Some(ImportCommand { url, keywords })
}

/// Split comma groups into decoded, non-empty keywords.
pub fn split_keywords<'a>(groups: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    groups
        .into_iter()
        .flat_map(|group| group.split(','))
        .map(|key| unquote_plus(key.trim()).trim().to_string())
        .filter(|key| !key.is_empty())
        .collect()
}

/// What the queue hands out on a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportStep {
    /// Nothing queued.
    Idle,
    /// Process this line, then call [`ImportQueue::mark_processed`].
    Line(String),
    /// The queue just drained.
    Complete(ImportNotice),
}

#[derive(Debug, Default)]
struct ImportState {
    pending: VecDeque<String>,
    processed: usize,
    active: bool,
}

/// Per-channel queue of import lines.
#[derive(Debug, Default)]
pub struct ImportQueue {
    state: Mutex<ImportState>,
}

impl ImportQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue lines behind any already pending. Blank lines are dropped.
    ///
    /// Returns the number of lines now pending.
    pub async fn enqueue<I, S>(&self, lines: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.extend(
            lines
                .into_iter()
                .map(Into::into)
                .filter(|line: &String| !line.trim().is_empty()),
        );
        if state.pending.len() > before {
            state.active = true;
        }
        info!(queued = state.pending.len() - before, pending = state.pending.len(), "Queued import");
        state.pending.len()
    }

    /// Take the next line.
    pub async fn next_step(&self) -> ImportStep {
        let mut state = self.state.lock().await;
        if let Some(line) = state.pending.pop_front() {
            return ImportStep::Line(line);
        }
        if !state.active {
            return ImportStep::Idle;
        }
        let processed = state.processed;
        *state = ImportState::default();
        info!(processed, "Import complete");
        ImportStep::Complete(ImportNotice::Complete { processed })
    }

    /// Count a handled line; a progress notice every [`PROGRESS_EVERY`] lines.
    pub async fn mark_processed(&self) -> Option<ImportNotice> {
        let mut state = self.state.lock().await;
        state.processed += 1;
        debug!(processed = state.processed, "Imported line");
        (state.processed % PROGRESS_EVERY == 0).then(|| ImportNotice::Progress {
            processed: state.processed,
            remaining: state.pending.len(),
        })
    }

    /// Lines still waiting.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Drop everything queued.
    pub async fn clear(&self) {
        *self.state.lock().await = ImportState::default();
    }
}
