//! Notices emitted by the periodic engines.
//!
//! The engines return notices instead of talking to a chat connection;
//! a [`NoticePublisher`] delivers them to whatever front end is attached.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tagplay_common::AppResult;

use crate::services::game::PlayerScore;

/// Automatic game progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GameNotice {
    /// A round begins after the pause.
    RoundStarting { round: u32, seconds: u32 },
    /// Final seconds of the pause.
    RoundCountdown { round: u32, seconds: u32 },
    /// An image is up for voting.
    ImagePresented { id: u32, url: String },
    /// Only videos were drawn.
    GaveUp { tries: u32 },
    /// The channel has no images to play with.
    NoImages,
    /// The voting window opens.
    VotingOpen { round: u32, seconds: u32 },
    /// Final seconds of the voting window.
    VotingCountdown { round: u32, seconds: u32 },
    /// Standings after a round.
    Scores { scores: Vec<PlayerScore> },
    /// The last round was settled.
    GameOver,
}

/// Autoplay output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AutoplayNotice {
    /// Show this image.
    Show { id: u32, url: String },
    /// The sequence ran out.
    Complete,
}

/// Liveness sweep progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SweepNotice {
    /// Share of the snapshot checked so far.
    Progress { percent: u32 },
    /// The sweep finished and the store was renumbered.
    Complete { remaining: usize },
}

/// Bulk import progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ImportNotice {
    /// Lines processed so far and still queued.
    Progress { processed: usize, remaining: usize },
    /// The queue is drained.
    Complete { processed: usize },
}

/// Anything the engines can announce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "notice", rename_all = "camelCase")]
pub enum Notice {
    /// From the game engine.
    Game(GameNotice),
    /// From autoplay.
    Autoplay(AutoplayNotice),
    /// From the liveness sweep.
    Sweep(SweepNotice),
    /// From the import queue.
    Import(ImportNotice),
}

impl From<GameNotice> for Notice {
    fn from(notice: GameNotice) -> Self {
        Self::Game(notice)
    }
}

impl From<AutoplayNotice> for Notice {
    fn from(notice: AutoplayNotice) -> Self {
        Self::Autoplay(notice)
    }
}

impl From<SweepNotice> for Notice {
    fn from(notice: SweepNotice) -> Self {
        Self::Sweep(notice)
    }
}

impl From<ImportNotice> for Notice {
    fn from(notice: ImportNotice) -> Self {
        Self::Import(notice)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Game(notice) => match notice {
                GameNotice::RoundStarting { round, seconds }
                | GameNotice::RoundCountdown { round, seconds } => {
                    write!(f, "[game] round {round} starting in {seconds} seconds")
                }
                GameNotice::ImagePresented { id, url } => {
                    write!(f, "[game] gimme some love [{id}]: {url}")
                }
                GameNotice::GaveUp { tries } => write!(f, "[game] giving up after {tries} tries"),
                GameNotice::NoImages => write!(f, "[game] please add images"),
                GameNotice::VotingOpen { round, seconds } => {
                    write!(f, "[game] round {round}: {seconds} seconds of love")
                }
                GameNotice::VotingCountdown { round, seconds } => {
                    write!(f, "[game] round {round} time remaining: {seconds}")
                }
                GameNotice::Scores { scores } => {
                    write!(f, "[game] scores:")?;
                    for entry in scores {
                        write!(f, " {}={}", entry.nick, entry.score)?;
                    }
                    Ok(())
                }
                GameNotice::GameOver => write!(f, "[game] Game Over"),
            },
            Self::Autoplay(AutoplayNotice::Show { id, url }) => write!(f, "id={id}: {url}"),
            Self::Autoplay(AutoplayNotice::Complete) => write!(f, "autoplay complete"),
            Self::Sweep(SweepNotice::Progress { percent }) => {
                write!(f, "[url] url checker: {percent}% complete")
            }
            Self::Sweep(SweepNotice::Complete { remaining }) => write!(
                f,
                "[url] url checker: 100% complete, {remaining} images renumbered"
            ),
            Self::Import(ImportNotice::Progress {
                processed,
                remaining,
            }) => write!(f, "[merge] {processed} processed, {remaining} to go"),
            Self::Import(ImportNotice::Complete { processed }) => {
                write!(f, "[merge] complete, {processed} processed")
            }
        }
    }
}

/// Trait for delivering notices to a channel.
///
/// This allows the engines to report progress without depending on the
/// chat connection.
#[async_trait]
pub trait NoticePublisher: Send + Sync {
    /// Deliver one notice to `channel`.
    async fn publish(&self, channel: &str, notice: &Notice) -> AppResult<()>;
}

/// A no-op implementation of `NoticePublisher` for tests or headless runs.
#[derive(Clone, Default)]
pub struct NoOpNoticePublisher;

#[async_trait]
impl NoticePublisher for NoOpNoticePublisher {
    async fn publish(&self, _channel: &str, _notice: &Notice) -> AppResult<()> {
        Ok(())
    }
}

/// Shared notice publisher.
pub type NoticePublisherService = Arc<dyn NoticePublisher>;
