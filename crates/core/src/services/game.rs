//! Image guessing game.
//!
//! Players "love" the image on display with free-text words. Each word
//! becomes a category vote on the image. When the round is settled the
//! image's three most voted categories are ranked and every player whose
//! words hit them is credited:
//!
//! | event | points |
//! |---|---|
//! | word adds a category new to the image | 15 |
//! | hits first place | 10 |
//! | hits second place | 5 |
//! | hits third place | 2 |
//!
//! In auto mode [`GameEngine::tick`] runs each round as a pause, a voting
//! window and a settle step, one call per second.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use tagplay_common::config::GameConfig;
use tagplay_common::{AppError, AppResult, get_metrics};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::services::category::{CategoryStore, normalize_keyword};
use crate::services::image::ImageStore;
use crate::services::notice::GameNotice;

/// Points for a word that put a new category on the image.
pub const CREATE_POINTS: u32 = 15;
/// Points for hitting the most voted category.
pub const FIRST_POINTS: u32 = 10;
/// Points for hitting the second most voted category.
pub const SECOND_POINTS: u32 = 5;
/// Points for hitting the third most voted category.
pub const THIRD_POINTS: u32 = 2;

/// Draws before auto mode gives up on finding a still image.
const MAX_IMAGE_DRAWS: u32 = 5;
/// Pause seconds left when the countdown starts.
const PAUSE_COUNTDOWN: u32 = 4;
/// Voting seconds left when the countdown starts.
const VOTING_COUNTDOWN: u32 = 6;

/// One player's tally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scorecard {
    /// Categories this player introduced.
    pub creates: u32,
    /// First place hits.
    pub firsts: u32,
    /// Second place hits.
    pub seconds: u32,
    /// Third place hits.
    pub thirds: u32,
    /// Current score.
    pub score: u32,
    /// Words per image not yet settled.
    pub loves: BTreeMap<u32, Vec<String>>,
}

impl Scorecard {
    /// Weighted sum of the counters.
    #[must_use]
    pub const fn compute_score(&self) -> u32 {
        self.creates * CREATE_POINTS
            + self.firsts * FIRST_POINTS
            + self.seconds * SECOND_POINTS
            + self.thirds * THIRD_POINTS
    }
}

/// A player's standing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerScore {
    /// Player nick.
    pub nick: String,
    /// Points so far.
    pub score: u32,
}

/// Auto game timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSettings {
    /// Rounds in the game.
    pub rounds: u32,
    /// Voting window in seconds.
    pub delay: u32,
    /// Seconds between rounds.
    pub pause: u32,
}

impl From<&GameConfig> for GameSettings {
    fn from(config: &GameConfig) -> Self {
        Self {
            rounds: config.rounds,
            delay: config.delay,
            pause: config.pause,
        }
    }
}

/// Result of [`GameEngine::record_love`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoveOutcome {
    /// Image the words were applied to; `None` if no image was up.
    pub image: Option<u32>,
    /// Category id of each accepted word.
    pub categories: Vec<u32>,
    /// Words that introduced a category to the image.
    pub creates: u32,
}

/// An image put up for voting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedImage {
    /// Image id.
    pub id: u32,
    /// Image URL.
    pub url: String,
}

#[derive(Debug)]
struct GameSession {
    closed: bool,
    running: bool,
    auto: bool,
    current_image: Option<u32>,
    settings: GameSettings,
    round: u32,
    pause_elapsed: u32,
    delay_elapsed: u32,
    players: BTreeMap<String, Scorecard>,
}

impl GameSession {
    fn restart(&mut self, auto: bool) {
        self.running = true;
        self.auto = auto;
        self.current_image = None;
        self.round = 0;
        self.pause_elapsed = 0;
        self.delay_elapsed = 0;
        self.players.clear();
    }

    fn scores(&self) -> Vec<PlayerScore> {
        let mut scores: Vec<PlayerScore> = self
            .players
            .iter()
            .map(|(nick, card)| PlayerScore {
                nick: nick.clone(),
                score: card.score,
            })
            .collect();
        scores.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.nick.cmp(&b.nick)));
        scores
    }
}

/// Per-channel game state machine.
pub struct GameEngine {
    categories: Arc<CategoryStore>,
    images: Arc<ImageStore>,
    defaults: GameSettings,
    session: Mutex<GameSession>,
}

impl GameEngine {
    /// Create an idle, closed game.
    #[must_use]
    pub fn new(
        categories: Arc<CategoryStore>,
        images: Arc<ImageStore>,
        defaults: GameSettings,
    ) -> Self {
        Self {
            categories,
            images,
            defaults,
            session: Mutex::new(GameSession {
                closed: true,
                running: false,
                auto: false,
                current_image: None,
                settings: defaults,
                round: 0,
                pause_elapsed: 0,
                delay_elapsed: 0,
                players: BTreeMap::new(),
            }),
        }
    }

    /// Default auto game timing.
    #[must_use]
    pub const fn defaults(&self) -> GameSettings {
        self.defaults
    }

    /// Start a game, clearing all scorecards.
    pub async fn start(&self, auto: bool) {
        self.session.lock().await.restart(auto);
        info!(auto, "Game started");
    }

    /// Start an automatic game.
    ///
    /// `pause` is raised to at least one second and `rounds` to at least
    /// one, so every round presents an image.
    pub async fn auto_start(&self, settings: GameSettings) {
        let mut session = self.session.lock().await;
        session.restart(true);
        session.settings = GameSettings {
            rounds: settings.rounds.max(1),
            delay: settings.delay,
            pause: settings.pause.max(1),
        };
        info!(
            rounds = session.settings.rounds,
            delay = session.settings.delay,
            pause = session.settings.pause,
            "Auto game started"
        );
    }

    /// Stop the game, settling the round in progress.
    ///
    /// Returns whether a game was running.
    pub async fn stop(&self) -> AppResult<bool> {
        let mut session = self.session.lock().await;
        let was_running = session.running;
        session.running = false;
        session.auto = false;
        self.settle_locked(&mut session).await?;
        if was_running {
            info!("Game stopped");
        }
        Ok(was_running)
    }

    /// Settle the current round and put up the next image.
    ///
    /// With `requested` that image is used, otherwise one is drawn at
    /// random. `None` when the store is empty.
    pub async fn next_image(&self, requested: Option<u32>) -> AppResult<Option<PresentedImage>> {
        let mut session = self.session.lock().await;
        if !session.running {
            return Err(AppError::Validation("Game is not running".to_string()));
        }
        self.settle_locked(&mut session).await?;

        let id = match requested {
            Some(id) => Some(id),
            None => {
                let ids = self.images.ids().await;
                choose(&ids)
            }
        };
        let Some(id) = id else {
            return Ok(None);
        };
        let url = self
            .images
            .url(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Image {id}")))?;
        session.current_image = Some(id);
        Ok(Some(PresentedImage { id, url }))
    }

    /// Put `id` up for voting without settling anything.
    pub async fn set_game_image(&self, id: u32) {
        self.session.lock().await.current_image = Some(id);
    }

    /// Image currently up for voting.
    pub async fn current_image(&self) -> Option<u32> {
        self.session.lock().await.current_image
    }

    /// Apply a player's words to the current image.
    pub async fn record_love(&self, nick: &str, words: &[&str]) -> AppResult<LoveOutcome> {
        let mut session = self.session.lock().await;
        if !session.running {
            return Err(AppError::Validation("Game is not running".to_string()));
        }

        let words: Vec<String> = words
            .iter()
            .map(|word| word.trim())
            .filter(|word| !normalize_keyword(word).is_empty())
            .map(str::to_string)
            .collect();
        let Some(image_id) = session.current_image else {
            return Ok(LoveOutcome::default());
        };

        let card = session.players.entry(nick.to_string()).or_default();
        card.loves
            .entry(image_id)
            .or_default()
            .extend(words.iter().cloned());

        let Some(image) = self.images.get(image_id).await else {
            return Ok(LoveOutcome {
                image: Some(image_id),
                ..LoveOutcome::default()
            });
        };
        let mut present: HashSet<u32> = image.categories.keys().copied().collect();

        let mut outcome = LoveOutcome {
            image: Some(image_id),
            ..LoveOutcome::default()
        };
        for word in &words {
            let category = self.categories.add(word).await?;
            if present.insert(category) {
                outcome.creates += 1;
            }
            self.images.add_votes(image_id, category, 1).await;
            outcome.categories.push(category);
        }

        card.creates += outcome.creates;
        card.score = card.compute_score();
        get_metrics().record_votes(outcome.categories.len() as u64);
        debug!(nick, image_id, votes = outcome.categories.len(), creates = outcome.creates, "Recorded love");
        Ok(outcome)
    }

    /// Clear all scorecards; the game keeps running.
    pub async fn reset_scores(&self) {
        self.session.lock().await.players.clear();
    }

    /// Standings, highest score first, ties by nick.
    pub async fn scores(&self) -> Vec<PlayerScore> {
        self.session.lock().await.scores()
    }

    /// A copy of one player's scorecard.
    pub async fn scorecard(&self, nick: &str) -> Option<Scorecard> {
        self.session.lock().await.players.get(nick).cloned()
    }

    /// Open the game to everyone. A running game is stopped.
    pub async fn open(&self) -> AppResult<bool> {
        self.set_closed(false).await
    }

    /// Restrict the game to operators. A running game is stopped.
    pub async fn close(&self) -> AppResult<bool> {
        self.set_closed(true).await
    }

    async fn set_closed(&self, closed: bool) -> AppResult<bool> {
        let mut session = self.session.lock().await;
        session.closed = closed;
        let was_running = session.running;
        session.running = false;
        session.auto = false;
        self.settle_locked(&mut session).await?;
        Ok(was_running)
    }

    /// Whether only operators may play.
    pub async fn is_closed(&self) -> bool {
        self.session.lock().await.closed
    }

    /// Whether a game is running.
    pub async fn is_running(&self) -> bool {
        self.session.lock().await.running
    }

    /// Whether an automatic game is running.
    pub async fn is_auto(&self) -> bool {
        let session = self.session.lock().await;
        session.running && session.auto
    }

    /// Advance an automatic game by one second.
    pub async fn tick(&self) -> AppResult<Vec<GameNotice>> {
        let mut session = self.session.lock().await;
        let mut notices = Vec::new();
        if !(session.running && session.auto) {
            return Ok(notices);
        }
        let settings = session.settings;

        let pause_left = settings.pause.saturating_sub(session.pause_elapsed);
        if pause_left == settings.pause {
            session.round += 1;
            notices.push(GameNotice::RoundStarting {
                round: session.round,
                seconds: pause_left,
            });
        }
        if pause_left > 0 {
            session.pause_elapsed += 1;
            if pause_left < PAUSE_COUNTDOWN {
                notices.push(GameNotice::RoundCountdown {
                    round: session.round,
                    seconds: pause_left,
                });
            }
            if pause_left == 1 {
                notices.push(self.draw_still_image(&mut session).await);
            }
            return Ok(notices);
        }

        let delay_left = settings.delay.saturating_sub(session.delay_elapsed);
        if delay_left > 0 {
            if delay_left == settings.delay {
                notices.push(GameNotice::VotingOpen {
                    round: session.round,
                    seconds: delay_left,
                });
            }
            session.delay_elapsed += 1;
            if delay_left < VOTING_COUNTDOWN {
                notices.push(GameNotice::VotingCountdown {
                    round: session.round,
                    seconds: delay_left,
                });
            }
            return Ok(notices);
        }

        let rounds_left = settings.rounds.saturating_sub(session.round);
        self.settle_locked(&mut session).await?;
        let scores = session.scores();
        if !scores.is_empty() {
            notices.push(GameNotice::Scores { scores });
        }
        session.current_image = None;
        session.pause_elapsed = 0;
        session.delay_elapsed = 0;

        if rounds_left == 0 {
            session.running = false;
            session.auto = false;
            notices.push(GameNotice::GameOver);
            info!(rounds = settings.rounds, "Auto game over");
        }
        Ok(notices)
    }

    async fn draw_still_image(&self, session: &mut GameSession) -> GameNotice {
        let ids = self.images.ids().await;
        if ids.is_empty() {
            return GameNotice::NoImages;
        }
        for _ in 0..MAX_IMAGE_DRAWS {
            let Some(id) = choose(&ids) else {
                break;
            };
            let Some(url) = self.images.url(id).await else {
                continue;
            };
            if !is_video(&url) {
                session.current_image = Some(id);
                return GameNotice::ImagePresented { id, url };
            }
        }
        GameNotice::GaveUp {
            tries: MAX_IMAGE_DRAWS,
        }
    }

    async fn settle_locked(&self, session: &mut GameSession) -> AppResult<()> {
        let Some(image_id) = session.current_image else {
            return Ok(());
        };
        // A failed checkpoint leaves the round open so it can settle later.
        self.images.checkpoint().await?;
        session.current_image = None;

        let tiers = self
            .images
            .get(image_id)
            .await
            .map(|image| image.top_categories(3))
            .unwrap_or_default();

        for card in session.players.values_mut() {
            for word in card.loves.remove(&image_id).unwrap_or_default() {
                let Some(category) = self.categories.index_of(&word).await else {
                    continue;
                };
                match tiers.iter().position(|tier| *tier == category) {
                    Some(0) => card.firsts += 1,
                    Some(1) => card.seconds += 1,
                    Some(2) => card.thirds += 1,
                    _ => {}
                }
            }
            card.score = card.compute_score();
        }

        get_metrics().record_round_settled();
        info!(image_id, ?tiers, players = session.players.len(), "Round settled");
        Ok(())
    }
}

fn choose(ids: &[u32]) -> Option<u32> {
    ids.choose(&mut rand::thread_rng()).copied()
}

fn is_video(url: &str) -> bool {
    url.contains(".mp4") || url.contains(".webm")
}
