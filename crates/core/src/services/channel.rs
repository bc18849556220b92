//! Channel service.
//!
//! A channel owns one category store, one image store and the engines that
//! run on top of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tagplay_common::{AppError, AppResult, Config, RowFile, unquote_plus};
use tracing::{info, warn};
use url::Url;

use crate::services::autoplay::{Autoplay, AutoplaySettings, select_range};
use crate::services::category::CategoryStore;
use crate::services::game::{GameEngine, GameSettings};
use crate::services::housekeeping::{HousekeepingReport, resolve_duplicates};
use crate::services::image::ImageStore;
use crate::services::import::{ImportQueue, ImportStep, parse_import_line, split_keywords};
use crate::services::liveness::{LinkChecker, LivenessSweeper};
use crate::services::notice::{AutoplayNotice, GameNotice, ImportNotice, SweepNotice};

/// Storage key for a channel name: leading `#`/`&` stripped, lower-cased.
#[must_use]
pub fn channel_key(name: &str) -> String {
    name.trim().trim_start_matches(['#', '&']).to_lowercase()
}

/// Row files backing one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFiles {
    /// `<key>_categories.csv`
    pub categories: PathBuf,
    /// `<key>_images.csv`
    pub images: PathBuf,
    /// `<key>_deleted_images.csv`
    pub quarantine: PathBuf,
}

impl ChannelFiles {
    /// Paths for channel `key` under `data_dir`.
    #[must_use]
    pub fn in_dir(data_dir: &Path, key: &str) -> Self {
        Self {
            categories: data_dir.join(format!("{key}_categories.csv")),
            images: data_dir.join(format!("{key}_images.csv")),
            quarantine: data_dir.join(format!("{key}_deleted_images.csv")),
        }
    }
}

/// Reject URLs from hosts that expire or stopped serving shared content.
pub fn check_admission(url: &str) -> AppResult<()> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL {url}: {e}")))?;
    let host = parsed.host_str().unwrap_or_default();
    if host.contains("uguu.") {
        return Err(AppError::Validation(format!("temporary url {url} not allowed")));
    }
    if host.contains("reblogme.") || host.contains("bdsmlr.") {
        return Err(AppError::Validation(
            "reblogme and bdsmlr no longer permit sharing".to_string(),
        ));
    }
    if parsed.query().is_some_and(|query| query.contains("secure=")) {
        return Err(AppError::Validation(format!("Secure url {url} not allowed")));
    }
    Ok(())
}

/// Result of [`Channel::add_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddImageOutcome {
    /// Live image id.
    pub id: u32,
    /// `false` when the URL was already stored.
    pub created: bool,
    /// Normalized keywords that received a vote.
    pub keywords: Vec<String>,
}

/// Result of [`Channel::purge_keyword`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Removed category id.
    Removed(u32),
    /// Number of live images still using the keyword.
    InUse(usize),
    /// No such keyword.
    Unknown,
}

/// Which ids an autoplay run walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoplaySelection {
    /// Sorted ids between two bounds, inclusive.
    Range { begin: Option<u32>, end: Option<u32> },
    /// Images matching keyword groups.
    Keywords(Vec<String>),
}

/// One channel.
pub struct Channel {
    name: String,
    key: String,
    categories: Arc<CategoryStore>,
    images: Arc<ImageStore>,
    game: GameEngine,
    autoplay: Autoplay,
    autoplay_delay: u32,
    sweeper: LivenessSweeper,
    imports: ImportQueue,
}

impl Channel {
    /// Load a channel's stores and resolve duplicate keywords.
    pub async fn open(name: &str, config: &Config, checker: Arc<LinkChecker>) -> AppResult<Self> {
        let key = channel_key(name);
        if key.is_empty() {
            return Err(AppError::Validation(format!("Invalid channel name: {name:?}")));
        }
        let files = ChannelFiles::in_dir(&config.storage.data_dir, &key);

        let categories = Arc::new(CategoryStore::new(files.categories));
        let images = Arc::new(ImageStore::new(files.images, files.quarantine));
        categories.load().await?;
        images.load().await?;

        let report = resolve_duplicates(&categories, &images).await?;
        if !report.is_clean() {
            info!(channel = %key, replaced = report.replacements.len(), "Merged duplicate keywords on open");
        }

        let game = GameEngine::new(
            categories.clone(),
            images.clone(),
            GameSettings::from(&config.game),
        );
        let sweeper = LivenessSweeper::new(images.clone(), checker);

        info!(
            channel = %key,
            categories = categories.len().await,
            images = images.len().await,
            "Opened channel"
        );

        Ok(Self {
            name: name.trim().to_string(),
            key,
            categories,
            images,
            game,
            autoplay: Autoplay::new(),
            autoplay_delay: config.autoplay.delay,
            sweeper,
            imports: ImportQueue::new(),
        })
    }

    /// Channel name as configured.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Category dictionary.
    #[must_use]
    pub fn categories(&self) -> &Arc<CategoryStore> {
        &self.categories
    }

    /// Image store.
    #[must_use]
    pub fn images(&self) -> &Arc<ImageStore> {
        &self.images
    }

    /// Game engine.
    #[must_use]
    pub const fn game(&self) -> &GameEngine {
        &self.game
    }

    /// Autoplay state.
    #[must_use]
    pub const fn autoplay(&self) -> &Autoplay {
        &self.autoplay
    }

    /// Liveness sweeper.
    #[must_use]
    pub const fn sweeper(&self) -> &LivenessSweeper {
        &self.sweeper
    }

    /// Pending bulk import lines.
    #[must_use]
    pub const fn imports(&self) -> &ImportQueue {
        &self.imports
    }

    /// Store a URL and give it one vote per keyword.
    ///
    /// An already stored URL keeps its id and gains the votes. Votes are
    /// held in memory until the next checkpoint.
    pub async fn add_image(&self, url: &str, keywords: &[&str]) -> AppResult<AddImageOutcome> {
        check_admission(url)?;
        let (id, created) = self.images.find_or_add(url).await?;
        let keywords = self.vote_keywords(id, keywords).await?;
        info!(channel = %self.key, id, url, created, keywords = %keywords.join(","), "Added image");
        Ok(AddImageOutcome {
            id,
            created,
            keywords,
        })
    }

    /// Add one vote per keyword to a live image.
    pub async fn add_keywords(&self, id: u32, words: &[&str]) -> AppResult<Vec<String>> {
        if self.images.get(id).await.is_none() {
            return Err(AppError::NotFound(format!("Image {id}")));
        }
        self.vote_keywords(id, words).await
    }

    async fn vote_keywords(&self, id: u32, words: &[&str]) -> AppResult<Vec<String>> {
        let keywords = split_keywords(words.iter().copied());
        for keyword in &keywords {
            let category = self.categories.add(keyword).await?;
            self.images.add_votes(id, category, 1).await;
        }
        Ok(keywords)
    }

    /// Drop keywords from a live image, returning the ones it carried.
    pub async fn remove_keywords(&self, id: u32, words: &[&str]) -> AppResult<Vec<String>> {
        if self.images.get(id).await.is_none() {
            return Err(AppError::NotFound(format!("Image {id}")));
        }
        let mut removed = Vec::new();
        for keyword in split_keywords(words.iter().copied()) {
            let Some(category) = self.categories.index_of(&keyword).await else {
                continue;
            };
            if self.images.remove_category(id, category).await == Some(true) {
                removed.push(keyword);
            }
        }
        Ok(removed)
    }

    /// Images matching every group, where a group is a comma-separated list
    /// of alternatives.
    ///
    /// Without `exact` a keyword matches every category containing it.
    pub async fn match_images(&self, groups: &[&str], exact: bool) -> Vec<u32> {
        let mut matched: Option<Vec<u32>> = None;
        for group in groups {
            let mut categories = Vec::new();
            for keyword in group.split(',') {
                let keyword = unquote_plus(&keyword.to_lowercase());
                let found = if exact {
                    self.categories.find_matches_exact(&keyword).await
                } else {
                    self.categories.find_matches(&keyword).await
                };
                categories.extend(found);
            }
            let ids = self.images.find_matches(&categories).await;
            let narrowed = match matched {
                None => ids,
                Some(previous) => previous.into_iter().filter(|id| ids.contains(id)).collect(),
            };
            if narrowed.is_empty() {
                return narrowed;
            }
            matched = Some(narrowed);
        }
        matched.unwrap_or_default()
    }

    /// Delete a keyword that no live image uses.
    pub async fn purge_keyword(&self, keyword: &str) -> AppResult<PurgeOutcome> {
        let keyword = unquote_plus(keyword.trim());
        let Some(category) = self.categories.index_of(&keyword).await else {
            return Ok(PurgeOutcome::Unknown);
        };
        let users = self.images.find_matches(&[category]).await;
        if !users.is_empty() {
            return Ok(PurgeOutcome::InUse(users.len()));
        }
        self.categories.delete(category).await?;
        info!(channel = %self.key, category, keyword = %keyword, "Purged keyword");
        Ok(PurgeOutcome::Removed(category))
    }

    /// Write both stores to disk.
    pub async fn checkpoint(&self) -> AppResult<()> {
        self.categories.checkpoint().await?;
        self.images.checkpoint().await?;
        Ok(())
    }

    /// Merge duplicate keywords.
    pub async fn housekeeping(&self) -> AppResult<HousekeepingReport> {
        resolve_duplicates(&self.categories, &self.images).await
    }

    /// Start autoplay over the selected ids.
    ///
    /// `delay` falls back to the configured default. Returns `false` when
    /// the selection is empty.
    pub async fn start_autoplay(
        &self,
        mut settings: AutoplaySettings,
        delay: Option<u32>,
        selection: &AutoplaySelection,
    ) -> bool {
        settings.delay = delay.unwrap_or(self.autoplay_delay);
        let snapshot = match selection {
            AutoplaySelection::Range { begin, end } => {
                select_range(&self.images.ids().await, *begin, *end)
            }
            AutoplaySelection::Keywords(groups) => {
                let groups: Vec<&str> = groups.iter().map(String::as_str).collect();
                self.match_images(&groups, false).await
            }
        };
        self.autoplay.enable(settings, snapshot).await
    }

    /// One clock tick of autoplay.
    pub async fn autoplay_tick(&self) -> Option<AutoplayNotice> {
        if !self.autoplay.tick().await {
            return None;
        }
        match self.autoplay.next_id().await {
            Some(id) => {
                let url = self.images.url(id).await?;
                Some(AutoplayNotice::Show { id, url })
            }
            None => Some(AutoplayNotice::Complete),
        }
    }

    /// One clock tick of the automatic game.
    pub async fn game_tick(&self) -> AppResult<Vec<GameNotice>> {
        self.game.tick().await
    }

    /// Check one URL if a sweep is active.
    pub async fn liveness_tick(&self) -> AppResult<Option<SweepNotice>> {
        self.sweeper.tick().await
    }

    /// Queue the `add` lines of a file for import.
    pub async fn enqueue_import_file(&self, path: impl Into<PathBuf>) -> AppResult<usize> {
        let file = RowFile::new(path);
        if !file.exists().await {
            return Err(AppError::NotFound(format!(
                "Import file {}",
                file.path().display()
            )));
        }
        let lines = file.read_lines().await?;
        Ok(self.imports.enqueue(lines).await)
    }

    /// Import the next queued line.
    pub async fn import_tick(&self) -> AppResult<Option<ImportNotice>> {
        let line = match self.imports.next_step().await {
            ImportStep::Idle => return Ok(None),
            ImportStep::Complete(notice) => return Ok(Some(notice)),
            ImportStep::Line(line) => line,
        };

        match parse_import_line(&line) {
            Some(command) => {
                let keywords: Vec<&str> = command.keywords.iter().map(String::as_str).collect();
                if let Err(e) = self.add_image(&command.url, &keywords).await {
                    warn!(channel = %self.key, line = %line, error = %e, "Import line rejected");
                }
            }
            None => warn!(channel = %self.key, line = %line, "Skipping malformed import line"),
        }
        tagplay_common::get_metrics().record_import();
        Ok(self.imports.mark_processed().await)
    }

    /// Stop everything and write the stores.
    pub async fn close(&self) -> AppResult<()> {
        self.autoplay.disable().await;
        self.sweeper.disable().await;
        self.imports.clear().await;
        self.game.stop().await?;
        self.checkpoint().await?;
        info!(channel = %self.key, "Closed channel");
        Ok(())
    }
}
