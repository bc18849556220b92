//! Image store with quarantine.
//!
//! Live images are kept in `<channel>_images.csv`, one row per image:
//! `<id> <url> [<category id> <votes>]*`. Deleted images are appended to
//! `<channel>_deleted_images.csv` in the same format and can be restored
//! from there.
//!
//! Every mutation happens under a single mutex. File I/O is done while it
//! is held; network I/O never is.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use tagplay_common::{AppError, AppResult, RowFile, get_metrics};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One stored URL with its category votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Image id, unique among live images.
    pub id: u32,
    /// The stored URL.
    pub url: String,
    /// Category id to vote count.
    pub categories: BTreeMap<u32, u32>,
}

impl Image {
    /// A new image without votes.
    #[must_use]
    pub fn new(id: u32, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            categories: BTreeMap::new(),
        }
    }

    /// Whether the image carries `category`.
    #[must_use]
    pub fn has_category(&self, category: u32) -> bool {
        self.categories.contains_key(&category)
    }

    /// Votes for `category`, zero when absent.
    #[must_use]
    pub fn votes(&self, category: u32) -> u32 {
        self.categories.get(&category).copied().unwrap_or(0)
    }

    /// The `n` most voted categories. Equal counts rank the lower id first.
    #[must_use]
    pub fn top_categories(&self, n: usize) -> Vec<u32> {
        let mut ranked: Vec<(u32, u32)> = self
            .categories
            .iter()
            .map(|(category, votes)| (*category, *votes))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(n).map(|(category, _)| category).collect()
    }

    /// Fold categories listed in `replacements` into their canonical ids.
    ///
    /// Returns whether anything moved.
    pub fn merge_categories(&mut self, replacements: &HashMap<u32, u32>) -> bool {
        let stale: Vec<u32> = self
            .categories
            .keys()
            .filter(|category| replacements.contains_key(category))
            .copied()
            .collect();
        for old in &stale {
            if let (Some(votes), Some(canonical)) =
                (self.categories.remove(old), replacements.get(old))
            {
                *self.categories.entry(*canonical).or_insert(0) += votes;
            }
        }
        !stale.is_empty()
    }

    /// Serialize as a row.
    #[must_use]
    pub fn to_row(&self) -> String {
        let mut row = format!("{} {}", self.id, self.url);
        for (category, votes) in &self.categories {
            row.push_str(&format!(" {category} {votes}"));
        }
        row
    }

    /// Parse a row. Repeated category ids within one row are summed.
    pub fn parse_row(line: &str) -> AppResult<Self> {
        let mut fields = line.split(' ').filter(|field| !field.is_empty());
        let id = fields
            .next()
            .ok_or_else(|| AppError::Parse("Empty image row".to_string()))?;
        let id: u32 = id
            .parse()
            .map_err(|_| AppError::Parse(format!("Bad image id {id:?}")))?;
        if id == 0 || id == u32::MAX {
            return Err(AppError::Parse(format!("Image id {id} out of range")));
        }
        let url = fields
            .next()
            .ok_or_else(|| AppError::Parse(format!("Missing URL for image {id}")))?;

        let mut image = Self::new(id, url);
        while let Some(category) = fields.next() {
            let votes = fields.next().ok_or_else(|| {
                AppError::Parse(format!("Dangling category {category:?} on image {id}"))
            })?;
            let category: u32 = category
                .parse()
                .map_err(|_| AppError::Parse(format!("Bad category id {category:?}")))?;
            let votes: u32 = votes
                .parse()
                .map_err(|_| AppError::Parse(format!("Bad vote count {votes:?}")))?;
            *image.categories.entry(category).or_insert(0) += votes;
        }
        Ok(image)
    }

    fn absorb(&mut self, other: &Self) {
        for (category, votes) in &other.categories {
            *self.categories.entry(*category).or_insert(0) += votes;
        }
    }
}

/// A quarantine line. Lines that fail to parse are carried along verbatim.
enum QuarantineRow {
    Image(Image),
    Raw(String),
}

#[derive(Debug, Default)]
struct ImageState {
    live: BTreeMap<u32, Image>,
    next_id: u32,
}

impl ImageState {
    /// `u32::MAX` is never handed out, so every stored id has a successor.
    fn allocate(&mut self) -> AppResult<u32> {
        let id = self.next_id.max(1);
        if id == u32::MAX {
            return Err(AppError::Validation("Image id space exhausted".to_string()));
        }
        self.next_id = id + 1;
        Ok(id)
    }

    fn reset_next_id(&mut self) {
        self.next_id = self
            .live
            .keys()
            .next_back()
            .map_or(1, |max| max.saturating_add(1));
    }
}

/// Per-channel image store.
#[derive(Debug)]
pub struct ImageStore {
    live_file: RowFile,
    quarantine_file: RowFile,
    state: Mutex<ImageState>,
}

impl ImageStore {
    /// Create an empty store. Call [`Self::load`] to read the live file.
    #[must_use]
    pub fn new(live_path: impl Into<PathBuf>, quarantine_path: impl Into<PathBuf>) -> Self {
        Self {
            live_file: RowFile::new(live_path),
            quarantine_file: RowFile::new(quarantine_path),
            state: Mutex::new(ImageState {
                live: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Read the live file.
    ///
    /// Rows repeating a URL are merged into the first row seen with that
    /// URL (votes summed); a row reusing an id already taken by another URL
    /// gets a fresh id. Either case renumbers the store afterwards.
    /// Malformed rows are logged and skipped.
    pub async fn load(&self) -> AppResult<usize> {
        let lines = self.live_file.read_lines().await?;

        let mut live: BTreeMap<u32, Image> = BTreeMap::new();
        let mut by_url: HashMap<String, u32> = HashMap::new();
        let mut displaced: Vec<Image> = Vec::new();
        let mut merged = 0usize;

        for (lineno, line) in lines.iter().enumerate() {
            let image = match Image::parse_row(line) {
                Ok(image) => image,
                Err(e) => {
                    warn!(
                        file = %self.live_file.path().display(),
                        line = lineno + 1,
                        error = %e,
                        "Skipping malformed image row"
                    );
                    get_metrics().record_skipped_row();
                    continue;
                }
            };

            if let Some(first) = by_url.get(&image.url).and_then(|id| live.get_mut(id)) {
                first.absorb(&image);
                merged += 1;
            } else if live.contains_key(&image.id) {
                displaced.push(image);
            } else {
                by_url.insert(image.url.clone(), image.id);
                live.insert(image.id, image);
            }
        }

        let mut state = self.state.lock().await;
        state.live = live;
        state.reset_next_id();

        for mut image in displaced {
            if let Some(first) = by_url.get(&image.url).and_then(|id| state.live.get_mut(id)) {
                first.absorb(&image);
                merged += 1;
                continue;
            }
            let old_id = image.id;
            image.id = state.allocate()?;
            warn!(old_id, new_id = image.id, url = %image.url, "Image id reused, reassigned");
            by_url.insert(image.url.clone(), image.id);
            state.live.insert(image.id, image);
            merged += 1;
        }

        if merged > 0 {
            info!(
                file = %self.live_file.path().display(),
                merged,
                "Merged duplicate image rows"
            );
            self.renumber_locked(&mut state).await?;
        }

        let count = state.live.len();
        info!(file = %self.live_file.path().display(), count, "Loaded images");
        Ok(count)
    }

    /// Reassign ids densely from 1, keeping their order, and rewrite the file.
    pub async fn renumber(&self) -> AppResult<usize> {
        let mut state = self.state.lock().await;
        self.renumber_locked(&mut state).await
    }

    async fn renumber_locked(&self, state: &mut ImageState) -> AppResult<usize> {
        let old = std::mem::take(&mut state.live);
        for (new_id, (_, mut image)) in (1u32..).zip(old) {
            image.id = new_id;
            state.live.insert(new_id, image);
        }
        state.reset_next_id();
        self.write_live(state).await?;
        info!(file = %self.live_file.path().display(), count = state.live.len(), "Renumbered images");
        Ok(state.live.len())
    }

    /// Add a URL as a new image without votes.
    pub async fn add(&self, url: &str) -> AppResult<u32> {
        validate_url(url)?;
        let mut state = self.state.lock().await;
        self.add_locked(&mut state, url).await
    }

    /// Return the id of an image whose URL contains `url`, adding it if none does.
    ///
    /// The flag is `true` when the image was created.
    pub async fn find_or_add(&self, url: &str) -> AppResult<(u32, bool)> {
        validate_url(url)?;
        let mut state = self.state.lock().await;
        if let Some(id) = find_by_url_in(&state.live, url) {
            return Ok((id, false));
        }
        let id = self.add_locked(&mut state, url).await?;
        Ok((id, true))
    }

    async fn add_locked(&self, state: &mut ImageState, url: &str) -> AppResult<u32> {
        let id = state.allocate()?;
        let image = Image::new(id, url);
        self.live_file.append_line(&image.to_row()).await?;
        state.live.insert(id, image);
        get_metrics().record_image_added();
        debug!(id, url, "Added image");
        Ok(id)
    }

    /// First live image, in id order, whose URL contains `needle`.
    pub async fn find_by_url(&self, needle: &str) -> Option<u32> {
        find_by_url_in(&self.state.lock().await.live, needle)
    }

    /// A copy of a live image.
    pub async fn get(&self, id: u32) -> Option<Image> {
        self.state.lock().await.live.get(&id).cloned()
    }

    /// URL of a live image.
    pub async fn url(&self, id: u32) -> Option<String> {
        self.state.lock().await.live.get(&id).map(|image| image.url.clone())
    }

    /// All live ids, ascending.
    pub async fn ids(&self) -> Vec<u32> {
        self.state.lock().await.live.keys().copied().collect()
    }

    /// Number of live images.
    pub async fn len(&self) -> usize {
        self.state.lock().await.live.len()
    }

    /// Whether there are no live images.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.live.is_empty()
    }

    /// Move a live image into quarantine. `false` when `id` is not live.
    ///
    /// Memory only changes once both files are written; a failed live
    /// rewrite takes the row back out of quarantine.
    pub async fn delete(&self, id: u32) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.live.get(&id).map(Image::to_row) else {
            return Ok(false);
        };

        let quarantine_before = self.quarantine_file.read_lines().await?;
        self.quarantine_file.append_line(&row).await?;
        let remaining = state
            .live
            .values()
            .filter(|image| image.id != id)
            .map(Image::to_row);
        if let Err(e) = self.live_file.replace_lines(remaining).await {
            if let Err(rollback) = self.quarantine_file.replace_lines(quarantine_before).await {
                warn!(id, error = %rollback, "Failed to roll back quarantine append");
            }
            return Err(e);
        }

        let Some(image) = state.live.remove(&id) else {
            return Ok(false);
        };
        get_metrics().record_checkpoint();
        get_metrics().record_quarantine();
        info!(id, url = %image.url, "Quarantined image");
        Ok(true)
    }

    /// Bring a quarantined image back.
    ///
    /// If `id` is free it comes back under the same id with its votes.
    /// Otherwise it gets a new id and no votes. Returns the live id, or
    /// `None` if `id` is not in quarantine.
    pub async fn restore(&self, id: u32) -> AppResult<Option<u32>> {
        let mut state = self.state.lock().await;
        let mut rows = self.read_quarantine().await?;

        let Some(pos) = rows
            .iter()
            .position(|row| matches!(row, QuarantineRow::Image(image) if image.id == id))
        else {
            return Ok(None);
        };
        let QuarantineRow::Image(mut image) = rows.remove(pos) else {
            return Ok(None);
        };

        let next_id_before = state.next_id;
        if state.live.contains_key(&id) {
            let new_id = state.allocate()?;
            warn!(id, new_id, url = %image.url, "Restore slot taken, votes dropped");
            image = Image::new(new_id, image.url);
        } else if id >= state.next_id {
            state.next_id = id.saturating_add(1);
        }

        // Memory only changes once both files are written; a failed
        // quarantine rewrite takes the row back out of the live file.
        let restored_id = image.id;
        if let Err(e) = self.live_file.append_line(&image.to_row()).await {
            state.next_id = next_id_before;
            return Err(e);
        }
        if let Err(e) = self.write_quarantine(rows).await {
            state.next_id = next_id_before;
            if let Err(rollback) = self.write_live(&state).await {
                warn!(id, error = %rollback, "Failed to roll back restored row");
            }
            return Err(e);
        }
        state.live.insert(restored_id, image);

        get_metrics().record_restore();
        info!(id, restored_id, "Restored image");
        Ok(Some(restored_id))
    }

    /// Ids in quarantine, ascending.
    pub async fn deleted_ids(&self) -> AppResult<Vec<u32>> {
        let _state = self.state.lock().await;
        let mut ids: Vec<u32> = self
            .read_quarantine()
            .await?
            .into_iter()
            .filter_map(|row| match row {
                QuarantineRow::Image(image) => Some(image.id),
                QuarantineRow::Raw(_) => None,
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// URL of the first quarantined row with `id`.
    pub async fn deleted_url(&self, id: u32) -> AppResult<Option<String>> {
        let _state = self.state.lock().await;
        Ok(self
            .read_quarantine()
            .await?
            .into_iter()
            .find_map(|row| match row {
                QuarantineRow::Image(image) if image.id == id => Some(image.url),
                _ => None,
            }))
    }

    /// Live images carrying any of `categories`, ascending.
    pub async fn find_matches(&self, categories: &[u32]) -> Vec<u32> {
        if categories.is_empty() {
            return Vec::new();
        }
        self.state
            .lock()
            .await
            .live
            .values()
            .filter(|image| categories.iter().any(|c| image.has_category(*c)))
            .map(|image| image.id)
            .collect()
    }

    /// Replace `old` with `new` in every live URL. Memory only; returns how
    /// many URLs changed.
    pub async fn rewrite_url_prefix(&self, old: &str, new: &str) -> usize {
        if old.is_empty() {
            return 0;
        }
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for image in state.live.values_mut() {
            if image.url.contains(old) {
                image.url = image.url.replace(old, new);
                changed += 1;
            }
        }
        info!(old, new, changed, "Rewrote URL prefix");
        changed
    }

    /// Point a live image at a new URL. Memory only.
    pub async fn set_url(&self, id: u32, url: &str) -> bool {
        match self.state.lock().await.live.get_mut(&id) {
            Some(image) => {
                image.url = url.to_string();
                true
            }
            None => false,
        }
    }

    /// Add `n` votes for `category` on a live image. Memory only.
    ///
    /// Returns the previous count (`Some(0)` when the category is new on
    /// the image), or `None` when the image is not live.
    pub async fn add_votes(&self, id: u32, category: u32, n: u32) -> Option<u32> {
        let mut state = self.state.lock().await;
        let image = state.live.get_mut(&id)?;
        let votes = image.categories.entry(category).or_insert(0);
        let previous = *votes;
        *votes = votes.saturating_add(n);
        Some(previous)
    }

    /// Drop `category` from a live image. Memory only.
    ///
    /// `None` when the image is not live, otherwise whether it carried the category.
    pub async fn remove_category(&self, id: u32, category: u32) -> Option<bool> {
        let mut state = self.state.lock().await;
        let image = state.live.get_mut(&id)?;
        Some(image.categories.remove(&category).is_some())
    }

    /// Fold replaced category ids on live images; checkpoints if anything changed.
    pub async fn remove_duplicate_categories(
        &self,
        replacements: &HashMap<u32, u32>,
    ) -> AppResult<bool> {
        if replacements.is_empty() {
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        let mut changed = 0usize;
        for image in state.live.values_mut() {
            if image.merge_categories(replacements) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.write_live(&state).await?;
            info!(changed, "Merged duplicate categories on live images");
        }
        Ok(changed > 0)
    }

    /// Fold replaced category ids on quarantined images; rewrites the
    /// quarantine file if anything changed.
    pub async fn remove_duplicate_quarantined_categories(
        &self,
        replacements: &HashMap<u32, u32>,
    ) -> AppResult<bool> {
        if replacements.is_empty() {
            return Ok(false);
        }
        let _state = self.state.lock().await;
        let mut rows = self.read_quarantine().await?;
        let mut changed = 0usize;
        for row in &mut rows {
            if let QuarantineRow::Image(image) = row {
                if image.merge_categories(replacements) {
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.write_quarantine(rows).await?;
            info!(changed, "Merged duplicate categories on quarantined images");
        }
        Ok(changed > 0)
    }

    /// Rewrite the live file from memory. Returns the number of rows.
    pub async fn checkpoint(&self) -> AppResult<usize> {
        let state = self.state.lock().await;
        self.write_live(&state).await?;
        Ok(state.live.len())
    }

    async fn write_live(&self, state: &ImageState) -> AppResult<()> {
        self.live_file
            .replace_lines(state.live.values().map(Image::to_row))
            .await?;
        get_metrics().record_checkpoint();
        Ok(())
    }

    async fn read_quarantine(&self) -> AppResult<Vec<QuarantineRow>> {
        let lines = self.quarantine_file.read_lines().await?;
        Ok(lines
            .into_iter()
            .map(|line| match Image::parse_row(&line) {
                Ok(image) => QuarantineRow::Image(image),
                Err(e) => {
                    debug!(error = %e, "Keeping unparsable quarantine row");
                    QuarantineRow::Raw(line)
                }
            })
            .collect())
    }

    async fn write_quarantine(&self, rows: Vec<QuarantineRow>) -> AppResult<()> {
        let mut images = Vec::new();
        let mut raw = Vec::new();
        for row in rows {
            match row {
                QuarantineRow::Image(image) => images.push(image),
                QuarantineRow::Raw(line) => raw.push(line),
            }
        }
        images.sort_by_key(|image| image.id);
        let lines: Vec<String> = images.iter().map(Image::to_row).chain(raw).collect();
        self.quarantine_file.replace_lines(lines).await
    }
}

fn find_by_url_in(live: &BTreeMap<u32, Image>, needle: &str) -> Option<u32> {
    live.values()
        .find(|image| image.url.contains(needle))
        .map(|image| image.id)
}

fn validate_url(url: &str) -> AppResult<()> {
    if url.is_empty() {
        return Err(AppError::Validation("URL is empty".to_string()));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(format!("URL contains whitespace: {url:?}")));
    }
    Ok(())
}
