//! Category dictionary.
//!
//! Maps numeric category ids to normalized keywords and back. Rows are
//! persisted as `<id> <quote_plus(keyword)>`; new keywords are appended,
//! deletions and duplicate compaction rewrite the whole file.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use tagplay_common::{AppError, AppResult, RowFile, get_metrics, quote_plus, unquote_plus};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Normalize a raw keyword: `+` and percent escapes decoded, trimmed, case-folded.
#[must_use]
pub fn normalize_keyword(raw: &str) -> String {
    caseless::default_case_fold_str(unquote_plus(raw).trim())
}

#[derive(Debug, Default)]
struct CategoryMaps {
    by_id: BTreeMap<u32, String>,
    by_keyword: HashMap<String, u32>,
}

impl CategoryMaps {
    /// The reverse map always points at the largest id carrying a keyword.
    fn insert(&mut self, id: u32, keyword: String) {
        if let Some(previous) = self.by_id.insert(id, keyword.clone()) {
            if previous != keyword && self.by_keyword.get(&previous) == Some(&id) {
                self.repoint(&previous);
            }
        }
        if self.by_keyword.get(&keyword).is_none_or(|current| *current <= id) {
            self.by_keyword.insert(keyword, id);
        }
    }

    fn remove(&mut self, id: u32) -> Option<String> {
        let keyword = self.by_id.remove(&id)?;
        if self.by_keyword.get(&keyword) == Some(&id) {
            self.repoint(&keyword);
        }
        Some(keyword)
    }

    /// Point `keyword` at the largest id still carrying it, or drop it.
    fn repoint(&mut self, keyword: &str) {
        let largest = self
            .by_id
            .iter()
            .rev()
            .find(|(_, candidate)| candidate.as_str() == keyword)
            .map(|(id, _)| *id);
        match largest {
            Some(id) => {
                self.by_keyword.insert(keyword.to_string(), id);
            }
            None => {
                self.by_keyword.remove(keyword);
            }
        }
    }

    fn next_id(&self) -> AppResult<u32> {
        next_id_after(self.by_id.keys().next_back().copied())
    }

    fn rows(&self) -> Vec<String> {
        self.by_id
            .iter()
            .map(|(id, keyword)| format!("{id} {}", quote_plus(keyword)))
            .collect()
    }
}

/// Per-channel category dictionary.
#[derive(Debug)]
pub struct CategoryStore {
    file: RowFile,
    maps: Mutex<CategoryMaps>,
}

impl CategoryStore {
    /// Create an empty store backed by `path`. Call [`Self::load`] to read it.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: RowFile::new(path),
            maps: Mutex::new(CategoryMaps::default()),
        }
    }

    /// Read the backing file, replacing the in-memory maps.
    ///
    /// Malformed rows are logged and skipped. A row reusing an id already
    /// taken earlier in the file gets a fresh id and the file is rewritten.
    /// Returns the number of rows kept.
    pub async fn load(&self) -> AppResult<usize> {
        let lines = self.file.read_lines().await?;
        let mut rows = Vec::with_capacity(lines.len());
        for (lineno, line) in lines.iter().enumerate() {
            match parse_row(line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(
                        file = %self.file.path().display(),
                        line = lineno + 1,
                        error = %e,
                        "Skipping malformed category row"
                    );
                    get_metrics().record_skipped_row();
                }
            }
        }
        rows.sort_by_key(|(id, _)| *id);

        let mut maps = CategoryMaps::default();
        let mut displaced = Vec::new();
        for (id, keyword) in rows {
            if maps.by_id.contains_key(&id) {
                displaced.push((id, keyword));
            } else {
                maps.insert(id, keyword);
            }
        }
        let reassigned = !displaced.is_empty();
        for (old_id, keyword) in displaced {
            let new_id = maps.next_id()?;
            warn!(old_id, new_id, keyword = %keyword, "Category id reused, reassigned");
            maps.insert(new_id, keyword);
        }

        let count = maps.by_id.len();
        let mut current = self.maps.lock().await;
        *current = maps;
        if reassigned {
            self.write(&current).await?;
        }
        drop(current);

        info!(file = %self.file.path().display(), count, "Loaded categories");
        Ok(count)
    }

    /// Return the id for `keyword`, creating it if needed.
    pub async fn add(&self, keyword: &str) -> AppResult<u32> {
        let keyword = normalize_keyword(keyword);
        if keyword.is_empty() {
            return Err(AppError::Validation("Keyword is empty".to_string()));
        }

        let mut maps = self.maps.lock().await;
        if let Some(id) = maps.by_keyword.get(&keyword) {
            return Ok(*id);
        }

        let id = maps.next_id()?;
        self.file
            .append_line(&format!("{id} {}", quote_plus(&keyword)))
            .await?;
        debug!(id, keyword = %keyword, "Added category");
        maps.insert(id, keyword);
        Ok(id)
    }

    /// Id of a keyword, if known.
    pub async fn index_of(&self, keyword: &str) -> Option<u32> {
        let keyword = normalize_keyword(keyword);
        self.maps.lock().await.by_keyword.get(&keyword).copied()
    }

    /// Whether `id` exists.
    pub async fn has(&self, id: u32) -> bool {
        self.maps.lock().await.by_id.contains_key(&id)
    }

    /// Keyword of `id`, if it exists.
    pub async fn keyword(&self, id: u32) -> Option<String> {
        self.maps.lock().await.by_id.get(&id).cloned()
    }

    /// Number of categories.
    pub async fn len(&self) -> usize {
        self.maps.lock().await.by_id.len()
    }

    /// Whether the dictionary is empty.
    pub async fn is_empty(&self) -> bool {
        self.maps.lock().await.by_id.is_empty()
    }

    /// Remove a category. Returns `false` if the id was unknown.
    pub async fn delete(&self, id: u32) -> AppResult<bool> {
        let mut maps = self.maps.lock().await;
        let Some(keyword) = maps.remove(id) else {
            return Ok(false);
        };
        self.write(&maps).await?;
        info!(id, keyword = %keyword, "Deleted category");
        Ok(true)
    }

    /// Ids whose keyword contains `needle`.
    pub async fn find_matches(&self, needle: &str) -> Vec<u32> {
        let needle = normalize_keyword(needle);
        if needle.is_empty() {
            return Vec::new();
        }
        self.maps
            .lock()
            .await
            .by_id
            .iter()
            .filter(|(_, keyword)| keyword.contains(&needle))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids whose keyword equals `keyword` after normalization.
    pub async fn find_matches_exact(&self, keyword: &str) -> Vec<u32> {
        let keyword = normalize_keyword(keyword);
        self.maps
            .lock()
            .await
            .by_keyword
            .get(&keyword)
            .map(|id| vec![*id])
            .unwrap_or_default()
    }

    /// All keywords in id order, without repeats.
    pub async fn all_keywords(&self) -> Vec<String> {
        let maps = self.maps.lock().await;
        let mut seen = std::collections::HashSet::new();
        maps.by_id
            .values()
            .filter(|keyword| seen.insert(keyword.as_str()))
            .cloned()
            .collect()
    }

    /// Collapse ids that share a keyword onto the largest id of the group.
    ///
    /// The replaced ids are removed and the file rewritten. Returns the
    /// `replaced id -> canonical id` mapping, empty when nothing changed.
    pub async fn find_duplicates(&self) -> AppResult<HashMap<u32, u32>> {
        let mut maps = self.maps.lock().await;

        let mut groups: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
        for (id, keyword) in &maps.by_id {
            groups.entry(keyword.as_str()).or_default().push(*id);
        }

        let mut replacements = HashMap::new();
        for ids in groups.values() {
            if let Some((canonical, rest)) = ids.split_last() {
                for id in rest {
                    replacements.insert(*id, *canonical);
                }
            }
        }

        if replacements.is_empty() {
            return Ok(replacements);
        }

        for (old, canonical) in &replacements {
            if let Some(keyword) = maps.by_id.remove(old) {
                maps.by_keyword.insert(keyword, *canonical);
            }
        }
        self.write(&maps).await?;
        info!(
            file = %self.file.path().display(),
            replaced = replacements.len(),
            "Merged duplicate categories"
        );
        Ok(replacements)
    }

    /// Rewrite the backing file from memory. Returns the number of rows.
    pub async fn checkpoint(&self) -> AppResult<usize> {
        let maps = self.maps.lock().await;
        self.write(&maps).await?;
        Ok(maps.by_id.len())
    }

    async fn write(&self, maps: &CategoryMaps) -> AppResult<()> {
        self.file.replace_lines(maps.rows()).await?;
        get_metrics().record_checkpoint();
        Ok(())
    }
}

/// The id following `max`, or 1 for an empty dictionary.
///
/// `u32::MAX` is never handed out, so every stored id has a successor.
fn next_id_after(max: Option<u32>) -> AppResult<u32> {
    match max {
        None => Ok(1),
        Some(max) if max < u32::MAX - 1 => Ok(max + 1),
        Some(_) => Err(AppError::Validation("Category id space exhausted".to_string())),
    }
}

fn parse_row(line: &str) -> AppResult<(u32, String)> {
    let (id, keyword) = line
        .split_once(' ')
        .ok_or_else(|| AppError::Parse(format!("Missing keyword: {line:?}")))?;
    let id: u32 = id
        .parse()
        .map_err(|_| AppError::Parse(format!("Bad category id {id:?}")))?;
    if id == 0 || id == u32::MAX {
        return Err(AppError::Parse(format!("Category id {id} out of range")));
    }
    let keyword = normalize_keyword(keyword);
    if keyword.is_empty() {
        return Err(AppError::Parse(format!("Empty keyword for id {id}")));
    }
    Ok((id, keyword))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use maplit::hashmap;

    async fn store_with(contents: &str) -> (tempfile::TempDir, CategoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pics_categories.csv");
        tokio::fs::write(&path, contents).await.unwrap();
        let store = CategoryStore::new(&path);
        store.load().await.unwrap();
        (dir, store)
    }

    #[test]
    fn test_normalize_keyword() {
        assert_eq!(normalize_keyword("  Blue+Sky "), "blue sky");
        assert_eq!(normalize_keyword("Caf%C3%A9"), "café");
        assert_eq!(normalize_keyword("   "), "");
        assert_eq!(normalize_keyword("Straße"), "strasse");
        assert_eq!(normalize_keyword("STRASSE"), normalize_keyword("straße"));
    }

    #[tokio::test]
    async fn test_case_folded_keywords_share_an_id() {
        let (_dir, store) = store_with("").await;
        let id = store.add("Straße").await.unwrap();
        assert_eq!(store.add("STRASSE").await.unwrap(), id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_is_idempotent_across_spellings() {
        let (_dir, store) = store_with("").await;
        let a = store.add("Blue Sky").await.unwrap();
        let b = store.add("  blue+sky").await.unwrap();
        let c = store.add("BLUE%20SKY").await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_allocates_after_max() {
        let (dir, store) = store_with("3 sun\n7 moon\n").await;
        assert_eq!(store.add("stars").await.unwrap(), 8);

        // The appended row survives a reload.
        let reloaded = CategoryStore::new(dir.path().join("pics_categories.csv"));
        assert_eq!(reloaded.load().await.unwrap(), 3);
        assert_eq!(reloaded.index_of("Stars").await, Some(8));
    }

    #[tokio::test]
    async fn test_add_rejects_empty() {
        let (_dir, store) = store_with("").await;
        let err = store.add("  ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_load_skips_malformed_rows() {
        let (_dir, store) = store_with("1 sun\nabc moon\n2\n0 zero\n3 sea+shell\n").await;
        assert_eq!(store.len().await, 2);
        assert_eq!(store.keyword(3).await.as_deref(), Some("sea shell"));
        assert!(!store.has(2).await);
    }

    #[tokio::test]
    async fn test_delete() {
        let (dir, store) = store_with("1 sun\n2 moon\n").await;
        assert!(store.delete(1).await.unwrap());
        assert!(!store.delete(1).await.unwrap());
        assert_eq!(store.index_of("sun").await, None);

        let rows = RowFile::new(dir.path().join("pics_categories.csv"))
            .read_lines()
            .await
            .unwrap();
        assert_eq!(rows, vec!["2 moon"]);
    }

    #[tokio::test]
    async fn test_find_matches() {
        let (_dir, store) = store_with("1 sunset\n2 sun\n3 moon\n").await;
        assert_eq!(store.find_matches("SUN").await, vec![1, 2]);
        assert_eq!(store.find_matches_exact("Sun").await, vec![2]);
        assert!(store.find_matches_exact("star").await.is_empty());
        assert!(store.find_matches("").await.is_empty());
    }

    #[tokio::test]
    async fn test_find_duplicates_keeps_largest_id() {
        let (dir, store) = store_with("3 sun\n5 moon\n7 sun\n9 moon\n10 sky\n").await;
        assert_eq!(store.all_keywords().await, vec!["sun", "moon", "sky"]);

        let replacements = store.find_duplicates().await.unwrap();
        assert_eq!(replacements, hashmap! { 3 => 7, 5 => 9 });
        assert!(!store.has(3).await);
        assert_eq!(store.index_of("sun").await, Some(7));
        assert_eq!(store.index_of("moon").await, Some(9));

        let rows = RowFile::new(dir.path().join("pics_categories.csv"))
            .read_lines()
            .await
            .unwrap();
        assert_eq!(rows, vec!["7 sun", "9 moon", "10 sky"]);

        assert!(store.find_duplicates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_duplicate_keeps_canonical_lookup() {
        let (_dir, store) = store_with("3 sun\n7 sun\n").await;
        assert!(store.delete(3).await.unwrap());
        assert_eq!(store.index_of("sun").await, Some(7));
    }

    #[tokio::test]
    async fn test_delete_canonical_falls_back_to_remaining_duplicate() {
        let (_dir, store) = store_with("3 sun\n7 sun\n").await;
        assert!(store.delete(7).await.unwrap());
        assert_eq!(store.index_of("sun").await, Some(3));
        assert_eq!(store.add("sun").await.unwrap(), 3);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_load_reassigns_reused_id() {
        let (dir, store) = store_with("1 sun\n1 moon\n").await;
        assert_eq!(store.keyword(1).await.as_deref(), Some("sun"));
        assert_eq!(store.index_of("sun").await, Some(1));
        assert_eq!(store.index_of("moon").await, Some(2));
        assert_eq!(store.add("sun").await.unwrap(), 1);

        let rows = RowFile::new(dir.path().join("pics_categories.csv"))
            .read_lines()
            .await
            .unwrap();
        assert_eq!(rows, vec!["1 sun", "2 moon"]);
    }

    #[tokio::test]
    async fn test_id_space_edges() {
        // The largest u32 is never a valid id.
        let (_dir, store) = store_with("4294967295 sun\n").await;
        assert!(store.is_empty().await);
        assert_eq!(store.add("moon").await.unwrap(), 1);

        let (_dir, store) = store_with("4294967294 sun\n").await;
        let err = store.add("moon").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(store.index_of("sun").await, Some(4_294_967_294));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_allocates_one_id() {
        let (dir, store) = store_with("").await;
        let store = std::sync::Arc::new(store);

        let tasks: Vec<_> = ["sun", "Sun", "SUN", " sun ", "sun", "s%75n", "sun", "Sun"]
            .into_iter()
            .map(|keyword| {
                let store = store.clone();
                tokio::spawn(async move { store.add(keyword).await.unwrap() })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }

        assert!(ids.iter().all(|id| *id == 1), "{ids:?}");
        let rows = RowFile::new(dir.path().join("pics_categories.csv"))
            .read_lines()
            .await
            .unwrap();
        assert_eq!(rows, vec!["1 sun"]);
    }

    #[tokio::test]
    async fn test_keyword_with_space_round_trips() {
        let (dir, store) = store_with("").await;
        store.add("night sky").await.unwrap();
        store.checkpoint().await.unwrap();
        let rows = RowFile::new(dir.path().join("pics_categories.csv"))
            .read_lines()
            .await
            .unwrap();
        assert_eq!(rows, vec!["1 night+sky"]);
    }
}
