//! Duplicate keyword resolution across the category and image stores.

use std::collections::HashMap;

use serde::Serialize;
use tagplay_common::AppResult;
use tracing::info;

use crate::services::category::CategoryStore;
use crate::services::image::ImageStore;

/// What a housekeeping pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HousekeepingReport {
    /// Replaced category id to canonical id.
    pub replacements: HashMap<u32, u32>,
    /// Whether any live image was rewritten.
    pub live_changed: bool,
    /// Whether any quarantined image was rewritten.
    pub quarantine_changed: bool,
}

impl HousekeepingReport {
    /// Whether the pass found nothing to do.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.replacements.is_empty()
    }
}

/// Merge duplicate keywords and move image votes onto the surviving ids.
///
/// The category store is compacted first, then live images, then
/// quarantined images. The steps are not atomic: an interruption can leave
/// images pointing at a removed category id, which readers treat as absent.
pub async fn resolve_duplicates(
    categories: &CategoryStore,
    images: &ImageStore,
) -> AppResult<HousekeepingReport> {
    let replacements = categories.find_duplicates().await?;
    if replacements.is_empty() {
        return Ok(HousekeepingReport::default());
    }

    let live_changed = images.remove_duplicate_categories(&replacements).await?;
    let quarantine_changed = images
        .remove_duplicate_quarantined_categories(&replacements)
        .await?;

    info!(
        replaced = replacements.len(),
        live_changed, quarantine_changed, "Resolved duplicate categories"
    );

    Ok(HousekeepingReport {
        replacements,
        live_changed,
        quarantine_changed,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use maplit::{btreemap, hashmap};

    #[tokio::test]
    async fn test_resolve_duplicates_moves_votes() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("c.csv"), "3 sun\n5 moon\n7 sun\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("i.csv"), "1 http://a 3 2 7 4\n2 http://b 5 1\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("d.csv"), "9 http://z 3 1\n")
            .await
            .unwrap();

        let categories = CategoryStore::new(dir.path().join("c.csv"));
        let images = ImageStore::new(dir.path().join("i.csv"), dir.path().join("d.csv"));
        categories.load().await.unwrap();
        images.load().await.unwrap();

        let report = resolve_duplicates(&categories, &images).await.unwrap();
        assert_eq!(report.replacements, hashmap! { 3 => 7 });
        assert!(report.live_changed);
        assert!(report.quarantine_changed);

        assert!(!categories.has(3).await);
        assert_eq!(images.get(1).await.unwrap().categories, btreemap! { 7 => 6 });
        assert_eq!(images.get(2).await.unwrap().categories, btreemap! { 5 => 1 });

        let again = resolve_duplicates(&categories, &images).await.unwrap();
        assert!(again.is_clean());
    }
}
