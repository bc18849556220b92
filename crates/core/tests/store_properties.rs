//! Cross-store integration tests.
//!
//! These tests exercise the category store, image store, duplicate
//! resolution, autoplay and scoring together over real files in a
//! temporary directory.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tagplay_core::{
    Autoplay, AutoplaySettings, CategoryStore, GameEngine, GameSettings, ImageStore, PlayerScore,
    resolve_duplicates,
};

struct Stores {
    dir: tempfile::TempDir,
    categories: Arc<CategoryStore>,
    images: Arc<ImageStore>,
}

async fn stores(categories: &str, images: &str) -> Stores {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("c.csv"), categories).await.unwrap();
    tokio::fs::write(dir.path().join("i.csv"), images).await.unwrap();
    let category_store = Arc::new(CategoryStore::new(dir.path().join("c.csv")));
    let image_store = Arc::new(ImageStore::new(
        dir.path().join("i.csv"),
        dir.path().join("d.csv"),
    ));
    category_store.load().await.unwrap();
    image_store.load().await.unwrap();
    Stores {
        dir,
        categories: category_store,
        images: image_store,
    }
}

#[tokio::test]
async fn test_equivalent_keywords_share_an_id() {
    let s = stores("", "").await;
    let id = s.categories.add("Blue Sky").await.unwrap();
    for variant in ["blue sky", "  BLUE SKY ", "blue+sky", "Blue%20Sky"] {
        assert_eq!(s.categories.add(variant).await.unwrap(), id, "{variant}");
    }
    assert_eq!(s.categories.len().await, 1);

    let reloaded = CategoryStore::new(s.dir.path().join("c.csv"));
    reloaded.load().await.unwrap();
    assert_eq!(reloaded.index_of("blue sky").await, Some(id));
}

#[tokio::test]
async fn test_same_url_same_id() {
    let s = stores("", "").await;
    let (first, created) = s.images.find_or_add("http://a.example/x.png").await.unwrap();
    assert!(created);
    let (second, created) = s.images.find_or_add("http://a.example/x.png").await.unwrap();
    assert!(!created);
    assert_eq!(first, second);
    assert_eq!(s.images.find_by_url("http://a.example/x.png").await, Some(first));
}

#[tokio::test]
async fn test_delete_then_restore_is_lossless() {
    let s = stores(
        "1 sun\n2 moon\n",
        "1 http://a.png 1 3\n2 http://b.png\n3 http://c.png 1 1 2 7\n",
    )
    .await;

    for id in [3, 1, 2] {
        let before = s.images.get(id).await.unwrap();
        assert!(s.images.delete(id).await.unwrap());
        assert!(s.images.get(id).await.is_none());
        assert_eq!(s.images.restore(id).await.unwrap(), Some(id));
        assert_eq!(s.images.get(id).await.unwrap(), before);
    }
    assert!(s.images.deleted_ids().await.unwrap().is_empty());

    // The restored rows survive a reload.
    let reloaded = ImageStore::new(s.dir.path().join("i.csv"), s.dir.path().join("d.csv"));
    reloaded.load().await.unwrap();
    assert_eq!(reloaded.get(3).await.unwrap().votes(2), 7);
}

#[tokio::test]
async fn test_find_matches_agrees_with_scan() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut rows = String::new();
    for id in 1..=60u32 {
        rows.push_str(&format!("{id} http://x/{id}.png"));
        for category in 1..=8u32 {
            if rng.gen_bool(0.25) {
                rows.push_str(&format!(" {category} {}", rng.gen_range(1..5)));
            }
        }
        rows.push('\n');
    }
    let s = stores("", &rows).await;

    for _ in 0..25 {
        let wanted: Vec<u32> = (0..rng.gen_range(1..4))
            .map(|_| rng.gen_range(1..=9))
            .collect();
        let mut expected = Vec::new();
        for id in s.images.ids().await {
            let image = s.images.get(id).await.unwrap();
            if wanted.iter().any(|c| image.has_category(*c)) {
                expected.push(id);
            }
        }
        assert_eq!(s.images.find_matches(&wanted).await, expected, "{wanted:?}");
    }
}

#[tokio::test]
async fn test_duplicate_keyword_merge_moves_votes() {
    let s = stores(
        "3 sun\n5 sea\n7 Sun\n",
        "1 http://a.png 3 2 7 1\n2 http://b.png 3 4\n3 http://c.png 5 1\n",
    )
    .await;
    tokio::fs::write(s.dir.path().join("d.csv"), "9 http://z.png 3 6\n")
        .await
        .unwrap();

    let report = resolve_duplicates(&s.categories, &s.images).await.unwrap();
    assert_eq!(report.replacements.get(&3), Some(&7));
    assert!(!s.categories.has(3).await);
    assert_eq!(s.categories.index_of("sun").await, Some(7));

    assert_eq!(s.images.get(1).await.unwrap().votes(7), 3);
    assert_eq!(s.images.get(2).await.unwrap().votes(7), 4);
    assert!(!s.images.get(2).await.unwrap().has_category(3));
    assert_eq!(s.images.get(3).await.unwrap().votes(5), 1);

    // Quarantined rows are rewritten too.
    assert_eq!(s.images.restore(9).await.unwrap(), Some(9));
    assert_eq!(s.images.get(9).await.unwrap().votes(7), 6);
}

#[tokio::test]
async fn test_autoplay_sequential_forward() {
    let autoplay = Autoplay::new();
    let settings = AutoplaySettings {
        delay: 5,
        sequential: true,
        count_up: true,
        looping: false,
    };
    assert!(autoplay.enable(settings, vec![5, 9, 2]).await);
    assert_eq!(autoplay.next_id().await, Some(5));
    assert_eq!(autoplay.next_id().await, Some(9));
    assert_eq!(autoplay.next_id().await, Some(2));
    assert_eq!(autoplay.next_id().await, None);
    assert!(!autoplay.is_enabled().await);
}

#[tokio::test]
async fn test_scoring_scenario() {
    // A:4 B:3 before the round; A=1, B=2.
    let s = stores("1 a\n2 b\n", "1 http://img.png 1 4 2 3\n").await;
    let game = GameEngine::new(
        s.categories.clone(),
        s.images.clone(),
        GameSettings {
            rounds: 1,
            delay: 10,
            pause: 5,
        },
    );
    game.start(false).await;
    game.set_game_image(1).await;

    // P pushes A to 5 and introduces C; X introduces D.
    let p = game.record_love("P", &["a", "c"]).await.unwrap();
    assert_eq!(p.creates, 1);
    let x = game.record_love("X", &["d"]).await.unwrap();
    assert_eq!(x.creates, 1);

    let image = s.images.get(1).await.unwrap();
    let c = s.categories.index_of("c").await.unwrap();
    let d = s.categories.index_of("d").await.unwrap();
    assert_eq!(
        (image.votes(1), image.votes(2), image.votes(c), image.votes(d)),
        (5, 3, 1, 1)
    );
    // C and D tie; the lower id takes third place.
    assert!(c < d);
    assert_eq!(image.top_categories(3), vec![1, 2, c]);

    game.stop().await.unwrap();
    assert_eq!(
        game.scores().await,
        vec![
            PlayerScore {
                nick: "P".to_string(),
                score: 15 + 10 + 2,
            },
            PlayerScore {
                nick: "X".to_string(),
                score: 15,
            },
        ]
    );

    let card = game.scorecard("P").await.unwrap();
    assert_eq!((card.firsts, card.seconds, card.thirds), (1, 0, 1));
    assert!(card.loves.is_empty());

    let categories: BTreeSet<String> = s.categories.all_keywords().await.into_iter().collect();
    assert_eq!(
        categories,
        ["a", "b", "c", "d"].iter().map(|k| (*k).to_string()).collect()
    );
}
