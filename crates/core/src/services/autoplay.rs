//! Timed slideshow over a snapshot of image ids.

use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// How an autoplay run walks its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoplaySettings {
    /// Ticks between two images.
    pub delay: u32,
    /// Walk the snapshot in order instead of drawing at random.
    pub sequential: bool,
    /// Sequential direction; `false` starts at the last id.
    pub count_up: bool,
    /// Start over once the snapshot is exhausted.
    pub looping: bool,
}

impl AutoplaySettings {
    /// Random draws every `delay` ticks.
    #[must_use]
    pub const fn random(delay: u32) -> Self {
        Self {
            delay,
            sequential: false,
            count_up: true,
            looping: false,
        }
    }
}

#[derive(Debug, Default)]
struct AutoplayState {
    enabled: bool,
    settings: Option<AutoplaySettings>,
    counter: u32,
    /// Next index for forward walks, one past the next index for backward walks.
    cursor: usize,
    snapshot: Vec<u32>,
}

impl AutoplayState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-channel autoplay cursor.
#[derive(Debug, Default)]
pub struct Autoplay {
    state: Mutex<AutoplayState>,
}

impl Autoplay {
    /// Create a disabled autoplay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start playing `snapshot`.
    ///
    /// An empty snapshot leaves autoplay disabled and returns `false`. The
    /// first [`tick`](Self::tick) after enabling fires.
    pub async fn enable(&self, settings: AutoplaySettings, snapshot: Vec<u32>) -> bool {
        let mut state = self.state.lock().await;
        state.reset();
        if snapshot.is_empty() {
            return false;
        }
        state.enabled = true;
        state.counter = settings.delay;
        state.cursor = if settings.count_up { 0 } else { snapshot.len() };
        info!(
            images = snapshot.len(),
            delay = settings.delay,
            sequential = settings.sequential,
            "Autoplay enabled"
        );
        state.snapshot = snapshot;
        state.settings = Some(settings);
        true
    }

    /// Stop and forget the snapshot.
    pub async fn disable(&self) {
        self.state.lock().await.reset();
    }

    /// Whether autoplay is running.
    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    /// Count one tick; `true` when an image is due.
    pub async fn tick(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(settings) = state.settings.filter(|_| state.enabled) else {
            return false;
        };
        state.counter = state.counter.saturating_add(1);
        if state.counter >= settings.delay {
            state.counter = 0;
            true
        } else {
            false
        }
    }

    /// Next id to show.
    ///
    /// `None` once a non-looping sequential walk is exhausted, which also
    /// disables autoplay.
    pub async fn next_id(&self) -> Option<u32> {
        let mut state = self.state.lock().await;
        let settings = state.settings.filter(|_| state.enabled)?;
        if !settings.sequential {
            return state.snapshot.choose(&mut rand::thread_rng()).copied();
        }

        let len = state.snapshot.len();
        if settings.count_up {
            if state.cursor >= len {
                if !settings.looping {
                    state.reset();
                    debug!("Autoplay exhausted");
                    return None;
                }
                state.cursor = 0;
            }
            let id = state.snapshot.get(state.cursor).copied();
            state.cursor += 1;
            id
        } else {
            if state.cursor == 0 {
                if !settings.looping {
                    state.reset();
                    debug!("Autoplay exhausted");
                    return None;
                }
                state.cursor = len;
            }
            state.cursor -= 1;
            state.snapshot.get(state.cursor).copied()
        }
    }
}

/// Parse a delay such as `90`, `30s`, `5m` or `1h` into seconds.
#[must_use]
pub fn parse_delay(value: &str) -> Option<u32> {
    let value = value.trim().to_lowercase();
    let (digits, multiplier) = if let Some(hours) = value.strip_suffix('h') {
        (hours, 3600)
    } else if let Some(minutes) = value.strip_suffix('m') {
        (minutes, 60)
    } else if let Some(seconds) = value.strip_suffix('s') {
        (seconds, 1)
    } else {
        (value.as_str(), 1)
    };
    digits.parse::<u32>().ok()?.checked_mul(multiplier)
}

/// Sorted slice of `ids` between `begin_id` and `end_id` inclusive.
///
/// A bound that is not among the ids falls back to that end of the list.
/// Reversed bounds are swapped.
#[must_use]
pub fn select_range(ids: &[u32], begin_id: Option<u32>, end_id: Option<u32>) -> Vec<u32> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    let position = |bound: Option<u32>| bound.and_then(|id| ids.binary_search(&id).ok());

    let mut begin = position(begin_id).unwrap_or(0);
    let mut end = position(end_id).map_or(ids.len(), |index| index + 1);
    if begin > end {
        (begin, end) = (end.saturating_sub(1), begin + 1);
    }
    ids.get(begin..end).map(<[u32]>::to_vec).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sequential(count_up: bool, looping: bool) -> AutoplaySettings {
        AutoplaySettings {
            delay: 1,
            sequential: true,
            count_up,
            looping,
        }
    }

    #[tokio::test]
    async fn test_forward_walk_exhausts() {
        let autoplay = Autoplay::new();
        assert!(autoplay.enable(sequential(true, false), vec![5, 9, 2]).await);
        assert_eq!(autoplay.next_id().await, Some(5));
        assert_eq!(autoplay.next_id().await, Some(9));
        assert_eq!(autoplay.next_id().await, Some(2));
        assert_eq!(autoplay.next_id().await, None);
        assert!(!autoplay.is_enabled().await);
    }

    #[tokio::test]
    async fn test_backward_walk() {
        let autoplay = Autoplay::new();
        autoplay.enable(sequential(false, false), vec![5, 9, 2]).await;
        let mut seen = Vec::new();
        while let Some(id) = autoplay.next_id().await {
            seen.push(id);
        }
        assert_eq!(seen, vec![2, 9, 5]);
    }

    #[tokio::test]
    async fn test_loop_wraps() {
        let autoplay = Autoplay::new();
        autoplay.enable(sequential(true, true), vec![5, 9]).await;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(autoplay.next_id().await.unwrap());
        }
        assert_eq!(seen, vec![5, 9, 5, 9, 5]);

        autoplay.enable(sequential(false, true), vec![5, 9]).await;
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(autoplay.next_id().await.unwrap());
        }
        assert_eq!(seen, vec![9, 5, 9]);
    }

    #[tokio::test]
    async fn test_random_stays_in_snapshot() {
        let autoplay = Autoplay::new();
        autoplay.enable(AutoplaySettings::random(3), vec![4, 7]).await;
        for _ in 0..10 {
            let id = autoplay.next_id().await.unwrap();
            assert!(id == 4 || id == 7);
        }
        assert!(autoplay.is_enabled().await);
    }

    #[tokio::test]
    async fn test_empty_snapshot_stays_disabled() {
        let autoplay = Autoplay::new();
        assert!(!autoplay.enable(AutoplaySettings::random(3), Vec::new()).await);
        assert!(!autoplay.is_enabled().await);
        assert!(!autoplay.tick().await);
        assert_eq!(autoplay.next_id().await, None);
    }

    #[tokio::test]
    async fn test_tick_fires_first_then_every_delay() {
        let autoplay = Autoplay::new();
        autoplay.enable(AutoplaySettings::random(3), vec![1]).await;
        let mut fired = Vec::new();
        for _ in 0..7 {
            fired.push(autoplay.tick().await);
        }
        assert_eq!(fired, vec![true, false, false, true, false, false, true]);

        autoplay.disable().await;
        assert!(!autoplay.tick().await);
    }

    #[test]
    fn test_parse_delay() {
        assert_eq!(parse_delay("90"), Some(90));
        assert_eq!(parse_delay("30s"), Some(30));
        assert_eq!(parse_delay("5M"), Some(300));
        assert_eq!(parse_delay("1h"), Some(3600));
        assert_eq!(parse_delay("soon"), None);
        assert_eq!(parse_delay("-3"), None);
    }

    #[test]
    fn test_select_range() {
        let ids = [9, 2, 5, 7, 3];
        assert_eq!(select_range(&ids, None, None), vec![2, 3, 5, 7, 9]);
        assert_eq!(select_range(&ids, Some(3), Some(7)), vec![3, 5, 7]);
        assert_eq!(select_range(&ids, Some(5), None), vec![5, 7, 9]);
        assert_eq!(select_range(&ids, Some(4), Some(3)), vec![2, 3]);
        assert_eq!(select_range(&ids, Some(7), Some(3)), vec![3, 5, 7]);
        assert!(select_range(&[], Some(1), Some(2)).is_empty());
    }
}
