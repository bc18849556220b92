//! Incremental dead-link sweep.
//!
//! A sweep snapshots the live ids (newest first) and checks one per tick.
//! Dead URLs are quarantined, gyazo page links are rewritten to their direct
//! image URL, and once the snapshot is exhausted the store is renumbered.

use std::sync::Arc;

use tagplay_common::config::LivenessConfig;
use tagplay_common::{AppResult, SharedUrlProbe, Timer, get_metrics};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::services::image::ImageStore;
use crate::services::notice::SweepNotice;

const GYAZO_PAGE: &str = "https://gyazo.com/";
const GYAZO_EXTENSIONS: [&str; 4] = [".jpg", ".png", ".gif", ".mp4"];
const IMGUR_REMOVED: &str = "https://i.imgur.com/removed.png";

/// Outcome of checking one image URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Keep the URL.
    Valid,
    /// Keep the image under this URL instead.
    ValidAt(String),
    /// Quarantine the image.
    Invalid,
}

/// URL liveness policy on top of a [`UrlProbe`](tagplay_common::UrlProbe).
pub struct LinkChecker {
    probe: SharedUrlProbe,
    always_valid: Vec<String>,
    always_invalid: Vec<String>,
}

impl LinkChecker {
    /// Create a checker with the host lists from `config`.
    #[must_use]
    pub fn new(config: &LivenessConfig, probe: SharedUrlProbe) -> Self {
        Self {
            probe,
            always_valid: config.always_valid.clone(),
            always_invalid: config.always_invalid.clone(),
        }
    }

    /// Whether `url` answers.
    pub async fn check_url(&self, url: &str) -> bool {
        if self.always_valid.iter().any(|host| url.contains(host.as_str())) {
            return true;
        }
        if self.always_invalid.iter().any(|host| url.contains(host.as_str())) {
            return false;
        }

        let timer = Timer::start();
        let valid = match self.probe.probe(url).await {
            Ok(response) => {
                response.is_reachable()
                    && !(is_imgur(url)
                        && (response
                            .content_type
                            .as_deref()
                            .is_some_and(|ct| ct.starts_with("text/html"))
                            || response.content_location.as_deref() == Some(IMGUR_REMOVED)))
            }
            Err(e) => {
                debug!(url, error = %e, "Probe failed");
                false
            }
        };
        get_metrics().record_probe(timer.elapsed(), valid);
        valid
    }

    /// Check an image URL, looking for a direct link behind gyazo pages.
    pub async fn check(&self, url: &str) -> Verdict {
        if !self.check_url(url).await {
            return Verdict::Invalid;
        }
        if url.contains(GYAZO_PAGE) {
            let direct = url.replacen("//gyazo", "//i.gyazo", 1);
            for extension in GYAZO_EXTENSIONS {
                let candidate = format!("{direct}{extension}");
                if self.check_url(&candidate).await {
                    return Verdict::ValidAt(candidate);
                }
            }
        }
        Verdict::Valid
    }
}

fn is_imgur(url: &str) -> bool {
    url.find("imgur.").is_some_and(|at| at > 0)
}

#[derive(Debug, Default)]
struct SweepState {
    enabled: bool,
    paused: bool,
    busy: bool,
    snapshot: Vec<u32>,
    cursor: usize,
    increment: usize,
    next_report: usize,
}

/// Per-channel sweep cursor.
pub struct LivenessSweeper {
    images: Arc<ImageStore>,
    checker: Arc<LinkChecker>,
    state: Mutex<SweepState>,
}

impl LivenessSweeper {
    /// Create an idle sweeper.
    #[must_use]
    pub fn new(images: Arc<ImageStore>, checker: Arc<LinkChecker>) -> Self {
        Self {
            images,
            checker,
            state: Mutex::new(SweepState::default()),
        }
    }

    /// Start sweeping, or pick up where a disabled sweep stopped.
    ///
    /// Returns `false` if the sweep was already enabled.
    pub async fn enable(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.enabled {
            return false;
        }
        if state.cursor == 0 {
            let mut snapshot = self.images.ids().await;
            snapshot.sort_unstable_by(|a, b| b.cmp(a));
            state.increment = snapshot.len().div_ceil(4).max(1);
            state.snapshot = snapshot;
        }
        state.next_report = state.increment;
        while state.cursor > state.next_report {
            state.next_report += state.increment;
        }
        state.enabled = true;
        info!(
            total = state.snapshot.len(),
            cursor = state.cursor,
            increment = state.increment,
            "Liveness sweep enabled"
        );
        true
    }

    /// Stop sweeping, keeping the cursor.
    pub async fn disable(&self) {
        self.state.lock().await.enabled = false;
    }

    /// Suspend an enabled sweep.
    pub async fn pause(&self) {
        self.state.lock().await.paused = true;
    }

    /// Resume a paused sweep.
    pub async fn resume(&self) {
        self.state.lock().await.paused = false;
    }

    /// Enabled and not paused.
    pub async fn is_active(&self) -> bool {
        let state = self.state.lock().await;
        state.enabled && !state.paused
    }

    /// Check the next id in the snapshot.
    pub async fn tick(&self) -> AppResult<Option<SweepNotice>> {
        let id = {
            let mut state = self.state.lock().await;
            if state.busy || !state.enabled || state.paused {
                return Ok(None);
            }
            let next = state.snapshot.get(state.cursor).copied();
            match next {
                Some(id) => {
                    state.busy = true;
                    id
                }
                None => {
                    drop(state);
                    return self.finish().await.map(Some);
                }
            }
        };

        let checked = self.check_image(id).await;

        let mut state = self.state.lock().await;
        state.busy = false;
        state.cursor += 1;
        checked?;

        if state.cursor > state.next_report {
            state.next_report += state.increment;
            let percent = (100 * state.cursor / state.snapshot.len().max(1)) as u32;
            debug!(percent, "Liveness sweep progress");
            return Ok(Some(SweepNotice::Progress { percent }));
        }
        Ok(None)
    }

    async fn check_image(&self, id: u32) -> AppResult<()> {
        let Some(url) = self.images.url(id).await else {
            return Ok(());
        };
        match self.checker.check(&url).await {
            Verdict::Valid => {}
            Verdict::ValidAt(direct) => {
                if self.images.set_url(id, &direct).await {
                    self.images.checkpoint().await?;
                    info!(id, from = %url, to = %direct, "Rewrote image URL");
                }
            }
            Verdict::Invalid => {
                warn!(id, url = %url, "Dead link, quarantining image");
                self.images.delete(id).await?;
            }
        }
        Ok(())
    }

    async fn finish(&self) -> AppResult<SweepNotice> {
        let remaining = self.images.renumber().await?;
        let mut state = self.state.lock().await;
        *state = SweepState::default();
        info!(remaining, "Liveness sweep complete");
        Ok(SweepNotice::Complete { remaining })
    }
}
