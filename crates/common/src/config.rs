//! Application configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Channels opened at startup (e.g. `#pics`).
    #[serde(default)]
    pub channels: Vec<String>,
    /// Game defaults.
    #[serde(default)]
    pub game: GameConfig,
    /// Autoplay defaults.
    #[serde(default)]
    pub autoplay: AutoplayConfig,
    /// Liveness sweep configuration.
    #[serde(default)]
    pub liveness: LivenessConfig,
    /// Tick driver configuration.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Where per-channel row files are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `<channel>_categories.csv` and friends.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Game defaults for automatic rounds.
#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// Number of rounds in an automatic game.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Seconds an image stays up for voting.
    #[serde(default = "default_game_delay")]
    pub delay: u32,
    /// Seconds between rounds.
    #[serde(default = "default_pause")]
    pub pause: u32,
}

/// Autoplay defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoplayConfig {
    /// Seconds between two autoplayed images.
    #[serde(default = "default_autoplay_delay")]
    pub delay: u32,
}

/// Liveness probe configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// Probe timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// User agent sent with probes.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// URL substrings that are valid without probing (hosts that answer 404 for live content).
    #[serde(default = "default_always_valid")]
    pub always_valid: Vec<String>,
    /// URL substrings that are invalid without probing (hosts that stopped sharing).
    #[serde(default = "default_always_invalid")]
    pub always_invalid: Vec<String>,
}

/// Intervals of the periodic driver.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Clock tick for games and autoplay, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Interval between two liveness probes, in milliseconds.
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
    /// Interval between two imported lines, in milliseconds.
    #[serde(default = "default_import_interval_ms")]
    pub import_interval_ms: u64,
    /// Interval between full checkpoints, in seconds.
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

const fn default_rounds() -> u32 {
    5
}

const fn default_game_delay() -> u32 {
    60
}

const fn default_pause() -> u32 {
    15
}

const fn default_autoplay_delay() -> u32 {
    60
}

const fn default_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    "tagplay/0.1 (link checker)".to_string()
}

fn default_always_valid() -> Vec<String> {
    vec![".icdn.ru".to_string()]
}

fn default_always_invalid() -> Vec<String> {
    vec!["bdsmlr.com/".to_string(), "reblogme.com/".to_string()]
}

const fn default_tick_interval_ms() -> u64 {
    1000
}

const fn default_liveness_interval_ms() -> u64 {
    2000
}

const fn default_import_interval_ms() -> u64 {
    2000
}

const fn default_checkpoint_interval_secs() -> u64 {
    900
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            delay: default_game_delay(),
            pause: default_pause(),
        }
    }
}

impl Default for AutoplayConfig {
    fn default() -> Self {
        Self {
            delay: default_autoplay_delay(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            always_valid: default_always_valid(),
            always_invalid: default_always_invalid(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            liveness_interval_ms: default_liveness_interval_ms(),
            import_interval_ms: default_import_interval_ms(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `TAGPLAY_ENV`)
    /// 3. Environment variables with `TAGPLAY__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("TAGPLAY_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("TAGPLAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("channels")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("TAGPLAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.game.rounds, 5);
        assert_eq!(config.game.delay, 60);
        assert_eq!(config.game.pause, 15);
        assert_eq!(config.liveness.timeout_secs, 5);
        assert!(config.liveness.always_valid.contains(&".icdn.ru".to_string()));
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagplay.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "channels = [\"#pics\", \"&art\"]\n[storage]\ndata_dir = \"/var/lib/tagplay\"\n[game]\nrounds = 3"
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.channels, vec!["#pics".to_string(), "&art".to_string()]);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/tagplay"));
        assert_eq!(config.game.rounds, 3);
        // Unspecified values keep their defaults.
        assert_eq!(config.game.pause, 15);
        assert_eq!(config.autoplay.delay, 60);
    }
}
