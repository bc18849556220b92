//! Common utilities and shared types for tagplay.
//!
//! This crate provides foundational components used across all tagplay crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Metrics**: Engine counters via [`Metrics`]
//! - **Probe**: HTTP reachability checks via [`UrlProbe`]
//! - **Storage**: Space-delimited row files via [`RowFile`]
//!
//! # Example
//!
//! ```no_run
//! use tagplay_common::{AppResult, Config, RowFile};
//!
//! async fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let rows = RowFile::new(config.storage.data_dir.join("pics_images.csv"));
//!     for line in rows.read_lines().await? {
//!         println!("{line}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use metrics::{Metrics, MetricsSnapshot, Timer, get_metrics};
pub use probe::{HttpProbe, ProbeConfig, ProbeResponse, SharedUrlProbe, UrlProbe};
pub use storage::{RowFile, quote_plus, unquote_plus};
