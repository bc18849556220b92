//! Business logic services.

#![allow(missing_docs)]

pub mod autoplay;
pub mod category;
pub mod channel;
pub mod game;
pub mod housekeeping;
pub mod image;
pub mod import;
pub mod liveness;
pub mod notice;
pub mod registry;

pub use autoplay::{Autoplay, AutoplaySettings, parse_delay, select_range};
pub use category::{CategoryStore, normalize_keyword};
pub use channel::{
    AddImageOutcome, AutoplaySelection, Channel, ChannelFiles, PurgeOutcome, channel_key,
    check_admission,
};
pub use game::{
    CREATE_POINTS, FIRST_POINTS, GameEngine, GameSettings, LoveOutcome, PlayerScore,
    PresentedImage, SECOND_POINTS, Scorecard, THIRD_POINTS,
};
pub use housekeeping::{HousekeepingReport, resolve_duplicates};
pub use image::{Image, ImageStore};
pub use import::{ImportCommand, ImportQueue, ImportStep, parse_import_line, split_keywords};
pub use liveness::{LinkChecker, LivenessSweeper, Verdict};
pub use notice::{
    AutoplayNotice, GameNotice, ImportNotice, NoOpNoticePublisher, Notice, NoticePublisher,
    NoticePublisherService, SweepNotice,
};
pub use registry::ChannelRegistry;
