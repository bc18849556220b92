//! Core engines for tagplay: per-channel keyword and image stores, the
//! tagging game, autoplay and the dead-link sweep.

pub mod services;

pub use services::*;
