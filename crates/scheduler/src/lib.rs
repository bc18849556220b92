//! Periodic drivers for tagplay channels.
//!
//! [`run_scheduler`] spawns one loop per concern (clock, liveness sweep,
//! bulk import, checkpoint) and hands each tick to a [`TickExecutor`].
//! [`ChannelTicker`] is the executor that walks a
//! [`ChannelRegistry`](tagplay_core::ChannelRegistry).

pub mod scheduler;
pub mod ticker;

pub use scheduler::{SchedulerConfig, SchedulerHandle, TickExecutor, run_scheduler};
pub use ticker::ChannelTicker;
