//! Clock synchronisation and lookahead beat scheduling.
//!
//! # Primary API
//!
//! - [`ClockSync`]: Two-way ping/pong offset estimation with outlier rejection
//! - [`BeatGrid`]: Immutable `(bpm, anchor time, anchor beat)` timeline
//! - [`BeatScheduler`]: Hands clicks to an [`AudioEngine`] ahead of time
//! - [`TimerSet`]: Cancellable timers polled by state machines
//!
//! Everything here is I/O free. Time comes from an injected [`Clock`], and
//! sound from an injected [`AudioEngine`].
//!
//! # Example
//!
//! ```ignore
//! use metrosync_core::prelude::*;
//!
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
//! let engine = VirtualEngine::new(clock.clone());
//! let mut scheduler = BeatScheduler::new(engine, clock, SchedulerConfig::default());
//!
//! scheduler.start(120);
//! loop {
//!     scheduler.tick();
//! }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod stats;
pub use stats::{Ema, MedianWindow};

pub mod clock;
pub use clock::{Clock, ManualClock, OffsetClock, SystemClock};

mod clock_sync;
pub use clock_sync::{ClockSync, SyncSample};

pub mod beat_grid;
pub use beat_grid::{beat_interval_ms, is_downbeat, BeatGrid};

mod config;
pub use config::{ClockSyncConfig, SchedulerConfig};

pub mod timers;
pub use timers::{TimerHandle, TimerSet};

pub mod scheduler;
pub use scheduler::{
    AudioEngine, BeatListener, BeatScheduler, BeatTick, ClickId, ClickRecord, ClickStatus,
    ClickVoice, Cursor, EngineState, SchedulerState, VirtualEngine,
};

pub mod prelude {
    pub use crate::{
        AudioEngine, BeatGrid, BeatScheduler, BeatTick, Clock, ClockSync, ClockSyncConfig,
        ManualClock, SchedulerConfig, SystemClock, VirtualEngine,
    };
    pub use std::sync::Arc;
}
