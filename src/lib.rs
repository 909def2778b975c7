//! # Metrosync - Distributed Metronome
//!
//! One device hosts a room and keeps the tempo; every follower estimates its
//! clock offset to the host and clicks the host's beat grid on its own clock.
//!
//! ## Architecture
//!
//! Metrosync is an umbrella crate that coordinates:
//! - **metrosync-core** - Clocks, clock-offset estimation, beat grids, lookahead scheduler
//! - **metrosync-session** - Wire protocol, channels, host and follower state machines, async driver
//!
//! ## Quick Start
//!
//! ```ignore
//! use metrosync::prelude::*;
//!
//! let bus = LocalBus::new();
//!
//! let mut host = SessionBuilder::new("host").build_host(bus.endpoint())?;
//! let room_id = host.create_room(120, None)?;
//! host.start_metronome()?;
//!
//! let mut follower = SessionBuilder::new("phone").build_follower(bus.endpoint())?;
//! follower.join_room(&room_id)?;
//!
//! loop {
//!     host.poll();
//!     follower.poll();
//! }
//! ```

/// Re-export of metrosync-core for direct access
pub use metrosync_core as core;

/// Re-export of metrosync-session for direct access
pub use metrosync_session as session;

pub use metrosync_core::{
    beat_interval_ms, AudioEngine, BeatGrid, BeatScheduler, BeatTick, ClickVoice, Clock,
    ClockSync, ClockSyncConfig, EngineState, ManualClock, OffsetClock, SchedulerConfig,
    SystemClock, VirtualEngine,
};
pub use metrosync_session::{
    driver, Channel, Envelope, FollowerState, FollowerStateMachine, HostState, HostStateMachine,
    LocalBus, LocalEndpoint, Message, SessionConfig, SessionSnapshot,
};

mod error;
pub use error::{Error, Result};

mod builder;
pub use builder::SessionBuilder;

pub mod prelude {
    pub use crate::{Error, Result, SessionBuilder};
    pub use metrosync_session::prelude::*;
}
