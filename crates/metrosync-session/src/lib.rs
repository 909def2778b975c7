//! Host and follower protocol for a shared, networked metronome.
//!
//! # Primary API
//!
//! - [`HostStateMachine`]: Room lifecycle, per-follower clock sync, tempo and transport
//! - [`FollowerStateMachine`]: Joins a room and plays the host's grid on the local clock
//! - [`Channel`]: Message transport seam; [`LocalBus`] for same-process sessions
//! - [`Envelope`] / [`Message`]: JSON wire format
//! - [`driver::run`]: tokio event loop for either state machine
//!
//! # Example
//!
//! ```ignore
//! use metrosync_session::prelude::*;
//!
//! let bus = LocalBus::new();
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
//!
//! let mut host = HostStateMachine::new(
//!     "host", clock.clone(), bus.endpoint(), VirtualEngine::new(clock.clone()),
//!     SessionConfig::default(),
//! );
//! let room_id = host.create_room(120, None)?;
//! host.start_metronome()?;
//! ```

pub mod error;
pub use error::{Error, Result};

mod config;
pub use config::SessionConfig;

pub mod protocol;
pub use protocol::{Envelope, Message, Recipient, PROTOCOL_VERSION};

mod channel;
pub use channel::Channel;

mod local_bus;
pub use local_bus::{LocalBus, LocalEndpoint};

pub mod room;
pub use room::{Anchor, PeerConnState, PeerStatus, RoomState, RoomStatus, SessionSnapshot};

mod host;
pub use host::{HostState, HostStateMachine};

mod follower;
pub use follower::{FollowerState, FollowerStateMachine};

pub mod driver;
pub use driver::Session;

pub mod prelude {
    pub use crate::{
        Channel, FollowerState, FollowerStateMachine, HostState, HostStateMachine, LocalBus,
        SessionConfig, SessionSnapshot,
    };
    pub use metrosync_core::prelude::*;
}
