//! Message channel seam.
//!
//! The state machines only need best-effort, unordered delivery of
//! [`Envelope`]s within a room. Pub/sub relays, WebRTC data channels and the
//! in-process [`LocalBus`](crate::LocalBus) all fit behind this trait.

use crate::protocol::Envelope;
use crate::Result;

pub trait Channel: Send {
    /// Joins `room_id` as `client_id`. Reconnecting replaces the previous
    /// subscription.
    fn connect(&mut self, room_id: &str, client_id: &str) -> Result<()>;

    /// Best-effort send. An `Ok` does not imply delivery.
    fn send(&mut self, envelope: &Envelope) -> Result<()>;

    /// Next inbound envelope, if one is waiting. Frames that fail to decode
    /// are skipped.
    fn try_recv(&mut self) -> Option<Envelope>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

impl<T: Channel + ?Sized> Channel for Box<T> {
    fn connect(&mut self, room_id: &str, client_id: &str) -> Result<()> {
        (**self).connect(room_id, client_id)
    }

    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        (**self).send(envelope)
    }

    fn try_recv(&mut self) -> Option<Envelope> {
        (**self).try_recv()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
