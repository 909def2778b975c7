//! In-process pub/sub bus.
//!
//! Room-scoped fan-out over `crossbeam-channel`. Each [`LocalEndpoint`]
//! subscribes to one room at a time and receives every frame published to
//! that room by other endpoints. Frames travel as JSON text, so the wire
//! codec is exercised exactly as with a remote relay.

use crate::channel::Channel;
use crate::protocol::Envelope;
use crate::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct Subscriber {
    id: u64,
    tx: Sender<String>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    rooms: HashMap<String, Vec<Subscriber>>,
}

/// Shared bus. Clones refer to the same bus.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<Mutex<BusInner>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, unconnected endpoint on this bus.
    pub fn endpoint(&self) -> LocalEndpoint {
        LocalEndpoint {
            bus: self.clone(),
            subscription: None,
        }
    }

    /// Delivers a raw frame to every subscriber of `room_id` except
    /// `exclude`. Returns how many subscribers received it.
    pub fn publish_raw(&self, room_id: &str, frame: &str, exclude: Option<u64>) -> usize {
        let inner = self.inner.lock();
        let Some(subscribers) = inner.rooms.get(room_id) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|s| Some(s.id) != exclude)
            .filter(|s| s.tx.send(frame.to_string()).is_ok())
            .count()
    }

    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.inner
            .lock()
            .rooms
            .get(room_id)
            .map_or(0, |subs| subs.len())
    }

    fn subscribe(&self, room_id: &str) -> (u64, Receiver<String>) {
        let (tx, rx) = unbounded();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        (id, rx)
    }

    fn unsubscribe(&self, room_id: &str, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(subscribers) = inner.rooms.get_mut(room_id) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                inner.rooms.remove(room_id);
            }
        }
    }
}

struct Subscription {
    id: u64,
    room_id: String,
    rx: Receiver<String>,
}

/// One client's connection to a [`LocalBus`].
pub struct LocalEndpoint {
    bus: LocalBus,
    subscription: Option<Subscription>,
}

impl LocalEndpoint {
    pub fn room_id(&self) -> Option<&str> {
        self.subscription.as_ref().map(|s| s.room_id.as_str())
    }
}

impl Channel for LocalEndpoint {
    fn connect(&mut self, room_id: &str, client_id: &str) -> Result<()> {
        self.disconnect();
        let (id, rx) = self.bus.subscribe(room_id);
        debug!(room_id, client_id, "local bus subscribed");
        self.subscription = Some(Subscription {
            id,
            room_id: room_id.to_string(),
            rx,
        });
        Ok(())
    }

    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let Some(sub) = &self.subscription else {
            return Err(Error::Channel("not connected".into()));
        };
        let frame = envelope.to_json()?;
        self.bus.publish_raw(&sub.room_id, &frame, Some(sub.id));
        Ok(())
    }

    fn try_recv(&mut self) -> Option<Envelope> {
        let sub = self.subscription.as_ref()?;
        loop {
            match sub.rx.try_recv() {
                Ok(frame) => match Envelope::from_json(&frame) {
                    Ok(envelope) => return Some(envelope),
                    Err(e) => debug!(error = %e, "dropping undecodable frame"),
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(sub) = self.subscription.take() {
            self.bus.unsubscribe(&sub.room_id, sub.id);
        }
    }

    fn is_connected(&self) -> bool {
        self.subscription.is_some()
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.disconnect();
    }
}
