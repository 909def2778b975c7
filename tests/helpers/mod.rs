//! Test helpers and fixtures for metrosync integration tests
//!
//! Sessions run against a simulated network: one world [`ManualClock`] drives
//! every participant, frames are delayed by a fixed one-way latency, and the
//! test advances time in fixed steps, polling every participant per step.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `TIME_EPSILON_MS` (1e-6): Exact grid arithmetic
//! - `OFFSET_EPSILON_MS` (1e-3): Smoothed clock offsets

#![allow(dead_code)]

pub mod tolerances;

use metrosync::prelude::*;
use metrosync::OffsetClock;
use metrosync::session::protocol::Envelope;
use metrosync::session::Error as SessionError;
use parking_lot::Mutex;
use std::collections::HashMap;

/// One-way delivery latency of the simulated network, milliseconds.
pub const TEST_LATENCY_MS: f64 = 10.0;

/// Follower clock ahead of the host clock, milliseconds.
pub const TEST_FOLLOWER_OFFSET_MS: f64 = 50.0;

/// World time at which every test starts.
pub const TEST_START_MS: f64 = 10_000.0;

pub type SimHost = HostStateMachine<SimEndpoint, VirtualEngine>;
pub type SimFollower = FollowerStateMachine<SimEndpoint, VirtualEngine>;

struct InFlight {
    to: u64,
    deliver_at: f64,
    seq: u64,
    frame: String,
}

#[derive(Default)]
struct NetInner {
    next_endpoint: u64,
    next_seq: u64,
    rooms: HashMap<String, Vec<u64>>,
    in_flight: Vec<InFlight>,
    sent: u64,
}

/// Latency-simulating network shared by every endpoint of a test.
#[derive(Clone)]
pub struct SimNet {
    world: Arc<ManualClock>,
    latency_ms: f64,
    inner: Arc<Mutex<NetInner>>,
}

impl SimNet {
    pub fn new(world: Arc<ManualClock>, latency_ms: f64) -> Self {
        Self {
            world,
            latency_ms,
            inner: Arc::new(Mutex::new(NetInner::default())),
        }
    }

    pub fn endpoint(&self) -> SimEndpoint {
        let mut inner = self.inner.lock();
        let id = inner.next_endpoint;
        inner.next_endpoint += 1;
        SimEndpoint {
            net: self.clone(),
            id,
            room_id: None,
        }
    }

    /// Frames handed to the network so far.
    pub fn sent_count(&self) -> u64 {
        self.inner.lock().sent
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().in_flight.len()
    }
}

/// One participant's connection to a [`SimNet`].
pub struct SimEndpoint {
    net: SimNet,
    id: u64,
    room_id: Option<String>,
}

impl Channel for SimEndpoint {
    fn connect(&mut self, room_id: &str, _client_id: &str) -> metrosync::session::Result<()> {
        self.disconnect();
        self.net
            .inner
            .lock()
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .push(self.id);
        self.room_id = Some(room_id.to_string());
        Ok(())
    }

    fn send(&mut self, envelope: &Envelope) -> metrosync::session::Result<()> {
        let Some(room_id) = &self.room_id else {
            return Err(SessionError::Channel("not connected".into()));
        };
        let frame = envelope.to_json()?;
        let deliver_at = self.net.world.now_ms() + self.net.latency_ms;

        let mut inner = self.net.inner.lock();
        inner.sent += 1;
        let members = inner.rooms.get(room_id).cloned().unwrap_or_default();
        for to in members.into_iter().filter(|&id| id != self.id) {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.in_flight.push(InFlight {
                to,
                deliver_at,
                seq,
                frame: frame.clone(),
            });
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Option<Envelope> {
        self.room_id.as_ref()?;
        let now = self.net.world.now_ms();
        let mut inner = self.net.inner.lock();
        let next = inner
            .in_flight
            .iter()
            .enumerate()
            .filter(|(_, f)| f.to == self.id && f.deliver_at <= now)
            .min_by(|(_, a), (_, b)| {
                a.deliver_at
                    .total_cmp(&b.deliver_at)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(i, _)| i)?;
        let frame = inner.in_flight.remove(next).frame;
        drop(inner);
        Envelope::from_json(&frame).ok()
    }

    fn disconnect(&mut self) {
        if let Some(room_id) = self.room_id.take() {
            let mut inner = self.net.inner.lock();
            if let Some(members) = inner.rooms.get_mut(&room_id) {
                members.retain(|&id| id != self.id);
            }
            inner.in_flight.retain(|f| f.to != self.id);
        }
    }

    fn is_connected(&self) -> bool {
        self.room_id.is_some()
    }
}

/// A host and follower on one simulated network. The host runs on world
/// time; the follower's clock reads `TEST_FOLLOWER_OFFSET_MS` ahead.
pub struct Rig {
    pub world: Arc<ManualClock>,
    pub net: SimNet,
    pub host: SimHost,
    pub follower: SimFollower,
    pub host_ticks: Arc<Mutex<Vec<BeatTick>>>,
    pub follower_ticks: Arc<Mutex<Vec<BeatTick>>>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let world = Arc::new(ManualClock::new(TEST_START_MS));
        let net = SimNet::new(world.clone(), TEST_LATENCY_MS);
        let world_clock: Arc<dyn Clock> = world.clone();
        let follower_clock: Arc<dyn Clock> =
            Arc::new(OffsetClock::new(world_clock.clone(), TEST_FOLLOWER_OFFSET_MS));

        let mut host = SessionBuilder::new("host")
            .clock(world_clock)
            .config(config.clone())
            .build_host(net.endpoint())
            .expect("Failed to build host");
        let mut follower = SessionBuilder::new("follower")
            .clock(follower_clock)
            .config(config)
            .build_follower(net.endpoint())
            .expect("Failed to build follower");

        let host_ticks = record_ticks(&mut host);
        let follower_ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = follower_ticks.clone();
        follower
            .scheduler_mut()
            .set_beat_listener(move |tick| sink.lock().push(tick));

        Self {
            world,
            net,
            host,
            follower,
            host_ticks,
            follower_ticks,
        }
    }

    /// Host world time.
    pub fn now(&self) -> f64 {
        self.world.now_ms()
    }

    /// Advances world time in 1ms steps, polling host then follower.
    pub fn run_for(&mut self, duration_ms: f64) {
        let end = self.now() + duration_ms;
        while self.now() < end {
            self.step();
        }
    }

    /// Steps until `done` holds, panicking after `limit_ms`.
    pub fn run_until(&mut self, limit_ms: f64, mut done: impl FnMut(&Self) -> bool) {
        let end = self.now() + limit_ms;
        while !done(self) {
            assert!(self.now() < end, "condition not reached within {limit_ms}ms");
            self.step();
        }
    }

    pub fn step(&mut self) {
        self.world.advance(1.0);
        self.host.poll();
        self.follower.poll();
    }

    /// Creates a room and joins the follower to it.
    pub fn open_and_join(&mut self, bpm: u32) -> String {
        let room_id = self
            .host
            .create_room(bpm, Some("ROOM01"))
            .expect("Failed to create room");
        self.follower
            .join_room(&room_id)
            .expect("Failed to join room");
        room_id
    }

    /// Runs until the host holds at least `samples` clock samples for the follower.
    pub fn sync_samples(&mut self, samples: u64) {
        self.run_until(30_000.0, |rig| {
            rig.host
                .peer_sync("follower")
                .is_some_and(|s| s.sample_count() >= samples)
        });
    }

    pub fn host_ticks(&self) -> Vec<BeatTick> {
        self.host_ticks.lock().clone()
    }

    pub fn follower_ticks(&self) -> Vec<BeatTick> {
        self.follower_ticks.lock().clone()
    }
}

pub fn record_ticks<C: Channel>(
    host: &mut HostStateMachine<C, VirtualEngine>,
) -> Arc<Mutex<Vec<BeatTick>>> {
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let sink = ticks.clone();
    host.scheduler_mut()
        .set_beat_listener(move |tick| sink.lock().push(tick));
    ticks
}

/// Beat indices, in delivery order.
pub fn indices(ticks: &[BeatTick]) -> Vec<i64> {
    ticks.iter().map(|t| t.beat_index).collect()
}

/// Panics unless every index is exactly one more than the previous.
pub fn assert_consecutive(ticks: &[BeatTick]) {
    for pair in ticks.windows(2) {
        assert_eq!(
            pair[1].beat_index,
            pair[0].beat_index + 1,
            "beat sequence broke between {:?} and {:?}",
            pair[0],
            pair[1]
        );
    }
}
