//! Host-owned room model.

use metrosync_core::BeatGrid;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Open,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerConnState {
    pub status: PeerStatus,
    /// Host clock time of the last message from this peer.
    pub last_seen_at: f64,
}

/// Host-clock time of a given beat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub time_at_host: f64,
    pub beat_index: i64,
}

/// Authoritative room state. Only the host mutates it.
///
/// The status is `Running` exactly when an anchor is set; both change
/// together through [`start`](Self::start) and [`stop`](Self::stop).
#[derive(Debug, Clone)]
pub struct RoomState {
    room_id: String,
    host_id: String,
    bpm: u32,
    version: u64,
    anchor: Option<Anchor>,
    peers: BTreeMap<String, PeerConnState>,
}

impl RoomState {
    pub fn new(room_id: impl Into<String>, host_id: impl Into<String>, bpm: u32) -> Self {
        Self {
            room_id: room_id.into(),
            host_id: host_id.into(),
            bpm,
            version: 0,
            anchor: None,
            peers: BTreeMap::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: u32) {
        self.bpm = bpm;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the new version.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn status(&self) -> RoomStatus {
        if self.anchor.is_some() {
            RoomStatus::Running
        } else {
            RoomStatus::Open
        }
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn anchor(&self) -> Option<Anchor> {
        self.anchor
    }

    pub fn start(&mut self, anchor: Anchor) {
        self.anchor = Some(anchor);
    }

    pub fn stop(&mut self) {
        self.anchor = None;
    }

    /// Live grid in the host clock domain, while running.
    pub fn grid(&self) -> Option<BeatGrid> {
        self.anchor
            .map(|a| BeatGrid::new(self.bpm, a.time_at_host, a.beat_index))
    }

    pub fn peers(&self) -> &BTreeMap<String, PeerConnState> {
        &self.peers
    }

    pub fn peer(&self, peer_id: &str) -> Option<&PeerConnState> {
        self.peers.get(peer_id)
    }

    pub fn peer_mut(&mut self, peer_id: &str) -> Option<&mut PeerConnState> {
        self.peers.get_mut(peer_id)
    }

    pub fn insert_peer(&mut self, peer_id: impl Into<String>, state: PeerConnState) {
        self.peers.insert(peer_id.into(), state);
    }

    pub fn remove_peer(&mut self, peer_id: &str) -> Option<PeerConnState> {
        self.peers.remove(peer_id)
    }

    pub fn connected_peer_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.status == PeerStatus::Connected)
            .count()
    }

    /// Peers whose last message is older than `stale_after_ms` at `now`.
    pub fn stale_peers(&self, now: f64, stale_after_ms: f64) -> Vec<String> {
        self.peers
            .iter()
            .filter(|(_, p)| now - p.last_seen_at > stale_after_ms)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            room_id: self.room_id.clone(),
            bpm: self.bpm,
            running: self.is_running(),
            anchor_time: self.anchor.map(|a| a.time_at_host),
            beat_index_at_anchor: self.anchor.map(|a| a.beat_index),
        }
    }
}

/// What an application persists to resume a session after a host reload.
///
/// Feed `anchor_time` and `beat_index_at_anchor` back through
/// `HostStateMachine::resume_metronome_from_anchor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub room_id: String,
    pub bpm: u32,
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat_index_at_anchor: Option<i64>,
}

/// Six-character uppercase room code.
pub fn generate_room_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

/// Random token identifying one host session of a room.
pub fn generate_session_token() -> String {
    format!("{:016x}", rand::random::<u64>())
}
