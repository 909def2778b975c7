//! Authoritative side of a session.
//!
//! The host owns the [`RoomState`], keeps one [`ClockSync`] per follower fed
//! by periodic pings, and announces every transport change as a beat-grid
//! anchor in its own clock domain. Followers translate anchors locally.
//!
//! All work happens in [`HostStateMachine::poll`] (inbound messages, then due
//! timers, then the local scheduler) and in the public operations.

use crate::channel::Channel;
use crate::config::SessionConfig;
use crate::protocol::{
    ClockOffset, Envelope, LeaderHello, Message, ParamUpdate, Recipient, StartAnnounce, TimePing,
    TimePong,
};
use crate::room::{
    generate_room_id, generate_session_token, Anchor, PeerConnState, PeerStatus, RoomState,
    SessionSnapshot,
};
use crate::{Error, Result};
use metrosync_core::{AudioEngine, BeatGrid, BeatScheduler, Clock, ClockSync, TimerSet};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostState {
    #[default]
    Idle,
    RoomOpen,
    Running,
    Closing,
}

impl HostState {
    pub fn as_str(self) -> &'static str {
        match self {
            HostState::Idle => "idle",
            HostState::RoomOpen => "room open",
            HostState::Running => "running",
            HostState::Closing => "closing",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum HostTimer {
    Ping(String),
    StaleSweep,
    /// Local scheduler switches to this grid at its anchor time.
    Reanchor(BeatGrid),
}

#[derive(Debug)]
struct PeerSync {
    sync: ClockSync,
    next_seq: u64,
    /// Pongs below this sequence answer pings sent before the last rejoin.
    first_live_seq: u64,
}

pub struct HostStateMachine<C: Channel, E: AudioEngine> {
    host_id: String,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    channel: C,
    scheduler: BeatScheduler<E>,
    state: HostState,
    room: Option<RoomState>,
    session: Option<String>,
    peers: HashMap<String, PeerSync>,
    timers: TimerSet<HostTimer>,
}

impl<C: Channel, E: AudioEngine> HostStateMachine<C, E> {
    pub fn new(
        host_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        channel: C,
        engine: E,
        config: SessionConfig,
    ) -> Self {
        let scheduler = BeatScheduler::new(engine, clock.clone(), config.scheduler.clone());
        Self {
            host_id: host_id.into(),
            config,
            clock,
            channel,
            scheduler,
            state: HostState::Idle,
            room: None,
            session: None,
            peers: HashMap::new(),
            timers: TimerSet::new(),
        }
    }

    /// Opens a room and connects the channel. Returns the room id.
    pub fn create_room(&mut self, bpm: u32, preferred_id: Option<&str>) -> Result<String> {
        if self.state != HostState::Idle {
            return Err(Error::invalid_state("create a room", self.state.as_str()));
        }
        self.config.check_bpm(bpm)?;

        let room_id = preferred_id
            .map(str::to_string)
            .unwrap_or_else(generate_room_id);
        self.channel.connect(&room_id, &self.host_id)?;

        let now = self.clock.now_ms();
        self.room = Some(RoomState::new(room_id.clone(), self.host_id.clone(), bpm));
        self.session = Some(generate_session_token());
        self.scheduler.set_bpm(bpm);
        self.timers.arm_periodic(
            HostTimer::StaleSweep,
            now + self.config.stale_sweep_interval_ms,
            self.config.stale_sweep_interval_ms,
        );
        self.state = HostState::RoomOpen;
        info!(room_id = %room_id, bpm, "room created");
        Ok(room_id)
    }

    /// Starts at beat 0, anchored now.
    pub fn start_metronome(&mut self) -> Result<()> {
        if self.state != HostState::RoomOpen {
            return Err(Error::invalid_state("start the metronome", self.state.as_str()));
        }
        let now = self.clock.now_ms();
        self.begin_running(Anchor {
            time_at_host: now,
            beat_index: 0,
        });
        Ok(())
    }

    /// Starts from a persisted anchor instead of beat 0.
    pub fn resume_metronome_from_anchor(
        &mut self,
        anchor_time: f64,
        anchor_beat_index: i64,
    ) -> Result<()> {
        if self.state != HostState::RoomOpen {
            return Err(Error::invalid_state("resume the metronome", self.state.as_str()));
        }
        self.begin_running(Anchor {
            time_at_host: anchor_time,
            beat_index: anchor_beat_index,
        });
        Ok(())
    }

    fn begin_running(&mut self, anchor: Anchor) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        room.start(anchor);
        let bpm = room.bpm();
        self.state = HostState::Running;

        if let Some(announce) = self.start_announce() {
            self.send(Recipient::Broadcast, Message::StartAnnounce(announce));
        }
        self.scheduler
            .set_beat_grid(BeatGrid::new(bpm, anchor.time_at_host, anchor.beat_index));
        self.scheduler.start(bpm);
        info!(
            bpm,
            anchor_time = anchor.time_at_host,
            beat = anchor.beat_index,
            "metronome started"
        );
    }

    pub fn stop_metronome(&mut self) -> Result<()> {
        if self.state != HostState::Running {
            return Err(Error::invalid_state("stop the metronome", self.state.as_str()));
        }
        self.timers
            .cancel_where(|t| matches!(t, HostTimer::Reanchor(_)));
        self.scheduler.stop();
        if let Some(room) = self.room.as_mut() {
            room.stop();
        }
        self.state = HostState::RoomOpen;
        self.send(Recipient::Broadcast, Message::StopAnnounce {});
        info!("metronome stopped");
        Ok(())
    }

    /// Changes tempo. Unchanged values are a no-op.
    ///
    /// While running, the change takes effect on a whole beat of the current
    /// tempo at least `tempo_change_lead_ms` from now, so every device can
    /// switch on the same beat.
    pub fn set_bpm(&mut self, bpm: u32) -> Result<()> {
        if !matches!(self.state, HostState::RoomOpen | HostState::Running) {
            return Err(Error::invalid_state("change tempo", self.state.as_str()));
        }
        self.config.check_bpm(bpm)?;

        let lead = self.config.tempo_change_lead_ms;
        let now = self.clock.now_ms();
        let Some(room) = self.room.as_mut() else {
            return Err(Error::invalid_state("change tempo", self.state.as_str()));
        };
        if room.bpm() == bpm {
            return Ok(());
        }

        let version = room.bump_version();
        let Some(old_grid) = room.grid() else {
            room.set_bpm(bpm);
            self.scheduler.set_bpm(bpm);
            self.send(
                Recipient::Broadcast,
                Message::ParamUpdate(ParamUpdate {
                    bpm: Some(bpm),
                    version,
                }),
            );
            info!(bpm, version, "tempo changed");
            return Ok(());
        };

        let (beat_index, change_at) = old_grid.next_boundary(now + lead);
        room.set_bpm(bpm);
        room.start(Anchor {
            time_at_host: change_at,
            beat_index,
        });

        if let Some(announce) = self.start_announce() {
            self.send(Recipient::Broadcast, Message::StartAnnounce(announce));
        }
        // Earlier changes that have not landed yet still own the beats
        // before this one.
        self.timers.cancel_where(|t| {
            matches!(t, HostTimer::Reanchor(g) if g.anchor_beat_index() >= beat_index)
        });
        self.timers.arm_once(
            HostTimer::Reanchor(BeatGrid::new(bpm, change_at, beat_index)),
            change_at,
        );
        info!(bpm, version, beat = beat_index, change_at, "tempo change scheduled");
        Ok(())
    }

    /// Tears the room down from any non-idle state.
    pub fn close_room(&mut self) -> Result<()> {
        if self.state == HostState::Idle {
            return Err(Error::invalid_state("close the room", self.state.as_str()));
        }
        self.state = HostState::Closing;
        self.timers.drain();
        self.scheduler.stop();
        self.send(Recipient::Broadcast, Message::RoomClosed {});

        let room_id = self.room.take().map(|r| r.room_id().to_string());
        self.peers.clear();
        self.session = None;
        self.channel.disconnect();
        self.state = HostState::Idle;
        info!(room_id = ?room_id, "room closed");
        Ok(())
    }

    /// Drains inbound messages, fires due timers and ticks the scheduler.
    pub fn poll(&mut self) {
        while let Some(envelope) = self.channel.try_recv() {
            self.handle_message(envelope);
        }

        let now = self.clock.now_ms();
        while let Some((_, timer)) = self.timers.pop_due(now) {
            match timer {
                HostTimer::Ping(peer) => self.send_ping(&peer),
                HostTimer::StaleSweep => self.sweep_stale(now),
                HostTimer::Reanchor(grid) => {
                    debug!(bpm = grid.bpm(), beat = grid.anchor_beat_index(), "local re-anchor");
                    self.scheduler.set_beat_grid(grid);
                }
            }
        }

        self.scheduler.tick();
    }

    pub fn handle_message(&mut self, envelope: Envelope) {
        if !matches!(self.state, HostState::RoomOpen | HostState::Running) {
            return;
        }
        let Some(room) = self.room.as_mut() else {
            return;
        };
        if let Some(reason) = envelope.drop_reason(room.room_id(), &self.host_id) {
            debug!(kind = envelope.message.type_name(), reason, "message dropped");
            return;
        }

        let now = self.clock.now_ms();
        if let Some(peer) = room.peer_mut(&envelope.from) {
            peer.last_seen_at = now;
        }

        let from = envelope.from;
        match envelope.message {
            Message::Join {} => self.on_join(&from, now),
            Message::PeerBye {} => self.remove_peer(&from, "left"),
            Message::TimePong(pong) => self.on_pong(&from, pong, now),
            other => debug!(kind = other.type_name(), from = %from, "ignoring follower message"),
        }
    }

    fn on_join(&mut self, peer_id: &str, now: f64) {
        let Some(room) = self.room.as_mut() else {
            return;
        };

        let known = room.peer(peer_id).is_some();
        if !known {
            room.insert_peer(
                peer_id,
                PeerConnState {
                    status: PeerStatus::Connecting,
                    last_seen_at: now,
                },
            );
        }

        let hello = LeaderHello {
            session: self.session.clone(),
        };
        self.send(Recipient::peer(peer_id), Message::LeaderHello(hello));

        if let Some(peer) = self.room.as_mut().and_then(|r| r.peer_mut(peer_id)) {
            peer.status = PeerStatus::Connected;
        }

        if known {
            // A rejoining client may be a new process with a new clock.
            if let Some(peer) = self.peers.get_mut(peer_id) {
                peer.sync.reset();
                peer.first_live_seq = peer.next_seq;
            }
            debug!(peer = peer_id, "join from known peer, clock samples reset");
            self.send_ping(peer_id);
        } else {
            self.peers.insert(
                peer_id.to_string(),
                PeerSync {
                    sync: ClockSync::new(self.config.clock_sync.clone()),
                    next_seq: 0,
                    first_live_seq: 0,
                },
            );
            self.send_ping(peer_id);
            self.timers.arm_periodic(
                HostTimer::Ping(peer_id.to_string()),
                now + self.config.ping_interval_ms,
                self.config.ping_interval_ms,
            );
            info!(peer = peer_id, peers = self.connected_peer_count(), "peer joined");
        }

        if let Some(update) = self.param_update() {
            self.send(Recipient::peer(peer_id), Message::ParamUpdate(update));
        }
        if let Some(announce) = self.start_announce() {
            self.send(Recipient::peer(peer_id), Message::StartAnnounce(announce));
        }
    }

    fn on_pong(&mut self, peer_id: &str, pong: TimePong, t4: f64) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            debug!(peer = peer_id, "pong from unknown peer");
            return;
        };
        if pong.seq >= peer.next_seq {
            debug!(peer = peer_id, seq = pong.seq, "pong for a ping never sent");
            return;
        }
        if pong.seq < peer.first_live_seq {
            debug!(peer = peer_id, seq = pong.seq, "pong from before rejoin");
            return;
        }

        let sample = peer.sync.process_pong(pong.t1, pong.t2, pong.t3, t4);
        debug!(
            peer = peer_id,
            seq = pong.seq,
            rtt = sample.rtt,
            offset = ?sample.offset,
            stable = sample.stable,
            "pong processed"
        );
        if let Some(offset_ms) = sample.offset {
            self.send(
                Recipient::peer(peer_id),
                Message::ClockOffset(ClockOffset {
                    offset_ms,
                    rtt: sample.rtt,
                }),
            );
        }
    }

    fn send_ping(&mut self, peer_id: &str) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };
        let seq = peer.next_seq;
        peer.next_seq += 1;
        let t1 = self.clock.now_ms();
        debug!(peer = peer_id, seq, "ping");
        self.send(Recipient::peer(peer_id), Message::TimePing(TimePing { seq, t1 }));
    }

    fn sweep_stale(&mut self, now: f64) {
        let Some(room) = self.room.as_ref() else {
            return;
        };
        for peer_id in room.stale_peers(now, self.config.peer_stale_after_ms) {
            warn!(peer = %peer_id, "peer went silent, removing");
            self.remove_peer(&peer_id, "stale");
        }
    }

    fn remove_peer(&mut self, peer_id: &str, reason: &str) {
        let removed = self
            .room
            .as_mut()
            .and_then(|r| r.remove_peer(peer_id))
            .is_some();
        self.peers.remove(peer_id);
        self.timers
            .cancel_where(|t| matches!(t, HostTimer::Ping(p) if p == peer_id));
        if removed {
            info!(peer = peer_id, reason, "peer removed");
        }
    }

    fn start_announce(&self) -> Option<StartAnnounce> {
        let room = self.room.as_ref()?;
        let anchor = room.anchor()?;
        Some(StartAnnounce {
            bpm: room.bpm(),
            version: room.version(),
            anchor_time: anchor.time_at_host,
            anchor_beat_index: anchor.beat_index,
        })
    }

    fn param_update(&self) -> Option<ParamUpdate> {
        let room = self.room.as_ref()?;
        Some(ParamUpdate {
            bpm: Some(room.bpm()),
            version: room.version(),
        })
    }

    fn send(&mut self, to: Recipient, message: Message) {
        let Some(room) = self.room.as_ref() else {
            return;
        };
        let envelope = Envelope::new(
            room.room_id(),
            self.host_id.as_str(),
            to,
            self.clock.now_ms(),
            message,
        );
        if let Err(e) = self.channel.send(&envelope) {
            warn!(kind = envelope.message.type_name(), error = %e, "send failed");
        }
    }

    #[inline]
    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(|r| r.room_id())
    }

    pub fn room(&self) -> Option<&RoomState> {
        self.room.as_ref()
    }

    pub fn bpm(&self) -> Option<u32> {
        self.room.as_ref().map(|r| r.bpm())
    }

    pub fn version(&self) -> Option<u64> {
        self.room.as_ref().map(|r| r.version())
    }

    pub fn connected_peer_count(&self) -> usize {
        self.room.as_ref().map_or(0, |r| r.connected_peer_count())
    }

    pub fn is_running(&self) -> bool {
        self.state == HostState::Running
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.room.as_ref().map(|r| r.snapshot())
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Smoothed offset of `peer_id`'s clock relative to the host.
    pub fn peer_offset(&self, peer_id: &str) -> Option<f64> {
        self.peers.get(peer_id).and_then(|p| p.sync.offset())
    }

    pub fn peer_sync(&self, peer_id: &str) -> Option<&ClockSync> {
        self.peers.get(peer_id).map(|p| &p.sync)
    }

    pub fn scheduler(&self) -> &BeatScheduler<E> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut BeatScheduler<E> {
        &mut self.scheduler
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    /// Earliest time at which [`poll`](Self::poll) has timer work to do.
    pub fn next_deadline(&self) -> Option<f64> {
        match (self.timers.next_deadline(), self.scheduler.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
