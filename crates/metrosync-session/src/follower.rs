//! Follower side of a session.
//!
//! A follower joins a room, answers pings, smooths the offsets the host
//! pushes back, and converts host anchors into local [`BeatGrid`]s for its
//! own [`BeatScheduler`]. Once started, the scheduler free-runs; the host
//! only needs to send re-anchors.
//!
//! The join announcement is repeated for as long as the follower is in a
//! room, so a host that restarts rediscovers its followers on its own.
//! Every handshake with a new host session bumps [`epoch`](FollowerStateMachine::epoch)
//! and discards offsets measured against the old one.

use crate::channel::Channel;
use crate::config::SessionConfig;
use crate::protocol::{
    ClockOffset, Envelope, LeaderHello, Message, ParamUpdate, Recipient, StartAnnounce, TimePing,
    TimePong,
};
use crate::{Error, Result};
use metrosync_core::{AudioEngine, BeatGrid, BeatScheduler, Clock, ClockSync, TimerSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowerState {
    #[default]
    Idle,
    Discovering,
    Signaling,
    Syncing,
    Running,
}

impl FollowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            FollowerState::Idle => "idle",
            FollowerState::Discovering => "discovering",
            FollowerState::Signaling => "signaling",
            FollowerState::Syncing => "syncing",
            FollowerState::Running => "running",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FollowerTimer {
    JoinRetry,
    /// Local grid to start (or re-anchor to) when the timer fires.
    PendingStart(BeatGrid),
}

pub struct FollowerStateMachine<C: Channel, E: AudioEngine> {
    client_id: String,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    channel: C,
    scheduler: BeatScheduler<E>,
    state: FollowerState,
    room_id: Option<String>,
    host_id: Option<String>,
    host_session: Option<String>,
    epoch: u64,
    sync: ClockSync,
    offset_updates: u32,
    latest_version: Option<u64>,
    last_announce: Option<StartAnnounce>,
    /// Start received before enough offsets arrived.
    held_announce: Option<StartAnnounce>,
    join_started_at: Option<f64>,
    timeout_reported: bool,
    timers: TimerSet<FollowerTimer>,
}

impl<C: Channel, E: AudioEngine> FollowerStateMachine<C, E> {
    pub fn new(
        client_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        channel: C,
        engine: E,
        config: SessionConfig,
    ) -> Self {
        let scheduler = BeatScheduler::new(engine, clock.clone(), config.scheduler.clone());
        let sync = ClockSync::new(config.clock_sync.clone());
        Self {
            client_id: client_id.into(),
            config,
            clock,
            channel,
            scheduler,
            state: FollowerState::Idle,
            room_id: None,
            host_id: None,
            host_session: None,
            epoch: 0,
            sync,
            offset_updates: 0,
            latest_version: None,
            last_announce: None,
            held_announce: None,
            join_started_at: None,
            timeout_reported: false,
            timers: TimerSet::new(),
        }
    }

    pub fn join_room(&mut self, room_id: &str) -> Result<()> {
        if self.state != FollowerState::Idle {
            return Err(Error::invalid_state("join a room", self.state.as_str()));
        }
        self.channel.connect(room_id, &self.client_id)?;

        let now = self.clock.now_ms();
        self.state = FollowerState::Discovering;
        self.room_id = Some(room_id.to_string());
        self.join_started_at = Some(now);
        self.timeout_reported = false;

        self.send(Recipient::Broadcast, Message::Join {});
        self.state = FollowerState::Signaling;
        self.timers.arm_periodic(
            FollowerTimer::JoinRetry,
            now + self.config.join_retry_interval_ms,
            self.config.join_retry_interval_ms,
        );
        info!(room_id, client_id = %self.client_id, "joining room");
        Ok(())
    }

    pub fn leave_room(&mut self) -> Result<()> {
        if self.state == FollowerState::Idle {
            return Err(Error::invalid_state("leave a room", self.state.as_str()));
        }
        self.scheduler.stop();
        if self.channel.is_connected() {
            let to = self
                .host_id
                .clone()
                .map_or(Recipient::Broadcast, Recipient::Peer);
            self.send(to, Message::PeerBye {});
        }
        info!(room_id = ?self.room_id, "left room");
        self.teardown();
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
                FollowerTimer::JoinRetry => {
                    debug!("re-announcing join");
                    self.send(Recipient::Broadcast, Message::Join {});
                }
                FollowerTimer::PendingStart(grid) => self.start_playback(grid),
            }
        }

        self.scheduler.tick();

        if !self.timeout_reported && self.join_timed_out() {
            self.timeout_reported = true;
            warn!(
                waited_ms = ?self.waiting_for_host_ms(),
                "no host acknowledgment yet"
            );
        }
    }

    pub fn handle_message(&mut self, envelope: Envelope) {
        let Some(room_id) = self.room_id.as_deref() else {
            return;
        };
        if let Some(reason) = envelope.drop_reason(room_id, &self.client_id) {
            debug!(kind = envelope.message.type_name(), reason, "message dropped");
            return;
        }

        let Envelope { from, message, .. } = envelope;
        let message = match message {
            Message::LeaderHello(hello) => {
                self.on_hello(from, hello);
                return;
            }
            other => other,
        };
        if self.host_id.as_deref() != Some(from.as_str()) {
            debug!(
                kind = message.type_name(),
                from = %from,
                "message not from the known host, dropped"
            );
            return;
        }

        match message {
            Message::TimePing(ping) => self.on_ping(ping),
            Message::ClockOffset(offset) => self.on_offset(offset),
            Message::StartAnnounce(announce) => self.on_start_announce(announce),
            Message::ParamUpdate(update) => self.on_param_update(update),
            Message::StopAnnounce {} => self.on_stop_announce(),
            Message::RoomClosed {} => {
                info!(room_id = ?self.room_id, "host closed the room");
                self.teardown();
            }
            other => debug!(kind = other.type_name(), "ignoring message"),
        }
    }

    fn on_hello(&mut self, host_id: String, hello: LeaderHello) {
        let new_session = self.host_id.as_deref() != Some(host_id.as_str())
            || self.host_session != hello.session;

        if new_session {
            self.epoch += 1;
            self.sync.reset();
            self.offset_updates = 0;
            self.latest_version = None;
            self.last_announce = None;
            self.held_announce = None;
            self.timers
                .cancel_where(|t| matches!(t, FollowerTimer::PendingStart(_)));
            info!(host = %host_id, epoch = self.epoch, "handshake with host session");
            self.host_id = Some(host_id);
            self.host_session = hello.session;
        }

        self.join_started_at = None;
        if new_session
            || matches!(
                self.state,
                FollowerState::Discovering | FollowerState::Signaling
            )
        {
            self.state = if self.scheduler.is_running() {
                FollowerState::Running
            } else {
                FollowerState::Syncing
            };
        }
    }

    fn on_ping(&mut self, ping: TimePing) {
        let t2 = self.clock.now_ms();
        let t3 = self.clock.now_ms();
        if let Some(host) = self.host_id.clone() {
            self.send(
                Recipient::Peer(host),
                Message::TimePong(TimePong {
                    seq: ping.seq,
                    t1: ping.t1,
                    t2,
                    t3,
                }),
            );
        }
    }

    fn on_offset(&mut self, offset: ClockOffset) {
        let sample = self.sync.set_offset_ms(offset.offset_ms);
        self.offset_updates += 1;
        debug!(
            offset_ms = offset.offset_ms,
            rtt = offset.rtt,
            smoothed = ?sample.offset,
            updates = self.offset_updates,
            "offset update"
        );

        if self.has_enough_offsets() {
            if let Some(announce) = self.held_announce.take() {
                info!("offset threshold reached, releasing held start");
                self.apply_announce(announce);
            }
        }
    }

    fn on_start_announce(&mut self, announce: StartAnnounce) {
        if self.latest_version.is_some_and(|v| announce.version < v) {
            debug!(version = announce.version, "stale start announcement");
            return;
        }
        if self.last_announce == Some(announce) || self.held_announce == Some(announce) {
            return;
        }
        self.latest_version = Some(announce.version);

        if !self.has_enough_offsets() {
            info!(
                updates = self.offset_updates,
                "holding start until clock offset settles"
            );
            self.held_announce = Some(announce);
            return;
        }
        self.apply_announce(announce);
    }

    fn apply_announce(&mut self, announce: StartAnnounce) {
        let now = self.clock.now_ms();
        let anchor_local = self.sync.to_local(announce.anchor_time);
        let grid = BeatGrid::new(announce.bpm, anchor_local, announce.anchor_beat_index);
        let delay = (anchor_local - now).max(self.config.min_startup_delay_ms);

        self.last_announce = Some(announce);
        let beat = announce.anchor_beat_index;
        self.timers.cancel_where(|t| {
            matches!(t, FollowerTimer::PendingStart(g) if g.anchor_beat_index() >= beat)
        });
        self.timers
            .arm_once(FollowerTimer::PendingStart(grid), now + delay);
        info!(
            bpm = announce.bpm,
            version = announce.version,
            anchor_local,
            delay,
            "start armed"
        );
    }

    fn start_playback(&mut self, grid: BeatGrid) {
        self.scheduler.set_beat_grid(grid);
        if !self.scheduler.is_running() {
            self.scheduler.start(grid.bpm());
        }
        self.state = FollowerState::Running;
        info!(
            bpm = grid.bpm(),
            beat = grid.anchor_beat_index(),
            "playback grid applied"
        );
    }

    fn on_param_update(&mut self, update: ParamUpdate) {
        if self.latest_version.is_some_and(|v| update.version < v) {
            debug!(version = update.version, "stale param update");
            return;
        }
        self.latest_version = Some(update.version);
        if let Some(bpm) = update.bpm {
            if !self.scheduler.is_running() {
                self.scheduler.set_bpm(bpm);
            }
        }
    }

    fn on_stop_announce(&mut self) {
        self.timers
            .cancel_where(|t| matches!(t, FollowerTimer::PendingStart(_)));
        self.held_announce = None;
        self.last_announce = None;
        self.scheduler.stop();
        if self.state == FollowerState::Running {
            self.state = FollowerState::Syncing;
        }
        info!("playback stopped by host");
    }

    fn teardown(&mut self) {
        self.timers.drain();
        self.scheduler.stop();
        self.channel.disconnect();
        self.room_id = None;
        self.host_id = None;
        self.host_session = None;
        self.sync.reset();
        self.offset_updates = 0;
        self.latest_version = None;
        self.last_announce = None;
        self.held_announce = None;
        self.join_started_at = None;
        self.state = FollowerState::Idle;
    }

    fn has_enough_offsets(&self) -> bool {
        self.offset_updates >= self.config.min_offset_samples_for_start
    }

    fn send(&mut self, to: Recipient, message: Message) {
        let Some(room_id) = self.room_id.as_deref() else {
            return;
        };
        let envelope = Envelope::new(
            room_id,
            self.client_id.as_str(),
            to,
            self.clock.now_ms(),
            message,
        );
        if let Err(e) = self.channel.send(&envelope) {
            warn!(kind = envelope.message.type_name(), error = %e, "send failed");
        }
    }

    /// How long the follower has been waiting for a host acknowledgment, while
    /// discovering or signaling.
    pub fn waiting_for_host_ms(&self) -> Option<f64> {
        match self.state {
            FollowerState::Discovering | FollowerState::Signaling => self
                .join_started_at
                .map(|t| self.clock.now_ms() - t),
            _ => None,
        }
    }

    /// Whether the wait exceeds `join_timeout_ms`. The application decides
    /// what a failed join means.
    pub fn join_timed_out(&self) -> bool {
        self.waiting_for_host_ms()
            .is_some_and(|waited| waited >= self.config.join_timeout_ms)
    }

    #[inline]
    pub fn state(&self) -> FollowerState {
        self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    /// Incremented on every handshake with a new host session.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn offset(&self) -> Option<f64> {
        self.sync.offset()
    }

    pub fn offset_updates(&self) -> u32 {
        self.offset_updates
    }

    pub fn clock_sync(&self) -> &ClockSync {
        &self.sync
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Grid armed to start, with the local time it will be applied.
    pub fn pending_start(&self) -> Option<(BeatGrid, f64)> {
        match self
            .timers
            .find(|t| matches!(t, FollowerTimer::PendingStart(_)))
        {
            Some((FollowerTimer::PendingStart(grid), at)) => Some((*grid, at)),
            _ => None,
        }
    }

    pub fn has_held_start(&self) -> bool {
        self.held_announce.is_some()
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

    pub fn next_deadline(&self) -> Option<f64> {
        match (self.timers.next_deadline(), self.scheduler.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
