//! Headless [`AudioEngine`] driven by a wall [`Clock`].
//!
//! Keeps its own audio-clock origin (seconds, starting at zero) that only
//! advances while running, and records the clicks it is asked to play.
//! Clones share state, so a handle kept outside the scheduler can inspect
//! what was scheduled. Settled clicks beyond a fixed history limit are dropped
//! oldest first; clicks still ahead of the engine clock are always kept.

use super::engine::{AudioEngine, ClickId, ClickVoice, EngineState};
use crate::clock::Clock;
use parking_lot::Mutex;
use std::sync::Arc;

/// Records kept before settled clicks start being pruned.
const HISTORY_LIMIT: usize = 1024;

/// Lifecycle of one recorded click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickStatus {
    Scheduled,
    Cancelled,
}

/// One click handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickRecord {
    pub id: ClickId,
    /// Engine clock time, seconds.
    pub at: f64,
    pub voice: ClickVoice,
    pub status: ClickStatus,
}

#[derive(Debug)]
struct EngineInner {
    state: EngineState,
    /// Engine time at `base_wall_ms`.
    base_audio: f64,
    base_wall_ms: f64,
    /// While locked, `resume()` is refused (autoplay policy).
    locked: bool,
    resume_requests: u32,
    next_id: u64,
    clicks: Vec<ClickRecord>,
    cancelled: usize,
}

impl EngineInner {
    /// Drops the oldest played or cancelled records down to half the limit.
    fn prune(&mut self, now: f64) {
        if self.clicks.len() <= HISTORY_LIMIT {
            return;
        }
        let mut excess = self.clicks.len() - HISTORY_LIMIT / 2;
        self.clicks.retain(|c| {
            let settled = c.status == ClickStatus::Cancelled || c.at <= now;
            if settled && excess > 0 {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

#[derive(Clone)]
pub struct VirtualEngine {
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<EngineInner>>,
}

impl VirtualEngine {
    /// Engine that is already running.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_state(clock, EngineState::Running, false)
    }

    /// Engine that starts suspended and refuses to resume until
    /// [`unlock`](Self::unlock) is called.
    pub fn suspended(clock: Arc<dyn Clock>) -> Self {
        Self::with_state(clock, EngineState::Suspended, true)
    }

    fn with_state(clock: Arc<dyn Clock>, state: EngineState, locked: bool) -> Self {
        let now = clock.now_ms();
        Self {
            clock,
            inner: Arc::new(Mutex::new(EngineInner {
                state,
                base_audio: 0.0,
                base_wall_ms: now,
                locked,
                resume_requests: 0,
                next_id: 0,
                clicks: Vec::new(),
                cancelled: 0,
            })),
        }
    }

    /// Lifts the autoplay restriction. Does not resume by itself.
    pub fn unlock(&self) {
        self.inner.lock().locked = false;
    }

    /// Freezes the engine clock.
    pub fn suspend(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        if inner.state == EngineState::Running {
            inner.base_audio += (now - inner.base_wall_ms) / 1000.0;
            inner.base_wall_ms = now;
            inner.state = EngineState::Suspended;
        }
    }

    pub fn resume_requests(&self) -> u32 {
        self.inner.lock().resume_requests
    }

    /// Retained history, in scheduling order.
    pub fn clicks(&self) -> Vec<ClickRecord> {
        self.inner.lock().clicks.clone()
    }

    /// Scheduled, not cancelled, and not yet reached by the engine clock.
    pub fn active(&self) -> Vec<ClickRecord> {
        let now = self.current_time();
        self.inner
            .lock()
            .clicks
            .iter()
            .filter(|c| c.status == ClickStatus::Scheduled && c.at > now)
            .copied()
            .collect()
    }

    /// Not cancelled and already reached by the engine clock.
    pub fn played(&self) -> Vec<ClickRecord> {
        let now = self.current_time();
        self.inner
            .lock()
            .clicks
            .iter()
            .filter(|c| c.status == ClickStatus::Scheduled && c.at <= now)
            .copied()
            .collect()
    }

    /// Cancellations over the engine's lifetime, pruned records included.
    pub fn cancelled_count(&self) -> usize {
        self.inner.lock().cancelled
    }
}

impl AudioEngine for VirtualEngine {
    fn current_time(&self) -> f64 {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        match inner.state {
            EngineState::Running => inner.base_audio + (now - inner.base_wall_ms) / 1000.0,
            EngineState::Suspended => inner.base_audio,
        }
    }

    fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    fn resume(&mut self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        inner.resume_requests += 1;
        if inner.locked || inner.state == EngineState::Running {
            return;
        }
        inner.base_wall_ms = now;
        inner.state = EngineState::Running;
    }

    fn schedule_click(&mut self, at: f64, voice: ClickVoice) -> ClickId {
        let now = self.current_time();
        let mut inner = self.inner.lock();
        let id = ClickId(inner.next_id);
        inner.next_id += 1;
        inner.clicks.push(ClickRecord {
            id,
            at,
            voice,
            status: ClickStatus::Scheduled,
        });
        inner.prune(now);
        tracing::trace!(id = id.0, at, ?voice, "click scheduled");
        id
    }

    fn cancel(&mut self, id: ClickId) {
        let now = self.current_time();
        let mut inner = self.inner.lock();
        if let Some(click) = inner
            .clicks
            .iter_mut()
            .find(|c| c.id == id && c.status == ClickStatus::Scheduled && c.at > now)
        {
            click.status = ClickStatus::Cancelled;
            inner.cancelled += 1;
        }
    }
}
