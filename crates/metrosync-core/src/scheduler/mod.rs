//! Lookahead beat scheduler.
//!
//! Turns a [`BeatGrid`] into click events handed to an [`AudioEngine`] far
//! enough ahead (500ms by default) that the engine plays them on its own
//! clock without glitches, while staying cancellable and re-anchorable.
//!
//! The scheduler is polled: call [`BeatScheduler::tick`] at least every
//! refill interval (see [`BeatScheduler::next_deadline`]). Each tick
//! settles clicks the engine has already played, fires due visual triggers,
//! and tops the engine up to the lookahead horizon.
//!
//! Wall time is converted into engine time with a freshly sampled
//! `(engine now, wall now)` pair for every beat, since the two clocks drift
//! apart over a session.

mod engine;
mod virtual_engine;

pub use engine::{AudioEngine, ClickId, ClickVoice, EngineState};
pub use virtual_engine::{ClickRecord, ClickStatus, VirtualEngine};

use crate::beat_grid::{is_downbeat, BeatGrid};
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::timers::TimerSet;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// A click this close to the engine clock counts as played, so a re-anchor
/// landing exactly on a beat neither cancels nor repeats it.
const PLAYED_EPSILON_S: f64 = 1e-6;

/// Visual trigger for one beat, delivered at the beat's wall time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatTick {
    pub beat_index: i64,
    pub accent: bool,
    /// Wall time of the beat, milliseconds.
    pub at: f64,
}

/// Callback receiving visual triggers.
pub type BeatListener = Box<dyn FnMut(BeatTick) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Stopped,
    Running,
}

/// Next beat the scheduler will consider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    pub next_beat_index: i64,
    /// Wall time of `next_beat_index`.
    pub next_schedule_time: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum SchedulerTimer {
    Refill,
    Visual(BeatTick),
}

#[derive(Debug, Clone, Copy)]
struct ScheduledClick {
    id: ClickId,
    beat_index: i64,
    audio_time: f64,
    wall_time: f64,
}

pub struct BeatScheduler<E: AudioEngine> {
    engine: E,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    state: SchedulerState,
    bpm: u32,
    grid: Option<BeatGrid>,
    cursor: Option<Cursor>,
    /// Handed to the engine, not yet reached by the engine clock. Time-ordered.
    pending: VecDeque<ScheduledClick>,
    timers: TimerSet<SchedulerTimer>,
    /// Most recent click the engine has played: `(beat index, wall time)`.
    last_dispatched: Option<(i64, f64)>,
    awaiting_engine: bool,
    gesture_armed: bool,
    listener: Option<BeatListener>,
}

impl<E: AudioEngine> BeatScheduler<E> {
    pub fn new(engine: E, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            clock,
            config,
            state: SchedulerState::Stopped,
            bpm: 120,
            grid: None,
            cursor: None,
            pending: VecDeque::new(),
            timers: TimerSet::new(),
            last_dispatched: None,
            awaiting_engine: false,
            gesture_armed: false,
            listener: None,
        }
    }

    pub fn set_beat_listener(&mut self, listener: impl FnMut(BeatTick) + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Starts playback. Without a grid, one is anchored at now with beat 0.
    ///
    /// If the engine clock is suspended, clicks are deferred until it runs
    /// and the next user gesture retries resuming it.
    pub fn start(&mut self, bpm: u32) {
        if self.state == SchedulerState::Running {
            return;
        }

        let now = self.clock.now_ms();
        self.bpm = bpm;
        if self.grid.is_none() {
            self.grid = Some(BeatGrid::new(bpm, now, 0));
        }
        self.state = SchedulerState::Running;
        self.timers.arm_periodic(
            SchedulerTimer::Refill,
            now + self.config.refill_interval_ms,
            self.config.refill_interval_ms,
        );

        if !self.engine.is_running() {
            self.engine.resume();
        }
        if self.engine.is_running() {
            debug!(bpm = self.bpm, "scheduler started");
            self.begin_playback();
        } else {
            warn!("audio engine suspended, deferring clicks until it resumes");
            self.awaiting_engine = true;
            self.gesture_armed = true;
        }
    }

    /// Stops immediately: every click not yet played and every pending
    /// visual trigger is cancelled before this returns.
    pub fn stop(&mut self) {
        let now = self.clock.now_ms();
        self.settle(now);
        self.cancel_pending();
        self.timers.drain();

        self.state = SchedulerState::Stopped;
        self.grid = None;
        self.cursor = None;
        self.last_dispatched = None;
        self.awaiting_engine = false;
        self.gesture_armed = false;
        debug!("scheduler stopped");
    }

    /// Installs a new grid. While running, everything scheduled under the
    /// old grid is cancelled first, then the cursor is recomputed and the
    /// lookahead refilled synchronously.
    pub fn set_beat_grid(&mut self, grid: BeatGrid) {
        self.bpm = grid.bpm();

        if self.state == SchedulerState::Running && !self.awaiting_engine {
            let now = self.clock.now_ms();
            self.settle(now);
            self.cancel_pending();
            self.grid = Some(grid);
            debug!(
                bpm = grid.bpm(),
                anchor = grid.anchor_time(),
                beat = grid.anchor_beat_index(),
                "re-anchored"
            );
            self.begin_playback();
        } else {
            self.grid = Some(grid);
        }
    }

    /// Changes tempo. While running, re-anchors at now from the beat current
    /// under the old grid so the phase continues instead of restarting.
    pub fn set_bpm(&mut self, bpm: u32) {
        if let (SchedulerState::Running, Some(grid)) = (self.state, self.grid) {
            if grid.bpm() != bpm {
                let now = self.clock.now_ms();
                self.set_beat_grid(grid.retempo_at(bpm, now));
            }
            return;
        }

        self.bpm = bpm;
        if let Some(grid) = self.grid {
            self.grid = Some(BeatGrid::new(bpm, grid.anchor_time(), grid.anchor_beat_index()));
        }
    }

    /// Retries resuming a suspended engine. One-shot per arming; re-armed on
    /// the next tick while the engine stays suspended.
    pub fn notify_user_gesture(&mut self) {
        if !self.gesture_armed {
            return;
        }
        self.gesture_armed = false;
        self.engine.resume();
        self.poll_engine();
    }

    /// Settles played clicks, fires due visual triggers and refills.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        let refill_due = self.settle(now);

        if self.state != SchedulerState::Running {
            return;
        }
        if self.awaiting_engine {
            self.poll_engine();
            if self.awaiting_engine {
                self.gesture_armed = true;
            }
            return;
        }
        if refill_due {
            self.schedule_ahead();
        }
    }

    /// Tops the engine up to `now + lookahead`. No-op without a grid.
    pub fn schedule_ahead(&mut self) {
        let (Some(grid), Some(mut cursor)) = (self.grid, self.cursor) else {
            return;
        };

        let horizon = self.clock.now_ms() + self.config.lookahead_ms;
        let tolerance = self.config.late_tolerance_ms / 1000.0;

        while cursor.next_schedule_time < horizon {
            let beat = cursor.next_beat_index;
            let wall_time = cursor.next_schedule_time;
            let (audio_time, audio_now) = self.to_engine_time(wall_time);

            if audio_time >= audio_now - tolerance {
                let accent = is_downbeat(beat, self.config.beats_per_bar);
                let at = audio_time.max(audio_now);
                let id = self.engine.schedule_click(at, ClickVoice::for_beat(accent));
                self.pending.push_back(ScheduledClick {
                    id,
                    beat_index: beat,
                    audio_time: at,
                    wall_time,
                });
                self.timers.arm_once(
                    SchedulerTimer::Visual(BeatTick {
                        beat_index: beat,
                        accent,
                        at: wall_time,
                    }),
                    wall_time,
                );
                trace!(beat, accent, at, "beat scheduled");
            } else {
                trace!(beat, "beat already past, skipped");
            }

            cursor.next_beat_index += 1;
            cursor.next_schedule_time = grid.beat_time(cursor.next_beat_index);
        }

        self.cursor = Some(cursor);
    }

    fn poll_engine(&mut self) {
        if self.state == SchedulerState::Running && self.awaiting_engine && self.engine.is_running()
        {
            info!("audio engine resumed, starting clicks");
            self.awaiting_engine = false;
            self.gesture_armed = false;
            self.begin_playback();
        }
    }

    fn begin_playback(&mut self) {
        self.reseed_cursor();
        self.schedule_ahead();
    }

    fn reseed_cursor(&mut self) {
        let Some(grid) = self.grid else {
            self.cursor = None;
            return;
        };

        let now = self.clock.now_ms();
        let mut beat = grid.cursor_start(now);

        // Same timeline continuing: never replay a beat the engine already played.
        if let Some((last, at)) = self.last_dispatched {
            if grid.position_at(at) > (last - 1) as f64 {
                beat = beat.max(last + 1);
            }
        }

        self.cursor = Some(Cursor {
            next_beat_index: beat,
            next_schedule_time: grid.beat_time(beat),
        });
    }

    /// Returns whether the refill timer came due.
    fn settle(&mut self, now: f64) -> bool {
        let audio_now = self.engine.current_time();
        while self
            .pending
            .front()
            .is_some_and(|click| click.audio_time <= audio_now + PLAYED_EPSILON_S)
        {
            if let Some(played) = self.pending.pop_front() {
                self.last_dispatched = Some((played.beat_index, played.wall_time));
            }
        }

        let mut refill_due = false;
        while let Some((_, timer)) = self.timers.pop_due(now) {
            match timer {
                SchedulerTimer::Refill => refill_due = true,
                SchedulerTimer::Visual(tick) => {
                    if let Some(listener) = self.listener.as_mut() {
                        listener(tick);
                    }
                }
            }
        }
        refill_due
    }

    fn cancel_pending(&mut self) {
        for click in self.pending.drain(..) {
            self.engine.cancel(click.id);
        }
        self.timers
            .cancel_where(|t| matches!(t, SchedulerTimer::Visual(_)));
    }

    /// `(engine time, engine now)` for a wall time, resampling both clocks.
    fn to_engine_time(&self, wall_ms: f64) -> (f64, f64) {
        let audio_now = self.engine.current_time();
        let wall_now = self.clock.now_ms();
        (audio_now + (wall_ms - wall_now) / 1000.0, audio_now)
    }

    #[inline]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }

    #[inline]
    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    #[inline]
    pub fn grid(&self) -> Option<BeatGrid> {
        self.grid
    }

    #[inline]
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Beat under the active grid at the current wall time.
    pub fn current_beat(&self) -> Option<i64> {
        self.grid.map(|g| g.beat_at(self.clock.now_ms()))
    }

    /// Clicks handed to the engine and not yet played.
    pub fn pending_clicks(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_beats(&self) -> Vec<i64> {
        self.pending.iter().map(|c| c.beat_index).collect()
    }

    pub fn pending_visuals(&self) -> usize {
        self.timers
            .count_where(|t| matches!(t, SchedulerTimer::Visual(_)))
    }

    pub fn is_awaiting_engine(&self) -> bool {
        self.awaiting_engine
    }

    pub fn is_gesture_armed(&self) -> bool {
        self.gesture_armed
    }

    /// Earliest wall time at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<f64> {
        self.timers.next_deadline()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}
