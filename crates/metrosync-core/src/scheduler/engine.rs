//! The audio-engine seam.
//!
//! The scheduler never synthesises sound. It hands discrete click events to
//! an [`AudioEngine`] at readings of the engine's own clock, which is not the
//! wall clock the scheduler plans in.

/// Which click voice to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClickVoice {
    /// First beat of an accent cycle.
    Accent,
    Regular,
}

impl ClickVoice {
    pub fn for_beat(accent: bool) -> Self {
        if accent {
            ClickVoice::Accent
        } else {
            ClickVoice::Regular
        }
    }
}

/// Identifier of one scheduled click, issued by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClickId(pub u64);

/// Whether the engine's clock is advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Clock frozen, typically until the platform sees a user gesture.
    #[default]
    Suspended,
    Running,
}

/// Audio output capable of sample-accurate click playback.
pub trait AudioEngine: Send {
    /// Engine clock reading in seconds. Monotonic while running.
    fn current_time(&self) -> f64;

    fn state(&self) -> EngineState;

    /// Asks the engine to start its clock. May take effect later, or not at
    /// all until the platform allows it.
    fn resume(&mut self);

    /// Plays `voice` when the engine clock reaches `at` seconds.
    fn schedule_click(&mut self, at: f64, voice: ClickVoice) -> ClickId;

    /// Cancels a click that has not played yet. Unknown or already played
    /// ids are ignored.
    fn cancel(&mut self, id: ClickId);

    #[inline]
    fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }
}
