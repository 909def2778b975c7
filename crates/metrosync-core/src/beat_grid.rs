//! Linear beat timelines.
//!
//! A [`BeatGrid`] is the shared vocabulary between host and followers: a
//! tempo plus one `(time, beat index)` anchor. Beat `i` occurs at
//!
//! ```text
//! anchor_time + (i - anchor_beat_index) * 60000 / bpm
//! ```
//!
//! Grids are immutable; re-anchoring builds a new one.

use serde::{Deserialize, Serialize};

/// Immutable `(bpm, anchor_time, anchor_beat_index)` timeline.
///
/// `anchor_time` is expressed in whichever clock domain consumes the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatGrid {
    bpm: u32,
    anchor_time: f64,
    anchor_beat_index: i64,
}

impl BeatGrid {
    pub fn new(bpm: u32, anchor_time: f64, anchor_beat_index: i64) -> Self {
        debug_assert!(bpm > 0, "bpm must be positive");
        Self {
            bpm,
            anchor_time,
            anchor_beat_index,
        }
    }

    #[inline]
    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    #[inline]
    pub fn anchor_time(&self) -> f64 {
        self.anchor_time
    }

    #[inline]
    pub fn anchor_beat_index(&self) -> i64 {
        self.anchor_beat_index
    }

    #[inline]
    pub fn beat_interval_ms(&self) -> f64 {
        beat_interval_ms(self.bpm)
    }

    /// Time at which `beat_index` occurs.
    #[inline]
    pub fn beat_time(&self, beat_index: i64) -> f64 {
        self.anchor_time + (beat_index - self.anchor_beat_index) as f64 * self.beat_interval_ms()
    }

    /// Fractional absolute beat position at `time`.
    #[inline]
    pub fn position_at(&self, time: f64) -> f64 {
        self.anchor_beat_index as f64 + (time - self.anchor_time) / self.beat_interval_ms()
    }

    /// Latest beat at or before `time` (floor of elapsed beats).
    #[inline]
    pub fn beat_at(&self, time: f64) -> i64 {
        self.anchor_beat_index + ((time - self.anchor_time) / self.beat_interval_ms()).floor() as i64
    }

    /// First beat a cursor seeded at `time` should consider.
    ///
    /// Floors elapsed beats, so a grid anchored slightly in the past still
    /// yields its anchor beat. Never below the anchor index.
    pub fn cursor_start(&self, time: f64) -> i64 {
        self.beat_at(time).max(self.anchor_beat_index)
    }

    /// First whole beat at or after `time`, never before the anchor.
    pub fn next_boundary(&self, time: f64) -> (i64, f64) {
        let elapsed = ((time - self.anchor_time) / self.beat_interval_ms()).ceil().max(0.0) as i64;
        let beat = self.anchor_beat_index + elapsed;
        (beat, self.beat_time(beat))
    }

    /// Same timeline expressed in another clock domain.
    pub fn shifted(&self, offset_ms: f64) -> Self {
        Self::new(self.bpm, self.anchor_time + offset_ms, self.anchor_beat_index)
    }

    /// Grid at `bpm` continuing from the beat current at `time`.
    pub fn retempo_at(&self, bpm: u32, time: f64) -> Self {
        Self::new(bpm, time, self.beat_at(time))
    }

    pub fn is_downbeat(&self, beat_index: i64, beats_per_bar: u32) -> bool {
        is_downbeat(beat_index, beats_per_bar)
    }
}

/// Milliseconds per beat at `bpm`.
#[inline]
pub fn beat_interval_ms(bpm: u32) -> f64 {
    60_000.0 / bpm.max(1) as f64
}

/// First beat of each accent cycle. Uses the absolute beat index.
#[inline]
pub fn is_downbeat(beat_index: i64, beats_per_bar: u32) -> bool {
    if beats_per_bar == 0 {
        return false;
    }
    beat_index.rem_euclid(beats_per_bar as i64) == 0
}
