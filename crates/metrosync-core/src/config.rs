//! Scheduler and clock-sync configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Lookahead scheduler tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How far ahead of now clicks are handed to the audio engine.
    pub lookahead_ms: f64,
    /// Period of the refill tick while running.
    pub refill_interval_ms: f64,
    /// Accent cycle length; beat `i` is accented when `i % beats_per_bar == 0`.
    pub beats_per_bar: u32,
    /// A beat whose audio time is at most this far in the past is still
    /// handed to the engine (it plays immediately).
    pub late_tolerance_ms: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 500.0,
            refill_interval_ms: 50.0,
            beats_per_bar: 4,
            late_tolerance_ms: 2.0,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.lookahead_ms > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "lookahead_ms must be positive, got {}",
                self.lookahead_ms
            )));
        }
        if !(self.refill_interval_ms > 0.0) || self.refill_interval_ms >= self.lookahead_ms {
            return Err(Error::InvalidConfig(format!(
                "refill_interval_ms must be in (0, lookahead_ms), got {}",
                self.refill_interval_ms
            )));
        }
        if self.beats_per_bar == 0 {
            return Err(Error::InvalidConfig("beats_per_bar must be at least 1".into()));
        }
        if !(self.late_tolerance_ms >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "late_tolerance_ms must be non-negative, got {}",
                self.late_tolerance_ms
            )));
        }
        Ok(())
    }
}

/// Clock-offset estimator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSyncConfig {
    /// Number of RTT samples kept for the median gate.
    pub window: usize,
    /// Samples with `rtt > outlier_ratio * median` do not move the offset.
    pub outlier_ratio: f64,
    /// EMA smoothing factor in (0, 1].
    pub alpha: f64,
    /// Processed samples required before the offset is reported stable.
    pub stable_after: u64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            window: 10,
            outlier_ratio: 1.5,
            alpha: 0.3,
            stable_after: 5,
        }
    }
}

impl ClockSyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(Error::InvalidConfig("window must hold at least one sample".into()));
        }
        if !(self.outlier_ratio >= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "outlier_ratio must be >= 1.0, got {}",
                self.outlier_ratio
            )));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}
