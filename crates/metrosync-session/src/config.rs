//! Session timing configuration.
//!
//! Every interval the host and follower protocols depend on lives here, so
//! a deployment can tune them from a TOML file:
//!
//! ```toml
//! ping_interval_ms = 1000.0
//! tempo_change_lead_ms = 300.0
//! min_startup_delay_ms = 250.0
//!
//! [scheduler]
//! lookahead_ms = 500.0
//! ```

use crate::{Error, Result};
use metrosync_core::{ClockSyncConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Host → follower ping period.
    pub ping_interval_ms: f64,
    pub stale_sweep_interval_ms: f64,
    /// A peer silent for longer than this is dropped by the sweep.
    pub peer_stale_after_ms: f64,
    pub join_retry_interval_ms: f64,
    /// How long a follower may wait for `leader_hello` before the
    /// application should treat the join as failed.
    pub join_timeout_ms: f64,
    /// Minimum distance between now and a running tempo change.
    pub tempo_change_lead_ms: f64,
    /// Floor on the delay between receiving a start and playing it.
    pub min_startup_delay_ms: f64,
    /// Host-pushed offsets a follower needs before it starts playback.
    pub min_offset_samples_for_start: u32,
    pub min_bpm: u32,
    pub max_bpm: u32,
    pub scheduler: SchedulerConfig,
    pub clock_sync: ClockSyncConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 1000.0,
            stale_sweep_interval_ms: 1000.0,
            peer_stale_after_ms: 6000.0,
            join_retry_interval_ms: 2000.0,
            join_timeout_ms: 7000.0,
            tempo_change_lead_ms: 300.0,
            min_startup_delay_ms: 250.0,
            min_offset_samples_for_start: 2,
            min_bpm: 40,
            max_bpm: 240,
            scheduler: SchedulerConfig::default(),
            clock_sync: ClockSyncConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    #[inline]
    pub fn bpm_range(&self) -> RangeInclusive<u32> {
        self.min_bpm..=self.max_bpm
    }

    /// Rejects a tempo outside [`bpm_range`](Self::bpm_range).
    pub fn check_bpm(&self, bpm: u32) -> Result<()> {
        if self.bpm_range().contains(&bpm) {
            Ok(())
        } else {
            Err(metrosync_core::Error::InvalidTempo {
                bpm,
                min: self.min_bpm,
                max: self.max_bpm,
            }
            .into())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("ping_interval_ms", self.ping_interval_ms),
            ("stale_sweep_interval_ms", self.stale_sweep_interval_ms),
            ("peer_stale_after_ms", self.peer_stale_after_ms),
            ("join_retry_interval_ms", self.join_retry_interval_ms),
            ("join_timeout_ms", self.join_timeout_ms),
        ];
        for (name, value) in intervals {
            if !(value > 0.0) {
                return Err(invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.tempo_change_lead_ms >= 0.0) || !(self.min_startup_delay_ms >= 0.0) {
            return Err(invalid("lead and startup delays must be non-negative".into()));
        }
        if self.min_bpm == 0 || self.min_bpm > self.max_bpm {
            return Err(invalid(format!(
                "bpm range {}..={} is empty or includes zero",
                self.min_bpm, self.max_bpm
            )));
        }
        self.scheduler.validate()?;
        self.clock_sync.validate()?;
        Ok(())
    }
}

fn invalid(msg: String) -> Error {
    Error::Core(metrosync_core::Error::InvalidConfig(msg))
}
