//! Two-way clock-offset estimation.
//!
//! The host stamps `t1` when it sends a ping. The follower stamps `t2` on
//! receipt and `t3` when replying. The host stamps `t4` when the pong lands.
//!
//! ```text
//! rtt    = (t4 - t1) - (t3 - t2)
//! offset = ((t2 - t1) + (t3 - t4)) / 2
//! ```
//!
//! Adding `offset` to a host timestamp yields the follower-local timestamp.
//!
//! RTT samples go into a median window. A sample only moves the smoothed
//! offset when its RTT is within `outlier_ratio` of the window median; spikes
//! are still recorded so they shape future medians.

use crate::config::ClockSyncConfig;
use crate::stats::{Ema, MedianWindow};

/// Result of feeding one round trip (or one pushed offset) into [`ClockSync`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSample {
    /// Smoothed offset after this sample.
    pub offset: Option<f64>,
    /// RTT of this sample (zero for pushed offsets).
    pub rtt: f64,
    /// Samples processed since the last reset.
    pub sample_count: u64,
    pub stable: bool,
    /// Whether this sample moved the offset.
    pub accepted: bool,
}

/// Per-peer offset estimator.
#[derive(Debug, Clone)]
pub struct ClockSync {
    config: ClockSyncConfig,
    rtts: MedianWindow,
    offset: Ema,
    processed: u64,
    last_rtt: Option<f64>,
}

impl ClockSync {
    pub fn new(config: ClockSyncConfig) -> Self {
        Self {
            rtts: MedianWindow::new(config.window),
            offset: Ema::new(config.alpha),
            processed: 0,
            last_rtt: None,
            config,
        }
    }

    /// Raw `(rtt, offset)` for one round trip. RTT is floored at zero.
    pub fn measure(t1: f64, t2: f64, t3: f64, t4: f64) -> (f64, f64) {
        let rtt = ((t4 - t1) - (t3 - t2)).max(0.0);
        let offset = ((t2 - t1) + (t3 - t4)) / 2.0;
        (rtt, offset)
    }

    pub fn process_pong(&mut self, t1: f64, t2: f64, t3: f64, t4: f64) -> SyncSample {
        let (rtt, raw_offset) = Self::measure(t1, t2, t3, t4);

        self.rtts.push(rtt);
        self.last_rtt = Some(rtt);
        self.processed += 1;

        let median = self.rtts.median().unwrap_or(rtt);
        let accepted = rtt <= self.config.outlier_ratio * median;
        if accepted {
            self.offset.update(raw_offset);
        } else {
            tracing::debug!(rtt, median, "rtt outlier, offset unchanged");
        }

        self.sample(rtt, accepted)
    }

    /// Feeds an offset computed elsewhere (host-pushed) through the same EMA.
    pub fn set_offset_ms(&mut self, offset_ms: f64) -> SyncSample {
        self.offset.update(offset_ms);
        self.processed += 1;
        self.sample(0.0, true)
    }

    /// Drops all samples. Used when the peer session is re-established.
    pub fn reset(&mut self) {
        self.rtts.clear();
        self.offset.reset();
        self.processed = 0;
        self.last_rtt = None;
    }

    fn sample(&self, rtt: f64, accepted: bool) -> SyncSample {
        SyncSample {
            offset: self.offset.value(),
            rtt,
            sample_count: self.processed,
            stable: self.is_stable(),
            accepted,
        }
    }

    #[inline]
    pub fn offset(&self) -> Option<f64> {
        self.offset.value()
    }

    #[inline]
    pub fn offset_or_zero(&self) -> f64 {
        self.offset.value().unwrap_or(0.0)
    }

    #[inline]
    pub fn is_stable(&self) -> bool {
        self.processed >= self.config.stable_after
    }

    #[inline]
    pub fn sample_count(&self) -> u64 {
        self.processed
    }

    pub fn last_rtt(&self) -> Option<f64> {
        self.last_rtt
    }

    pub fn rtt_window(&self) -> &MedianWindow {
        &self.rtts
    }

    /// Host timestamp → local timestamp.
    #[inline]
    pub fn to_local(&self, host_ms: f64) -> f64 {
        host_ms + self.offset_or_zero()
    }

    /// Local timestamp → host timestamp.
    #[inline]
    pub fn to_host(&self, local_ms: f64) -> f64 {
        local_ms - self.offset_or_zero()
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new(ClockSyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    /// Round trip with symmetric one-way latency `rtt / 2` and a follower
    /// clock running `offset` ahead of the host.
    fn round_trip(sync: &mut ClockSync, t1: f64, rtt: f64, offset: f64) -> SyncSample {
        let t2 = t1 + rtt / 2.0 + offset;
        let t3 = t2;
        let t4 = t1 + rtt;
        sync.process_pong(t1, t2, t3, t4)
    }

    #[test]
    fn test_measure_formula() {
        let (rtt, offset) = ClockSync::measure(1000.0, 1060.0, 1062.0, 1022.0);
        assert_relative_eq!(rtt, 20.0);
        assert_relative_eq!(offset, 50.0);
    }

    #[test]
    fn test_converges_on_identical_samples() {
        let mut sync = ClockSync::default();
        let mut last = None;
        for i in 0..5 {
            last = Some(round_trip(&mut sync, i as f64 * 1000.0, 20.0, 50.0));
        }
        let last = last.unwrap();
        assert!(last.stable);
        assert_eq!(last.sample_count, 5);
        assert_relative_eq!(last.offset.unwrap(), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_not_stable_before_five() {
        let mut sync = ClockSync::default();
        for i in 0..4 {
            let s = round_trip(&mut sync, i as f64 * 1000.0, 20.0, 10.0);
            assert!(!s.stable);
        }
        assert!(round_trip(&mut sync, 5000.0, 20.0, 10.0).stable);
    }

    #[test]
    fn test_outlier_recorded_but_ignored() {
        let mut sync = ClockSync::default();
        for i in 0..5 {
            round_trip(&mut sync, i as f64 * 1000.0, 20.0, 50.0);
        }
        let before = sync.offset().unwrap();

        // 400ms spike with an asymmetric path that would drag the offset.
        let s = sync.process_pong(6000.0, 6350.0, 6350.0, 6400.0);
        assert!(!s.accepted);
        assert_eq!(sync.offset().unwrap(), before);
        assert_eq!(sync.rtt_window().len(), 6);
        assert_eq!(sync.last_rtt(), Some(400.0));
    }

    #[test]
    fn test_pushed_offset_is_smoothed() {
        let mut sync = ClockSync::default();
        sync.set_offset_ms(100.0);
        let s = sync.set_offset_ms(0.0);
        assert_relative_eq!(s.offset.unwrap(), 70.0, epsilon = 1e-9);
        assert_eq!(s.sample_count, 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut sync = ClockSync::default();
        for i in 0..6 {
            round_trip(&mut sync, i as f64 * 1000.0, 20.0, 50.0);
        }
        assert!(sync.is_stable());

        sync.reset();
        assert_eq!(sync.offset(), None);
        assert!(!sync.is_stable());
        assert!(sync.rtt_window().is_empty());
        assert_eq!(sync.to_local(500.0), 500.0);
    }

    #[test]
    fn test_local_host_conversion() {
        let mut sync = ClockSync::default();
        sync.set_offset_ms(-30.0);
        assert_relative_eq!(sync.to_local(1000.0), 970.0);
        assert_relative_eq!(sync.to_host(970.0), 1000.0);
    }

    proptest! {
        #[test]
        fn prop_ordered_timestamps_give_non_negative_rtt(
            t1 in -1.0e6f64..1.0e6,
            d12 in 0.0f64..5000.0,
            d23 in 0.0f64..5000.0,
            d34 in 0.0f64..5000.0,
        ) {
            let t2 = t1 + d12;
            let t3 = t2 + d23;
            let t4 = t3 + d34;

            let mut sync = ClockSync::default();
            let s = sync.process_pong(t1, t2, t3, t4);
            prop_assert!(s.rtt >= 0.0);
            prop_assert!(s.offset.unwrap().is_finite());
        }
    }
}
