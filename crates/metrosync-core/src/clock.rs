//! Wall clocks in milliseconds.
//!
//! Every device in a session reads its own monotonic clock; nothing assumes
//! two clocks agree. [`ManualClock`] and [`OffsetClock`] exist so sessions
//! can be simulated deterministically.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    #[inline]
    fn now_ms(&self) -> f64 {
        (**self).now_ms()
    }
}

/// Process-local monotonic clock starting at zero on construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Shared, manually advanced clock.
///
/// Clones observe the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: f64) {
        *self.now.lock() = now_ms;
    }

    pub fn advance(&self, delta_ms: f64) {
        *self.now.lock() += delta_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now.lock()
    }
}

/// A view of another clock shifted by a constant.
///
/// Models a device whose clock reads `offset_ms` ahead of the base clock.
#[derive(Clone)]
pub struct OffsetClock {
    base: Arc<dyn Clock>,
    offset_ms: f64,
}

impl OffsetClock {
    pub fn new(base: Arc<dyn Clock>, offset_ms: f64) -> Self {
        Self { base, offset_ms }
    }

    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }
}

impl Clock for OffsetClock {
    fn now_ms(&self) -> f64 {
        self.base.now_ms() + self.offset_ms
    }
}
