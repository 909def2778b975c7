//! Small numeric filters used by the clock-offset estimator.
//!
//! - [`MedianWindow`]: bounded FIFO of samples with a median query
//! - [`Ema`]: exponential moving average
//!
//! # Example
//!
//! ```
//! use metrosync_core::stats::{Ema, MedianWindow};
//!
//! let mut window = MedianWindow::new(3);
//! window.push(30.0);
//! window.push(10.0);
//! window.push(20.0);
//! assert_eq!(window.median(), Some(20.0));
//!
//! let mut ema = Ema::new(0.5);
//! assert_eq!(ema.update(10.0), 10.0);
//! assert_eq!(ema.update(20.0), 15.0);
//! ```

use std::collections::VecDeque;

/// Bounded FIFO window reporting the median of its samples.
///
/// Once full, each push evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct MedianWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl MedianWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Median of the current samples. Even-sized windows average the two
    /// middle values.
    pub fn median(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Oldest sample first.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Exponential moving average.
///
/// `value = alpha * sample + (1 - alpha) * value`; the first sample is
/// adopted as-is.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            value: None,
        }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.value = Some(next);
        next
    }

    #[inline]
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}
