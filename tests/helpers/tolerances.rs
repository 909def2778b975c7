//! Tolerance constants for timing tests.
//!
//! Grid arithmetic on integer anchors is exact; anything that passes through
//! the EMA picks up rounding.

/// Wall-clock rounding, milliseconds.
pub const TIME_EPSILON_MS: f64 = 1e-6;

/// Smoothed offset after the estimator has converged, milliseconds.
pub const OFFSET_EPSILON_MS: f64 = 1e-3;
