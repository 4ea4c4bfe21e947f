//! Interval sources and their validation.
//!
//! An [`Interval`] is either a fixed number of milliseconds or a function of
//! the previously resolved interval and the ticker's current value. Either
//! way, [`Interval::resolve`] produces a positive whole number of
//! milliseconds or fails with [`TickerError::InvalidInterval`].
//!
//! # Invariants
//!
//! 1. A resolved interval is always `>= 1`.
//! 2. Fractional values are truncated toward zero before validation, so
//!    `0.9` is rejected and `16.67` resolves to `16`.
//! 3. NaN and infinities are rejected.

use std::fmt;
use std::rc::Rc;

use web_time::Duration;

use crate::error::{Result, TickerError};

/// Interval used when none is given.
pub const DEFAULT_INTERVAL_MS: f64 = 1000.0;

type IntervalFn<T> = Rc<dyn Fn(f64, &T) -> f64>;

/// Where a ticker's next interval comes from.
pub enum Interval<T> {
    /// A constant number of milliseconds.
    Fixed(f64),
    /// Computed from `(previous_interval_ms, current_value)` on every
    /// resolution.
    Computed(IntervalFn<T>),
}

impl<T> Interval<T> {
    /// A constant interval in milliseconds.
    #[must_use]
    pub fn fixed(ms: impl Into<f64>) -> Self {
        Self::Fixed(ms.into())
    }

    /// An interval computed on every resolution.
    #[must_use]
    pub fn from_fn(f: impl Fn(f64, &T) -> f64 + 'static) -> Self {
        Self::Computed(Rc::new(f))
    }

    /// The constant value, if this interval is fixed.
    #[must_use]
    pub fn fixed_ms(&self) -> Option<f64> {
        match self {
            Self::Fixed(ms) => Some(*ms),
            Self::Computed(_) => None,
        }
    }

    /// Resolve against the previous interval and the current value.
    pub fn resolve(&self, previous: f64, current: &T) -> Result<u64> {
        let raw = match self {
            Self::Fixed(ms) => *ms,
            Self::Computed(f) => f(previous, current),
        };
        validate_interval(raw)
    }
}

/// Truncate `ms` and check that it is a positive, finite whole number.
pub fn validate_interval(ms: f64) -> Result<u64> {
    let truncated = ms.trunc();
    if !truncated.is_finite() || truncated <= 0.0 {
        return Err(TickerError::invalid_interval(ms));
    }
    Ok(truncated.min(u64::MAX as f64) as u64)
}

impl<T> Clone for Interval<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Fixed(ms) => Self::Fixed(*ms),
            Self::Computed(f) => Self::Computed(Rc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Interval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(ms) => f.debug_tuple("Fixed").field(ms).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl<T> Default for Interval<T> {
    fn default() -> Self {
        Self::Fixed(DEFAULT_INTERVAL_MS)
    }
}

impl<T> From<f64> for Interval<T> {
    fn from(ms: f64) -> Self {
        Self::Fixed(ms)
    }
}

impl<T> From<u32> for Interval<T> {
    fn from(ms: u32) -> Self {
        Self::Fixed(f64::from(ms))
    }
}

impl<T> From<i32> for Interval<T> {
    fn from(ms: i32) -> Self {
        Self::Fixed(f64::from(ms))
    }
}

impl<T> From<u64> for Interval<T> {
    fn from(ms: u64) -> Self {
        Self::Fixed(ms as f64)
    }
}

impl<T> From<i64> for Interval<T> {
    fn from(ms: i64) -> Self {
        Self::Fixed(ms as f64)
    }
}

impl<T> From<Duration> for Interval<T> {
    fn from(d: Duration) -> Self {
        Self::Fixed(d.as_secs_f64() * 1000.0)
    }
}
