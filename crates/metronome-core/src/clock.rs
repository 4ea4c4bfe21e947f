//! Wall-clock readings and a manually advanced clock for deterministic tests.
//!
//! Tickers publish [`Timestamp`]s: whole milliseconds since the Unix epoch.
//! The value `0` is reserved as the "inactive" sentinel, so no real reading is
//! ever zero.
//!
//! # Example
//!
//! ```
//! use metronome_core::clock::LabClock;
//! use web_time::Duration;
//!
//! let clock = LabClock::starting_at(1_000);
//! clock.advance(Duration::from_millis(250));
//! assert_eq!(clock.now_ms(), 1_250);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. `0` means "inactive".
pub type Timestamp = u64;

/// Read the system wall clock.
#[must_use]
pub fn system_now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(1)
        .max(1)
}

/// A manually-advanceable clock.
///
/// All clones share the same reading. Time only moves when [`advance`] or
/// [`advance_to_us`] is called.
///
/// [`advance`]: LabClock::advance
/// [`advance_to_us`]: LabClock::advance_to_us
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch_ms: Timestamp,
    offset_us: Arc<AtomicU64>,
}

impl LabClock {
    /// Create a lab clock starting at the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(system_now_ms())
    }

    /// Create a lab clock whose first reading is `epoch_ms` (clamped to 1).
    #[must_use]
    pub fn starting_at(epoch_ms: Timestamp) -> Self {
        Self {
            epoch_ms: epoch_ms.max(1),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let us = delta.as_micros().min(u64::MAX as u128) as u64;
        self.offset_us.fetch_add(us, Ordering::Release);
    }

    /// Move the clock forward to `offset_us` microseconds past the epoch.
    /// Never moves backwards.
    pub fn advance_to_us(&self, offset_us: u64) {
        self.offset_us.fetch_max(offset_us, Ordering::AcqRel);
    }

    /// Microseconds elapsed since the clock's epoch.
    #[must_use]
    pub fn elapsed_us(&self) -> u64 {
        self.offset_us.load(Ordering::Acquire)
    }

    /// Current reading in whole milliseconds since the Unix epoch.
    #[must_use]
    pub fn now_ms(&self) -> Timestamp {
        self.epoch_ms + self.elapsed_us() / 1_000
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}
