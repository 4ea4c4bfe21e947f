#![forbid(unsafe_code)]

//! The scheduling primitive tickers are built on.
//!
//! A [`Host`] answers three questions: what time is it, run this after a
//! delay, and drive this future to completion. Tickers never touch a timer
//! facility directly.
//!
//! - [`TokioHost`]: native timers on a tokio `LocalSet` (feature `tokio`).
//! - [`LabHost`]: manual time and a local executor for deterministic tests.
//! - [`FrameHost`]: frame-synced timeouts layered over any other host through
//!   a [`FrameSource`].
//!
//! # Invariants
//!
//! 1. A task runs at most once, never before its delay has elapsed.
//! 2. Cancelling a handle whose task already ran is a no-op.
//! 3. Dropping a [`TimerHandle`] does **not** cancel it.
//! 4. An `Err` returned by a task or spawned future is surfaced by the host,
//!    never swallowed silently.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use web_time::Duration;

use crate::clock::Timestamp;
use crate::error::Result;

pub mod frame;
pub mod lab;
#[cfg(feature = "tokio")]
pub mod native;

pub use frame::{FrameCallback, FrameHost, FrameId, FrameSource, TimerFrames};
pub use lab::LabHost;
#[cfg(feature = "tokio")]
pub use native::TokioHost;

/// One display frame at 60 Hz, in milliseconds.
pub const FRAME_MS: f64 = 1000.0 / 60.0;

/// A unit of deferred work. An `Err` propagates out to the host.
pub type Task = Box<dyn FnOnce() -> Result<()>>;

/// A single-threaded future handed to [`Host::spawn`].
pub type LocalTask = Pin<Box<dyn Future<Output = Result<()>>>>;

/// Timer and executor facilities a ticker runs on.
pub trait Host {
    /// Current wall-clock time. Never the sentinel `0`.
    fn now(&self) -> Timestamp;

    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;

    /// Drive `future` to completion on the host's thread.
    fn spawn(&self, future: LocalTask);

    /// Smallest delay the host can honor, in milliseconds.
    fn min_timeout_ms(&self) -> f64 {
        0.0
    }
}

/// Cancels a scheduled task.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl TimerHandle {
    /// Wrap a cancellation closure.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle that cancels nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Cancel the task if it has not run yet.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Convert a millisecond delay to a [`Duration`], clamping negatives and NaN
/// to zero.
#[must_use]
pub fn delay_from_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_micros((ms * 1000.0).round().min(u64::MAX as f64) as u64)
    } else {
        Duration::ZERO
    }
}

/// Whether the process runs inside an interactive host (a browser page).
///
/// Only affects which frame source is preferred; the scheduling algorithm
/// itself does not depend on it.
#[must_use]
pub fn is_interactive_host() -> bool {
    cfg!(all(target_arch = "wasm32", target_os = "unknown"))
}
