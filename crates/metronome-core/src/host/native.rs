#![forbid(unsafe_code)]

//! Native timers on a tokio `LocalSet`.
//!
//! Every call must happen inside a [`tokio::task::LocalSet`] context on a
//! current-thread runtime; tasks and futures are `!Send` and run on the
//! thread that scheduled them.
//!
//! Wall-clock readings are a [`SystemTime`](web_time::SystemTime) base
//! captured at construction plus elapsed [`tokio::time::Instant`] time, so a
//! runtime started with paused time (`start_paused = true`) yields
//! reproducible timestamps.

use tokio::task::spawn_local;
use tokio::time::{Instant, sleep};
use tracing::error;
use web_time::Duration;

use super::{Host, LocalTask, Task, TimerHandle};
use crate::clock::{Timestamp, system_now_ms};

/// [`Host`] backed by tokio's timer wheel.
#[derive(Debug, Clone, Copy)]
pub struct TokioHost {
    base_ms: Timestamp,
    base_instant: Instant,
}

impl TokioHost {
    /// Capture the current wall-clock time as the host's base.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_ms: system_now_ms(),
            base_instant: Instant::now(),
        }
    }
}

impl Default for TokioHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for TokioHost {
    fn now(&self) -> Timestamp {
        let elapsed = Instant::now().duration_since(self.base_instant);
        self.base_ms + elapsed.as_millis().min(u64::MAX as u128) as u64
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let join = spawn_local(async move {
            sleep(delay).await;
            if let Err(err) = task() {
                error!(error = %err, "scheduled task failed");
            }
        });
        TimerHandle::new(move || join.abort())
    }

    fn spawn(&self, future: LocalTask) {
        spawn_local(async move {
            if let Err(err) = future.await {
                error!(error = %err, "spawned task failed");
            }
        });
    }
}
