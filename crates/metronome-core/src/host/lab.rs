#![forbid(unsafe_code)]

//! Deterministic host: manual time and a single-threaded executor.
//!
//! Nothing happens on a [`LabHost`] until the test drives it. [`advance`]
//! moves the [`LabClock`] forward, firing every timer that falls due in
//! deadline order (ties in scheduling order) with the clock pinned to that
//! timer's deadline. After each firing, spawned futures run until they stall.
//!
//! Simulating slow synchronous work is a matter of advancing the clock from
//! inside a callback; the host never rewinds.
//!
//! # Failure Modes
//!
//! - A task or future returning `Err` stops [`advance`] at that point and the
//!   error is returned. Timers that were not yet due stay queued.
//! - Calling [`advance`] or [`run_until_stalled`] from inside a future that
//!   the host is currently polling panics (the executor is already borrowed).
//!
//! [`advance`]: LabHost::advance
//! [`run_until_stalled`]: LabHost::run_until_stalled

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use tracing::warn;
use web_time::Duration;

use super::{Host, LocalTask, Task, TimerHandle};
use crate::clock::{LabClock, Timestamp};
use crate::error::{Result, TickerError};

/// Queue key: deadline in microseconds past the clock epoch, then insertion
/// sequence.
type TimerKey = (u64, u64);

struct LabInner {
    clock: LabClock,
    timers: RefCell<BTreeMap<TimerKey, Task>>,
    next_seq: Cell<u64>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    failures: RefCell<VecDeque<TickerError>>,
}

/// A manually driven [`Host`] for tests and simulations.
///
/// Cloning shares the same clock, timer queue and executor.
#[derive(Clone)]
pub struct LabHost {
    inner: Rc<LabInner>,
}

impl LabHost {
    /// A host whose clock starts at the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(LabClock::new())
    }

    /// A host whose clock starts at `epoch_ms`.
    #[must_use]
    pub fn starting_at(epoch_ms: Timestamp) -> Self {
        Self::with_clock(LabClock::starting_at(epoch_ms))
    }

    /// A host driven by an existing clock.
    #[must_use]
    pub fn with_clock(clock: LabClock) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            inner: Rc::new(LabInner {
                clock,
                timers: RefCell::new(BTreeMap::new()),
                next_seq: Cell::new(0),
                pool: RefCell::new(pool),
                spawner,
                failures: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// The clock this host reads.
    #[must_use]
    pub fn clock(&self) -> &LabClock {
        &self.inner.clock
    }

    /// Number of timers waiting to fire.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Run spawned futures until none can make progress.
    pub fn run_until_stalled(&self) -> Result<()> {
        self.inner.pool.borrow_mut().run_until_stalled();
        match self.inner.failures.borrow_mut().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Move time forward by `delta`, firing every timer that falls due.
    pub fn advance(&self, delta: Duration) -> Result<()> {
        let delta_us = delta.as_micros().min(u64::MAX as u128) as u64;
        let target = self.inner.clock.elapsed_us().saturating_add(delta_us);
        self.run_until_stalled()?;

        while let Some(((deadline, _), task)) = self.pop_due(target) {
            self.inner.clock.advance_to_us(deadline);
            let fired = task();
            let drained = self.run_until_stalled();
            fired?;
            drained?;
        }

        self.inner.clock.advance_to_us(target);
        Ok(())
    }

    /// Shorthand for [`advance`](Self::advance) in whole milliseconds.
    pub fn advance_ms(&self, ms: u64) -> Result<()> {
        self.advance(Duration::from_millis(ms))
    }

    /// A future that completes once lab time has moved `delay` forward.
    pub fn sleep(&self, delay: Duration) -> impl Future<Output = ()> + 'static {
        let (tx, rx) = oneshot::channel::<()>();
        // The handle is dropped on purpose: sleeps are never cancelled.
        let _ = self.schedule(
            delay,
            Box::new(move || {
                let _ = tx.send(());
                Ok(())
            }),
        );
        async move {
            let _ = rx.await;
        }
    }

    fn pop_due(&self, target: u64) -> Option<(TimerKey, Task)> {
        let mut timers = self.inner.timers.borrow_mut();
        let (&(deadline, _), _) = timers.first_key_value()?;
        if deadline > target {
            return None;
        }
        timers.pop_first()
    }
}

impl Default for LabHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LabHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabHost")
            .field("now", &self.inner.clock.now_ms())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

impl Host for LabHost {
    fn now(&self) -> Timestamp {
        self.inner.clock.now_ms()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let delay_us = delay.as_micros().min(u64::MAX as u128) as u64;
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        let key = (self.inner.clock.elapsed_us().saturating_add(delay_us), seq);
        self.inner.timers.borrow_mut().insert(key, task);

        let weak = Rc::downgrade(&self.inner);
        TimerHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.timers.borrow_mut().remove(&key);
            }
        })
    }

    fn spawn(&self, future: LocalTask) {
        let weak = Rc::downgrade(&self.inner);
        let spawned = self.inner.spawner.spawn_local(async move {
            if let Err(err) = future.await {
                if let Some(inner) = weak.upgrade() {
                    inner.failures.borrow_mut().push_back(err);
                }
            }
        });
        if let Err(err) = spawned {
            warn!(error = %err, "lab executor refused a future");
        }
    }
}
