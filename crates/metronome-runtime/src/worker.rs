#![forbid(unsafe_code)]

//! Delay-gated worker ticker.
//!
//! A [`WorkerTicker`] calls an asynchronous worker, waits for it to settle,
//! and only then arms the delay before the next call. A cycle therefore lasts
//! `work + delay`, and two calls are never in flight at once.
//!
//! Each cycle publishes two [`WorkerTick`] records: one when the call starts
//! (`finished == 0`, no result, no error) and one when it settles, carrying
//! either the result or the error.
//!
//! # Invariants
//!
//! 1. At most one worker call is in flight per ticker.
//! 2. Every "started" record is followed by at most one "finished" record for
//!    the same `started` timestamp before the next "started" record.
//! 3. A worker error is published, never raised, and the cycle continues.
//! 4. `stop` never publishes. The last record stays visible.
//!
//! # Cancellation
//!
//! Calls are not aborted. `stop` bumps an epoch; a call that settles under a
//! different epoch than it started in has its outcome dropped and does not
//! re-arm. If the ticker was restarted meanwhile, the new run's first cycle
//! begins as soon as the stale call settles.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use metronome_core::host::delay_from_ms;
use metronome_core::{Host, Interval, Result, TimerHandle, Timestamp};
use tracing::{debug, trace};

use crate::options::WorkerTickerOptions;
use crate::store::{Store, Subscription};

/// State of the current or last worker call.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerTick<R, E> {
    /// When the call started, `0` before the first call.
    pub started: Timestamp,
    /// When the call settled, `0` while it is in flight.
    pub finished: Timestamp,
    pub error: Option<E>,
    pub result: Option<R>,
}

impl<R, E> Default for WorkerTick<R, E> {
    fn default() -> Self {
        Self {
            started: 0,
            finished: 0,
            error: None,
            result: None,
        }
    }
}

impl<R, E> WorkerTick<R, E> {
    /// A call started at `started` and still in flight.
    #[must_use]
    pub fn in_progress(started: Timestamp) -> Self {
        Self {
            started,
            ..Self::default()
        }
    }

    /// A settled call.
    #[must_use]
    pub fn settled(
        started: Timestamp,
        finished: Timestamp,
        outcome: std::result::Result<R, E>,
    ) -> Self {
        match outcome {
            Ok(result) => Self {
                started,
                finished,
                error: None,
                result: Some(result),
            },
            Err(error) => Self {
                started,
                finished,
                error: Some(error),
                result: None,
            },
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started != 0 && self.finished == 0
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished != 0
    }
}

type WorkerFn<R, E> =
    Box<dyn Fn(WorkerTick<R, E>) -> LocalBoxFuture<'static, std::result::Result<R, E>>>;

struct WorkerState<R, E> {
    started: bool,
    /// Bumped by every `stop`.
    epoch: u64,
    in_flight: bool,
    /// Between a call settling and the next delay being armed.
    settling: bool,
    handle: Option<TimerHandle>,
    /// `0.0` until the first `start`.
    previous_interval: f64,
    interval: Interval<WorkerTick<R, E>>,
}

struct WorkerInner<R, E> {
    host: Rc<dyn Host>,
    store: Store<WorkerTick<R, E>>,
    worker: WorkerFn<R, E>,
    state: RefCell<WorkerState<R, E>>,
}

impl<R, E> Drop for WorkerInner<R, E> {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().handle.take() {
            handle.cancel();
        }
    }
}

/// Calls an async worker repeatedly, with a delay between calls.
///
/// Cloning creates another handle to the same ticker.
pub struct WorkerTicker<R, E> {
    inner: Rc<WorkerInner<R, E>>,
}

impl<R, E> Clone for WorkerTicker<R, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: Clone + 'static, E: Clone + 'static> WorkerTicker<R, E> {
    /// Build a worker ticker on `host`.
    ///
    /// `worker` receives the previously published record. Fails if
    /// `interval` does not resolve to a valid delay.
    pub fn new<W, Fut>(
        host: Rc<dyn Host>,
        worker: W,
        interval: impl Into<Interval<WorkerTick<R, E>>>,
        options: impl Into<WorkerTickerOptions>,
    ) -> Result<Self>
    where
        W: Fn(WorkerTick<R, E>) -> Fut + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + 'static,
    {
        let interval = interval.into();
        let options = options.into();

        // Every record is a fresh value, so no set is ever suppressed.
        let store = Store::with_comparator(
            WorkerTick::default(),
            |_, _| false,
            options.store_options(),
        );
        interval.resolve(0.0, &WorkerTick::default())?;

        let ticker = Self {
            inner: Rc::new(WorkerInner {
                host,
                store,
                worker: Box::new(move |previous| worker(previous).boxed_local()),
                state: RefCell::new(WorkerState {
                    started: false,
                    epoch: 0,
                    in_flight: false,
                    settling: false,
                    handle: None,
                    previous_interval: 0.0,
                    interval,
                }),
            }),
        };

        if options.start {
            ticker.start()?;
        }
        Ok(ticker)
    }

    /// Subscribe to worker records. The callback immediately receives the
    /// current record.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe(&self, callback: impl Fn(&WorkerTick<R, E>) + 'static) -> Subscription {
        self.inner.store.subscribe(callback)
    }

    /// The last published record.
    #[must_use]
    pub fn get(&self) -> WorkerTick<R, E> {
        self.inner.store.get()
    }

    #[must_use]
    pub fn store(&self) -> &Store<WorkerTick<R, E>> {
        &self.inner.store
    }

    /// Start the cycle. The first call begins immediately unless one is
    /// already in flight, settling, or pending.
    pub fn start(&self) -> Result<&Self> {
        let initial = Self::resolve(&self.inner, 0.0)?;
        let fire_now = {
            let mut state = self.inner.state.borrow_mut();
            state.started = true;
            state.previous_interval = initial as f64;
            !state.in_flight && !state.settling && state.handle.is_none()
        };
        debug!(delay_ms = initial, fire_now, "worker ticker started");
        if fire_now {
            Self::begin_cycle(&self.inner)?;
        }
        Ok(self)
    }

    /// Stop the cycle. An in-flight call runs to completion but its outcome
    /// is dropped. The last published record is kept.
    pub fn stop(&self) -> &Self {
        let handle = {
            let mut state = self.inner.state.borrow_mut();
            if state.started {
                debug!(in_flight = state.in_flight, "worker ticker stopped");
            }
            state.started = false;
            state.epoch += 1;
            state.handle.take()
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        self
    }

    /// `stop` if started, otherwise `start`.
    pub fn toggle(&self) -> Result<&Self> {
        if self.is_started() {
            Ok(self.stop())
        } else {
            self.start()
        }
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.state.borrow().started
    }

    /// Whether a worker call is currently awaiting completion.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.inner.state.borrow().in_flight
    }

    /// Replace the delay source. Takes effect at the next re-arm.
    pub fn set_interval(&self, interval: impl Into<Interval<WorkerTick<R, E>>>) -> &Self {
        self.inner.state.borrow_mut().interval = interval.into();
        self
    }

    /// The nominal delay, resolved against a previous value of `0`.
    pub fn get_interval(&self) -> Result<u64> {
        Self::resolve(&self.inner, 0.0)
    }

    fn resolve(inner: &WorkerInner<R, E>, previous: f64) -> Result<u64> {
        let interval = inner.state.borrow().interval.clone();
        let current = inner.store.get();
        interval.resolve(previous, &current)
    }

    fn is_current(inner: &WorkerInner<R, E>, epoch: u64) -> bool {
        let state = inner.state.borrow();
        state.started && state.epoch == epoch
    }

    fn begin_cycle(inner: &Rc<WorkerInner<R, E>>) -> Result<()> {
        let epoch = {
            let mut state = inner.state.borrow_mut();
            if !state.started || state.in_flight {
                return Ok(());
            }
            state.handle = None;
            state.in_flight = true;
            state.epoch
        };

        let started = inner.host.now();
        let previous = inner.store.get();
        inner.store.set(WorkerTick::in_progress(started));
        trace!(started, "worker call started");

        // A subscriber stopped us before the call went out.
        if !Self::is_current(inner, epoch) {
            inner.state.borrow_mut().in_flight = false;
            return Self::rearm(inner, epoch);
        }

        let work = (inner.worker)(previous);
        let weak: Weak<WorkerInner<R, E>> = Rc::downgrade(inner);
        inner.host.spawn(Box::pin(async move {
            let outcome = work.await;
            match weak.upgrade() {
                Some(inner) => Self::finish_cycle(&inner, epoch, started, outcome),
                None => Ok(()),
            }
        }));
        Ok(())
    }

    fn finish_cycle(
        inner: &Rc<WorkerInner<R, E>>,
        epoch: u64,
        started: Timestamp,
        outcome: std::result::Result<R, E>,
    ) -> Result<()> {
        let current = {
            let mut state = inner.state.borrow_mut();
            state.in_flight = false;
            state.settling = true;
            state.started && state.epoch == epoch
        };
        if current {
            let finished = inner.host.now();
            let failed = outcome.is_err();
            inner
                .store
                .set(WorkerTick::settled(started, finished, outcome));
            trace!(started, finished, failed, "worker call settled");
        } else {
            debug!(started, "dropping worker outcome after stop");
        }
        let rearmed = Self::rearm(inner, epoch);
        inner.state.borrow_mut().settling = false;
        rearmed
    }

    fn rearm(inner: &Rc<WorkerInner<R, E>>, epoch: u64) -> Result<()> {
        let (started, same_epoch, previous, stray) = {
            let mut state = inner.state.borrow_mut();
            let same_epoch = state.epoch == epoch;
            let stray = if state.started && same_epoch {
                state.handle.take()
            } else {
                None
            };
            (state.started, same_epoch, state.previous_interval, stray)
        };
        if !started {
            return Ok(());
        }
        if !same_epoch {
            // Restarted while the stale call was in flight.
            return Self::begin_cycle(inner);
        }
        if let Some(handle) = stray {
            handle.cancel();
        }

        let baseline = if previous > 0.0 {
            previous
        } else {
            Self::resolve(inner, 0.0)? as f64
        };
        let next = Self::resolve(inner, baseline)?;

        let mut state = inner.state.borrow_mut();
        if !state.started || state.epoch != epoch || state.in_flight || state.handle.is_some() {
            return Ok(());
        }
        let weak: Weak<WorkerInner<R, E>> = Rc::downgrade(inner);
        state.handle = Some(inner.host.schedule(
            delay_from_ms(next as f64),
            Box::new(move || match weak.upgrade() {
                Some(inner) => Self::begin_cycle(&inner),
                None => Ok(()),
            }),
        ));
        state.previous_interval = next as f64;
        Ok(())
    }
}

impl<R, E> fmt::Debug for WorkerTicker<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("WorkerTicker")
            .field("started", &state.started)
            .field("in_flight", &state.in_flight)
            .field("settling", &state.settling)
            .field("pending", &state.handle.is_some())
            .field("epoch", &state.epoch)
            .field("previous_interval", &state.previous_interval)
            .finish()
    }
}
