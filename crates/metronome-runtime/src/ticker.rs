#![forbid(unsafe_code)]

//! Drift-corrected fixed-frequency ticker.
//!
//! A [`Ticker`] publishes the host's wall-clock [`Timestamp`] into a
//! [`Store`] at a target cadence, or the sentinel `0` while stopped.
//!
//! # Drift correction
//!
//! Each tick measures how long it has been since the previous tick finished
//! arming its timer. Whatever exceeds the previously armed delay (timer
//! lateness plus synchronous subscriber work) is subtracted from the next
//! nominal interval:
//!
//! ```text
//! duration = now - last_tick
//! offset   = duration - previous_delay      (0 on the first tick)
//! delay    = max(min_timeout, interval - offset)
//! ```
//!
//! # Invariants
//!
//! 1. The "started" flag is re-read **after** every synchronous publish; a
//!    subscriber calling [`stop`](Ticker::stop) from inside a tick prevents
//!    any further tick.
//! 2. At most one timer is pending per ticker.
//! 3. `stop` leaves the store at `0` and no timer pending.
//! 4. `set_interval` never re-ticks; it applies from the next resolution.
//!
//! # Failure Modes
//!
//! - **Invalid interval**: construction and `start` return
//!   [`TickerError::InvalidInterval`]. When a computed interval turns invalid
//!   mid-run, the scheduled tick returns the error to the host and no further
//!   tick is armed; the ticker still reports started until `stop`.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use metronome_core::host::delay_from_ms;
use metronome_core::{Host, Interval, Result, TimerHandle, Timestamp};
use tracing::{debug, trace, warn};

use crate::options::{Logger, TickTrace, TickerOptions};
use crate::store::{Store, Subscription};

struct TickerState {
    started: bool,
    /// Inside `tick`, between the publish and arming the next timer.
    ticking: bool,
    handle: Option<TimerHandle>,
    /// `0` until the first tick after `start`.
    last_tick: Timestamp,
    previous_interval: f64,
    interval: Interval<Timestamp>,
}

struct TickerInner {
    host: Rc<dyn Host>,
    store: Store<Timestamp>,
    logger: Option<Logger>,
    state: RefCell<TickerState>,
}

impl Drop for TickerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().handle.take() {
            handle.cancel();
        }
    }
}

/// Publishes timestamps at a drift-corrected cadence.
///
/// Cloning creates another handle to the same ticker. Pending timers hold
/// only weak references: once every handle is dropped the loop ends.
#[derive(Clone)]
pub struct Ticker {
    inner: Rc<TickerInner>,
}

impl Ticker {
    /// Build a ticker on `host`.
    ///
    /// Fails if `interval` does not resolve to a valid delay. Starts
    /// immediately when `options.start` is set.
    pub fn new(
        host: Rc<dyn Host>,
        interval: impl Into<Interval<Timestamp>>,
        options: impl Into<TickerOptions>,
    ) -> Result<Self> {
        let interval = interval.into();
        let options = options.into();

        let min_timeout = host.min_timeout_ms();
        if let Some(ms) = interval.fixed_ms().filter(|ms| *ms < min_timeout) {
            warn!(
                interval_ms = ms,
                "interval shorter than one frame may not be accurate on a frame-synced host; \
                 consider a native timer host instead"
            );
        }

        let store = Store::with_options(0, options.store_options());
        let previous_interval = interval.resolve(0.0, &0)? as f64;
        let ticker = Self {
            inner: Rc::new(TickerInner {
                host,
                store,
                logger: options.logger,
                state: RefCell::new(TickerState {
                    started: false,
                    ticking: false,
                    handle: None,
                    last_tick: 0,
                    previous_interval,
                    interval,
                }),
            }),
        };

        if options.start {
            ticker.start()?;
        }
        Ok(ticker)
    }

    /// Subscribe to ticks. The callback immediately receives the current
    /// value: a timestamp while running, `0` while stopped.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe(&self, callback: impl Fn(&Timestamp) + 'static) -> Subscription {
        self.inner.store.subscribe(callback)
    }

    /// The last published value.
    #[must_use]
    pub fn get(&self) -> Timestamp {
        self.inner.store.get()
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Store<Timestamp> {
        &self.inner.store
    }

    /// Start ticking. Ticks once, synchronously, unless a tick is already
    /// pending or in progress.
    pub fn start(&self) -> Result<&Self> {
        let initial = Self::resolve(&self.inner, 0.0)?;
        let fire_now = {
            let mut state = self.inner.state.borrow_mut();
            state.started = true;
            state.previous_interval = initial as f64;
            state.handle.is_none() && !state.ticking
        };
        debug!(interval_ms = initial, fire_now, "ticker started");
        if fire_now {
            Self::tick(&self.inner)?;
        }
        Ok(self)
    }

    /// Stop ticking: cancel the pending tick, reset timing, publish `0`.
    pub fn stop(&self) -> &Self {
        let (was_started, handle) = {
            let mut state = self.inner.state.borrow_mut();
            let was_started = state.started;
            state.started = false;
            state.last_tick = 0;
            (was_started, state.handle.take())
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        if was_started {
            debug!("ticker stopped");
        }
        self.inner.store.set(0);
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

    /// Replace the interval source. Takes effect at the next scheduled tick.
    pub fn set_interval(&self, interval: impl Into<Interval<Timestamp>>) -> &Self {
        self.inner.state.borrow_mut().interval = interval.into();
        self
    }

    /// The nominal interval: the source resolved against a previous value
    /// of `0`. Not the drift-corrected delay currently armed.
    pub fn get_interval(&self) -> Result<u64> {
        Self::resolve(&self.inner, 0.0)
    }

    fn resolve(inner: &TickerInner, previous: f64) -> Result<u64> {
        let interval = inner.state.borrow().interval.clone();
        let current = inner.store.get();
        interval.resolve(previous, &current)
    }

    fn tick(inner: &Rc<TickerInner>) -> Result<()> {
        let begin = inner.host.now();
        let first = {
            let mut state = inner.state.borrow_mut();
            state.ticking = true;
            state.handle = None;
            let first = state.last_tick == 0;
            if first {
                state.last_tick = begin;
            }
            first
        };

        inner.store.set(inner.host.now());

        let (last_tick, previous) = {
            let mut state = inner.state.borrow_mut();
            if !state.started {
                state.ticking = false;
                return Ok(());
            }
            (state.last_tick, state.previous_interval)
        };

        let duration = inner.host.now().saturating_sub(last_tick) as f64;
        let offset = if first || duration == 0.0 {
            0.0
        } else {
            duration - previous
        };

        let resolved = Self::resolve(inner, previous);
        let mut state = inner.state.borrow_mut();
        state.ticking = false;
        let resolved = resolved?;
        // The interval source may have stopped us.
        if !state.started {
            return Ok(());
        }

        let next = inner.host.min_timeout_ms().max(resolved as f64 - offset);
        let weak: Weak<TickerInner> = Rc::downgrade(inner);
        state.handle = Some(inner.host.schedule(
            delay_from_ms(next),
            Box::new(move || match weak.upgrade() {
                Some(inner) => Self::tick(&inner),
                None => Ok(()),
            }),
        ));
        state.previous_interval = next;
        state.last_tick = inner.host.now();
        drop(state);

        let record = TickTrace {
            start: begin,
            duration,
            offset,
            next_interval: next,
        };
        trace!(
            start = record.start,
            duration = record.duration,
            offset = record.offset,
            next_interval = record.next_interval,
            "tick"
        );
        if let Some(logger) = &inner.logger {
            logger(&record);
        }
        Ok(())
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Ticker")
            .field("started", &state.started)
            .field("pending", &state.handle.is_some())
            .field("previous_interval", &state.previous_interval)
            .field("interval", &state.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metronome_core::{FrameHost, LabHost, TickerError};
    use std::cell::Cell;
    use web_time::Duration;

    const T0: Timestamp = 1_000_000;

    fn lab_ticker(interval: u64) -> (LabHost, Ticker) {
        let lab = LabHost::starting_at(T0);
        let ticker = Ticker::new(Rc::new(lab.clone()), interval, false).unwrap();
        (lab, ticker)
    }

    fn record(ticker: &Ticker) -> (Rc<RefCell<Vec<Timestamp>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let sub = ticker.subscribe(move |v| l.borrow_mut().push(*v));
        (log, sub)
    }

    #[test]
    fn start_publishes_and_stop_resets_to_sentinel() {
        let (_lab, ticker) = lab_ticker(10);
        let (log, _sub) = record(&ticker);
        assert_eq!(*log.borrow(), vec![0]);

        ticker.start().unwrap();
        assert_eq!(ticker.get(), T0);

        ticker.stop();
        assert_eq!(ticker.get(), 0);
        assert_eq!(*log.borrow(), vec![0, T0, 0]);
    }

    #[test]
    fn start_then_stop_leaves_nothing_pending() {
        let (lab, ticker) = lab_ticker(10);
        ticker.start().unwrap();
        assert_eq!(lab.pending_timers(), 1);
        ticker.stop();
        assert_eq!(lab.pending_timers(), 0);
        assert_eq!(ticker.get(), 0);
    }

    #[test]
    fn ticks_at_fixed_cadence() {
        let (lab, ticker) = lab_ticker(10);
        let (log, _sub) = record(&ticker);
        ticker.start().unwrap();
        lab.advance_ms(29).unwrap();
        assert_eq!(*log.borrow(), vec![0, T0, T0 + 10, T0 + 20]);
    }

    #[test]
    fn drift_from_slow_subscribers_is_corrected() {
        let (lab, ticker) = lab_ticker(10);
        let clock = lab.clock().clone();
        let (log, _sub) = record(&ticker);
        // Every publish costs 3ms of synchronous work.
        let _slow = ticker.subscribe(move |v| {
            if *v != 0 {
                clock.advance(Duration::from_millis(3));
            }
        });
        ticker.start().unwrap();
        lab.advance_ms(100).unwrap();

        let ticks: Vec<Timestamp> = log.borrow().iter().copied().filter(|v| *v != 0).collect();
        // After the first cycle the ticks land on a 10ms grid despite the work.
        let gaps: Vec<u64> = ticks.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.iter().skip(1).all(|g| *g == 10), "gaps: {gaps:?}");
        assert!(ticks.len() >= 9, "ticks: {ticks:?}");
    }

    #[test]
    fn stop_from_subscriber_prevents_further_ticks() {
        let (lab, ticker) = lab_ticker(10);
        let count = Rc::new(Cell::new(0));
        let (c, t) = (Rc::clone(&count), ticker.clone());
        let _sub = ticker.subscribe(move |v| {
            if *v != 0 {
                c.set(c.get() + 1);
                if c.get() == 2 {
                    t.stop();
                }
            }
        });
        ticker.start().unwrap();
        lab.advance_ms(100).unwrap();
        assert_eq!(count.get(), 2);
        assert!(!ticker.is_started());
        assert_eq!(lab.pending_timers(), 0);
        assert_eq!(ticker.get(), 0);
    }

    #[test]
    fn stop_from_subscriber_on_first_tick() {
        let (lab, ticker) = lab_ticker(10);
        let t = ticker.clone();
        let _sub = ticker.subscribe(move |v| {
            if *v != 0 {
                t.stop();
            }
        });
        ticker.start().unwrap();
        assert!(!ticker.is_started());
        assert_eq!(lab.pending_timers(), 0);
    }

    #[test]
    fn set_interval_applies_from_next_firing() {
        let (lab, ticker) = lab_ticker(10);
        let (log, _sub) = record(&ticker);
        ticker.start().unwrap();
        lab.advance_ms(5).unwrap();
        ticker.set_interval(50);
        // The already armed 10ms tick still fires on time.
        lab.advance_ms(5).unwrap();
        assert_eq!(ticker.get(), T0 + 10);
        lab.advance_ms(49).unwrap();
        assert_eq!(ticker.get(), T0 + 10);
        lab.advance_ms(1).unwrap();
        assert_eq!(ticker.get(), T0 + 60);
        assert_eq!(log.borrow().len(), 4);
    }

    #[test]
    fn get_interval_is_nominal() {
        let (lab, ticker) = lab_ticker(10);
        ticker.start().unwrap();
        lab.advance_ms(35).unwrap();
        assert_eq!(ticker.get_interval(), Ok(10));
    }

    #[test]
    fn computed_interval_sees_previous_and_value() {
        let lab = LabHost::starting_at(T0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let interval = Interval::from_fn(move |prev, v: &Timestamp| {
            s.borrow_mut().push((prev, *v));
            20.0
        });
        let ticker = Ticker::new(Rc::new(lab.clone()), interval, true).unwrap();
        lab.advance_ms(20).unwrap();
        let seen = seen.borrow();
        // construction, start, first tick, second tick
        assert_eq!(seen[0], (0.0, 0));
        assert_eq!(seen[2], (20.0, T0));
        assert_eq!(seen[3], (20.0, T0 + 20));
        assert!(ticker.is_started());
    }

    #[test]
    fn invalid_intervals_fail_fast() {
        let host: Rc<dyn Host> = Rc::new(LabHost::new());
        for bad in [0.0, -100.0, f64::NAN] {
            let err = Ticker::new(Rc::clone(&host), bad, false).unwrap_err();
            assert!(matches!(err, TickerError::InvalidInterval { .. }));
        }
        let computed = Interval::from_fn(|_, _: &Timestamp| -1.0);
        assert!(Ticker::new(host, computed, false).is_err());
    }

    #[test]
    fn interval_turning_invalid_surfaces_from_the_tick() {
        let lab = LabHost::starting_at(T0);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let interval = Interval::from_fn(move |_, _: &Timestamp| {
            c.set(c.get() + 1);
            if c.get() > 3 { 0.0 } else { 10.0 }
        });
        let ticker = Ticker::new(Rc::new(lab.clone()), interval, true).unwrap();
        assert!(lab.advance_ms(10).is_err());
        assert_eq!(lab.pending_timers(), 0);
        ticker.stop();
        assert_eq!(ticker.get(), 0);
    }

    #[test]
    fn multiple_starts_keep_one_timer() {
        let (lab, ticker) = lab_ticker(10);
        let (log, _sub) = record(&ticker);
        ticker.start().unwrap();
        ticker.start().unwrap();
        ticker.start().unwrap();
        assert_eq!(lab.pending_timers(), 1);
        lab.advance_ms(15).unwrap();
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn multiple_stops_are_safe() {
        let (_lab, ticker) = lab_ticker(10);
        ticker.start().unwrap();
        ticker.stop().stop().stop();
        assert!(!ticker.is_started());
    }

    #[test]
    fn toggle_round_trips() {
        let (_lab, ticker) = lab_ticker(10);
        assert!(!ticker.is_started());
        ticker.toggle().unwrap();
        assert!(ticker.is_started());
        ticker.toggle().unwrap();
        assert!(!ticker.is_started());
    }

    #[test]
    fn restart_resets_timing() {
        let (lab, ticker) = lab_ticker(10);
        let (log, _sub) = record(&ticker);
        ticker.start().unwrap();
        lab.advance_ms(13).unwrap();
        ticker.stop().start().unwrap();
        lab.advance_ms(10).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![0, T0, T0 + 10, 0, T0 + 13, T0 + 23]
        );
    }

    #[test]
    fn logger_receives_trace() {
        let lab = LabHost::starting_at(T0);
        let traces = Rc::new(RefCell::new(Vec::new()));
        let t = Rc::clone(&traces);
        let opts = TickerOptions::new().logger(move |trace| t.borrow_mut().push(*trace));
        let _ticker = Ticker::new(Rc::new(lab.clone()), 10, opts.start(true)).unwrap();
        lab.advance_ms(10).unwrap();
        let traces = traces.borrow();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].offset, 0.0);
        assert_eq!(traces[1].start, T0 + 10);
        assert_eq!(traces[1].next_interval, 10.0);
    }

    #[test]
    fn subscriber_errors_go_to_handler_and_ticking_continues() {
        let lab = LabHost::starting_at(T0);
        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&errors);
        let opts = TickerOptions::new().on_error(move |err| e.borrow_mut().push(err.clone()));
        let ticker = Ticker::new(Rc::new(lab.clone()), 10, opts).unwrap();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let _sub = ticker.subscribe(move |v| {
            if *v != 0 {
                c.set(c.get() + 1);
                if c.get() == 1 {
                    panic!("Custom error!");
                }
            }
        });
        ticker.start().unwrap();
        lab.advance_ms(35).unwrap();
        ticker.stop();
        assert_eq!(errors.borrow().len(), 1);
        assert_eq!(errors.borrow()[0].message, "Custom error!");
        assert!(count.get() >= 2);
    }

    #[test]
    fn dropping_all_handles_cancels_the_loop() {
        let (lab, ticker) = lab_ticker(10);
        ticker.start().unwrap();
        drop(ticker);
        assert_eq!(lab.pending_timers(), 0);
    }

    #[test]
    fn frame_synced_ticker_respects_minimum_timeout() {
        let lab = LabHost::starting_at(T0);
        let host: Rc<dyn Host> = Rc::new(FrameHost::new(Rc::new(lab.clone())));
        let ticker = Ticker::new(host, 5, false).unwrap();
        let (log, _sub) = record(&ticker);
        ticker.start().unwrap();
        lab.advance_ms(200).unwrap();
        let ticks: Vec<Timestamp> = log.borrow().iter().copied().filter(|v| *v != 0).collect();
        assert!(ticks.len() >= 2);
        assert!(ticks.windows(2).all(|w| w[1] - w[0] >= 16), "ticks: {ticks:?}");
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sub_frame_interval_warns_only_on_frame_host() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        let lab = LabHost::starting_at(T0);
        tracing::subscriber::with_default(subscriber, || {
            let framed: Rc<dyn Host> = Rc::new(FrameHost::new(Rc::new(lab.clone())));
            let _framed = Ticker::new(framed, 5, false).unwrap();
            let _slow = Ticker::new(Rc::new(FrameHost::new(Rc::new(lab.clone()))), 20, false)
                .unwrap();
            let _native = Ticker::new(Rc::new(lab.clone()), 5, false).unwrap();
        });

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out.matches("interval shorter than one frame").count(), 1, "{out}");
    }

    #[test]
    fn interval_source_stopping_the_ticker_arms_nothing() {
        let lab = LabHost::starting_at(T0);
        let slot: Rc<RefCell<Option<Ticker>>> = Rc::default();
        let s = Rc::clone(&slot);
        let interval = Interval::from_fn(move |_, current: &Timestamp| {
            if *current != 0 {
                if let Some(ticker) = s.borrow().as_ref() {
                    ticker.stop();
                }
            }
            10.0
        });
        let ticker = Ticker::new(Rc::new(lab.clone()), interval, false).unwrap();
        *slot.borrow_mut() = Some(ticker.clone());
        let (log, _sub) = record(&ticker);

        ticker.start().unwrap();
        assert!(!ticker.is_started());
        assert_eq!(lab.pending_timers(), 0);
        assert_eq!(*log.borrow(), vec![0, T0, 0]);

        lab.advance_ms(50).unwrap();
        assert_eq!(log.borrow().len(), 3);
        slot.borrow_mut().take();
    }
}
