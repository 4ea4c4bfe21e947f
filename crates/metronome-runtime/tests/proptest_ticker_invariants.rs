//! Property-based invariant tests for the store and both ticker kinds.
//!
//! 1. A stopped ticker holds the sentinel `0` and has no pending timer.
//! 2. Toggling twice returns to the starting state.
//! 3. Drift correction keeps the tick count within one of `window / interval`.
//! 4. A worker ticker never has two calls in flight.
//! 5. A store never notifies the same value twice in a row.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt;
use metronome_core::{Host, LabHost};
use metronome_runtime::{Store, Ticker, WorkerTick, WorkerTicker};
use proptest::prelude::*;
use web_time::Duration;

const T0: u64 = 1_700_000_000_000;

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Stop,
    Toggle,
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Start),
        Just(Op::Stop),
        Just(Op::Toggle),
        (0u64..=60).prop_map(Op::Advance),
    ]
}

fn lab_ticker(interval: u64) -> (LabHost, Ticker) {
    let lab = LabHost::starting_at(T0);
    let host: Rc<dyn Host> = Rc::new(lab.clone());
    let ticker = Ticker::new(host, interval, false).expect("valid interval");
    (lab, ticker)
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Sentinel while stopped
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn stopped_ticker_holds_sentinel(
        interval in 1u64..=50,
        ops in proptest::collection::vec(op_strategy(), 1..40),
    ) {
        let (lab, ticker) = lab_ticker(interval);
        for op in ops {
            match op {
                Op::Start => { ticker.start().expect("start"); }
                Op::Stop => { ticker.stop(); }
                Op::Toggle => { ticker.toggle().expect("toggle"); }
                Op::Advance(ms) => lab.advance_ms(ms).expect("advance"),
            }
            if ticker.is_started() {
                prop_assert!(ticker.get() >= T0);
                prop_assert_eq!(lab.pending_timers(), 1);
            } else {
                prop_assert_eq!(ticker.get(), 0);
                prop_assert_eq!(lab.pending_timers(), 0);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Toggle round-trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn toggle_twice_is_identity(interval in 1u64..=50, started in any::<bool>()) {
        let (_lab, ticker) = lab_ticker(interval);
        if started {
            ticker.start().expect("start");
        }
        ticker.toggle().expect("toggle");
        prop_assert_eq!(ticker.is_started(), !started);
        ticker.toggle().expect("toggle");
        prop_assert_eq!(ticker.is_started(), started);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Drift-bounded tick counts
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn tick_count_tracks_window(
        interval in 5u64..=50,
        work_fraction in 0u64..50,
        periods in 1u64..=20,
        extra in 0u64..50,
    ) {
        let (lab, ticker) = lab_ticker(interval);
        let work = interval * work_fraction / 100;
        let window = interval * periods + interval * extra / 100;

        let ticks = Rc::new(Cell::new(0u64));
        let t = Rc::clone(&ticks);
        let clock = lab.clock().clone();
        let _sub = ticker.subscribe(move |&ts| {
            if ts != 0 {
                t.set(t.get() + 1);
                clock.advance(Duration::from_millis(work));
            }
        });

        ticker.start().expect("start");
        lab.advance_ms(window).expect("advance");
        ticker.stop();

        let expected = window / interval + 1;
        let got = ticks.get();
        prop_assert!(
            got + 1 >= expected && got <= expected + 1,
            "interval {} work {} window {}: {} ticks, expected about {}",
            interval, work, window, got, expected
        );
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. No overlapping worker calls
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn worker_calls_never_overlap(
        work_ms in 0u64..=20,
        delay in 1u64..=20,
        window in 1u64..=300,
        restart_at in proptest::option::of(0u64..=300),
    ) {
        let lab = LabHost::starting_at(T0);
        let active = Rc::new(Cell::new(0u32));
        let max_active = Rc::new(Cell::new(0u32));
        let (a, m, l) = (Rc::clone(&active), Rc::clone(&max_active), lab.clone());
        let ticker = WorkerTicker::new(
            Rc::new(lab.clone()),
            move |_prev: WorkerTick<u64, String>| {
                a.set(a.get() + 1);
                m.set(m.get().max(a.get()));
                let sleep = l.sleep(Duration::from_millis(work_ms));
                let a = Rc::clone(&a);
                async move {
                    sleep.await;
                    a.set(a.get() - 1);
                    Ok(work_ms)
                }
                .boxed_local()
            },
            delay,
            true,
        )
        .expect("valid delay");

        let log = Rc::new(RefCell::new(Vec::new()));
        let lg = Rc::clone(&log);
        let _sub = ticker.subscribe(move |v| lg.borrow_mut().push(v.clone()));

        match restart_at {
            Some(at) if at < window => {
                lab.advance_ms(at).expect("advance");
                ticker.stop().start().expect("restart");
                lab.advance_ms(window - at).expect("advance");
            }
            _ => lab.advance_ms(window).expect("advance"),
        }

        prop_assert_eq!(max_active.get(), 1);
        for pair in log.borrow().windows(2) {
            if pair[1].is_finished() {
                prop_assert!(pair[0].is_running());
                prop_assert_eq!(pair[0].started, pair[1].started);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Store suppresses equal values
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn store_never_repeats_a_value(values in proptest::collection::vec(0u8..4, 0..50)) {
        let store = Store::new(0u8);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = store.subscribe(move |v| s.borrow_mut().push(*v));
        for v in values {
            store.set(v);
        }
        let seen = seen.borrow();
        for pair in seen.windows(2) {
            prop_assert_ne!(pair[0], pair[1]);
        }
        prop_assert_eq!(*seen.last().expect("replayed value"), store.get());
    }
}
