#![forbid(unsafe_code)]

//! Runtime: reactive store and the two ticker kinds.
//!
//! - [`Store`]: a single value with synchronous fan-out to subscribers.
//! - [`Ticker`]: publishes wall-clock timestamps at a drift-corrected cadence.
//! - [`WorkerTicker`]: runs an async worker, then waits, then runs it again.
//!
//! Tickers are written against [`metronome_core::Host`]. The `create_*`
//! factories pick the native tokio host and must run inside a
//! [`tokio::task::LocalSet`](https://docs.rs/tokio/latest/tokio/task/struct.LocalSet.html).

pub mod options;
pub mod store;
pub mod ticker;
pub mod worker;

use std::rc::Rc;

use metronome_core::{FrameHost, Host, Interval, Result, Timestamp};

pub use options::{Logger, TickTrace, TickerOptions, WorkerTickerOptions};
pub use store::{ErrorHandler, Store, StoreOptions, Subscription};
pub use ticker::Ticker;
pub use worker::{WorkerTick, WorkerTicker};

/// A ticker whose timers are aligned to frames of `host`.
///
/// Uses `host`'s timers as the frame source (one frame every `1000/60` ms).
pub fn create_frame_synced_ticker_on(
    host: Rc<dyn Host>,
    interval: impl Into<Interval<Timestamp>>,
    options: impl Into<TickerOptions>,
) -> Result<Ticker> {
    Ticker::new(Rc::new(FrameHost::new(host)), interval, options)
}

/// A ticker on native tokio timers.
#[cfg(feature = "tokio")]
pub fn create_ticker(
    interval: impl Into<Interval<Timestamp>>,
    options: impl Into<TickerOptions>,
) -> Result<Ticker> {
    Ticker::new(Rc::new(metronome_core::TokioHost::new()), interval, options)
}

/// A frame-synced ticker on native tokio timers.
#[cfg(feature = "tokio")]
pub fn create_frame_synced_ticker(
    interval: impl Into<Interval<Timestamp>>,
    options: impl Into<TickerOptions>,
) -> Result<Ticker> {
    create_frame_synced_ticker_on(Rc::new(metronome_core::TokioHost::new()), interval, options)
}

/// A delay-gated worker ticker on native tokio timers.
#[cfg(feature = "tokio")]
pub fn create_delayed_worker_ticker<R, E, W, Fut>(
    worker: W,
    interval: impl Into<Interval<WorkerTick<R, E>>>,
    options: impl Into<WorkerTickerOptions>,
) -> Result<WorkerTicker<R, E>>
where
    R: Clone + 'static,
    E: Clone + 'static,
    W: Fn(WorkerTick<R, E>) -> Fut + 'static,
    Fut: std::future::Future<Output = std::result::Result<R, E>> + 'static,
{
    WorkerTicker::new(
        Rc::new(metronome_core::TokioHost::new()),
        worker,
        interval,
        options,
    )
}
