#![forbid(unsafe_code)]

//! Metronome public facade crate.
//!
//! Re-exports the tickers, the store, and the hosts they run on.

pub use metronome_core as core;
pub use metronome_runtime as runtime;

pub use metronome_core::{Interval, Result, SubscriberError, TickerError, Timestamp};
pub use metronome_runtime::{
    Store, Subscription, TickTrace, Ticker, TickerOptions, WorkerTick, WorkerTicker,
    WorkerTickerOptions, create_frame_synced_ticker_on,
};
#[cfg(feature = "tokio")]
pub use metronome_runtime::{create_delayed_worker_ticker, create_frame_synced_ticker, create_ticker};

pub mod prelude {
    pub use metronome_core as core;
    pub use metronome_runtime as runtime;

    pub use metronome_core::{FrameHost, Host, Interval, LabHost, TickerError};
    #[cfg(feature = "tokio")]
    pub use metronome_core::TokioHost;
    pub use metronome_runtime::{Store, Ticker, TickerOptions, WorkerTick, WorkerTicker};
}
