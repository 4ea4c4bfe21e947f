#![forbid(unsafe_code)]

//! Core: clocks, scheduling hosts, and interval resolution for metronome.
//!
//! Tickers in `metronome-runtime` are written against the [`host::Host`]
//! trait and never touch a timer facility directly. This crate provides the
//! hosts (tokio, lab, frame-synced) and the [`interval::Interval`] source
//! type shared by every ticker.

pub mod clock;
pub mod error;
pub mod host;
pub mod interval;
pub mod logging;

pub use clock::{LabClock, Timestamp};
pub use error::{Result, SubscriberError, TickerError};
pub use host::{FRAME_MS, FrameHost, Host, LabHost, TimerHandle, is_interactive_host};
#[cfg(feature = "tokio")]
pub use host::TokioHost;
pub use interval::Interval;
