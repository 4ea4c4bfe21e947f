//! Ticker construction options.
//!
//! Both ticker families accept either a bare `bool` (the legacy "start now"
//! flag, optionally paired with a logger) or a full options value. Once
//! converted they behave identically:
//!
//! ```
//! use metronome_runtime::TickerOptions;
//!
//! let legacy: TickerOptions = true.into();
//! let modern = TickerOptions::new().start(true);
//! assert_eq!(legacy.start, modern.start);
//! ```

use std::fmt;
use std::rc::Rc;

use metronome_core::{SubscriberError, Timestamp};

use crate::store::{ErrorHandler, StoreOptions};

/// Timing details of one scheduled tick, handed to the debug logger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickTrace {
    /// When the tick began.
    pub start: Timestamp,
    /// Milliseconds since the previous tick finished scheduling.
    pub duration: f64,
    /// Drift subtracted from the nominal interval.
    pub offset: f64,
    /// Delay actually armed for the next tick.
    pub next_interval: f64,
}

/// Debug hook called after every scheduled tick.
pub type Logger = Rc<dyn Fn(&TickTrace)>;

/// Options for the fixed-frequency ticker.
#[derive(Clone, Default)]
pub struct TickerOptions {
    /// Start immediately after construction.
    pub start: bool,
    /// Debug hook receiving a [`TickTrace`] per tick.
    pub logger: Option<Logger>,
    /// Handler for subscriber panics. `None` logs them.
    pub on_error: Option<ErrorHandler>,
}

impl TickerOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: impl Fn(&TickTrace) + 'static) -> Self {
        self.logger = Some(Rc::new(logger));
        self
    }

    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(&SubscriberError) + 'static) -> Self {
        self.on_error = Some(Rc::new(handler));
        self
    }

    pub(crate) fn store_options(&self) -> StoreOptions {
        StoreOptions {
            on_error: self.on_error.clone(),
        }
    }
}

impl fmt::Debug for TickerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickerOptions")
            .field("start", &self.start)
            .field("logger", &self.logger.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl From<bool> for TickerOptions {
    fn from(start: bool) -> Self {
        Self::new().start(start)
    }
}

impl From<(bool, Logger)> for TickerOptions {
    fn from((start, logger): (bool, Logger)) -> Self {
        Self {
            start,
            logger: Some(logger),
            on_error: None,
        }
    }
}

impl From<(bool, Option<Logger>)> for TickerOptions {
    fn from((start, logger): (bool, Option<Logger>)) -> Self {
        Self {
            start,
            logger,
            on_error: None,
        }
    }
}

/// Options for the delay-gated worker ticker.
#[derive(Clone, Default)]
pub struct WorkerTickerOptions {
    /// Start immediately after construction.
    pub start: bool,
    /// Handler for subscriber panics. `None` logs them.
    pub on_error: Option<ErrorHandler>,
}

impl WorkerTickerOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(&SubscriberError) + 'static) -> Self {
        self.on_error = Some(Rc::new(handler));
        self
    }

    pub(crate) fn store_options(&self) -> StoreOptions {
        StoreOptions {
            on_error: self.on_error.clone(),
        }
    }
}

impl fmt::Debug for WorkerTickerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerTickerOptions")
            .field("start", &self.start)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl From<bool> for WorkerTickerOptions {
    fn from(start: bool) -> Self {
        Self::new().start(start)
    }
}
