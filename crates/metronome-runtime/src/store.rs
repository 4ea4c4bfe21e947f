#![forbid(unsafe_code)]

//! Single-value reactive store.
//!
//! # Design
//!
//! [`Store<T>`] keeps one current value in shared, reference-counted storage
//! and fans every change out to its subscribers synchronously. Subscribers
//! are held as `Weak` pointers; the strong side lives in the [`Subscription`]
//! guard returned by [`subscribe`](Store::subscribe), so dropping the guard
//! unsubscribes.
//!
//! # Invariants
//!
//! 1. `subscribe` calls the new subscriber once, immediately, with the
//!    current value.
//! 2. Subscribers are notified in registration order.
//! 3. A `set` whose value compares equal to the current one is a no-op (no
//!    version bump, no notifications).
//! 4. A `set` issued by a subscriber supersedes the fan-out in progress:
//!    subscribers not yet reached by the outer fan-out only see the newer
//!    value, so every subscriber's last observation is the current value.
//! 5. A panicking subscriber neither stops the remaining subscribers nor
//!    reaches the caller of `set`; the panic goes to the error handler.
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: caught per subscriber and reported as a
//!   [`SubscriberError`] to the configured handler (default: `tracing`
//!   `ERROR` event).
//! - **`with` closure calls `set`**: panics on the interior `RefCell`.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use metronome_core::SubscriberError;
use tracing::error;

/// Receives subscriber panics.
pub type ErrorHandler = Rc<dyn Fn(&SubscriberError)>;

type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

/// Construction options for a [`Store`].
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// Handler for subscriber panics. `None` logs them.
    pub on_error: Option<ErrorHandler>,
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

struct Subscriber<T> {
    callback: Box<dyn Fn(&T)>,
}

struct StoreState<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<Subscriber<T>>>,
}

struct StoreShared<T> {
    state: RefCell<StoreState<T>>,
    equals: Equality<T>,
    on_error: Option<ErrorHandler>,
}

/// A shared value with synchronous change notification.
///
/// Cloning a `Store` creates a new handle to the **same** value.
pub struct Store<T> {
    shared: Rc<StoreShared<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Store")
            .field("value", &state.value)
            .field("version", &state.version)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Store<T> {
    /// Create a store that suppresses sets of an equal value.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_options(value, StoreOptions::default())
    }

    /// Like [`new`](Self::new), with options.
    #[must_use]
    pub fn with_options(value: T, options: StoreOptions) -> Self {
        Self::with_comparator(value, |a: &T, b: &T| a == b, options)
    }
}

impl<T: Clone + 'static> Store<T> {
    /// Create a store with a custom equality test. Sets for which `equals`
    /// returns `true` are suppressed.
    #[must_use]
    pub fn with_comparator(
        value: T,
        equals: impl Fn(&T, &T) -> bool + 'static,
        options: StoreOptions,
    ) -> Self {
        Self {
            shared: Rc::new(StoreShared {
                state: RefCell::new(StoreState {
                    value,
                    version: 0,
                    subscribers: Vec::new(),
                }),
                equals: Box::new(equals),
                on_error: options.on_error,
            }),
        }
    }

    /// A clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.shared.state.borrow().value.clone()
    }

    /// Borrow the current value without cloning. `f` must not write to the
    /// store.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.shared.state.borrow().value)
    }

    /// Number of changes applied so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.state.borrow().version
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .state
            .borrow()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Replace the value and notify subscribers if it changed.
    ///
    /// If a subscriber calls `set` again during the fan-out, subscribers not
    /// yet notified skip this value and only receive the newer one.
    pub fn set(&self, value: T) {
        let (snapshot, version) = {
            let mut state = self.shared.state.borrow_mut();
            if (self.shared.equals)(&state.value, &value) {
                return;
            }
            state.value = value;
            state.version += 1;
            (state.value.clone(), state.version)
        };
        self.notify(&snapshot, version);
    }

    /// `set(f(&current))`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.with(f);
        self.set(next);
    }

    /// Register `callback` and immediately call it with the current value.
    ///
    /// The callback stays registered until the returned guard is dropped or
    /// [`Subscription::unsubscribe`] is called.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let subscriber = Rc::new(Subscriber {
            callback: Box::new(callback),
        });
        self.shared
            .state
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&subscriber));

        let current = self.get();
        self.invoke(&subscriber, &current);

        Subscription {
            guard: RefCell::new(Some(subscriber as Rc<dyn Any>)),
        }
    }

    fn notify(&self, value: &T, version: u64) {
        let live: Vec<Rc<Subscriber<T>>> = {
            let mut state = self.shared.state.borrow_mut();
            state.subscribers.retain(|w| w.strong_count() > 0);
            state.subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for subscriber in &live {
            // A nested set already delivered a newer value to everyone.
            if self.version() != version {
                return;
            }
            self.invoke(subscriber, value);
        }
    }

    fn invoke(&self, subscriber: &Subscriber<T>, value: &T) {
        let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(value)));
        if let Err(payload) = outcome {
            let err = SubscriberError::from_panic(payload.as_ref());
            match &self.shared.on_error {
                Some(handler) => handler(&err),
                None => error!(error = %err, "store subscriber failed"),
            }
        }
    }
}

/// RAII guard for a store subscription.
///
/// Dropping the guard unsubscribes. [`unsubscribe`](Self::unsubscribe) does
/// the same eagerly and may be called any number of times.
pub struct Subscription {
    guard: RefCell<Option<Rc<dyn Any>>>,
}

impl Subscription {
    /// Stop receiving notifications.
    pub fn unsubscribe(&self) {
        self.guard.borrow_mut().take();
    }

    /// Whether the subscription is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard.borrow().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
