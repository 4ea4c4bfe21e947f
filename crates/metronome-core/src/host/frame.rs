#![forbid(unsafe_code)]

//! Frame-synced timeouts.
//!
//! A [`FrameSource`] is a `requestAnimationFrame` equivalent: it calls back
//! once per display frame with a frame timestamp. [`FrameHost`] turns any
//! frame source into a [`Host`] by capturing the first frame timestamp as a
//! baseline and re-requesting frames until the requested delay has elapsed.
//! Effective granularity is one frame, so the host reports
//! [`FRAME_MS`] as its minimum timeout.
//!
//! Outside an interactive host there is no display refresh to hook into;
//! [`TimerFrames`] emulates one with plain host timers at 60 Hz.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;
use web_time::Duration;

use super::{FRAME_MS, Host, LocalTask, Task, TimerHandle, delay_from_ms, is_interactive_host};
use crate::clock::Timestamp;
use crate::error::Result;

/// Identifies a pending frame request.
pub type FrameId = u64;

/// Receives the frame timestamp in milliseconds.
pub type FrameCallback = Box<dyn FnOnce(f64) -> Result<()>>;

/// A `requestAnimationFrame`-style frame clock.
pub trait FrameSource {
    /// Run `callback` on the next frame.
    fn request_frame(&self, callback: FrameCallback) -> FrameId;

    /// Drop a pending request. Unknown ids are ignored.
    fn cancel_frame(&self, id: FrameId);
}

// ─── TimerFrames ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct PendingFrames {
    handles: RefCell<HashMap<FrameId, TimerHandle>>,
    last_id: Cell<FrameId>,
}

/// Frame source emulated with host timers, one frame every [`FRAME_MS`].
#[derive(Clone)]
pub struct TimerFrames {
    host: Rc<dyn Host>,
    pending: Rc<PendingFrames>,
}

impl TimerFrames {
    #[must_use]
    pub fn new(host: Rc<dyn Host>) -> Self {
        Self {
            host,
            pending: Rc::new(PendingFrames::default()),
        }
    }

    /// Number of requested frames that have not fired yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.handles.borrow().len()
    }

    fn next_id(&self) -> FrameId {
        // Ids wrap around but never hand out 0.
        let id = match self.pending.last_id.get().wrapping_add(1) {
            0 => 1,
            id => id,
        };
        self.pending.last_id.set(id);
        id
    }
}

impl fmt::Debug for TimerFrames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerFrames")
            .field("pending", &self.pending())
            .finish()
    }
}

impl FrameSource for TimerFrames {
    fn request_frame(&self, callback: FrameCallback) -> FrameId {
        let id = self.next_id();
        let host = Rc::clone(&self.host);
        let pending: Weak<PendingFrames> = Rc::downgrade(&self.pending);
        let handle = self.host.schedule(
            delay_from_ms(FRAME_MS),
            Box::new(move || {
                let still_pending = pending
                    .upgrade()
                    .is_some_and(|p| p.handles.borrow_mut().remove(&id).is_some());
                if still_pending {
                    callback(host.now() as f64)
                } else {
                    Ok(())
                }
            }),
        );
        self.pending.handles.borrow_mut().insert(id, handle);
        id
    }

    fn cancel_frame(&self, id: FrameId) {
        let handle = self.pending.handles.borrow_mut().remove(&id);
        if let Some(handle) = handle {
            handle.cancel();
        }
    }
}

// ─── FrameHost ───────────────────────────────────────────────────────────────

/// State of one frame-synced timeout.
struct FrameTimeout {
    delay_ms: f64,
    baseline: Cell<Option<f64>>,
    request: Cell<FrameId>,
    task: RefCell<Option<Task>>,
}

/// A [`Host`] whose timeouts fire on frame boundaries.
#[derive(Clone)]
pub struct FrameHost {
    inner: Rc<dyn Host>,
    frames: Rc<dyn FrameSource>,
}

impl FrameHost {
    /// Layer frame-synced timeouts over `inner`, picking the frame source
    /// suitable for the current environment.
    #[must_use]
    pub fn new(inner: Rc<dyn Host>) -> Self {
        debug!(
            interactive = is_interactive_host(),
            "frame host using timer-emulated frames"
        );
        let frames: Rc<dyn FrameSource> = Rc::new(TimerFrames::new(Rc::clone(&inner)));
        Self::with_frames(inner, frames)
    }

    /// Layer frame-synced timeouts over `inner` using an explicit frame
    /// source.
    #[must_use]
    pub fn with_frames(inner: Rc<dyn Host>, frames: Rc<dyn FrameSource>) -> Self {
        Self { inner, frames }
    }

    fn request_next(frames: &Rc<dyn FrameSource>, timeout: &Rc<FrameTimeout>) {
        let f = Rc::clone(frames);
        let t = Rc::clone(timeout);
        let id = frames.request_frame(Box::new(move |ts| Self::on_frame(&f, &t, ts)));
        timeout.request.set(id);
    }

    fn on_frame(frames: &Rc<dyn FrameSource>, timeout: &Rc<FrameTimeout>, ts: f64) -> Result<()> {
        let baseline = match timeout.baseline.get() {
            Some(b) => b,
            None => {
                timeout.baseline.set(Some(ts));
                ts
            }
        };
        if ts - baseline < timeout.delay_ms {
            Self::request_next(frames, timeout);
            return Ok(());
        }
        let task = timeout.task.borrow_mut().take();
        match task {
            Some(task) => task(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FrameHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHost")
            .field("now", &self.inner.now())
            .finish_non_exhaustive()
    }
}

impl Host for FrameHost {
    fn now(&self) -> Timestamp {
        self.inner.now()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let timeout = Rc::new(FrameTimeout {
            delay_ms: delay.as_secs_f64() * 1000.0,
            baseline: Cell::new(None),
            request: Cell::new(0),
            task: RefCell::new(Some(task)),
        });
        Self::request_next(&self.frames, &timeout);

        let frames = Rc::clone(&self.frames);
        TimerHandle::new(move || {
            timeout.task.borrow_mut().take();
            frames.cancel_frame(timeout.request.get());
        })
    }

    fn spawn(&self, future: LocalTask) {
        self.inner.spawn(future);
    }

    fn min_timeout_ms(&self) -> f64 {
        FRAME_MS
    }
}
