//! Explicitly stepped frame loop.
//!
//! `ManualScheduler` owns a queue of frame callbacks and only runs them when its owner
//! calls [`ManualScheduler::step`] or [`ManualScheduler::flush`]. Hosts without a
//! compositor (game loops, headless renderers, tests) drive it from their own loop.
use std::{cell::RefCell, collections::VecDeque, fmt, num::NonZeroU64, rc::Rc};

use tracing::{debug, trace};

use crate::FrameError;

use super::{FrameHandle, FrameScheduler};

struct Entry {
    handle: FrameHandle,
    due: u64, // first frame allowed to run this entry
    callback: Box<dyn FnOnce()>,
}

struct FrameQueue {
    entries: VecDeque<Entry>,
    next_handle: NonZeroU64,
    frame: u64,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            next_handle: NonZeroU64::MIN,
            frame: 0,
        }
    }
}

/// Single-threaded frame loop. Clones share one queue.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Rc<RefCell<FrameQueue>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one frame: every callback scheduled before this call, in registration order.
    ///
    /// Callbacks scheduled while the frame runs are deferred to the following frame.
    /// A panicking callback unwinds out of `step`; the callbacks queued behind it are
    /// left in place and run on the next step.
    pub fn step(&self) -> usize {
        let current = {
            let mut queue = self.queue.borrow_mut();
            queue.frame += 1;
            queue.frame
        };
        let mut ran = 0;
        loop {
            // the borrow must be released before the callback runs, it may schedule or cancel
            let entry = {
                let mut queue = self.queue.borrow_mut();
                let ready = queue
                    .entries
                    .front()
                    .is_some_and(|entry| entry.due <= current);
                if ready {
                    queue.entries.pop_front()
                } else {
                    None
                }
            };
            let Some(entry) = entry else {
                break;
            };
            trace!(frame = current, handle = entry.handle.get(), "running frame callback");
            (entry.callback)();
            ran += 1;
        }
        trace!(frame = current, ran, "frame stepped");
        ran
    }

    /// Step frames until nothing is queued, giving up after `max_frames` frames.
    pub fn flush(&self, max_frames: usize) -> Result<usize, FrameError> {
        let mut ran = 0;
        for _ in 0..max_frames {
            if self.pending() == 0 {
                return Ok(ran);
            }
            ran += self.step();
        }
        if self.pending() == 0 {
            return Ok(ran);
        }
        debug!(
            frames = max_frames,
            pending = self.pending(),
            "flush gave up, callbacks keep rescheduling"
        );
        Err(FrameError::FlushLimitExceeded { frames: max_frames })
    }

    /// Drop every queued callback without running it.
    pub fn reset(&self) {
        let dropped = {
            let mut queue = self.queue.borrow_mut();
            std::mem::take(&mut queue.entries)
        };
        trace!(dropped = dropped.len(), "frame queue reset");
    }

    /// Number of callbacks waiting for a frame
    pub fn pending(&self) -> usize {
        self.queue.borrow().entries.len()
    }

    /// Number of frames stepped so far
    pub fn frame(&self) -> u64 {
        self.queue.borrow().frame
    }
}

impl FrameScheduler for ManualScheduler {
    type Handle = FrameHandle;

    fn schedule(&self, callback: Box<dyn FnOnce()>) -> FrameHandle {
        let mut queue = self.queue.borrow_mut();
        let handle = FrameHandle::from_raw(queue.next_handle);
        queue.next_handle = queue.next_handle.saturating_add(1);
        let due = queue.frame + 1;
        queue.entries.push_back(Entry {
            handle,
            due,
            callback,
        });
        handle
    }

    fn cancel(&self, handle: FrameHandle) {
        self.queue
            .borrow_mut()
            .entries
            .retain(|entry| entry.handle != handle);
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue.borrow();
        f.debug_struct("ManualScheduler")
            .field("frame", &queue.frame)
            .field("pending", &queue.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::panic::{self, AssertUnwindSafe};

    fn counter() -> (Rc<Cell<usize>>, impl Fn() -> Box<dyn FnOnce()>) {
        let hits = Rc::new(Cell::new(0));
        let shared = Rc::clone(&hits);
        let make = move || -> Box<dyn FnOnce()> {
            let hits = Rc::clone(&shared);
            Box::new(move || hits.set(hits.get() + 1))
        };
        (hits, make)
    }

    #[test]
    fn nothing_runs_until_stepped() {
        let frames = ManualScheduler::new();
        let (hits, make) = counter();

        frames.schedule(make());
        frames.schedule(make());
        assert_eq!(hits.get(), 0);
        assert_eq!(frames.pending(), 2);

        assert_eq!(frames.step(), 2);
        assert_eq!(hits.get(), 2);
        assert_eq!(frames.pending(), 0);
        assert_eq!(frames.frame(), 1);

        // an empty frame is fine
        assert_eq!(frames.step(), 0);
        assert_eq!(frames.frame(), 2);
    }

    #[test]
    fn handles_are_distinct() {
        let frames = ManualScheduler::new();
        let a = frames.schedule(Box::new(|| {}));
        let b = frames.schedule(Box::new(|| {}));
        assert_ne!(a, b);
        assert!(a.get() > 0);
    }

    #[test]
    fn runs_in_registration_order() {
        let frames = ManualScheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..4 {
            let order = Rc::clone(&order);
            frames.schedule(Box::new(move || order.borrow_mut().push(i)));
        }
        frames.step();
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn cancelled_callback_never_runs() {
        let frames = ManualScheduler::new();
        let (hits, make) = counter();

        let handle = frames.schedule(make());
        frames.schedule(make());
        frames.cancel(handle);
        // cancelling twice is harmless
        frames.cancel(handle);

        assert_eq!(frames.step(), 1);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn rescheduling_from_a_callback_waits_for_next_frame() {
        let frames = ManualScheduler::new();
        let hits = Rc::new(Cell::new(0));

        let inner_frames = frames.clone();
        let inner_hits = Rc::clone(&hits);
        frames.schedule(Box::new(move || {
            inner_hits.set(inner_hits.get() + 1);
            let again = Rc::clone(&inner_hits);
            inner_frames.schedule(Box::new(move || again.set(again.get() + 1)));
        }));

        assert_eq!(frames.step(), 1);
        assert_eq!(hits.get(), 1);
        assert_eq!(frames.pending(), 1);

        assert_eq!(frames.step(), 1);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn callback_can_cancel_a_later_one_in_the_same_frame() {
        let frames = ManualScheduler::new();
        let (hits, make) = counter();
        let victim = Rc::new(Cell::new(None));

        let canceller = frames.clone();
        let target = Rc::clone(&victim);
        frames.schedule(Box::new(move || {
            if let Some(handle) = target.get() {
                canceller.cancel(handle);
            }
        }));
        victim.set(Some(frames.schedule(make())));

        assert_eq!(frames.step(), 1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn flush_drains_chained_callbacks() {
        let frames = ManualScheduler::new();
        let hits = Rc::new(Cell::new(0));

        fn chain(frames: ManualScheduler, hits: Rc<Cell<usize>>, left: usize) {
            let next = frames.clone();
            frames.schedule(Box::new(move || {
                hits.set(hits.get() + 1);
                if left > 0 {
                    chain(next, hits, left - 1);
                }
            }));
        }
        chain(frames.clone(), Rc::clone(&hits), 4);

        assert_eq!(frames.flush(10), Ok(5));
        assert_eq!(hits.get(), 5);
        assert_eq!(frames.frame(), 5);
        assert_eq!(frames.flush(10), Ok(0));
    }

    #[test]
    fn flush_reports_runaway_rescheduling() {
        let frames = ManualScheduler::new();

        fn forever(frames: ManualScheduler) {
            let next = frames.clone();
            frames.schedule(Box::new(move || forever(next)));
        }
        forever(frames.clone());

        assert_eq!(
            frames.flush(8),
            Err(FrameError::FlushLimitExceeded { frames: 8 })
        );
        assert_eq!(frames.frame(), 8);
        assert_eq!(frames.pending(), 1);
    }

    #[test]
    fn reset_drops_everything() {
        let frames = ManualScheduler::new();
        let (hits, make) = counter();
        frames.schedule(make());
        frames.schedule(make());

        frames.reset();
        assert_eq!(frames.pending(), 0);
        assert_eq!(frames.step(), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn panic_leaves_the_rest_of_the_frame_queued() {
        let frames = ManualScheduler::new();
        let (hits, make) = counter();

        frames.schedule(Box::new(|| panic!("boom")));
        frames.schedule(make());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| frames.step()));
        assert!(outcome.is_err());
        assert_eq!(hits.get(), 0);
        assert_eq!(frames.pending(), 1);

        assert_eq!(frames.step(), 1);
        assert_eq!(hits.get(), 1);
    }
}
