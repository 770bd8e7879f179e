//! Coalesce bursts of calls into one call per frame.
//!
//! [`FrameCoalescer`] records the arguments of every call and arms at most one frame
//! callback at a time. When the frame fires, the target runs once with the arguments of
//! the most recent call; everything in between is dropped. With
//! [`CoalesceOptions::leading`] the first call of each cycle also runs the target
//! immediately, and the trailing call is skipped if no newer arguments arrived.
//!
//! Arguments travel as one pack `A`: `()` for none, a tuple for several. They are kept in
//! an `Rc<A>`, and "newer arguments" means a different `Rc`, not a different value.
use std::{cell::RefCell, fmt, rc::Rc};

use tracing::trace;

use crate::scheduling::FrameScheduler;

/// Construction options for a [`FrameCoalescer`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CoalesceOptions {
    /// Also run the target synchronously on the first call of every cycle.
    pub leading: bool,
}

impl CoalesceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leading(mut self, leading: bool) -> Self {
        self.leading = leading;
        self
    }
}

struct Armed<H> {
    handle: H,
    cycle: u64,
}

struct CycleState<A, H> {
    latest: Option<Rc<A>>,
    leading: Option<Rc<A>>, // arguments the leading call ran with, this cycle
    armed: Option<Armed<H>>,
    cycles: u64,
}

struct Shared<A, S: FrameScheduler> {
    scheduler: S,
    options: CoalesceOptions,
    target: Box<dyn Fn(&A)>,
    state: RefCell<CycleState<A, S::Handle>>,
}

impl<A, S: FrameScheduler> Shared<A, S> {
    fn fire(&self, cycle: u64) {
        let args = {
            let mut state = self.state.borrow_mut();
            match &state.armed {
                Some(armed) if armed.cycle == cycle => {}
                _ => {
                    trace!(cycle, "stale frame ignored");
                    return;
                }
            }
            // disarm before the target runs so a call from inside it arms a fresh frame
            state.armed = None;
            let leading = state.leading.take();
            let Some(latest) = state.latest.take() else {
                return;
            };
            if leading.is_some_and(|leading| Rc::ptr_eq(&leading, &latest)) {
                trace!(cycle, "trailing call skipped, leading call already saw these arguments");
                return;
            }
            latest
        };
        trace!(cycle, "frame fired");
        (self.target)(&args);
    }
}

/// Runs a target callback at most once per frame, with the latest arguments.
///
/// Clones share the same state, like copies of one function reference. All use is
/// expected on a single thread, interleaved only by the host's frame callbacks.
///
/// Dropping the last clone does not cancel an armed frame: call
/// [`FrameCoalescer::cancel`] first, or the target runs once more when it fires.
pub struct FrameCoalescer<A, S: FrameScheduler> {
    shared: Rc<Shared<A, S>>,
}

impl<A: 'static, S: FrameScheduler + 'static> FrameCoalescer<A, S> {
    pub fn new<F>(scheduler: S, target: F) -> Self
    where
        F: Fn(&A) + 'static,
    {
        Self::with_options(scheduler, CoalesceOptions::default(), target)
    }

    pub fn with_options<F>(scheduler: S, options: CoalesceOptions, target: F) -> Self
    where
        F: Fn(&A) + 'static,
    {
        Self {
            shared: Rc::new(Shared {
                scheduler,
                options,
                target: Box::new(target),
                state: RefCell::new(CycleState {
                    latest: None,
                    leading: None,
                    armed: None,
                    cycles: 0,
                }),
            }),
        }
    }

    /// Record `args` as the latest call, arming a frame if none is pending.
    ///
    /// Returns the scheduler handle when this call armed the frame, `None` when it was
    /// folded into a frame that was already pending. In leading mode the target runs
    /// before this returns, and a panic from it unwinds through here.
    pub fn invoke(&self, args: A) -> Option<S::Handle> {
        let args = Rc::new(args);
        let cycle = {
            let mut state = self.shared.state.borrow_mut();
            state.latest = Some(Rc::clone(&args));
            if let Some(armed) = &state.armed {
                trace!(handle = ?armed.handle, cycle = armed.cycle, "call coalesced into pending frame");
                return None;
            }
            state.cycles += 1;
            state.leading = self.shared.options.leading.then(|| Rc::clone(&args));
            state.cycles
        };

        let shared = Rc::clone(&self.shared);
        let handle = self
            .shared
            .scheduler
            .schedule(Box::new(move || shared.fire(cycle)));
        self.shared.state.borrow_mut().armed = Some(Armed { handle, cycle });
        trace!(?handle, cycle, leading = self.shared.options.leading, "frame armed");

        // armed first: a call made from inside the leading call is coalesced, not re-armed
        if self.shared.options.leading {
            (self.shared.target)(&args);
        }
        Some(handle)
    }

    /// Disarm the pending frame, if any. The cancelled cycle never reaches the target.
    pub fn cancel(&self) {
        let armed = {
            let mut state = self.shared.state.borrow_mut();
            state.latest = None;
            state.leading = None;
            state.armed.take()
        };
        if let Some(armed) = armed {
            self.shared.scheduler.cancel(armed.handle);
            trace!(handle = ?armed.handle, cycle = armed.cycle, "frame cancelled");
        }
    }

    /// A plain callable forwarding to [`FrameCoalescer::invoke`], for event listener slots.
    pub fn callback(&self) -> impl Fn(A) + 'static {
        let coalescer = self.clone();
        move |args| {
            coalescer.invoke(args);
        }
    }
}

impl<A, S: FrameScheduler> FrameCoalescer<A, S> {
    pub fn is_pending(&self) -> bool {
        self.shared.state.borrow().armed.is_some()
    }

    pub fn pending_handle(&self) -> Option<S::Handle> {
        self.shared
            .state
            .borrow()
            .armed
            .as_ref()
            .map(|armed| armed.handle)
    }

    pub fn options(&self) -> CoalesceOptions {
        self.shared.options
    }
}

impl<A, S: FrameScheduler> Clone for FrameCoalescer<A, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<A, S: FrameScheduler> fmt::Debug for FrameCoalescer<A, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCoalescer")
            .field("options", &self.shared.options)
            .field("pending", &self.pending_handle())
            .finish()
    }
}
