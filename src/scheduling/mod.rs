//! Frame scheduling capability consumed by the coalescer.
//!
//! A host environment exposes "run this once before the next frame" through
//! [`FrameScheduler`]. The `manual` submodule contains a frame loop that is stepped
//! explicitly, for headless hosts and tests.
use std::{fmt::Debug, num::NonZeroU64, rc::Rc};

pub mod manual;

/// "Notify me before the next repaint", as provided by the host.
///
/// `schedule` must defer the callback: it runs at most once, at the next frame
/// boundary, never inside the `schedule` call itself.
pub trait FrameScheduler {
    type Handle: Copy + Eq + Debug;

    fn schedule(&self, callback: Box<dyn FnOnce()>) -> Self::Handle;
    /// Ignored for handles that already ran or were already cancelled.
    fn cancel(&self, handle: Self::Handle);
}

impl<S: FrameScheduler + ?Sized> FrameScheduler for Rc<S> {
    type Handle = S::Handle;

    fn schedule(&self, callback: Box<dyn FnOnce()>) -> Self::Handle {
        (**self).schedule(callback)
    }

    fn cancel(&self, handle: Self::Handle) {
        (**self).cancel(handle)
    }
}

impl<S: FrameScheduler + ?Sized> FrameScheduler for &'static S {
    type Handle = S::Handle;

    fn schedule(&self, callback: Box<dyn FnOnce()>) -> Self::Handle {
        (**self).schedule(callback)
    }

    fn cancel(&self, handle: Self::Handle) {
        (**self).cancel(handle)
    }
}

/// Opaque id of a scheduled frame callback. Never zero, never reused by one scheduler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(NonZeroU64);

impl FrameHandle {
    pub(crate) fn from_raw(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}
