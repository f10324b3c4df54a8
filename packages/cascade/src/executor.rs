//! Work-submission contract for executor-adapted continuations.
//!
//! The crate does not implement executors. A continuation attached with
//! [`Future::then_via`][crate::Future::then_via] packages its user function
//! and the upstream value into a [`Work`] closure, then hands it to a
//! user-supplied [`Executor`] through whichever of the three submission
//! methods the [`DispatchMode`] tag selects. Invoking the closure is what
//! finishes the continuation's stage; until the executor runs it, the
//! downstream future stays pending.

/// Unit of work submitted to an [`Executor`]
pub type Work = Box<dyn FnOnce() + Send>;

/// A work-submission object continuations can be scheduled through
///
/// The three methods mirror the scheduling split of io-context style
/// executors. All of them must eventually invoke the closure exactly once;
/// they differ only in where and with what urgency.
pub trait Executor {
    /// Run `work` inline if the executor considers the calling thread
    /// current, otherwise enqueue it
    fn dispatch(&self, work: Work);

    /// Enqueue `work`, never running it inline
    fn post(&self, work: Work);

    /// Enqueue `work` with continuation-chaining hints
    ///
    /// For typical executors this is scheduled at lower priority than
    /// [`post`](Self::post).
    fn defer(&self, work: Work);
}

/// Selector for how an executor-adapted continuation submits its work
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DispatchMode {
    /// Submit with [`Executor::dispatch`]
    Dispatch,
    /// Submit with [`Executor::post`]
    Post,
    /// Submit with [`Executor::defer`]
    Defer,
}
