// the exposed promise / future surface. wraps the stage layer into handles
// with synchronous contract checks; the crate re-exports this module.

use super::{
    core::{
        AnyMode, ContinuationStage, ExecutorStage, GetMode, Mode, RootStage, SetMode, Source,
        Target,
    },
    error::{AlreadyRetrievedError, AlreadySatisfiedError, Failure, SetError},
};
use crate::executor::{DispatchMode, Executor};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

// message for operations that need a stage on a handle that has none.
const NO_STATE: &str = "future has no shared state";

/// Create a linked promise/future pair
///
/// Convenience for [`Promise::new`] followed by [`Promise::future`].
pub fn pair<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let mut promise = Promise::new();
    let future = promise.future().unwrap();
    (promise, future)
}

/// Continuation placement policy for [`Future::then_on`]
///
/// Selects which of the two handoff events triggers the user function: the
/// producer finishing the upstream stage (`Set`), the consumer withdrawing
/// the result (`Get`), or whichever of the two arrives first (`Any`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ContinueOn {
    /// Run on whichever side fires first
    Any,
    /// Run lazily, on the thread that withdraws the result
    Get,
    /// Run eagerly, on the thread that sets the upstream result
    Set,
}

/// Outcome of a bounded wait on a future
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum WaitStatus {
    /// The stage finished within the wait
    Ready,
    /// The wait elapsed with the stage still pending
    TimedOut,
}

/// Producing half of a one-shot value channel
///
/// A promise owns the root stage of a chain. Fulfilling it with
/// [`set_value`](Self::set_value) or failing it with
/// [`set_error`](Self::set_error) finishes that stage exactly once, wakes
/// any blocked waiters, and runs whatever eager continuations are attached
/// downstream before the call returns.
///
/// Dropping a promise whose future was extracted, without having fulfilled
/// it, finishes the stage with [`Failure::BrokenPromise`] instead.
///
/// Promises move; they do not clone.
pub struct Promise<T> {
    root: Arc<RootStage<T>>,
    retrieved: bool,
}

impl<T: Send + 'static> Promise<T> {
    /// Create an unfulfilled promise
    pub fn new() -> Self {
        Promise {
            root: RootStage::new(),
            retrieved: false,
        }
    }

    /// Extract the consuming half
    ///
    /// There is only one: asking twice returns [`AlreadyRetrievedError`].
    pub fn future(&mut self) -> Result<Future<T>, AlreadyRetrievedError> {
        if self.retrieved {
            return Err(AlreadyRetrievedError);
        }
        self.retrieved = true;
        Ok(Future {
            stage: Some(self.root.clone() as Arc<dyn Source<T>>),
        })
    }

    /// Fulfil the promise with a value
    ///
    /// Eager continuations attached downstream have completed by the time
    /// this returns. If the promise was already satisfied the value is
    /// handed back in a [`SetError`].
    pub fn set_value(&mut self, value: T) -> Result<(), SetError<T>> {
        let chain = self.root.body().chain().clone();
        let mut guard = chain.lock();
        if self.root.body().is_finished(&guard) {
            return Err(SetError { value });
        }
        trace!("promise fulfilled");
        self.root.body().finish(Ok(value), &mut guard);
        Ok(())
    }

    /// Fail the promise
    ///
    /// The error is carried opaquely down the chain, skipping the user
    /// function of every stage it passes through, and surfaces from the
    /// consumer's [`Future::get`]. Downstream stages are driven exactly as
    /// on the value path.
    pub fn set_error(
        &mut self,
        error: impl Into<anyhow::Error>,
    ) -> Result<(), AlreadySatisfiedError> {
        self.fail(Failure::Error(error.into()))
    }

    // record an arbitrary failure as the outcome.
    pub(crate) fn fail(&mut self, failure: Failure) -> Result<(), AlreadySatisfiedError> {
        let chain = self.root.body().chain().clone();
        let mut guard = chain.lock();
        if self.root.body().is_finished(&guard) {
            return Err(AlreadySatisfiedError);
        }
        self.root.body().finish(Err(failure), &mut guard);
        Ok(())
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        // a promise dropped unfulfilled breaks itself, but only once a
        // consumer exists to observe that. failures never escape the drop:
        // continuations do not run user code on the failure path.
        if !self.retrieved {
            return;
        }
        let chain = self.root.body().chain().clone();
        let mut guard = chain.lock();
        if !self.root.body().is_finished(&guard) {
            trace!("promise dropped unfulfilled, breaking it");
            self.root.body().finish(Err(Failure::BrokenPromise), &mut guard);
        }
    }
}

/// Consuming half of a one-shot value channel
///
/// Obtained from [`Promise::future`] (or [`pair`]). The handle can block on
/// the outcome ([`get`](Self::get), [`wait`](Self::wait),
/// [`wait_for`](Self::wait_for)), observe it without consuming
/// ([`is_ready`](Self::is_ready) and friends), or grow the chain by
/// attaching a continuation ([`then`](Self::then),
/// [`then_on`](Self::then_on), [`then_via`](Self::then_via)).
///
/// Withdrawing and chaining both consume the handle; a default-constructed
/// or moved-from handle reports `valid() == false`.
///
/// Futures move; they do not clone.
pub struct Future<T> {
    stage: Option<Arc<dyn Source<T>>>,
}

impl<T: Send + 'static> Future<T> {
    /// Whether this handle refers to a stage it can still withdraw from
    pub fn valid(&self) -> bool {
        self.stage.is_some()
    }

    /// Whether the stage has finished, with a value or a failure
    ///
    /// Observational: never drives lazy continuations. `false` on an
    /// invalid handle.
    pub fn is_ready(&self) -> bool {
        let Some(stage) = &self.stage else {
            return false;
        };
        let chain = stage.body().chain().clone();
        let guard = chain.lock();
        stage.body().is_finished(&guard)
    }

    /// Whether the stage has finished with a value
    pub fn has_value(&self) -> bool {
        let Some(stage) = &self.stage else {
            return false;
        };
        let chain = stage.body().chain().clone();
        let guard = chain.lock();
        stage.body().has_value(&guard)
    }

    /// Whether the stage has finished with a failure
    pub fn has_failure(&self) -> bool {
        let Some(stage) = &self.stage else {
            return false;
        };
        let chain = stage.body().chain().clone();
        let guard = chain.lock();
        stage.body().has_failure(&guard)
    }

    /// Withdraw the outcome, blocking until the stage finishes
    ///
    /// Drives result-requested upstream, so lazy (`get`-policy) stages
    /// between here and the producer execute on this thread. Failures
    /// re-surface here: a broken promise, a producer-recorded error, or a
    /// panic captured from an upstream continuation.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn get(mut self) -> Result<T, Failure> {
        let stage = self.stage.take().expect(NO_STATE);
        let chain = stage.body().chain().clone();
        let mut guard = chain.lock();
        stage.request(&mut guard);
        stage.body().await_finished(&mut guard);
        stage.body().take(&mut guard)
    }

    /// Block until the stage finishes, without withdrawing
    ///
    /// Like [`get`](Self::get) this drives result-requested upstream, so a
    /// chain of `get`-policy stages is forced to execute.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn wait(&self) {
        let stage = self.stage.as_ref().expect(NO_STATE);
        let chain = stage.body().chain().clone();
        let mut guard = chain.lock();
        stage.request(&mut guard);
        stage.body().await_finished(&mut guard);
    }

    /// Block until the stage finishes or the timeout elapses
    ///
    /// Unlike [`wait`](Self::wait) this does not drive lazy continuations:
    /// a `get`-policy stage nobody withdraws from keeps reporting
    /// [`WaitStatus::TimedOut`]. Timing out leaves the handle fully usable;
    /// a later [`get`](Self::get) is still well-defined.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn wait_for(&self, timeout: Duration) -> WaitStatus {
        self.wait_until(Instant::now() + timeout)
    }

    /// Block until the stage finishes or the deadline passes
    ///
    /// Same semantics as [`wait_for`](Self::wait_for).
    pub fn wait_until(&self, deadline: Instant) -> WaitStatus {
        let stage = self.stage.as_ref().expect(NO_STATE);
        let chain = stage.body().chain().clone();
        let mut guard = chain.lock();
        loop {
            if stage.body().is_finished(&guard) {
                return WaitStatus::Ready;
            }
            if guard.wait_ready_until(deadline) {
                // settle races between the timeout and a finisher.
                return if stage.body().is_finished(&guard) {
                    WaitStatus::Ready
                } else {
                    WaitStatus::TimedOut
                };
            }
        }
    }

    /// Attach a continuation, run on whichever side of the handoff fires
    /// first
    ///
    /// Shorthand for [`then_on`](Self::then_on) with [`ContinueOn::Any`].
    pub fn then<R, F>(self, func: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.then_on(ContinueOn::Any, func)
    }

    /// Attach a continuation with an explicit placement policy
    ///
    /// Consumes this handle; the returned future is the only way to reach
    /// the chain afterwards. If this stage has already finished, eager
    /// policies run `func` before this call returns. A panic in `func` is
    /// captured and becomes the downstream stage's [`Failure::Panicked`];
    /// an upstream failure skips `func` and is carried through instead.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn then_on<R, F>(mut self, policy: ContinueOn, func: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        let parent = self.stage.take().expect(NO_STATE);
        match policy {
            ContinueOn::Any => attach_continuation::<T, R, F, AnyMode>(parent, func),
            ContinueOn::Get => attach_continuation::<T, R, F, GetMode>(parent, func),
            ContinueOn::Set => attach_continuation::<T, R, F, SetMode>(parent, func),
        }
    }

    /// Attach a continuation that runs on an executor
    ///
    /// Scheduled at the same point a `Set`-policy continuation would be,
    /// but instead of running on the fulfilling thread, `func` and the
    /// upstream value are packaged as a [`Work`](crate::executor::Work)
    /// closure and submitted through `executor` by the method `mode`
    /// selects. The downstream stage finishes when the executor invokes
    /// the closure; the submitting thread never runs `func` under the
    /// chain lock.
    ///
    /// # Panics
    ///
    /// Panics if the handle is invalid.
    pub fn then_via<R, F, E>(mut self, mode: DispatchMode, executor: E, func: F) -> Future<R>
    where
        R: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
        E: Executor + Send + 'static,
    {
        let parent = self.stage.take().expect(NO_STATE);
        let stage = ExecutorStage::new(parent.clone(), func, executor, mode);
        let chain = stage.body().chain().clone();
        let mut guard = chain.lock();
        parent.body().attach(stage.clone() as Arc<dyn Target>, &mut guard);
        drop(guard);
        Future { stage: Some(stage) }
    }
}

// build a continuation stage of the given mode below `parent` and wire it
// in, firing immediately if `parent` already finished.
fn attach_continuation<T, R, F, M>(parent: Arc<dyn Source<T>>, func: F) -> Future<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnOnce(T) -> R + Send + 'static,
    M: Mode,
{
    let stage = ContinuationStage::<T, R, F, M>::new(parent.clone(), func);
    let chain = stage.body().chain().clone();
    let mut guard = chain.lock();
    parent.body().attach(stage.clone() as Arc<dyn Target>, &mut guard);
    drop(guard);
    Future { stage: Some(stage) }
}

impl<T> Default for Future<T> {
    /// An empty handle: `valid()` is `false` and blocking operations on it
    /// panic
    fn default() -> Self {
        Future { stage: None }
    }
}

impl<T> Drop for Future<T> {
    fn drop(&mut self) {
        // dropped while still wired in: nobody can withdraw from this
        // stage again, so let the stage layer unwire whatever can no
        // longer fire. eager continuations stay attached and still run.
        if let Some(stage) = self.stage.take() {
            let chain = stage.body().chain().clone();
            let mut guard = chain.lock();
            stage.endpoint_removed(&mut guard);
        }
    }
}
