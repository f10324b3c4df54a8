// shared states of stages and the event machinery connecting them. this is
// the sin-eater module: everything in here is manipulated under a chain's
// lock with `ChainGuard` as the witness, and the handle layer in api.rs
// wraps it into the defensive public surface.
//
// a chain is a line of stages:
//
//      RootStage<A> --next--> ContinuationStage<A, B, ..> --next--> ...
//            ^                       |
//            \------link.parent-----/
//
// events travel both ways along it:
//
//  - result-ready travels down the owning `next` links when a stage
//    finishes. eager stages (any, set, executor) fire off of it, on the
//    thread that finished the upstream stage.
//  - result-requested travels up the `link.parent` references when a
//    consumer withdraws or waits. lazy stages (any, get) fire off of it,
//    on the requesting thread. the root stage answers it by blocking on
//    the chain condvar until the producer finishes it.
//
// whichever event reaches a stage first fires it. the handlers re-check
// `finished` after every blocking gap, so the event that loses the race
// degenerates to a no-op.
//
// ownership runs downward: a producer owns its root stage, each stage owns
// its `next` stage, and the terminal consumer handle owns the stage it was
// extracted from. a pending continuation also owns its upstream stage
// through `link.parent`, which closes a reference cycle with `next`; the
// cycle is dissolved when the stage fires (firing consumes the link), or
// by `endpoint_removed` for lazy stages that lost their only requester.

use super::chain::{ChainGuard, ChainLock, Guarded};
use super::error::Failure;
use crate::executor::{DispatchMode, Executor, Work};
use std::{
    marker::PhantomData,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

// outcome storage for one stage.
pub(crate) enum Slot<T> {
    // nothing produced yet.
    Empty,
    // produced, not yet withdrawn. a stage with a populated slot is what
    // the handle layer reports as ready.
    Done(Result<T, Failure>),
    // withdrawn by the consumer handle or by the downstream stage.
    Taken,
}

impl<T> Slot<T> {
    fn is_finished(&self) -> bool {
        !matches!(self, Slot::Empty)
    }
}

// state every stage carries: the shared chain lock, the outcome slot, and
// the owning forward link to the downstream stage, if one was attached.
pub(crate) struct Body<T> {
    chain: Arc<ChainLock>,
    slot: Guarded<Slot<T>>,
    next: Guarded<Option<Arc<dyn Target>>>,
}

impl<T> Body<T> {
    pub(crate) fn new(chain: Arc<ChainLock>) -> Self {
        Body {
            chain,
            slot: Guarded::new(Slot::Empty),
            next: Guarded::new(None),
        }
    }

    pub(crate) fn chain(&self) -> &Arc<ChainLock> {
        &self.chain
    }

    // the guard handed to a stage must hold that stage's own chain lock.
    fn check_guard(&self, guard: &ChainGuard<'_>) {
        debug_assert!(std::ptr::eq(guard.chain(), &*self.chain));
    }

    pub(crate) fn is_finished(&self, guard: &ChainGuard<'_>) -> bool {
        self.check_guard(guard);
        self.slot.borrow(guard).is_finished()
    }

    pub(crate) fn has_value(&self, guard: &ChainGuard<'_>) -> bool {
        self.check_guard(guard);
        matches!(self.slot.borrow(guard), Slot::Done(Ok(_)))
    }

    pub(crate) fn has_failure(&self, guard: &ChainGuard<'_>) -> bool {
        self.check_guard(guard);
        matches!(self.slot.borrow(guard), Slot::Done(Err(_)))
    }

    // record the outcome, wake waiters, and drive the downstream stage's
    // result-ready, in that order. the caller must have checked
    // `is_finished` first.
    pub(crate) fn finish(&self, outcome: Result<T, Failure>, guard: &mut ChainGuard<'_>) {
        self.check_guard(guard);
        {
            let slot = self.slot.borrow_mut(guard);
            assert!(!slot.is_finished(), "stage finished twice");
            *slot = Slot::Done(outcome);
        }
        guard.notify_ready();
        let next = self.next.borrow(guard).clone();
        if let Some(next) = next {
            next.ready(guard);
        }
    }

    // withdraw the outcome. the caller must have awaited `is_finished`.
    pub(crate) fn take(&self, guard: &mut ChainGuard<'_>) -> Result<T, Failure> {
        self.check_guard(guard);
        match std::mem::replace(self.slot.borrow_mut(guard), Slot::Taken) {
            Slot::Done(outcome) => outcome,
            Slot::Empty => panic!("stage outcome taken before it finished"),
            Slot::Taken => panic!("stage outcome taken twice"),
        }
    }

    // wire the downstream stage in. set at most once, never changed after.
    // fires the newcomer's result-ready under the attaching lock if this
    // stage already finished.
    pub(crate) fn attach(&self, next: Arc<dyn Target>, guard: &mut ChainGuard<'_>) {
        self.check_guard(guard);
        {
            let link = self.next.borrow_mut(guard);
            debug_assert!(link.is_none(), "stage already has a continuation");
            *link = Some(next.clone());
        }
        if self.is_finished(guard) {
            next.ready(guard);
        }
    }

    // block on the chain condvar until this stage finishes.
    pub(crate) fn await_finished(&self, guard: &mut ChainGuard<'_>) {
        while !self.is_finished(guard) {
            guard.wait_ready();
        }
    }
}

// a stage as seen from below: the place a value of type T will appear.
// consumer handles and downstream stages hold stages through this.
pub(crate) trait Source<T>: Send + Sync {
    fn body(&self) -> &Body<T>;

    // the result-requested event. drives whatever has to happen for this
    // stage to eventually finish, blocking on the chain condvar where that
    // means waiting out the producer.
    fn request(&self, guard: &mut ChainGuard<'_>);

    // the consumer endpoint below this stage was dropped without
    // withdrawing. unwires whatever can no longer fire.
    fn endpoint_removed(&self, guard: &mut ChainGuard<'_>);
}

// a stage as seen from above.
pub(crate) trait Target: Send + Sync {
    // the result-ready event: the upstream stage finished.
    fn ready(self: Arc<Self>, guard: &mut ChainGuard<'_>);
}

// stage a promise creates. the chain lock every stage attached below it
// shares is created here and outlives them all through shared ownership.
pub(crate) struct RootStage<T> {
    body: Body<T>,
}

impl<T> RootStage<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(RootStage {
            body: Body::new(Arc::new(ChainLock::new())),
        })
    }

    pub(crate) fn body(&self) -> &Body<T> {
        &self.body
    }
}

impl<T: Send> Source<T> for RootStage<T> {
    fn body(&self) -> &Body<T> {
        &self.body
    }

    // nothing to forward to. a request against the root just waits for
    // the producer.
    fn request(&self, guard: &mut ChainGuard<'_>) {
        self.body.await_finished(guard);
    }

    fn endpoint_removed(&self, _guard: &mut ChainGuard<'_>) {}
}

// continuation placement policy, fixed when the stage is built.
pub(crate) trait Mode: Send + Sync + 'static {
    // fire when the upstream stage finishes, on the finishing thread.
    const FIRE_ON_READY: bool;
    // fire when the consumer side asks for the result, on the asking
    // thread.
    const FIRE_ON_REQUEST: bool;
}

// run on whichever event arrives first.
pub(crate) struct AnyMode;
// run only once a downstream consumer withdraws.
pub(crate) struct GetMode;
// run as soon as the upstream result is set.
pub(crate) struct SetMode;

impl Mode for AnyMode {
    const FIRE_ON_READY: bool = true;
    const FIRE_ON_REQUEST: bool = true;
}

impl Mode for GetMode {
    const FIRE_ON_READY: bool = false;
    const FIRE_ON_REQUEST: bool = true;
}

impl Mode for SetMode {
    const FIRE_ON_READY: bool = true;
    const FIRE_ON_REQUEST: bool = false;
}

// what a pending continuation holds until it fires: the upstream stage it
// will withdraw from and the user function to feed. taken exactly once,
// which is both the run-at-most-once guarantee and what dissolves the
// reference cycle back up the chain.
struct Link<P, F> {
    parent: Arc<dyn Source<P>>,
    func: F,
}

// shared state of a then-attached continuation stage.
pub(crate) struct ContinuationStage<P, R, F, M> {
    body: Body<R>,
    link: Guarded<Option<Link<P, F>>>,
    _mode: PhantomData<M>,
}

impl<P, R, F, M> ContinuationStage<P, R, F, M>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(P) -> R + Send + 'static,
    M: Mode,
{
    pub(crate) fn new(parent: Arc<dyn Source<P>>, func: F) -> Arc<Self> {
        let chain = parent.body().chain().clone();
        Arc::new(ContinuationStage {
            body: Body::new(chain),
            link: Guarded::new(Some(Link { parent, func })),
            _mode: PhantomData,
        })
    }

    // withdraw the upstream outcome and finish this stage with it. values
    // go through the user function, run outside the lock with panics
    // captured; failures pass straight through without running it. the
    // caller must know the upstream stage is finished.
    fn fire(&self, guard: &mut ChainGuard<'_>) {
        let Some(Link { parent, func }) = self.link.borrow_mut(guard).take() else {
            return;
        };
        match parent.body().take(guard) {
            Ok(value) => {
                let output = guard.unlocked(|| catch_unwind(AssertUnwindSafe(|| func(value))));
                self.body.finish(output.map_err(Failure::Panicked), guard);
            }
            Err(failure) => self.body.finish(Err(failure), guard),
        }
    }
}

impl<P, R, F, M> Target for ContinuationStage<P, R, F, M>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(P) -> R + Send + 'static,
    M: Mode,
{
    fn ready(self: Arc<Self>, guard: &mut ChainGuard<'_>) {
        if !M::FIRE_ON_READY || self.body.is_finished(guard) {
            return;
        }
        self.fire(guard);
    }
}

impl<P, R, F, M> Source<R> for ContinuationStage<P, R, F, M>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(P) -> R + Send + 'static,
    M: Mode,
{
    fn body(&self) -> &Body<R> {
        &self.body
    }

    fn request(&self, guard: &mut ChainGuard<'_>) {
        if self.body.is_finished(guard) {
            return;
        }
        // the parent arc is cloned out so the link stays in place for the
        // ready path to claim.
        let Some(parent) = self
            .link
            .borrow(guard)
            .as_ref()
            .map(|link| link.parent.clone())
        else {
            return;
        };
        parent.request(guard);
        if M::FIRE_ON_REQUEST {
            // requesting may have released the lock; the ready path can
            // have fired this stage in the gap.
            parent.body().await_finished(guard);
            if !self.body.is_finished(guard) {
                self.fire(guard);
            }
        }
    }

    fn endpoint_removed(&self, guard: &mut ChainGuard<'_>) {
        // stages that fire on result-ready stay wired, the chain may still
        // be driven from the producer side. a lazy stage that lost its
        // only requester can never fire, so its link is dissolved on up
        // the chain.
        if M::FIRE_ON_READY || self.body.is_finished(guard) {
            return;
        }
        if let Some(Link { parent, .. }) = self.link.borrow_mut(guard).take() {
            parent.endpoint_removed(guard);
        }
    }
}

// what a pending executor continuation holds until the upstream stage
// finishes.
struct ExecutorLink<P, F, E> {
    parent: Arc<dyn Source<P>>,
    func: F,
    executor: E,
    mode: DispatchMode,
}

// shared state of an executor-adapted continuation stage. fires at the
// same point a set-policy stage would, but instead of running the user
// function on the finishing thread it packages the work and hands it to
// the executor.
pub(crate) struct ExecutorStage<P, R, F, E> {
    body: Body<R>,
    link: Guarded<Option<ExecutorLink<P, F, E>>>,
}

impl<P, R, F, E> ExecutorStage<P, R, F, E>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(P) -> R + Send + 'static,
    E: Executor + Send + 'static,
{
    pub(crate) fn new(
        parent: Arc<dyn Source<P>>,
        func: F,
        executor: E,
        mode: DispatchMode,
    ) -> Arc<Self> {
        let chain = parent.body().chain().clone();
        Arc::new(ExecutorStage {
            body: Body::new(chain),
            link: Guarded::new(Some(ExecutorLink {
                parent,
                func,
                executor,
                mode,
            })),
        })
    }
}

impl<P, R, F, E> Target for ExecutorStage<P, R, F, E>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(P) -> R + Send + 'static,
    E: Executor + Send + 'static,
{
    fn ready(self: Arc<Self>, guard: &mut ChainGuard<'_>) {
        let Some(ExecutorLink {
            parent,
            func,
            executor,
            mode,
        }) = self.link.borrow_mut(guard).take()
        else {
            return;
        };
        let value = match parent.body().take(guard) {
            Ok(value) => value,
            Err(failure) => {
                self.body.finish(Err(failure), guard);
                return;
            }
        };
        // the closure owns the stage and, through it, the chain lock, so
        // it stays callable after every user-facing handle is gone.
        let stage = self.clone();
        let work: Work = Box::new(move || {
            let output = catch_unwind(AssertUnwindSafe(|| func(value)));
            let chain = stage.body.chain().clone();
            let mut guard = chain.lock();
            stage.body.finish(output.map_err(Failure::Panicked), &mut guard);
        });
        trace!(?mode, "submitting continuation work to executor");
        // released across submission: dispatch may run the work inline.
        guard.unlocked(move || match mode {
            DispatchMode::Dispatch => executor.dispatch(work),
            DispatchMode::Post => executor.post(work),
            DispatchMode::Defer => executor.defer(work),
        });
    }
}

impl<P, R, F, E> Source<R> for ExecutorStage<P, R, F, E>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(P) -> R + Send + 'static,
    E: Executor + Send + 'static,
{
    fn body(&self) -> &Body<R> {
        &self.body
    }

    // set-like: forward the request upstream and let readiness drive the
    // submission. the caller's own wait covers the gap until the executor
    // runs the work.
    fn request(&self, guard: &mut ChainGuard<'_>) {
        if self.body.is_finished(guard) {
            return;
        }
        let Some(parent) = self
            .link
            .borrow(guard)
            .as_ref()
            .map(|link| link.parent.clone())
        else {
            return;
        };
        parent.request(guard);
    }

    fn endpoint_removed(&self, _guard: &mut ChainGuard<'_>) {}
}
