//! Packaged-callable adapter over a promise.

use crate::stage::api::{Future, Promise};
use crate::stage::error::{AlreadyRetrievedError, Failure};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A function bundled with the promise its output will fulfil
///
/// Thin adapter over [`Promise`]: calling the task consumes it, runs the
/// function, and fulfils the associated future with its output. A task
/// dropped without being called breaks its promise like any other
/// unfulfilled producer.
///
/// Tasks move; they do not clone.
pub struct PackagedTask<A, R> {
    promise: Promise<R>,
    func: Box<dyn FnOnce(A) -> R + Send>,
}

impl<A: Send + 'static, R: Send + 'static> PackagedTask<A, R> {
    /// Package `func` with a fresh promise
    pub fn new(func: impl FnOnce(A) -> R + Send + 'static) -> Self {
        PackagedTask {
            promise: Promise::new(),
            func: Box::new(func),
        }
    }

    /// Extract the future that will carry the function's output
    pub fn future(&mut self) -> Result<Future<R>, AlreadyRetrievedError> {
        self.promise.future()
    }

    /// Run the function and fulfil the future with its output
    ///
    /// A panic in the function is captured and carried to the future as
    /// [`Failure::Panicked`]; it does not propagate to the caller.
    pub fn call(self, arg: A) {
        let PackagedTask { mut promise, func } = self;
        match catch_unwind(AssertUnwindSafe(|| func(arg))) {
            Ok(value) => {
                let _ = promise.set_value(value);
            }
            Err(payload) => {
                let _ = promise.fail(Failure::Panicked(payload));
            }
        }
    }
}
