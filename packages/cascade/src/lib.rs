//! # Cascade: a one-shot promise/future channel where the caller picks the
//! thread continuations run on.
//!
//! #### Background: the fixed handoff of ordinary futures
//!
//! A one-shot channel hands a single value from a producer to a consumer.
//! Attach a continuation to one and somebody has to decide which thread the
//! continuation runs on, and ordinary single-shot futures hard-code that
//! decision to one fixed side of the handoff. Eager designs run it on the
//! producer's thread inside the fulfilment call; lazy designs run it on the
//! consumer's thread inside the withdrawal call. Whichever side the library
//! picked, the other one is what some program needed.
//!
//! #### Cascade: pick a side per stage
//!
//! Cascade makes the scheduling point a per-continuation choice. A
//! [`Promise`] and its [`Future`] form the root stage of a chain; every
//! [`Future::then_on`] call grows the chain by one stage and picks one of
//! three placement policies for it:
//!
//! - [`ContinueOn::Set`] runs the user function eagerly, on the thread
//!   that fulfils the upstream stage, before the fulfilment call returns.
//!   Cheap for readers, pushes work onto producers.
//! - [`ContinueOn::Get`] runs it lazily, on the thread that withdraws the
//!   result. Cheap for producers, work happens on the reader.
//! - [`ContinueOn::Any`] runs it on whichever of those two events arrives
//!   first.
//!
//! ```
//! use cascade::{pair, ContinueOn};
//!
//! let (mut promise, future) = pair::<i32>();
//! let doubled = future.then_on(ContinueOn::Get, |x| x * 2);
//! promise.set_value(3).unwrap();
//! // the closure runs here, on the withdrawing thread
//! assert_eq!(doubled.get().unwrap(), 6);
//! ```
//!
//! A whole chain serializes through a single lock owned by its root stage,
//! and user functions always run with that lock released.
//!
//! #### Executors
//!
//! A continuation can also be detoured through an external work-submission
//! object with [`Future::then_via`]: the stage packages the user function
//! and the upstream value into a closure and hands it to an
//! [`executor::Executor`] by `dispatch`, `post`, or `defer`. The crate
//! defines only the contract; see the [`executor`] module.
//!
//! #### Failures
//!
//! A producer can fail its promise ([`Promise::set_error`]), drop it
//! unfulfilled (a *broken promise*), or a continuation can panic. All
//! three are carried down the chain as an [`error::Failure`], skipping
//! user functions on the way, and surface from the terminal
//! [`Future::get`]. Contract misuse (double fulfilment, double future
//! extraction) errors synchronously at the call site instead.

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod stage;
mod task;

pub mod executor;

pub use crate::stage::api::*;
pub use crate::task::PackagedTask;

/// Error and failure types
pub mod error {
    pub use crate::stage::error::*;
}
