// implementation of the promise/future stage chain.
//
// the basic architecture is as such:
//
// handles (Promise, Future) wrap Arc<stage shared state>
//                                        |
//         /------------------------------/
//         v
//      shared state, one per stage
//         |
//         |------ it contains a slot holding the stage's outcome, a value
//         |       or a carried failure, withdrawn at most once
//         |
//         |------ it contains the owning forward link to the downstream
//         |       stage, if a continuation was attached, along which the
//         |       result-ready event travels
//         |
//         \------ continuation stages additionally hold a one-shot link
//                 bundle with the upstream stage reference and the user
//                 function, consumed when the stage fires
//
// every stage in one chain shares a single mutex + condvar pair created by
// the chain's root stage. all stage state is touched only under that lock;
// user functions are always run with it released.
//
// the organization of these modules is as such:
//
//      These are used like
//      library utilities:
//    /--------------------\
//
//      chain<--------------core: This is the sin-eater of the unsafety.
//                  |       ^     It implements the stages, the two chain
//                  |       |     events, and the continuation policies,
//                  |       |     panicky and inconvenient.
//                  |       |
//      error<--------------api: This is a wrapper around core that adapts
//                                it into an API that is convenient and
//                                defensive. The crate re-exports this API
//                                publically.

pub(crate) mod api;
pub(crate) mod error;

mod chain;
mod core;
