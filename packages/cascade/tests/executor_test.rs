use cascade::error::Failure;
use cascade::executor::{DispatchMode, Executor, Work};
use cascade::pair;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use test_log::test;

// single-threaded run-queue executor in the io-context style. work is only
// ever run by whoever calls `run`.
struct Looper {
    queue: Mutex<VecDeque<Work>>,
    submissions: Mutex<Vec<&'static str>>,
}

// `Arc<Looper>` can't implement the crate's `Executor` trait directly (both
// are foreign to this test crate, so the orphan rule forbids it); this
// newtype is local and just forwards to the wrapped `Arc`.
#[derive(Clone)]
struct LooperHandle(Arc<Looper>);

impl Deref for LooperHandle {
    type Target = Looper;

    fn deref(&self) -> &Looper {
        &self.0
    }
}

impl Looper {
    fn new() -> LooperHandle {
        LooperHandle(Arc::new(Looper {
            queue: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
        }))
    }

    // drain the queue, returning how many work items ran.
    fn run(&self) -> usize {
        let mut ran = 0;
        loop {
            let work = self.queue.lock().unwrap().pop_front();
            match work {
                Some(work) => {
                    work();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    fn submissions(&self) -> Vec<&'static str> {
        self.submissions.lock().unwrap().clone()
    }
}

impl Executor for LooperHandle {
    fn dispatch(&self, work: Work) {
        // this looper never considers the submitting thread current.
        self.submissions.lock().unwrap().push("dispatch");
        self.queue.lock().unwrap().push_back(work);
    }

    fn post(&self, work: Work) {
        self.submissions.lock().unwrap().push("post");
        self.queue.lock().unwrap().push_back(work);
    }

    fn defer(&self, work: Work) {
        self.submissions.lock().unwrap().push("defer");
        self.queue.lock().unwrap().push_back(work);
    }
}

// executor that runs dispatched work inline on the submitting thread.
struct Inline;

impl Executor for Inline {
    fn dispatch(&self, work: Work) {
        work();
    }

    fn post(&self, _work: Work) {
        panic!("inline executor cannot enqueue");
    }

    fn defer(&self, _work: Work) {
        panic!("inline executor cannot enqueue");
    }
}

#[test]
fn nothing_runs_until_the_looper_does() {
    let looper = Looper::new();
    let (mut promise, future) = pair::<i32>();
    let chained = future.then_via(DispatchMode::Post, looper.clone(), |x| x + 3);

    let worker = thread::spawn(move || {
        promise.set_value(2).unwrap();
    });
    worker.join().unwrap();

    assert!(!chained.is_ready());
    assert_eq!(looper.submissions(), vec!["post"]);
    assert_eq!(looper.run(), 1);
    assert!(chained.is_ready());
    assert_eq!(chained.get().unwrap(), 5);
}

#[test]
fn dispatch_and_defer_pick_their_methods() {
    let looper = Looper::new();
    let (mut promise, future) = pair::<i32>();
    let chained = future
        .then_via(DispatchMode::Dispatch, looper.clone(), |x| x + 1)
        .then_via(DispatchMode::Defer, looper.clone(), |x| x * 10);
    promise.set_value(1).unwrap();
    // the second stage is only submitted once the first one's work runs.
    assert_eq!(looper.submissions(), vec!["dispatch"]);
    assert_eq!(looper.run(), 2);
    assert_eq!(looper.submissions(), vec!["dispatch", "defer"]);
    assert_eq!(chained.get().unwrap(), 20);
}

#[test]
fn inline_dispatch_completes_within_fulfilment() {
    let (mut promise, future) = pair::<i32>();
    let chained = future.then_via(DispatchMode::Dispatch, Inline, |x| x * 2);
    promise.set_value(4).unwrap();
    assert!(chained.is_ready());
    assert_eq!(chained.get().unwrap(), 8);
}

#[test]
fn get_blocks_until_a_remote_run() {
    let looper = Looper::new();
    let (mut promise, future) = pair::<i32>();
    let chained = future.then_via(DispatchMode::Post, looper.clone(), |x| x + 3);
    promise.set_value(2).unwrap();

    let runner = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        looper.run()
    });
    assert_eq!(chained.get().unwrap(), 5);
    assert_eq!(runner.join().unwrap(), 1);
}

#[test]
fn ordinary_continuation_chains_off_executor_stage() {
    let looper = Looper::new();
    let (mut promise, future) = pair::<i32>();
    let chained = future
        .then_via(DispatchMode::Post, looper.clone(), |x| x * 2)
        .then(|x| x + 1);
    promise.set_value(3).unwrap();
    assert!(!chained.is_ready());
    looper.run();
    assert_eq!(chained.get().unwrap(), 7);
}

#[test]
fn upstream_failure_skips_submission() {
    let looper = Looper::new();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let (mut promise, future) = pair::<i32>();
    let chained = future.then_via(DispatchMode::Post, looper.clone(), move |x| {
        flag.store(true, SeqCst);
        x
    });
    promise.set_error(anyhow::anyhow!("nope")).unwrap();
    assert!(looper.submissions().is_empty());
    assert_eq!(looper.run(), 0);
    assert!(matches!(chained.get().unwrap_err(), Failure::Error(_)));
    assert!(!ran.load(SeqCst));
}

#[test]
fn broken_promise_reaches_executor_stage() {
    let looper = Looper::new();
    let (promise, future) = pair::<i32>();
    let chained = future.then_via(DispatchMode::Post, looper.clone(), |x| x);
    drop(promise);
    assert_eq!(looper.run(), 0);
    assert!(matches!(chained.get().unwrap_err(), Failure::BrokenPromise));
}

#[test]
fn panic_in_executor_work_is_captured() {
    let looper = Looper::new();
    let (mut promise, future) = pair::<i32>();
    let chained = future.then_via(DispatchMode::Post, looper.clone(), |_x| -> i32 {
        panic!("work blew up")
    });
    promise.set_value(1).unwrap();
    assert_eq!(looper.run(), 1);
    let failure = chained.get().unwrap_err();
    assert_eq!(failure.panic_message(), Some("work blew up"));
}

#[test]
fn dropped_terminal_future_does_not_stop_submission() {
    let looper = Looper::new();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let (mut promise, future) = pair::<i32>();
    drop(future.then_via(DispatchMode::Post, looper.clone(), move |x| {
        flag.store(true, SeqCst);
        x
    }));
    promise.set_value(1).unwrap();
    assert_eq!(looper.run(), 1);
    assert!(ran.load(SeqCst));
}
