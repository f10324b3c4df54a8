use cascade::error::Failure;
use cascade::PackagedTask;
use std::thread;
use test_log::test;

#[test]
fn call_fulfils_the_future() {
    let mut task = PackagedTask::new(|x: i32| x + 1);
    let future = task.future().unwrap();
    task.call(4);
    assert_eq!(future.get().unwrap(), 5);
}

#[test]
fn second_future_fails() {
    let mut task = PackagedTask::new(|x: i32| x);
    let _future = task.future().unwrap();
    assert!(task.future().is_err());
}

#[test]
fn dropped_task_breaks_its_promise() {
    let mut task = PackagedTask::new(|x: i32| x);
    let future = task.future().unwrap();
    drop(task);
    assert!(matches!(future.get().unwrap_err(), Failure::BrokenPromise));
}

#[test]
fn panicking_function_is_captured() {
    let mut task = PackagedTask::new(|_x: i32| -> i32 { panic!("task failed") });
    let future = task.future().unwrap();
    task.call(1);
    assert_eq!(future.get().unwrap_err().panic_message(), Some("task failed"));
}

#[test]
fn call_from_another_thread() {
    let mut task = PackagedTask::new(|x: i32| x * 3);
    let future = task.future().unwrap();
    let worker = thread::spawn(move || task.call(7));
    assert_eq!(future.get().unwrap(), 21);
    worker.join().unwrap();
}

#[test]
fn chains_like_any_future() {
    let mut task = PackagedTask::new(|x: i32| x * 2);
    let chained = task.future().unwrap().then(|x| x + 1);
    task.call(3);
    assert_eq!(chained.get().unwrap(), 7);
}
