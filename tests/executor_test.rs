use std::sync::Arc;
use std::thread;

use trackrt_rs::{Executor, ExecutorError};

#[test]
fn test_concurrent_submits_all_deliver_to_their_caller() {
    // Model the engine's call pattern: many caller threads hammering one
    // executor, each expecting its own result back.
    let executor = Arc::new(Executor::spawn(|| Ok(Vec::<u64>::new())).unwrap());

    let mut handles = Vec::new();
    for caller in 0..16u64 {
        let executor = Arc::clone(&executor);
        handles.push(thread::spawn(move || {
            let seen = executor
                .submit(move |log| {
                    log.push(caller);
                    caller
                })
                .unwrap();
            assert_eq!(seen, caller);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Every task ran exactly once, in some serial order.
    let mut log = executor.submit(|log| log.clone()).unwrap();
    log.sort_unstable();
    assert_eq!(log, (0..16).collect::<Vec<u64>>());
    executor.stop();
}

#[test]
fn test_stopped_executor_rejects_work_instead_of_hanging() {
    let executor = Executor::spawn(|| Ok(0u8)).unwrap();
    executor.stop();
    // stop() is idempotent.
    executor.stop();

    assert!(matches!(
        executor.submit(|state| *state),
        Err(ExecutorError::Stopped)
    ));
}

#[test]
fn test_startup_failure_surfaces_to_first_submit() {
    let executor: Executor<()> =
        Executor::spawn(|| Err(ExecutorError::Init("cuInit failed".into()))).unwrap();

    match executor.submit(|_| ()) {
        Err(ExecutorError::Init(reason)) => assert!(reason.contains("cuInit")),
        other => panic!("expected startup failure, got {other:?}"),
    }
}
