//! Dedicated worker thread for thread-confined device state.
//!
//! CUDA execution contexts and the memory bound to them are only valid on the
//! thread that created them. [`Executor`] owns that thread: an init closure
//! runs first on the worker and builds the state (device handle, loaded
//! engine), and every subsequent operation is submitted as a deferred task
//! that the worker runs against `&mut S`. The state never leaves the worker;
//! it is dropped there when the loop exits, so context-affine teardown always
//! happens on the correct thread.
//!
//! The submission and reply paths are capacity-one channels and a submit lock
//! serializes callers, so at most one task is ever in flight and each reply
//! reaches the caller that sent the task. There is no cancellation or timeout
//! at this layer: a submitted task always runs to completion.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use tracing::debug;

use crate::error::ExecutorError;

type TaskFn<S> = Box<dyn FnOnce(&mut S) -> Box<dyn Any + Send> + Send>;

type Reply = Result<Box<dyn Any + Send>, ExecutorError>;

enum Message<S> {
    Run(TaskFn<S>),
    Stop,
}

struct CallChannel<S> {
    tasks: SyncSender<Message<S>>,
    replies: Receiver<Reply>,
}

/// A single worker thread owning state `S`, accepting deferred tasks from
/// arbitrary caller threads and running them serially on its own thread.
pub struct Executor<S> {
    calls: Mutex<Option<CallChannel<S>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: 'static> Executor<S> {
    /// Start the worker thread. `init` runs first, on the worker, and builds
    /// the thread-confined state.
    ///
    /// If `init` fails, the failure is held until the first `submit` and
    /// delivered to that caller; the worker then exits and later submits fail
    /// fast with [`ExecutorError::Stopped`].
    pub fn spawn<F>(init: F) -> Result<Self, ExecutorError>
    where
        F: FnOnce() -> Result<S, ExecutorError> + Send + 'static,
    {
        let (tasks_tx, tasks_rx) = sync_channel::<Message<S>>(1);
        let (replies_tx, replies_rx) = sync_channel::<Reply>(1);

        let handle = std::thread::Builder::new()
            .name("trackrt-executor".into())
            .spawn(move || worker_loop(init, tasks_rx, replies_tx))
            .map_err(|e| ExecutorError::Init(format!("failed to spawn worker thread: {e}")))?;

        Ok(Self {
            calls: Mutex::new(Some(CallChannel {
                tasks: tasks_tx,
                replies: replies_rx,
            })),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Run `task` on the worker thread and block until it produces a result.
    ///
    /// Safe to call from any number of threads; callers serialize on the
    /// submit lock and the capacity-one channel pair, so only one unit of
    /// work is ever in flight. Failures inside the task travel back through
    /// its own return type; a panic surfaces as [`ExecutorError::Panicked`].
    pub fn submit<T, F>(&self, task: F) -> Result<T, ExecutorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> T + Send + 'static,
    {
        let guard = self.calls.lock().unwrap();
        let calls = guard.as_ref().ok_or(ExecutorError::Stopped)?;

        let job: TaskFn<S> = Box::new(move |state| Box::new(task(state)) as Box<dyn Any + Send>);
        calls
            .tasks
            .send(Message::Run(job))
            .map_err(|_| ExecutorError::Stopped)?;

        let reply = calls
            .replies
            .recv()
            .map_err(|_| ExecutorError::Stopped)??;
        let value = reply
            .downcast::<T>()
            .expect("task reply matches the submitted task's result type");
        Ok(*value)
    }
}

impl<S> Executor<S> {
    /// Signal the worker loop to exit after its current task and join the
    /// thread. Idempotent; also run on drop.
    pub fn stop(&self) {
        let calls = self.calls.lock().unwrap().take();
        if let Some(calls) = calls {
            let _ = calls.tasks.send(Message::Stop);
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl<S> Drop for Executor<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<S, F>(init: F, tasks: Receiver<Message<S>>, replies: SyncSender<Reply>)
where
    F: FnOnce() -> Result<S, ExecutorError>,
{
    let mut state = match init() {
        Ok(state) => state,
        Err(err) => {
            debug!(error = %err, "executor startup failed");
            // Hold the failure for the first caller, then bail out; the
            // dropped channels make later submits fail fast.
            if let Ok(Message::Run(_)) = tasks.recv() {
                let _ = replies.send(Err(err));
            }
            return;
        }
    };

    debug!("executor thread started");
    while let Ok(Message::Run(task)) = tasks.recv() {
        let reply = panic::catch_unwind(AssertUnwindSafe(|| task(&mut state)))
            .map_err(|payload| ExecutorError::Panicked(panic_message(payload.as_ref())));
        if replies.send(reply).is_err() {
            break;
        }
    }
    debug!("executor thread stopping");
    // `state` drops here, on the thread that created it.
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_submit_returns_task_value() {
        let executor = Executor::spawn(|| Ok(0u64)).unwrap();
        let doubled = executor.submit(|state| {
            *state += 21;
            *state * 2
        });
        assert_eq!(doubled.unwrap(), 42);
        executor.stop();
    }

    #[test]
    fn test_tasks_run_serially_and_replies_reach_their_caller() {
        struct Guarded {
            busy: bool,
            count: u64,
        }

        let executor = Arc::new(
            Executor::spawn(|| {
                Ok(Guarded {
                    busy: false,
                    count: 0,
                })
            })
            .unwrap(),
        );

        let mut handles = Vec::new();
        for caller in 0..8u64 {
            let executor = Arc::clone(&executor);
            handles.push(thread::spawn(move || {
                for round in 0..10u64 {
                    let token = caller * 100 + round;
                    let echoed = executor
                        .submit(move |state| {
                            assert!(!state.busy, "two tasks overlapped on the worker");
                            state.busy = true;
                            state.count += 1;
                            thread::sleep(Duration::from_millis(1));
                            state.busy = false;
                            token
                        })
                        .unwrap();
                    // Each caller gets back exactly the value its own task
                    // produced, never another caller's.
                    assert_eq!(echoed, token);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let total = executor.submit(|state| state.count).unwrap();
        assert_eq!(total, 80);
        executor.stop();
    }

    #[test]
    fn test_init_failure_reaches_first_caller() {
        let executor: Executor<u64> =
            Executor::spawn(|| Err(ExecutorError::Init("no device".into()))).unwrap();

        let first = executor.submit(|state| *state);
        assert!(matches!(first, Err(ExecutorError::Init(_))), "{first:?}");

        // The worker has exited; a later submit must fail fast, not hang.
        let second = executor.submit(|state| *state);
        assert!(matches!(second, Err(ExecutorError::Stopped)), "{second:?}");
        executor.stop();
    }

    #[test]
    fn test_submit_after_stop_fails_fast() {
        let executor = Executor::spawn(|| Ok(())).unwrap();
        executor.stop();
        let result = executor.submit(|_| 1u32);
        assert!(matches!(result, Err(ExecutorError::Stopped)));
    }

    #[test]
    fn test_task_panic_is_reraised_and_loop_survives() {
        let executor = Executor::spawn(|| Ok(5u64)).unwrap();

        let panicked = executor.submit(|_: &mut u64| -> u64 { panic!("boom") });
        match panicked {
            Err(ExecutorError::Panicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected panic to re-raise, got {other:?}"),
        }

        // The loop keeps serving tasks after a panic.
        assert_eq!(executor.submit(|state| *state).unwrap(), 5);
        executor.stop();
    }

    #[test]
    fn test_state_is_dropped_on_worker_thread() {
        struct ThreadBound {
            home: thread::ThreadId,
            dropped_at_home: Arc<AtomicBool>,
        }

        impl Drop for ThreadBound {
            fn drop(&mut self) {
                self.dropped_at_home
                    .store(thread::current().id() == self.home, Ordering::SeqCst);
            }
        }

        let flag = Arc::new(AtomicBool::new(false));
        let flag_for_init = Arc::clone(&flag);
        let executor = Executor::spawn(move || {
            Ok(ThreadBound {
                home: thread::current().id(),
                dropped_at_home: flag_for_init,
            })
        })
        .unwrap();

        executor.submit(|_| ()).unwrap();
        executor.stop();
        assert!(
            flag.load(Ordering::SeqCst),
            "worker state must be torn down on the worker thread"
        );
    }
}
