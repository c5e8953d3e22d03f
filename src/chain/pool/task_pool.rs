//! Fixed-size worker pool with a blocking future handle.
//!
//! Grounded on the original `VariadicThreadPool`: `post(Func, Args...)`
//! returns a `std::future<R>` backed by a `std::packaged_task` posted onto a
//! `boost::asio::thread_pool`. `TaskPool::submit` is the Rust analogue:
//! workers are plain `std::thread`s draining a `crossbeam_channel` queue, and
//! `TaskHandle::get` blocks the calling thread until the task's closure has
//! run, exactly like `std::future::get()` — including turning a panic inside
//! the closure into an error instead of unwinding the caller.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Error produced by a [`TaskHandle`] that could not deliver its result.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The submitted closure panicked; `message` is the captured panic payload.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The pool was dropped before the task could run.
    #[error("task pool shut down before task ran")]
    PoolShutDown,
}

struct TaskShared<T> {
    state: Mutex<Option<Result<T, TaskError>>>,
    cond: Condvar,
}

impl<T> TaskShared<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Result<T, TaskError>) {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(outcome);
        drop(guard);
        self.cond.notify_all();
    }
}

/// A blocking handle to a value that is being computed on a [`TaskPool`] worker.
pub struct TaskHandle<T> {
    shared: Arc<TaskShared<T>>,
}

impl<T> TaskHandle<T> {
    /// Blocks the calling thread until the task completes, returning its
    /// result or the error that prevented delivery.
    pub fn get(self) -> Result<T, TaskError> {
        let mut guard = self
            .shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if let Some(outcome) = guard.take() {
                return outcome;
            }
            guard = self
                .shared
                .cond
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A fixed-size pool of worker threads that run submitted closures FIFO.
///
/// Dropping the pool blocks until every queued task has run, mirroring the
/// original `VariadicThreadPool`'s destructor draining its `thread_pool`.
pub struct TaskPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Spawns `n_threads` worker threads. Panics if `n_threads` is zero.
    pub fn new(n_threads: usize) -> Self {
        assert!(n_threads > 0, "TaskPool requires at least one worker thread");
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(n_threads);
        for index in 0..n_threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("taskpool-worker-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .expect("failed to spawn task pool worker thread");
            workers.push(handle);
        }
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Submits a closure for execution on the next free worker, returning a
    /// handle that can be used to block for its result.
    pub fn submit<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::new(TaskShared::new());
        let completing = Arc::clone(&shared);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
            completing.complete(outcome.map_err(TaskError::Panicked));
        });
        match self.sender.as_ref() {
            Some(sender) if sender.send(job).is_ok() => {}
            _ => shared.complete(Err(TaskError::PoolShutDown)),
        }
        TaskHandle { shared }
    }

    /// Number of worker threads backing this pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        // Dropping the sender closes the channel once queued jobs drain,
        // which lets each worker's recv loop exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn submit_runs_closure_and_delivers_result() {
        let pool = TaskPool::new(2);
        let handle = pool.submit(|| 2 + 2);
        assert_eq!(handle.get().unwrap(), 4);
    }

    #[test]
    fn submit_runs_many_jobs_across_workers() {
        let pool = TaskPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.get().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn panicking_task_is_reported_as_an_error() {
        let pool = TaskPool::new(1);
        let handle = pool.submit(|| -> i32 { panic!("boom") });
        match handle.get() {
            Err(TaskError::Panicked(message)) => assert_eq!(message, "boom"),
            other => panic!("expected Panicked error, got {other:?}"),
        }
    }

    #[test]
    fn drop_blocks_until_all_queued_tasks_finish() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = TaskPool::new(2);
            for _ in 0..20 {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
