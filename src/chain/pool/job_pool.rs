//! Higher-level pool that tracks fire-and-forget jobs by id.
//!
//! Grounded on the original `ThreadPool`: `post` returns a monotonic `JobId`,
//! `query(JobId)` is a non-blocking peek, and `query()` blocks "until results
//! come available" and returns every job that has completed since the last
//! call, removing them from internal storage. Unlike [`crate::chain::pool::task_pool::TaskPool`],
//! a job's outcome is a classified success/failure pair rather than an
//! arbitrary typed value — this is what the orchestrator submits its
//! per-expiry work as.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};

use crate::chain::error::ChainError;

/// Monotonically increasing job identifier handed out by [`JobPool::post`].
pub type JobId = u64;

/// Sentinel message recorded for a job that panicked rather than returning
/// a classified [`ChainError`].
pub const GENERIC_JOB_ERROR_MESSAGE: &str = "unknown error";

/// Terminal outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub failed: bool,
    pub message: String,
}

impl JobOutcome {
    fn success() -> Self {
        Self {
            failed: false,
            message: String::new(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            failed: true,
            message: message.into(),
        }
    }
}

/// Status returned by [`JobPool::query`] for a single job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// The job has not completed yet.
    Running,
    /// The job completed; this outcome has been removed from the pool.
    Done(JobOutcome),
}

/// Error returned when querying a job id the pool has never seen, or has
/// already returned a terminal result for.
#[derive(Debug, thiserror::Error)]
#[error("unknown job id {0}")]
pub struct UnknownJobError(pub JobId);

struct JobState {
    next_id: JobId,
    pending: HashSet<JobId>,
    completed: HashMap<JobId, JobOutcome>,
}

struct Shared {
    state: Mutex<JobState>,
    cond: Condvar,
}

type BoxedJob = Box<dyn FnOnce() -> Result<(), ChainError> + Send + 'static>;

/// A fixed-size pool of worker threads tracking job completion by id.
pub struct JobPool {
    shared: Arc<Shared>,
    sender: Option<Sender<(JobId, BoxedJob)>>,
    workers: Vec<JoinHandle<()>>,
}

impl JobPool {
    /// Spawns `n_threads` worker threads. Panics if `n_threads` is zero.
    pub fn new(n_threads: usize) -> Self {
        assert!(n_threads > 0, "JobPool requires at least one worker thread");
        let shared = Arc::new(Shared {
            state: Mutex::new(JobState {
                next_id: 1,
                pending: HashSet::new(),
                completed: HashMap::new(),
            }),
            cond: Condvar::new(),
        });
        let (sender, receiver) = unbounded::<(JobId, BoxedJob)>();
        let mut workers = Vec::with_capacity(n_threads);
        for index in 0..n_threads {
            let receiver = receiver.clone();
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("jobpool-worker-{index}"))
                .spawn(move || {
                    while let Ok((id, job)) = receiver.recv() {
                        let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
                            Ok(Ok(())) => JobOutcome::success(),
                            Ok(Err(err)) => JobOutcome::failure(err.to_string()),
                            Err(_) => JobOutcome::failure(GENERIC_JOB_ERROR_MESSAGE),
                        };
                        let mut state = shared.state.lock().unwrap_or_else(|p| p.into_inner());
                        state.pending.remove(&id);
                        state.completed.insert(id, outcome);
                        drop(state);
                        shared.cond.notify_all();
                    }
                })
                .expect("failed to spawn job pool worker thread");
            workers.push(handle);
        }
        Self {
            shared,
            sender: Some(sender),
            workers,
        }
    }

    /// Submits a job and returns its id immediately.
    pub fn post<F>(&self, job: F) -> JobId
    where
        F: FnOnce() -> Result<(), ChainError> + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap_or_else(|p| p.into_inner());
        let id = state.next_id;
        state.next_id += 1;
        state.pending.insert(id);
        drop(state);

        if let Some(sender) = self.sender.as_ref() {
            if sender.send((id, Box::new(job))).is_err() {
                let mut state = self.shared.state.lock().unwrap_or_else(|p| p.into_inner());
                state.pending.remove(&id);
                state
                    .completed
                    .insert(id, JobOutcome::failure("job pool shut down before job ran"));
            }
        }
        id
    }

    /// Non-blocking lookup of a single job's status. Removes the outcome
    /// from the pool once returned as `Done`. Errors on an id that was never
    /// posted, or whose result was already delivered by a prior call.
    pub fn query(&self, id: JobId) -> Result<JobStatus, UnknownJobError> {
        let mut state = self.shared.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(outcome) = state.completed.remove(&id) {
            return Ok(JobStatus::Done(outcome));
        }
        if state.pending.contains(&id) {
            return Ok(JobStatus::Running);
        }
        Err(UnknownJobError(id))
    }

    /// Blocks until at least one submitted job completes, or returns
    /// immediately with an empty map if nothing is pending. Every completed
    /// job present at the moment of return is drained from the pool.
    pub fn query_all(&self) -> HashMap<JobId, JobOutcome> {
        let mut state = self.shared.state.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if !state.completed.is_empty() {
                return std::mem::take(&mut state.completed);
            }
            if state.pending.is_empty() {
                return HashMap::new();
            }
            state = self.shared.cond.wait(state).unwrap_or_else(|p| p.into_inner());
        }
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
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
    use std::time::Duration;

    #[test]
    fn post_then_query_returns_running_then_done() {
        let pool = JobPool::new(1);
        let id = pool.post(|| {
            thread::sleep(Duration::from_millis(20));
            Ok(())
        });
        assert_eq!(pool.query(id).unwrap(), JobStatus::Running);
        let all = pool.query_all();
        assert_eq!(all[&id], JobOutcome::success());
    }

    #[test]
    fn query_unknown_id_is_an_error() {
        let pool = JobPool::new(1);
        assert!(pool.query(999).is_err());
    }

    #[test]
    fn query_removes_completed_outcome() {
        let pool = JobPool::new(1);
        let id = pool.post(|| Ok(()));
        let _ = pool.query_all();
        assert!(pool.query(id).is_err());
    }

    #[test]
    fn failed_job_records_classified_message() {
        let pool = JobPool::new(1);
        let id = pool.post(|| Err(ChainError::Transient("timeout".into())));
        let all = pool.query_all();
        let outcome = &all[&id];
        assert!(outcome.failed);
        assert!(outcome.message.contains("timeout"));
    }

    #[test]
    fn panicking_job_records_generic_sentinel() {
        let pool = JobPool::new(1);
        let id = pool.post(|| panic!("kaboom"));
        let all = pool.query_all();
        assert_eq!(all[&id].message, GENERIC_JOB_ERROR_MESSAGE);
    }

    #[test]
    fn query_all_blocks_until_any_completes() {
        let pool = JobPool::new(3);
        let completed = Arc::new(AtomicUsize::new(0));
        let ids: Vec<_> = (0..5)
            .map(|i| {
                let completed = Arc::clone(&completed);
                pool.post(move || {
                    thread::sleep(Duration::from_millis(10 * (i + 1)));
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        let mut seen = HashMap::new();
        while seen.len() < ids.len() {
            seen.extend(pool.query_all());
        }
        assert_eq!(seen.len(), ids.len());
    }
}
