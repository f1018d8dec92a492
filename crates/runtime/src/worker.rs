//! Fixed-size worker pool for CPU-bound computation.
//!
//! Jobs carry a serializable request (operation name + JSON payload)
//! and run on dedicated blocking contexts. Completions are matched back
//! to callers through an explicit task-id to completion-sender table,
//! never by message ordering. Timeouts reject the caller but do not
//! abort the running job; when it eventually finishes, its result is
//! discarded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("task failed: {0}")]
    Task(String),

    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker pool disposed")]
    Disposed,
}

/// A unit of work: a named operation with a JSON payload, the shape a
/// task must have to cross into an isolated execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub op: String,
    pub payload: serde_json::Value,
}

impl TaskRequest {
    pub fn new(op: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            op: op.into(),
            payload,
        }
    }
}

/// Synchronous task body run on a blocking context.
pub type TaskRunner =
    Arc<dyn Fn(TaskRequest) -> Result<serde_json::Value, String> + Send + Sync>;

struct Job {
    id: u64,
    request: TaskRequest,
}

struct Shared {
    runner: TaskRunner,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, WorkerError>>>>,
}

struct PoolInner {
    shared: Arc<Shared>,
    job_tx: Mutex<Option<mpsc::Sender<Job>>>,
    next_id: AtomicU64,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Pool handle. Cloning shares the workers and queue.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl Clone for WorkerPool {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl WorkerPool {
    pub fn new<F>(config: WorkerPoolConfig, runner: F) -> Self
    where
        F: Fn(TaskRequest) -> Result<serde_json::Value, String> + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            runner: Arc::new(runner),
            pending: Mutex::new(HashMap::new()),
        });
        let (job_tx, job_rx) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for slot in 0..config.workers.max(1) {
            let shared = shared.clone();
            let job_rx = job_rx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = { job_rx.lock().await.recv().await };
                    let Some(job) = job else {
                        log::debug!("worker slot {slot} shutting down");
                        break;
                    };
                    run_job(&shared, slot, job).await;
                }
            }));
        }

        Self {
            inner: Arc::new(PoolInner {
                shared,
                job_tx: Mutex::new(Some(job_tx)),
                next_id: AtomicU64::new(1),
                workers: Mutex::new(workers),
            }),
        }
    }

    /// Dispatch a task and wait for its result.
    pub async fn execute(&self, request: TaskRequest) -> Result<serde_json::Value, WorkerError> {
        let job_tx = {
            let guard = self.inner.job_tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let Some(job_tx) = job_tx else {
            return Err(WorkerError::Disposed);
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner
            .shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        if job_tx.send(Job { id, request }).await.is_err() {
            self.inner
                .shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Err(WorkerError::Disposed);
        }

        rx.await.unwrap_or(Err(WorkerError::Disposed))
    }

    /// Like `execute`, but reject the caller after `timeout`. The
    /// underlying job is NOT aborted; it keeps its worker slot until it
    /// finishes and its result is then discarded.
    pub async fn execute_with_timeout(
        &self,
        request: TaskRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, WorkerError> {
        match tokio::time::timeout(timeout, self.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(timeout)),
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner
            .shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Tear down: close the queue, let workers drain what was already
    /// submitted, and join them.
    pub async fn dispose(&self) {
        {
            let mut guard = self.inner.job_tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.take();
        }
        let workers = {
            let mut guard = self.inner.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn run_job(shared: &Arc<Shared>, slot: usize, job: Job) {
    let runner = shared.runner.clone();
    let op = job.request.op.clone();
    let outcome = match tokio::task::spawn_blocking(move || runner(job.request)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(WorkerError::Task(message)),
        Err(join_error) => Err(WorkerError::Task(format!("worker panicked: {join_error}"))),
    };
    if let Err(e) = &outcome {
        log::warn!("task {} ({op}) on slot {slot} failed: {e}", job.id);
    }

    // Route by task id; the sender may be gone when the caller timed
    // out, in which case the result is dropped.
    let sender = shared
        .pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&job.id);
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => log::debug!("discarding result of task {} (caller gone)", job.id),
    }
}
