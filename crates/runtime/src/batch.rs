//! Coalescing batch processor with bounded retry.
//!
//! Items accumulate in a buffer; the buffer flushes when it reaches
//! `max_size` or when `max_delay` elapses since the first pending item.
//! The whole batch goes through a user-supplied async batch function;
//! failures retry with a linearly increasing delay and, when every
//! attempt fails, all pending callers of that batch are rejected with
//! the final error. The processor re-arms immediately after a flush, so
//! items arriving mid-flight are never lost.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_size: usize,
    pub max_delay: Duration,
    pub retry_attempts: usize,
    pub retry_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            max_delay: Duration::from_millis(100),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch failed after {attempts} attempts: {message}")]
    Failed { attempts: usize, message: String },

    #[error("batch function returned {got} results for {expected} items")]
    ResultCountMismatch { expected: usize, got: usize },

    #[error("batch processor disposed")]
    Disposed,
}

type BatchFuture<R> = Pin<Box<dyn Future<Output = Result<Vec<R>, String>> + Send>>;
type BatchFn<T, R> = Arc<dyn Fn(Vec<T>) -> BatchFuture<R> + Send + Sync>;
type Pending<T, R> = (T, oneshot::Sender<Result<R, BatchError>>);

struct BatchState<T, R> {
    buffer: Vec<Pending<T, R>>,
    timer: Option<tokio::task::JoinHandle<()>>,
    disposed: bool,
}

struct BatchInner<T, R> {
    config: BatchConfig,
    batch_fn: BatchFn<T, R>,
    state: Mutex<BatchState<T, R>>,
}

/// Groups many small operations into batched calls. Cloning shares the
/// buffer.
pub struct BatchProcessor<T, R> {
    inner: Arc<BatchInner<T, R>>,
}

impl<T, R> Clone for BatchProcessor<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, R> BatchProcessor<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    pub fn new<F, Fut>(config: BatchConfig, batch_fn: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<R>, String>> + Send + 'static,
    {
        Self {
            inner: Arc::new(BatchInner {
                config,
                batch_fn: Arc::new(move |items| Box::pin(batch_fn(items)) as BatchFuture<R>),
                state: Mutex::new(BatchState {
                    buffer: Vec::new(),
                    timer: None,
                    disposed: false,
                }),
            }),
        }
    }

    /// Queue one item and wait for its result. Resolution order within
    /// a batch matches submission order.
    pub async fn add(&self, item: T) -> Result<R, BatchError> {
        let rx = {
            let mut state = lock(&self.inner.state);
            if state.disposed {
                return Err(BatchError::Disposed);
            }
            let (tx, rx) = oneshot::channel();
            state.buffer.push((item, tx));

            if state.buffer.len() >= self.inner.config.max_size {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                let batch = std::mem::take(&mut state.buffer);
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    process(inner, batch).await;
                });
            } else if state.timer.is_none() {
                let inner = self.inner.clone();
                state.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(inner.config.max_delay).await;
                    let batch = {
                        let mut state = lock(&inner.state);
                        state.timer = None;
                        std::mem::take(&mut state.buffer)
                    };
                    process(inner, batch).await;
                }));
            }
            rx
        };
        rx.await.unwrap_or(Err(BatchError::Disposed))
    }

    /// Flush the pending buffer now, without waiting for size or delay.
    pub async fn flush(&self) {
        let batch = {
            let mut state = lock(&self.inner.state);
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.buffer)
        };
        process(self.inner.clone(), batch).await;
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner.state).buffer.len()
    }

    /// Tear down: flush what is buffered, then reject future `add`s.
    pub async fn dispose(&self) {
        {
            let mut state = lock(&self.inner.state);
            state.disposed = true;
        }
        self.flush().await;
    }
}

fn lock<T, R>(state: &Mutex<BatchState<T, R>>) -> MutexGuard<'_, BatchState<T, R>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

async fn process<T, R>(inner: Arc<BatchInner<T, R>>, batch: Vec<Pending<T, R>>)
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    if batch.is_empty() {
        return;
    }
    let items: Vec<T> = batch.iter().map(|(item, _)| item.clone()).collect();
    let attempts = inner.config.retry_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match (inner.batch_fn)(items.clone()).await {
            Ok(results) => {
                if results.len() != batch.len() {
                    let error = BatchError::ResultCountMismatch {
                        expected: batch.len(),
                        got: results.len(),
                    };
                    log::error!("{error}");
                    for (_, tx) in batch {
                        let _ = tx.send(Err(error.clone()));
                    }
                    return;
                }
                for ((_, tx), result) in batch.into_iter().zip(results) {
                    let _ = tx.send(Ok(result));
                }
                return;
            }
            Err(message) => {
                log::warn!(
                    "batch of {} failed on attempt {attempt}/{attempts}: {message}",
                    items.len()
                );
                last_error = message;
                if attempt < attempts {
                    tokio::time::sleep(inner.config.retry_delay * attempt as u32).await;
                }
            }
        }
    }

    let error = BatchError::Failed {
        attempts,
        message: last_error,
    };
    for (_, tx) in batch {
        let _ = tx.send(Err(error.clone()));
    }
}
