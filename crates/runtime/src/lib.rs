//! Concurrency-control utilities for the AI-driven map pipeline:
//! TTL+LRU query caching, rate/concurrency throttling, operation
//! batching, and a worker pool for CPU-bound spatial computation.
//!
//! These are the cross-cutting guards that make repeated, bursty
//! AI-issued map updates safe: each is an independent service object
//! with explicit construction and a teardown method, and multiple
//! instances may coexist (e.g. one throttle manager per command
//! pipeline).

pub mod batch;
pub mod cache;
pub mod throttle;
pub mod worker;

pub use batch::{BatchConfig, BatchError, BatchProcessor};
pub use cache::{generate_key, CacheConfig, CacheStats, QueryCache};
pub use throttle::{ThrottleConfig, ThrottleManager, ThrottleSnapshot};
pub use worker::{TaskRequest, WorkerError, WorkerPool, WorkerPoolConfig};
