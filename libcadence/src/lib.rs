//! Cadence - scheduled publication of posts to social platforms
//!
//! The library holds the publication pipeline shared by the Cadence tools:
//! the scanner that finds due posts, the queue that carries one task per
//! post, the worker that drives each platform link to a terminal state, and
//! the rate limiter and retry policy it consults.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pool;
pub mod publisher;
pub mod queue;
pub mod rate_limiter;
pub mod retry;
pub mod scanner;
pub mod scheduling;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, DueCursor, PostUpdate};
pub use error::{CadenceError, PublishError, Result};
pub use pool::{PoolConfig, PoolReport, WorkerPool};
pub use publisher::{Publication, PublishPayload, Publisher};
pub use queue::{Delivery, SqliteQueue, TaskQueue, POSTS_QUEUE};
pub use rate_limiter::{RateLimit, RateLimiter};
pub use retry::{Decision, OutcomeClass, RetryPolicy};
pub use scanner::{DuePostScanner, ScanReport, ScannerConfig};
pub use types::{
    LinkStatus, Platform, PlatformLink, PlatformType, Post, PostStatus, PostWithLinks, PublishTask,
};
pub use worker::{PostPublishWorker, TaskOutcome};
