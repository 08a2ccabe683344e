//! Due-post scanner
//!
//! One cycle selects every Scheduled post whose time has come, in chunks,
//! and enqueues one publish task per post. It never changes a post's status:
//! a post whose enqueue fails stays Scheduled and is picked up again by the
//! next cycle.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::{Database, DueCursor};
use crate::error::Result;
use crate::queue::{TaskQueue, POSTS_QUEUE};
use crate::types::PublishTask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    pub chunk_size: usize,
    pub queue: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            queue: POSTS_QUEUE.to_string(),
        }
    }
}

/// Summary of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Due posts seen
    pub selected: usize,
    /// Tasks added to the queue
    pub enqueued: usize,
    /// Posts whose task was still waiting or running
    pub already_queued: usize,
    /// Posts whose enqueue failed
    pub failed: usize,
    /// Non-empty chunks read
    pub chunks: usize,
}

pub struct DuePostScanner {
    db: Database,
    queue: Arc<dyn TaskQueue>,
    config: ScannerConfig,
}

impl DuePostScanner {
    pub fn new(db: Database, queue: Arc<dyn TaskQueue>, config: ScannerConfig) -> Self {
        Self { db, queue, config }
    }

    /// Run one scan at unix time `now`.
    ///
    /// Only a failure to read the store aborts the cycle.
    pub async fn run_cycle(&self, now: i64) -> Result<ScanReport> {
        let chunk_size = self.config.chunk_size.max(1);
        let mut report = ScanReport::default();
        let mut cursor: Option<DueCursor> = None;

        loop {
            let chunk = self
                .db
                .due_posts_chunk(now, cursor.as_ref(), chunk_size)
                .await?;
            if chunk.is_empty() {
                break;
            }
            report.chunks += 1;
            debug!(chunk = report.chunks, posts = chunk.len(), "Processing due posts chunk");

            for due in &chunk {
                report.selected += 1;
                let task = PublishTask::new(due.post.id.as_str());

                match self.queue.push(&self.config.queue, &task, Duration::ZERO).await {
                    Ok(true) => {
                        report.enqueued += 1;
                        debug!(post_id = %due.post.id, links = due.links.len(), "Enqueued post");
                    }
                    Ok(false) => {
                        report.already_queued += 1;
                        debug!(post_id = %due.post.id, "Post already queued");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(post_id = %due.post.id, error = %e, "Failed to enqueue post");
                    }
                }
            }

            let last_chunk = chunk.len() < chunk_size;
            cursor = chunk.last().map(|due| DueCursor::after(&due.post));
            if last_chunk {
                break;
            }
        }

        info!(
            selected = report.selected,
            enqueued = report.enqueued,
            already_queued = report.already_queued,
            failed = report.failed,
            chunks = report.chunks,
            "Scan cycle complete"
        );

        Ok(report)
    }
}
