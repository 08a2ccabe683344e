//! Durable task queue for publish tasks
//!
//! Deliveries are at-least-once. Every `reserve` increments the job's
//! attempt counter, so the first delivery of a task reports `attempts == 1`.
//! A delivery that is neither completed nor released becomes visible again
//! once its reservation is older than the visibility timeout.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::time::Duration;

use crate::db::Database;
use crate::error::{DbError, QueueError, Result};
use crate::types::PublishTask;

/// Name of the queue publish tasks travel on
pub const POSTS_QUEUE: &str = "posts";

/// One reserved task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub queue: String,
    pub task: PublishTask,
    pub attempts: u32,
}

/// Point-in-time view of one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Waiting and visible now
    pub ready: i64,
    /// Waiting for a redelivery delay to pass
    pub delayed: i64,
    /// Currently held by a worker
    pub reserved: i64,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task after `delay`.
    ///
    /// Returns false when a job for the same task is already waiting or in
    /// flight on this queue; the existing job is left untouched.
    async fn push(&self, queue: &str, task: &PublishTask, delay: Duration) -> Result<bool>;

    /// Claim the oldest visible job, if any
    async fn reserve(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Hand a delivery back; it becomes visible again after `delay`
    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<()>;

    /// Remove a delivery for good
    async fn complete(&self, delivery: &Delivery) -> Result<()>;

    async fn stats(&self, queue: &str) -> Result<QueueStats>;
}

/// Queue backed by the `jobs` table of the Cadence database
#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    pub fn new(db: &Database, visibility_timeout: Duration) -> Self {
        Self {
            pool: db.pool().clone(),
            visibility_timeout,
        }
    }

    /// `push` with an explicit clock
    pub async fn push_at(&self, queue: &str, task: &PublishTask, delay: Duration, now: i64) -> Result<bool> {
        let payload = serde_json::to_string(task).map_err(QueueError::Payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (queue, unique_key, payload, attempts, available_at, reserved_at, created_at)
            VALUES (?, ?, ?, 0, ?, NULL, ?)
            ON CONFLICT(queue, unique_key) DO NOTHING
            "#,
        )
        .bind(queue)
        .bind(task.unique_key())
        .bind(payload)
        .bind(now + delay.as_secs() as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// `reserve` with an explicit clock
    pub async fn reserve_at(&self, queue: &str, now: i64) -> Result<Option<Delivery>> {
        let expired_before = now - self.visibility_timeout.as_secs() as i64;

        loop {
            // A single UPDATE claims the row, so two workers can never
            // reserve the same job.
            let row = sqlx::query(
                r#"
                UPDATE jobs
                SET reserved_at = ?, attempts = attempts + 1
                WHERE id = (
                    SELECT id FROM jobs
                    WHERE queue = ?
                      AND ((reserved_at IS NULL AND available_at <= ?)
                           OR (reserved_at IS NOT NULL AND reserved_at <= ?))
                    ORDER BY available_at, id
                    LIMIT 1
                )
                RETURNING id, payload, attempts
                "#,
            )
            .bind(now)
            .bind(queue)
            .bind(now)
            .bind(expired_before)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

            let Some(row) = row else {
                return Ok(None);
            };

            let id: i64 = row.try_get("id")?;
            let payload: String = row.try_get("payload")?;
            let attempts: i64 = row.try_get("attempts")?;

            match serde_json::from_str::<PublishTask>(&payload) {
                Ok(task) => {
                    return Ok(Some(Delivery {
                        id,
                        queue: queue.to_string(),
                        task,
                        attempts: attempts as u32,
                    }))
                }
                Err(e) => {
                    // Undecodable jobs can never succeed; drop them and move on
                    tracing::warn!(job_id = id, error = %e, "Dropping job with malformed payload");
                    self.delete(id).await?;
                }
            }
        }
    }

    /// `release` with an explicit clock
    pub async fn release_at(&self, delivery: &Delivery, delay: Duration, now: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET reserved_at = NULL, available_at = ? WHERE id = ?")
            .bind(now + delay.as_secs() as i64)
            .bind(delivery.id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// `stats` with an explicit clock
    pub async fn stats_at(&self, queue: &str, now: i64) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN reserved_at IS NULL AND available_at <= ? THEN 1 ELSE 0 END), 0) AS ready,
                COALESCE(SUM(CASE WHEN reserved_at IS NULL AND available_at > ? THEN 1 ELSE 0 END), 0) AS delayed,
                COALESCE(SUM(CASE WHEN reserved_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS reserved
            FROM jobs
            WHERE queue = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(QueueStats {
            ready: row.try_get("ready")?,
            delayed: row.try_get("delayed")?,
            reserved: row.try_get("reserved")?,
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    async fn push(&self, queue: &str, task: &PublishTask, delay: Duration) -> Result<bool> {
        self.push_at(queue, task, delay, chrono::Utc::now().timestamp())
            .await
    }

    async fn reserve(&self, queue: &str) -> Result<Option<Delivery>> {
        self.reserve_at(queue, chrono::Utc::now().timestamp()).await
    }

    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<()> {
        self.release_at(delivery, delay, chrono::Utc::now().timestamp())
            .await
    }

    async fn complete(&self, delivery: &Delivery) -> Result<()> {
        self.delete(delivery.id).await
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats> {
        self.stats_at(queue, chrono::Utc::now().timestamp()).await
    }
}
