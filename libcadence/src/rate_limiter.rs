//! Per-platform rate limiting for publish attempts
//!
//! Sliding-window admission control keyed by platform. Hits are recorded
//! only after a successful publish; a key is over its limit once the window
//! already holds `max_hits` hits.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::db::Database;
use crate::error::{DbError, Result};

/// Limiter key for a platform account
pub fn platform_key(platform_id: i64) -> String {
    format!("platform:{}", platform_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_hits: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_hits: u32, window: Duration) -> Self {
        Self { max_hits, window }
    }

    /// Oldest timestamp still inside the window ending at `now`
    fn window_start(&self, now: i64) -> i64 {
        now - self.window.as_secs() as i64
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }
}

/// Admission control shared by every worker.
///
/// All methods take the current unix time so callers control the clock.
///
/// Admission is best-effort under concurrency: the check and the hit are
/// separate steps and a hit is only recorded after a successful publish, so
/// N workers passing the check together can push a window up to
/// `max_hits + N - 1` hits.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// True when `key` must not be attempted right now
    async fn too_many_attempts(&self, key: &str, now: i64) -> Result<bool>;

    /// Record one successful attempt
    async fn hit(&self, key: &str, now: i64) -> Result<()>;

    /// Attempts still allowed in the current window
    async fn remaining(&self, key: &str, now: i64) -> Result<u32>;

    /// Forget hits that fell out of every window
    async fn clear_expired(&self, now: i64) -> Result<()>;
}

/// In-process limiter for pools living in one `cadence-worker`
pub struct SlidingWindowLimiter {
    limit: RateLimit,
    hits: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn count(&self, key: &str, now: i64) -> u32 {
        let window_start = self.limit.window_start(now);
        let mut hits = self.hits.lock();
        match hits.get_mut(key) {
            Some(times) => {
                while times.front().is_some_and(|&t| t <= window_start) {
                    times.pop_front();
                }
                times.len() as u32
            }
            None => 0,
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn too_many_attempts(&self, key: &str, now: i64) -> Result<bool> {
        Ok(self.count(key, now) >= self.limit.max_hits)
    }

    async fn hit(&self, key: &str, now: i64) -> Result<()> {
        self.hits
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(now);
        Ok(())
    }

    async fn remaining(&self, key: &str, now: i64) -> Result<u32> {
        Ok(self.limit.max_hits.saturating_sub(self.count(key, now)))
    }

    async fn clear_expired(&self, now: i64) -> Result<()> {
        let window_start = self.limit.window_start(now);
        let mut hits = self.hits.lock();
        hits.retain(|_, times| {
            times.retain(|&t| t > window_start);
            !times.is_empty()
        });
        Ok(())
    }
}

/// Limiter whose hits live in the database, shared by every worker
/// process pointed at the same file
#[derive(Clone)]
pub struct SqliteRateLimiter {
    pool: SqlitePool,
    limit: RateLimit,
}

impl SqliteRateLimiter {
    pub fn new(db: &Database, limit: RateLimit) -> Self {
        Self {
            pool: db.pool().clone(),
            limit,
        }
    }

    async fn count(&self, key: &str, now: i64) -> Result<u32> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT COUNT(*) FROM rate_limit_hits
            WHERE key = ? AND hit_at > ?
            "#,
        )
        .bind(key)
        .bind(self.limit.window_start(now))
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.0 as u32)
    }
}

#[async_trait]
impl RateLimiter for SqliteRateLimiter {
    async fn too_many_attempts(&self, key: &str, now: i64) -> Result<bool> {
        Ok(self.count(key, now).await? >= self.limit.max_hits)
    }

    async fn hit(&self, key: &str, now: i64) -> Result<()> {
        sqlx::query("INSERT INTO rate_limit_hits (key, hit_at) VALUES (?, ?)")
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn remaining(&self, key: &str, now: i64) -> Result<u32> {
        Ok(self
            .limit
            .max_hits
            .saturating_sub(self.count(key, now).await?))
    }

    async fn clear_expired(&self, now: i64) -> Result<()> {
        sqlx::query("DELETE FROM rate_limit_hits WHERE hit_at <= ?")
            .bind(self.limit.window_start(now))
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        (temp_dir, db)
    }

    async fn assert_eleventh_attempt_rejected(limiter: &dyn RateLimiter) {
        let key = platform_key(1);
        for i in 0..10 {
            assert!(
                !limiter.too_many_attempts(&key, 1000).await.unwrap(),
                "attempt {} should be allowed",
                i + 1
            );
            limiter.hit(&key, 1000).await.unwrap();
        }
        assert!(limiter.too_many_attempts(&key, 1000).await.unwrap());
        assert_eq!(limiter.remaining(&key, 1000).await.unwrap(), 0);
    }

    async fn assert_window_slides(limiter: &dyn RateLimiter) {
        let key = platform_key(7);
        for t in 0..10 {
            limiter.hit(&key, 100 + t).await.unwrap();
        }
        assert!(limiter.too_many_attempts(&key, 150).await.unwrap());

        // The hit at t=100 leaves the 60s window at t=160
        assert!(!limiter.too_many_attempts(&key, 160).await.unwrap());
        assert_eq!(limiter.remaining(&key, 160).await.unwrap(), 1);
        assert_eq!(limiter.remaining(&key, 500).await.unwrap(), 10);
    }

    async fn assert_keys_are_independent(limiter: &dyn RateLimiter) {
        for _ in 0..10 {
            limiter.hit(&platform_key(1), 0).await.unwrap();
        }
        assert!(limiter.too_many_attempts(&platform_key(1), 0).await.unwrap());
        assert!(!limiter.too_many_attempts(&platform_key(2), 0).await.unwrap());
    }

    #[test]
    fn test_platform_key_format() {
        assert_eq!(platform_key(42), "platform:42");
    }

    #[tokio::test]
    async fn test_memory_eleventh_attempt_rejected() {
        let limiter = SlidingWindowLimiter::new(RateLimit::default());
        assert_eleventh_attempt_rejected(&limiter).await;
    }

    #[tokio::test]
    async fn test_check_does_not_reserve_capacity() {
        let limiter = SlidingWindowLimiter::new(RateLimit::default());
        for _ in 0..9 {
            limiter.hit("platform:1", 100).await.unwrap();
        }

        // Two workers checking before either records its hit both pass
        assert!(!limiter.too_many_attempts("platform:1", 100).await.unwrap());
        assert!(!limiter.too_many_attempts("platform:1", 100).await.unwrap());
        limiter.hit("platform:1", 100).await.unwrap();
        limiter.hit("platform:1", 100).await.unwrap();

        assert_eq!(limiter.remaining("platform:1", 100).await.unwrap(), 0);
        assert!(limiter.too_many_attempts("platform:1", 100).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_window_slides() {
        let limiter = SlidingWindowLimiter::new(RateLimit::default());
        assert_window_slides(&limiter).await;
    }

    #[tokio::test]
    async fn test_memory_keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(RateLimit::default());
        assert_keys_are_independent(&limiter).await;
    }

    #[tokio::test]
    async fn test_memory_clear_expired_drops_empty_keys() {
        let limiter = SlidingWindowLimiter::new(RateLimit::default());
        limiter.hit("a", 0).await.unwrap();
        limiter.hit("b", 100).await.unwrap();

        limiter.clear_expired(120).await.unwrap();

        let hits = limiter.hits.lock();
        assert!(!hits.contains_key("a"));
        assert_eq!(hits.get("b").map(|t| t.len()), Some(1));
    }

    #[tokio::test]
    async fn test_memory_concurrent_hits_are_all_counted() {
        let limiter = Arc::new(SlidingWindowLimiter::new(RateLimit::new(
            1000,
            Duration::from_secs(60),
        )));

        let mut handles = vec![];
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    limiter.hit("platform:1", 10).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(limiter.remaining("platform:1", 10).await.unwrap(), 600);
    }

    #[tokio::test]
    async fn test_sqlite_eleventh_attempt_rejected() {
        let (_temp, db) = setup_test_db().await;
        let limiter = SqliteRateLimiter::new(&db, RateLimit::default());
        assert_eleventh_attempt_rejected(&limiter).await;
    }

    #[tokio::test]
    async fn test_sqlite_window_slides() {
        let (_temp, db) = setup_test_db().await;
        let limiter = SqliteRateLimiter::new(&db, RateLimit::default());
        assert_window_slides(&limiter).await;
    }

    #[tokio::test]
    async fn test_sqlite_keys_are_independent() {
        let (_temp, db) = setup_test_db().await;
        let limiter = SqliteRateLimiter::new(&db, RateLimit::default());
        assert_keys_are_independent(&limiter).await;
    }

    #[tokio::test]
    async fn test_sqlite_limiters_share_one_window() {
        let (_temp, db) = setup_test_db().await;
        let a = SqliteRateLimiter::new(&db, RateLimit::new(2, Duration::from_secs(60)));
        let b = SqliteRateLimiter::new(&db, RateLimit::new(2, Duration::from_secs(60)));

        a.hit("platform:1", 0).await.unwrap();
        b.hit("platform:1", 0).await.unwrap();

        assert!(a.too_many_attempts("platform:1", 1).await.unwrap());
        assert!(b.too_many_attempts("platform:1", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_clear_expired() {
        let (_temp, db) = setup_test_db().await;
        let limiter = SqliteRateLimiter::new(&db, RateLimit::default());
        limiter.hit("platform:1", 0).await.unwrap();
        limiter.hit("platform:1", 100).await.unwrap();

        limiter.clear_expired(120).await.unwrap();

        let (remaining_rows,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM rate_limit_hits")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining_rows, 1);
    }
}
