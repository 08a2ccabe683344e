//! Database operations for Cadence

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CadenceError, DbError, Result};
use crate::types::{
    LinkStatus, Platform, PlatformLink, PlatformType, Post, PostStatus, PostWithLinks,
};

/// Keyset position inside the due-post scan: the last `(scheduled_at, id)` seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueCursor {
    pub scheduled_at: i64,
    pub id: String,
}

impl DueCursor {
    pub fn after(post: &Post) -> Self {
        Self {
            scheduled_at: post.scheduled_at,
            id: post.id.clone(),
        }
    }
}

/// Editable fields of a post; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<Option<String>>,
    pub scheduled_at: Option<i64>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

const POST_COLUMNS: &str =
    "id, title, content, image_url, scheduled_at, status, created_at, updated_at";

const LINK_SELECT: &str = r#"
    SELECT pp.id, pp.post_id, pp.platform_id, p.platform_type, pp.status,
           pp.platform_post_id, pp.published_at, pp.error
    FROM post_platforms pp
    JOIN platforms p ON p.id = pp.platform_id
"#;

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Several workers share one file: WAL plus a busy timeout keeps
        // concurrent writers from failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Platforms
    // ------------------------------------------------------------------

    /// Register a platform account
    pub async fn create_platform(&self, name: &str, platform_type: PlatformType) -> Result<Platform> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO platforms (name, platform_type, is_active, created_at)
            VALUES (?, ?, 1, ?)
            "#,
        )
        .bind(name)
        .bind(platform_type.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(Platform {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            platform_type,
            is_active: true,
            created_at: now,
        })
    }

    pub async fn get_platform(&self, platform_id: i64) -> Result<Option<Platform>> {
        let row = sqlx::query(
            "SELECT id, name, platform_type, is_active, created_at FROM platforms WHERE id = ?",
        )
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| platform_from_row(&r)).transpose()
    }

    pub async fn list_platforms(&self) -> Result<Vec<Platform>> {
        let rows = sqlx::query(
            "SELECT id, name, platform_type, is_active, created_at FROM platforms ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(platform_from_row).collect()
    }

    /// Flip the active flag and return the new value
    pub async fn toggle_platform_active(&self, platform_id: i64) -> Result<bool> {
        let row = sqlx::query(
            "UPDATE platforms SET is_active = 1 - is_active WHERE id = ? RETURNING is_active",
        )
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        match row {
            Some(r) => Ok(r.try_get::<i64, _>("is_active")? != 0),
            None => Err(CadenceError::NotFound(format!("platform {}", platform_id))),
        }
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    /// Create a post and its platform links in one transaction.
    ///
    /// Links start Pending and are attached in the order given; duplicate
    /// platform ids are attached once.
    pub async fn create_post_with_links(&self, post: &Post, platform_ids: &[i64]) -> Result<PostWithLinks> {
        if !post.status.is_editable() {
            return Err(CadenceError::InvalidInput(format!(
                "New posts must be draft or scheduled, got {}",
                post.status
            )));
        }
        if platform_ids.is_empty() {
            return Err(CadenceError::InvalidInput(
                "At least one platform is required".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT INTO posts (id, title, content, image_url, scheduled_at, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.image_url)
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let mut attached: Vec<i64> = Vec::with_capacity(platform_ids.len());
        for &platform_id in platform_ids {
            if attached.contains(&platform_id) {
                continue;
            }

            let exists = sqlx::query("SELECT 1 FROM platforms WHERE id = ?")
                .bind(platform_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
            if exists.is_none() {
                return Err(CadenceError::NotFound(format!("platform {}", platform_id)));
            }

            sqlx::query(
                r#"
                INSERT INTO post_platforms (post_id, platform_id, status, updated_at)
                VALUES (?, ?, 'pending', ?)
                "#,
            )
            .bind(&post.id)
            .bind(platform_id)
            .bind(post.created_at)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

            attached.push(platform_id);
        }

        tx.commit().await.map_err(DbError::SqlxError)?;

        self.get_post_with_links(&post.id)
            .await?
            .ok_or_else(|| CadenceError::NotFound(format!("post {}", post.id)))
    }

    /// Get a post by ID
    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let query = format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS);
        let row = sqlx::query(&query)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| post_from_row(&r)).transpose()
    }

    /// Get a post together with its links in attachment order
    pub async fn get_post_with_links(&self, post_id: &str) -> Result<Option<PostWithLinks>> {
        let Some(post) = self.get_post(post_id).await? else {
            return Ok(None);
        };
        let links = self.get_links(post_id).await?;
        Ok(Some(PostWithLinks { post, links }))
    }

    /// All links for a post, oldest attachment first
    pub async fn get_links(&self, post_id: &str) -> Result<Vec<PlatformLink>> {
        let query = format!("{} WHERE pp.post_id = ? ORDER BY pp.id", LINK_SELECT);
        let rows = sqlx::query(&query)
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(link_from_row).collect()
    }

    pub async fn get_link(&self, post_id: &str, platform_id: i64) -> Result<Option<PlatformLink>> {
        let query = format!("{} WHERE pp.post_id = ? AND pp.platform_id = ?", LINK_SELECT);
        let row = sqlx::query(&query)
            .bind(post_id)
            .bind(platform_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| link_from_row(&r)).transpose()
    }

    /// List posts, optionally filtered by status, soonest first
    pub async fn list_posts(&self, status: Option<PostStatus>, limit: usize) -> Result<Vec<Post>> {
        let mut query_str = format!("SELECT {} FROM posts", POST_COLUMNS);
        if status.is_some() {
            query_str.push_str(" WHERE status = ?");
        }
        query_str.push_str(" ORDER BY scheduled_at, id LIMIT ?");

        let mut query = sqlx::query(&query_str);
        if let Some(s) = status {
            query = query.bind(s.as_str());
        }
        query = query.bind(limit as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// One chunk of due posts (Scheduled, `scheduled_at <= now`) with their links.
    ///
    /// Ordered by `(scheduled_at, id)`; pass the cursor of the last post of the
    /// previous chunk to continue.
    pub async fn due_posts_chunk(
        &self,
        now: i64,
        after: Option<&DueCursor>,
        limit: usize,
    ) -> Result<Vec<PostWithLinks>> {
        let mut query_str = format!(
            "SELECT {} FROM posts WHERE status = 'scheduled' AND scheduled_at <= ?",
            POST_COLUMNS
        );
        if after.is_some() {
            query_str.push_str(" AND (scheduled_at > ? OR (scheduled_at = ? AND id > ?))");
        }
        query_str.push_str(" ORDER BY scheduled_at, id LIMIT ?");

        let mut query = sqlx::query(&query_str).bind(now);
        if let Some(cursor) = after {
            query = query
                .bind(cursor.scheduled_at)
                .bind(cursor.scheduled_at)
                .bind(&cursor.id);
        }
        query = query.bind(limit as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let posts: Vec<Post> = rows.iter().map(post_from_row).collect::<Result<_>>()?;
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        // Load every link of the chunk in one round trip
        let placeholders = vec!["?"; posts.len()].join(", ");
        let links_query = format!(
            "{} WHERE pp.post_id IN ({}) ORDER BY pp.post_id, pp.id",
            LINK_SELECT, placeholders
        );
        let mut query = sqlx::query(&links_query);
        for post in &posts {
            query = query.bind(&post.id);
        }
        let link_rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        let mut links: Vec<PlatformLink> = link_rows.iter().map(link_from_row).collect::<Result<_>>()?;

        Ok(posts
            .into_iter()
            .map(|post| {
                let (mine, rest): (Vec<_>, Vec<_>) =
                    links.drain(..).partition(|l| l.post_id == post.id);
                links = rest;
                PostWithLinks { post, links: mine }
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Worker mutations (guarded so terminal rows never change)
    // ------------------------------------------------------------------

    /// Pending -> Published. Returns false when the link was already terminal.
    pub async fn mark_link_published(
        &self,
        post_id: &str,
        platform_id: i64,
        platform_post_id: &str,
        published_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE post_platforms
            SET status = 'published', platform_post_id = ?, published_at = ?, error = NULL, updated_at = ?
            WHERE post_id = ? AND platform_id = ? AND status = 'pending'
            "#,
        )
        .bind(platform_post_id)
        .bind(published_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .bind(platform_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Pending -> Failed. Returns false when the link was already terminal.
    pub async fn mark_link_failed(&self, post_id: &str, platform_id: i64, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE post_platforms
            SET status = 'failed', error = ?, updated_at = ?
            WHERE post_id = ? AND platform_id = ? AND status = 'pending'
            "#,
        )
        .bind(error)
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .bind(platform_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Scheduled -> Published
    pub async fn mark_post_published(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE posts SET status = 'published', updated_at = ? WHERE id = ? AND status = 'scheduled'",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // Editing flows (only Draft/Scheduled posts may change)
    // ------------------------------------------------------------------

    async fn editable_post(&self, post_id: &str) -> Result<Post> {
        let post = self
            .get_post(post_id)
            .await?
            .ok_or_else(|| CadenceError::NotFound(format!("post {}", post_id)))?;

        if !post.status.is_editable() {
            return Err(CadenceError::InvalidInput(format!(
                "Post {} is {} and can no longer be edited",
                post_id, post.status
            )));
        }
        Ok(post)
    }

    /// Apply an edit to a draft or scheduled post
    pub async fn update_post(&self, post_id: &str, update: PostUpdate) -> Result<Post> {
        let current = self.editable_post(post_id).await?;

        let title = update.title.unwrap_or(current.title);
        let content = update.content.unwrap_or(current.content);
        let image_url = update.image_url.unwrap_or(current.image_url);
        let scheduled_at = update.scheduled_at.unwrap_or(current.scheduled_at);

        let result = sqlx::query(
            r#"
            UPDATE posts SET title = ?, content = ?, image_url = ?, scheduled_at = ?, updated_at = ?
            WHERE id = ? AND status IN ('draft', 'scheduled')
            "#,
        )
        .bind(&title)
        .bind(&content)
        .bind(&image_url)
        .bind(scheduled_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(CadenceError::InvalidInput(format!(
                "Post {} changed state while being edited",
                post_id
            )));
        }

        self.get_post(post_id)
            .await?
            .ok_or_else(|| CadenceError::NotFound(format!("post {}", post_id)))
    }

    /// Move a draft or scheduled post to a new time and (re)enter the queue
    pub async fn reschedule_post(&self, post_id: &str, scheduled_at: i64) -> Result<Post> {
        self.editable_post(post_id).await?;
        self.set_editable_status(post_id, PostStatus::Scheduled, Some(scheduled_at))
            .await
    }

    /// Take a scheduled post out of the queue by turning it back into a draft
    pub async fn cancel_post(&self, post_id: &str) -> Result<Post> {
        self.editable_post(post_id).await?;
        self.set_editable_status(post_id, PostStatus::Draft, None).await
    }

    /// Delete a draft post and its links. Scheduled posts must be cancelled
    /// first so a queued task never races the delete.
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        let post = self
            .get_post(post_id)
            .await?
            .ok_or_else(|| CadenceError::NotFound(format!("post {}", post_id)))?;

        if post.status != PostStatus::Draft {
            return Err(CadenceError::InvalidInput(format!(
                "Post {} is {}; only drafts can be deleted",
                post_id, post.status
            )));
        }

        let result = sqlx::query("DELETE FROM posts WHERE id = ? AND status = 'draft'")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(CadenceError::InvalidInput(format!(
                "Post {} changed state while being deleted",
                post_id
            )));
        }
        Ok(())
    }

    async fn set_editable_status(
        &self,
        post_id: &str,
        status: PostStatus,
        scheduled_at: Option<i64>,
    ) -> Result<Post> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = ?, scheduled_at = COALESCE(?, scheduled_at), updated_at = ?
            WHERE id = ? AND status IN ('draft', 'scheduled')
            "#,
        )
        .bind(status.as_str())
        .bind(scheduled_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(CadenceError::InvalidInput(format!(
                "Post {} changed state while being edited",
                post_id
            )));
        }

        self.get_post(post_id)
            .await?
            .ok_or_else(|| CadenceError::NotFound(format!("post {}", post_id)))
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Number of posts per status
    pub async fn post_counts(&self) -> Result<Vec<(PostStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM posts GROUP BY status ORDER BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| -> Result<(PostStatus, i64)> {
                let status = PostStatus::from_str(&r.try_get::<String, _>("status")?)?;
                Ok((status, r.try_get::<i64, _>("n")?))
            })
            .collect()
    }

    /// Number of links per status
    pub async fn link_counts(&self) -> Result<Vec<(LinkStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM post_platforms GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| -> Result<(LinkStatus, i64)> {
                let status = LinkStatus::from_str(&r.try_get::<String, _>("status")?)?;
                Ok((status, r.try_get::<i64, _>("n")?))
            })
            .collect()
    }
}

fn post_from_row(r: &SqliteRow) -> Result<Post> {
    Ok(Post {
        id: r.try_get("id")?,
        title: r.try_get("title")?,
        content: r.try_get("content")?,
        image_url: r.try_get("image_url")?,
        scheduled_at: r.try_get("scheduled_at")?,
        status: PostStatus::from_str(&r.try_get::<String, _>("status")?)?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn platform_from_row(r: &SqliteRow) -> Result<Platform> {
    Ok(Platform {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        platform_type: PlatformType::from_str(&r.try_get::<String, _>("platform_type")?)?,
        is_active: r.try_get::<i64, _>("is_active")? != 0,
        created_at: r.try_get("created_at")?,
    })
}

fn link_from_row(r: &SqliteRow) -> Result<PlatformLink> {
    Ok(PlatformLink {
        id: r.try_get("id")?,
        post_id: r.try_get("post_id")?,
        platform_id: r.try_get("platform_id")?,
        platform_type: PlatformType::from_str(&r.try_get::<String, _>("platform_type")?)?,
        status: LinkStatus::from_str(&r.try_get::<String, _>("status")?)?,
        platform_post_id: r.try_get("platform_post_id")?,
        published_at: r.try_get("published_at")?,
        error: r.try_get("error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        (temp_dir, db)
    }

    fn scheduled_post(scheduled_at: i64) -> Post {
        Post::new("Title".to_string(), "Test post content".to_string(), scheduled_at)
    }

    #[tokio::test]
    async fn test_database_initialization_with_invalid_path() {
        #[cfg(unix)]
        let invalid_path = "/tmp/test\0invalid.db";

        #[cfg(windows)]
        let invalid_path = "C:\\invalid<>path\\test.db";

        let result = Database::new(invalid_path).await;
        match result {
            Err(CadenceError::Database(_)) => {}
            other => panic!("Expected DbError for invalid path, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_create_post_with_links_in_attachment_order() {
        let (_temp, db) = setup_test_db().await;
        let twitter = db.create_platform("Main", PlatformType::Twitter).await.unwrap();
        let linkedin = db.create_platform("Work", PlatformType::LinkedIn).await.unwrap();

        let post = scheduled_post(100);
        let created = db
            .create_post_with_links(&post, &[linkedin.id, twitter.id, linkedin.id])
            .await
            .unwrap();

        assert_eq!(created.post.id, post.id);
        assert_eq!(created.links.len(), 2, "duplicate platform ids attach once");
        assert_eq!(created.links[0].platform_id, linkedin.id);
        assert_eq!(created.links[0].platform_type, PlatformType::LinkedIn);
        assert_eq!(created.links[1].platform_id, twitter.id);
        assert!(created.links.iter().all(|l| l.status == LinkStatus::Pending));
    }

    #[tokio::test]
    async fn test_create_post_requires_platforms() {
        let (_temp, db) = setup_test_db().await;
        let result = db.create_post_with_links(&scheduled_post(0), &[]).await;
        assert!(matches!(result, Err(CadenceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_create_post_with_unknown_platform_rolls_back() {
        let (_temp, db) = setup_test_db().await;
        let twitter = db.create_platform("Main", PlatformType::Twitter).await.unwrap();
        let post = scheduled_post(0);

        let result = db.create_post_with_links(&post, &[twitter.id, 999]).await;
        assert!(matches!(result, Err(CadenceError::NotFound(_))));

        // Nothing from the failed transaction is visible
        assert!(db.get_post(&post.id).await.unwrap().is_none());
        assert!(db.get_links(&post.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_constraint_violation_on_invalid_status() {
        let (_temp, db) = setup_test_db().await;

        let result = sqlx::query(
            r#"
            INSERT INTO posts (id, content, scheduled_at, status, created_at, updated_at)
            VALUES (?, ?, 0, 'archived', 0, 0)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind("content")
        .execute(db.pool())
        .await;

        assert!(result.is_err(), "CHECK constraint should reject unknown status");
    }

    #[tokio::test]
    async fn test_foreign_key_constraint_enforcement() {
        let (_temp, db) = setup_test_db().await;

        let result = sqlx::query(
            "INSERT INTO post_platforms (post_id, platform_id, updated_at) VALUES ('nope', 1, 0)",
        )
        .execute(db.pool())
        .await;

        match result {
            Err(sqlx::Error::Database(db_err)) => {
                let message = db_err.message();
                assert!(
                    message.contains("FOREIGN KEY") || message.contains("foreign key"),
                    "Expected foreign key error, got: {}",
                    message
                );
            }
            other => panic!("Expected foreign key constraint error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_due_posts_chunk_filters_and_orders() {
        let (_temp, db) = setup_test_db().await;
        let platform = db.create_platform("Main", PlatformType::Facebook).await.unwrap();
        let now = 10_000;

        let late = scheduled_post(now - 10);
        let early = scheduled_post(now - 500);
        let future = scheduled_post(now + 60);
        let mut draft = scheduled_post(now - 100);
        draft.status = PostStatus::Draft;

        for post in [&late, &early, &future, &draft] {
            db.create_post_with_links(post, &[platform.id]).await.unwrap();
        }

        let due = db.due_posts_chunk(now, None, 100).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|p| p.post.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);
        assert!(due.iter().all(|p| p.links.len() == 1));
    }

    #[tokio::test]
    async fn test_due_posts_chunk_cursor_pages_without_overlap() {
        let (_temp, db) = setup_test_db().await;
        let platform = db.create_platform("Main", PlatformType::Twitter).await.unwrap();

        // Same scheduled time for all, so paging relies on the id tiebreak
        for _ in 0..5 {
            db.create_post_with_links(&scheduled_post(50), &[platform.id])
                .await
                .unwrap();
        }

        let first = db.due_posts_chunk(100, None, 2).await.unwrap();
        let cursor = DueCursor::after(&first.last().unwrap().post);
        let second = db.due_posts_chunk(100, Some(&cursor), 2).await.unwrap();
        let cursor = DueCursor::after(&second.last().unwrap().post);
        let third = db.due_posts_chunk(100, Some(&cursor), 2).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(third.len(), 1);

        let mut all: Vec<String> = first
            .iter()
            .chain(&second)
            .chain(&third)
            .map(|p| p.post.id.clone())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_terminal_links_are_never_overwritten() {
        let (_temp, db) = setup_test_db().await;
        let platform = db.create_platform("Main", PlatformType::Instagram).await.unwrap();
        let post = scheduled_post(0);
        db.create_post_with_links(&post, &[platform.id]).await.unwrap();

        assert!(db
            .mark_link_published(&post.id, platform.id, "ext-1", 42)
            .await
            .unwrap());
        assert!(!db
            .mark_link_failed(&post.id, platform.id, "late failure")
            .await
            .unwrap());
        assert!(!db
            .mark_link_published(&post.id, platform.id, "ext-2", 43)
            .await
            .unwrap());

        let link = db.get_link(&post.id, platform.id).await.unwrap().unwrap();
        assert_eq!(link.status, LinkStatus::Published);
        assert_eq!(link.platform_post_id.as_deref(), Some("ext-1"));
        assert_eq!(link.published_at, Some(42));
        assert!(link.error.is_none());
    }

    #[tokio::test]
    async fn test_mark_post_published_only_from_scheduled() {
        let (_temp, db) = setup_test_db().await;
        let platform = db.create_platform("Main", PlatformType::Instagram).await.unwrap();

        let mut draft = scheduled_post(0);
        draft.status = PostStatus::Draft;
        db.create_post_with_links(&draft, &[platform.id]).await.unwrap();
        assert!(!db.mark_post_published(&draft.id).await.unwrap());

        let post = scheduled_post(0);
        db.create_post_with_links(&post, &[platform.id]).await.unwrap();
        assert!(db.mark_post_published(&post.id).await.unwrap());
        assert!(!db.mark_post_published(&post.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_editing_guard_rejects_published_posts() {
        let (_temp, db) = setup_test_db().await;
        let platform = db.create_platform("Main", PlatformType::Twitter).await.unwrap();
        let post = scheduled_post(0);
        db.create_post_with_links(&post, &[platform.id]).await.unwrap();
        db.mark_post_published(&post.id).await.unwrap();

        let update = PostUpdate {
            content: Some("edited".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            db.update_post(&post.id, update).await,
            Err(CadenceError::InvalidInput(_))
        ));
        assert!(matches!(
            db.cancel_post(&post.id).await,
            Err(CadenceError::InvalidInput(_))
        ));
        assert!(matches!(
            db.reschedule_post(&post.id, 100).await,
            Err(CadenceError::InvalidInput(_))
        ));

        let unchanged = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(unchanged.content, "Test post content");
        assert_eq!(unchanged.status, PostStatus::Published);
    }

    #[tokio::test]
    async fn test_update_post_changes_only_given_fields() {
        let (_temp, db) = setup_test_db().await;
        let platform = db.create_platform("Main", PlatformType::Twitter).await.unwrap();
        let mut post = scheduled_post(500);
        post.image_url = Some("/storage/post-images/a.png".to_string());
        db.create_post_with_links(&post, &[platform.id]).await.unwrap();

        let updated = db
            .update_post(
                &post.id,
                PostUpdate {
                    title: Some("New title".to_string()),
                    image_url: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "New title");
        assert_eq!(updated.content, "Test post content");
        assert_eq!(updated.scheduled_at, 500);
        assert!(updated.image_url.is_none());
    }

    #[tokio::test]
    async fn test_cancel_and_reschedule_round_trip() {
        let (_temp, db) = setup_test_db().await;
        let platform = db.create_platform("Main", PlatformType::Twitter).await.unwrap();
        let post = scheduled_post(0);
        db.create_post_with_links(&post, &[platform.id]).await.unwrap();

        let cancelled = db.cancel_post(&post.id).await.unwrap();
        assert_eq!(cancelled.status, PostStatus::Draft);
        assert!(db.due_posts_chunk(10, None, 10).await.unwrap().is_empty());

        let rescheduled = db.reschedule_post(&post.id, 5).await.unwrap();
        assert_eq!(rescheduled.status, PostStatus::Scheduled);
        assert_eq!(rescheduled.scheduled_at, 5);
        assert_eq!(db.due_posts_chunk(10, None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_post_only_removes_drafts() {
        let (_temp, db) = setup_test_db().await;
        let platform = db.create_platform("Main", PlatformType::Twitter).await.unwrap();
        let post = scheduled_post(0);
        db.create_post_with_links(&post, &[platform.id]).await.unwrap();

        assert!(matches!(
            db.delete_post(&post.id).await,
            Err(CadenceError::InvalidInput(_))
        ));

        db.cancel_post(&post.id).await.unwrap();
        db.delete_post(&post.id).await.unwrap();

        assert!(db.get_post(&post.id).await.unwrap().is_none());
        assert!(db.get_links(&post.id).await.unwrap().is_empty());
        assert!(matches!(
            db.delete_post(&post.id).await,
            Err(CadenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_editing_unknown_post_is_not_found() {
        let (_temp, db) = setup_test_db().await;
        assert!(matches!(
            db.cancel_post("missing").await,
            Err(CadenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_platform_active() {
        let (_temp, db) = setup_test_db().await;
        let platform = db.create_platform("Main", PlatformType::Twitter).await.unwrap();

        assert!(!db.toggle_platform_active(platform.id).await.unwrap());
        assert!(db.toggle_platform_active(platform.id).await.unwrap());
        assert!(matches!(
            db.toggle_platform_active(404).await,
            Err(CadenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_counts_group_by_status() {
        let (_temp, db) = setup_test_db().await;
        let a = db.create_platform("A", PlatformType::Twitter).await.unwrap();
        let b = db.create_platform("B", PlatformType::Facebook).await.unwrap();

        let post = scheduled_post(0);
        db.create_post_with_links(&post, &[a.id, b.id]).await.unwrap();
        db.mark_link_failed(&post.id, a.id, "nope").await.unwrap();

        let posts = db.post_counts().await.unwrap();
        assert_eq!(posts, vec![(PostStatus::Scheduled, 1)]);

        let links = db.link_counts().await.unwrap();
        assert!(links.contains(&(LinkStatus::Failed, 1)));
        assert!(links.contains(&(LinkStatus::Pending, 1)));
    }

    #[tokio::test]
    async fn test_concurrent_link_updates() {
        let (_temp, db) = setup_test_db().await;
        let mut platform_ids = Vec::new();
        for i in 0..5 {
            let p = db
                .create_platform(&format!("p{}", i), PlatformType::Twitter)
                .await
                .unwrap();
            platform_ids.push(p.id);
        }
        let post = scheduled_post(0);
        db.create_post_with_links(&post, &platform_ids).await.unwrap();

        let mut handles = vec![];
        for platform_id in platform_ids.clone() {
            let db = db.clone();
            let post_id = post.id.clone();
            handles.push(tokio::spawn(async move {
                db.mark_link_published(&post_id, platform_id, "ext", 1).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        let links = db.get_links(&post.id).await.unwrap();
        assert!(links.iter().all(|l| l.status == LinkStatus::Published));
    }
}
