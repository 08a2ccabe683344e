//! Post publish worker
//!
//! Handles one delivery of a publish task. Links are walked in attachment
//! order and terminal links are skipped, so a redelivered task resumes where
//! the previous delivery stopped. Processing stops at the first link that
//! fails permanently or needs a retry; the post becomes Published only when
//! a pass reaches the end of its links.
//!
//! A publisher call that panics or overruns its timeout is an unexpected
//! error for the link being published, so it follows the same retry budget
//! as a server error and ends as a Failed link on the last attempt.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{PublishError, Result};
use crate::publisher::{Publication, PublishPayload, Publisher};
use crate::rate_limiter::{platform_key, RateLimiter};
use crate::retry::{Decision, RetryPolicy};
use crate::types::{PlatformType, PostStatus};

/// How a delivery ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Every link is terminal and the post is now Published
    Published,
    /// A link was marked Failed; remaining pending links wait for a later task
    Halted { platform_id: i64, reason: String },
    /// Hand the task back to the queue after `delay`
    Release { delay: Duration },
    /// Nothing to do for this post
    Skipped { reason: String },
}

/// Default bound on a single publisher call
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PostPublishWorker {
    db: Database,
    publisher: Arc<dyn Publisher>,
    limiter: Arc<dyn RateLimiter>,
    policy: RetryPolicy,
    publish_timeout: Duration,
}

impl PostPublishWorker {
    pub fn new(
        db: Database,
        publisher: Arc<dyn Publisher>,
        limiter: Arc<dyn RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            publisher,
            limiter,
            policy,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call the publisher, turning a panic or an overrun into an
    /// unexpected error so the retry policy sees it like any other failure.
    async fn publish_guarded(
        &self,
        platform_type: PlatformType,
        payload: &PublishPayload,
    ) -> std::result::Result<Publication, PublishError> {
        let call = AssertUnwindSafe(self.publisher.publish(platform_type, payload)).catch_unwind();

        match tokio::time::timeout(self.publish_timeout, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => Err(PublishError::Unexpected(format!(
                "publisher panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(PublishError::Unexpected(format!(
                "publish timed out after {}s",
                self.publish_timeout.as_secs_f64()
            ))),
        }
    }

    /// Process one delivery of the task for `post_id`.
    ///
    /// `attempts` is the delivery count reported by the queue (1 on the
    /// first delivery). Errors are store or limiter failures; publisher
    /// failures are handled here and never returned.
    pub async fn handle(&self, post_id: &str, attempts: u32) -> Result<TaskOutcome> {
        debug!(post_id, attempts, "Processing post");

        // Always act on the current state, never on what the scanner saw
        let Some(current) = self.db.get_post_with_links(post_id).await? else {
            debug!(post_id, "Post no longer exists");
            return Ok(TaskOutcome::Skipped {
                reason: "post not found".to_string(),
            });
        };

        if current.post.status != PostStatus::Scheduled {
            debug!(post_id, status = %current.post.status, "Post is not scheduled");
            return Ok(TaskOutcome::Skipped {
                reason: format!("post is {}", current.post.status),
            });
        }

        let payload = PublishPayload::from(&current.post);

        for link in current.links.iter().filter(|l| !l.status.is_terminal()) {
            let key = platform_key(link.platform_id);

            let outcome = if self
                .limiter
                .too_many_attempts(&key, chrono::Utc::now().timestamp())
                .await?
            {
                debug!(post_id, platform_id = link.platform_id, "Local rate limit reached");
                Err(PublishError::RateLimit { retry_after: None })
            } else {
                self.publish_guarded(link.platform_type, &payload).await
            };

            match self.policy.decide(&outcome, attempts) {
                Decision::MarkPublished(publication) => {
                    let updated = self
                        .db
                        .mark_link_published(
                            post_id,
                            link.platform_id,
                            &publication.external_post_id,
                            publication.published_at,
                        )
                        .await?;
                    self.limiter
                        .hit(&key, chrono::Utc::now().timestamp())
                        .await?;

                    if updated {
                        info!(
                            post_id,
                            platform_id = link.platform_id,
                            platform = link.platform_type.as_str(),
                            external_post_id = %publication.external_post_id,
                            "Published to platform"
                        );
                    } else {
                        debug!(
                            post_id,
                            platform_id = link.platform_id,
                            "Link was already terminal, keeping existing result"
                        );
                    }
                }
                Decision::MarkFailed(reason) => {
                    self.db
                        .mark_link_failed(post_id, link.platform_id, &reason)
                        .await?;
                    warn!(
                        post_id,
                        platform_id = link.platform_id,
                        platform = link.platform_type.as_str(),
                        attempts,
                        error = %reason,
                        "Platform publication failed"
                    );
                    return Ok(TaskOutcome::Halted {
                        platform_id: link.platform_id,
                        reason,
                    });
                }
                Decision::Redeliver(delay) => {
                    info!(
                        post_id,
                        platform_id = link.platform_id,
                        attempts,
                        delay_secs = delay.as_secs(),
                        error = %outcome.as_ref().err().map(|e| e.to_string()).unwrap_or_default(),
                        "Releasing task for retry"
                    );
                    return Ok(TaskOutcome::Release { delay });
                }
            }
        }

        self.db.mark_post_published(post_id).await?;
        info!(post_id, "Post published");
        Ok(TaskOutcome::Published)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
