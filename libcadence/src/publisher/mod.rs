//! Publisher abstraction
//!
//! A publisher performs the network call that puts a post on one platform.
//! Failures come back as [`PublishError`] values which the retry policy
//! classifies; a publisher never decides whether to retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PublishError;
use crate::types::{Post, PlatformType};

pub mod mock;

pub use mock::{MockPublisher, PublishCall, ScriptedPublisher, SimulatedFailure};

/// What gets sent to a platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPayload {
    pub content: String,
    pub image_url: Option<String>,
}

impl From<&Post> for PublishPayload {
    fn from(post: &Post) -> Self {
        Self {
            content: post.content.clone(),
            image_url: post.image_url.clone(),
        }
    }
}

/// Successful publication on one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub external_post_id: String,
    /// Unix timestamp reported by the platform
    pub published_at: i64,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` to a platform of the given type
    async fn publish(
        &self,
        platform_type: PlatformType,
        payload: &PublishPayload,
    ) -> std::result::Result<Publication, PublishError>;
}
