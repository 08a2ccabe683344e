//! Core types for Cadence

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CadenceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
    pub scheduled_at: i64,
    pub status: PostStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    /// Create a scheduled post with a fresh id
    pub fn new(title: String, content: String, scheduled_at: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            content,
            image_url: None,
            scheduled_at,
            status: PostStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    /// Editing flows may only touch posts that have not left the queue
    pub fn is_editable(&self) -> bool {
        matches!(self, PostStatus::Draft | PostStatus::Scheduled)
    }
}

impl FromStr for PostStatus {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            other => Err(CadenceError::InvalidInput(format!(
                "Unknown post status '{}'. Valid options: draft, scheduled, published, failed",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported networks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Instagram,
    Facebook,
    Twitter,
    LinkedIn,
}

impl PlatformType {
    pub const ALL: [PlatformType; 4] = [
        PlatformType::Instagram,
        PlatformType::Facebook,
        PlatformType::Twitter,
        PlatformType::LinkedIn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Instagram => "instagram",
            PlatformType::Facebook => "facebook",
            PlatformType::Twitter => "twitter",
            PlatformType::LinkedIn => "linkedin",
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            PlatformType::Instagram => "Instagram",
            PlatformType::Facebook => "Facebook",
            PlatformType::Twitter => "Twitter",
            PlatformType::LinkedIn => "LinkedIn",
        }
    }
}

impl FromStr for PlatformType {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlatformType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                CadenceError::InvalidInput(format!(
                    "Unknown platform type '{}'. Valid options: instagram, facebook, twitter, linkedin",
                    s
                ))
            })
    }
}

impl std::fmt::Display for PlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured destination account on one network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: i64,
    pub name: String,
    pub platform_type: PlatformType,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Pending,
    Published,
    Failed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Pending => "pending",
            LinkStatus::Published => "published",
            LinkStatus::Failed => "failed",
        }
    }

    /// Published and Failed never transition again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LinkStatus::Pending)
    }
}

impl FromStr for LinkStatus {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LinkStatus::Pending),
            "published" => Ok(LinkStatus::Published),
            "failed" => Ok(LinkStatus::Failed),
            other => Err(CadenceError::InvalidInput(format!(
                "Unknown link status '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-(post, platform) publication record.
///
/// `id` grows with attachment order, which is the order the worker walks
/// links in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformLink {
    pub id: i64,
    pub post_id: String,
    pub platform_id: i64,
    pub platform_type: PlatformType,
    pub status: LinkStatus,
    pub platform_post_id: Option<String>,
    pub published_at: Option<i64>,
    pub error: Option<String>,
}

/// A post with all its platform links
#[derive(Debug, Clone, Serialize)]
pub struct PostWithLinks {
    pub post: Post,
    pub links: Vec<PlatformLink>,
}

/// Queue payload: only the identity, the worker re-reads everything else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTask {
    pub post_id: String,
}

impl PublishTask {
    pub fn new(post_id: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
        }
    }

    /// De-duplication key used by the queue
    pub fn unique_key(&self) -> String {
        format!("post:{}", self.post_id)
    }
}
