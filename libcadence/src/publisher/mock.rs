//! Mock publishers
//!
//! [`MockPublisher`] stands in for real platform APIs: it sleeps for a random
//! latency and either succeeds or returns the configured simulated failure.
//! [`ScriptedPublisher`] replays a queue of results so tests can inject each
//! outcome class deterministically.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::{Publication, PublishPayload, Publisher};
use crate::error::{CadenceError, PublishError};
use crate::types::PlatformType;

/// Failure a [`MockPublisher`] returns on every call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedFailure {
    #[default]
    None,
    RateLimit,
    Validation,
    Server,
}

impl SimulatedFailure {
    fn to_error(self) -> Option<PublishError> {
        match self {
            SimulatedFailure::None => None,
            SimulatedFailure::RateLimit => Some(PublishError::RateLimit {
                retry_after: Some(60),
            }),
            SimulatedFailure::Validation => Some(PublishError::validation(
                "content",
                "Content is too long for this platform",
            )),
            SimulatedFailure::Server => {
                Some(PublishError::Server("Internal server error".to_string()))
            }
        }
    }
}

impl FromStr for SimulatedFailure {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SimulatedFailure::None),
            "rate_limit" => Ok(SimulatedFailure::RateLimit),
            "validation" => Ok(SimulatedFailure::Validation),
            "server" => Ok(SimulatedFailure::Server),
            other => Err(CadenceError::InvalidInput(format!(
                "Unknown simulated failure '{}'. Valid options: none, rate_limit, validation, server",
                other
            ))),
        }
    }
}

/// Publisher with simulated network latency
#[derive(Debug, Clone)]
pub struct MockPublisher {
    min_latency: Duration,
    max_latency: Duration,
    simulate: SimulatedFailure,
}

impl MockPublisher {
    pub fn new(min_latency: Duration, max_latency: Duration, simulate: SimulatedFailure) -> Self {
        Self {
            min_latency,
            max_latency: max_latency.max(min_latency),
            simulate,
        }
    }

    /// No latency, always succeeds
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, SimulatedFailure::None)
    }

    fn latency(&self) -> Duration {
        let min = self.min_latency.as_millis() as u64;
        let max = self.max_latency.as_millis() as u64;
        if max <= min {
            return self.min_latency;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            SimulatedFailure::None,
        )
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(
        &self,
        platform_type: PlatformType,
        payload: &PublishPayload,
    ) -> Result<Publication, PublishError> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        tracing::info!(
            platform = platform_type.as_str(),
            content_len = payload.content.len(),
            has_image = payload.image_url.is_some(),
            "Publishing to platform"
        );

        if let Some(err) = self.simulate.to_error() {
            return Err(err);
        }

        Ok(Publication {
            external_post_id: Uuid::new_v4().to_string(),
            published_at: chrono::Utc::now().timestamp(),
        })
    }
}

/// One recorded call to a [`ScriptedPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCall {
    pub platform_type: PlatformType,
    pub payload: PublishPayload,
}

type ScriptedResult = Result<Publication, PublishError>;

/// Publisher that replays scripted results.
///
/// A result scripted for the called platform type is used first, then the
/// shared script; once both are empty every call succeeds.
#[derive(Default)]
pub struct ScriptedPublisher {
    shared: Mutex<VecDeque<ScriptedResult>>,
    per_platform: Mutex<HashMap<PlatformType, VecDeque<ScriptedResult>>>,
    calls: Mutex<Vec<PublishCall>>,
}

impl ScriptedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next call on any platform
    pub fn script(&self, result: ScriptedResult) -> &Self {
        self.shared.lock().push_back(result);
        self
    }

    /// Queue a failure for the next call on any platform
    pub fn fail_with(&self, error: PublishError) -> &Self {
        self.script(Err(error))
    }

    /// Queue a result for the next call on one platform type
    pub fn script_for(&self, platform_type: PlatformType, result: ScriptedResult) -> &Self {
        self.per_platform
            .lock()
            .entry(platform_type)
            .or_default()
            .push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<PublishCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_result(&self, platform_type: PlatformType) -> Option<ScriptedResult> {
        if let Some(result) = self
            .per_platform
            .lock()
            .get_mut(&platform_type)
            .and_then(|q| q.pop_front())
        {
            return Some(result);
        }
        self.shared.lock().pop_front()
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    async fn publish(
        &self,
        platform_type: PlatformType,
        payload: &PublishPayload,
    ) -> Result<Publication, PublishError> {
        self.calls.lock().push(PublishCall {
            platform_type,
            payload: payload.clone(),
        });

        self.next_result(platform_type).unwrap_or_else(|| {
            Ok(Publication {
                external_post_id: Uuid::new_v4().to_string(),
                published_at: chrono::Utc::now().timestamp(),
            })
        })
    }
}
