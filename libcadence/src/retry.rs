//! Outcome classification and retry decisions
//!
//! | Outcome    | Retryable                      | When exhausted               |
//! |------------|--------------------------------|------------------------------|
//! | Success    | -                              | link Published               |
//! | Permanent  | no                             | link Failed immediately      |
//! | Throttled  | up to `max_attempts` deliveries | link Failed, rate limit note |
//! | Transient  | up to `max_attempts` deliveries | link Failed, error message   |
//!
//! Attempts count queue deliveries of the whole task, not calls per platform.

use std::time::Duration;

use crate::error::PublishError;
use crate::publisher::Publication;

/// Failure detail recorded when throttling outlasts every attempt
pub const THROTTLED_EXHAUSTED: &str = "rate limit exceeded after maximum retries";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    Success,
    Permanent,
    Throttled,
    Transient,
}

impl OutcomeClass {
    pub fn of(outcome: &Result<Publication, PublishError>) -> Self {
        match outcome {
            Ok(_) => OutcomeClass::Success,
            Err(PublishError::Validation(_)) => OutcomeClass::Permanent,
            Err(PublishError::RateLimit { .. }) => OutcomeClass::Throttled,
            Err(PublishError::Server(_)) | Err(PublishError::Unexpected(_)) => {
                OutcomeClass::Transient
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, OutcomeClass::Throttled | OutcomeClass::Transient)
    }
}

/// What the worker must do with the current link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    MarkPublished(Publication),
    /// Terminal failure carrying the detail to store on the link
    MarkFailed(String),
    /// Hand the whole task back to the queue; no link changes
    Redeliver(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
        }
    }

    /// True while another delivery is allowed after `attempts`
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Decide the fate of one link given the publish outcome and the
    /// delivery attempt it happened on (first delivery is 1)
    pub fn decide(&self, outcome: &Result<Publication, PublishError>, attempts: u32) -> Decision {
        match outcome {
            Ok(publication) => Decision::MarkPublished(publication.clone()),
            Err(err) => match OutcomeClass::of(outcome) {
                OutcomeClass::Permanent => Decision::MarkFailed(failure_detail(err)),
                _ if self.can_retry(attempts) => Decision::Redeliver(self.retry_delay),
                _ => Decision::MarkFailed(failure_detail(err)),
            },
        }
    }
}

/// Text stored on a Failed link
pub fn failure_detail(err: &PublishError) -> String {
    match err {
        PublishError::Validation(fields) => {
            serde_json::to_string(fields).unwrap_or_else(|_| err.to_string())
        }
        PublishError::RateLimit { .. } => THROTTLED_EXHAUSTED.to_string(),
        PublishError::Server(message) | PublishError::Unexpected(message) => {
            if message.trim().is_empty() {
                "Server error".to_string()
            } else {
                message.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> Result<Publication, PublishError> {
        Ok(Publication {
            external_post_id: "ext-1".to_string(),
            published_at: 1_700_000_000,
        })
    }

    fn throttled() -> Result<Publication, PublishError> {
        Err(PublishError::RateLimit {
            retry_after: Some(60),
        })
    }

    fn server(message: &str) -> Result<Publication, PublishError> {
        Err(PublishError::Server(message.to_string()))
    }

    #[test]
    fn test_classification() {
        assert_eq!(OutcomeClass::of(&ok()), OutcomeClass::Success);
        assert_eq!(OutcomeClass::of(&throttled()), OutcomeClass::Throttled);
        assert_eq!(OutcomeClass::of(&server("x")), OutcomeClass::Transient);
        assert_eq!(
            OutcomeClass::of(&Err(PublishError::Unexpected("panic".to_string()))),
            OutcomeClass::Transient
        );
        assert_eq!(
            OutcomeClass::of(&Err(PublishError::validation("content", "bad"))),
            OutcomeClass::Permanent
        );
        assert!(!OutcomeClass::Permanent.is_retryable());
        assert!(OutcomeClass::Throttled.is_retryable());
    }

    #[test]
    fn test_success_marks_published() {
        let policy = RetryPolicy::default();
        match policy.decide(&ok(), 3) {
            Decision::MarkPublished(p) => assert_eq!(p.external_post_id, "ext-1"),
            other => panic!("Expected MarkPublished, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_fails_immediately_with_json_detail() {
        let policy = RetryPolicy::default();
        let outcome = Err(PublishError::validation(
            "content",
            "Content is too long for this platform",
        ));

        assert_eq!(
            policy.decide(&outcome, 1),
            Decision::MarkFailed(r#"{"content":["Content is too long for this platform"]}"#.to_string())
        );
    }

    #[test]
    fn test_retryable_outcomes_redeliver_until_last_attempt() {
        let policy = RetryPolicy::default();

        for outcome in [throttled(), server("Internal server error")] {
            assert_eq!(
                policy.decide(&outcome, 1),
                Decision::Redeliver(Duration::from_secs(60))
            );
            assert_eq!(
                policy.decide(&outcome, 2),
                Decision::Redeliver(Duration::from_secs(60))
            );
            assert!(matches!(policy.decide(&outcome, 3), Decision::MarkFailed(_)));
        }
    }

    #[test]
    fn test_exhausted_details() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&throttled(), 3),
            Decision::MarkFailed(THROTTLED_EXHAUSTED.to_string())
        );
        assert_eq!(
            policy.decide(&server("Internal server error"), 3),
            Decision::MarkFailed("Internal server error".to_string())
        );
        assert_eq!(
            policy.decide(&server(""), 3),
            Decision::MarkFailed("Server error".to_string())
        );
    }

    #[test]
    fn test_attempts_past_maximum_still_fail() {
        // Redelivery after a crash can push attempts beyond the limit
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        assert!(matches!(policy.decide(&throttled(), 7), Decision::MarkFailed(_)));
    }

    #[test]
    fn test_custom_delay_is_used() {
        let policy = RetryPolicy::new(5, Duration::from_secs(5));
        assert_eq!(
            policy.decide(&throttled(), 4),
            Decision::Redeliver(Duration::from_secs(5))
        );
    }
}
