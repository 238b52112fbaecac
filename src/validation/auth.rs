//! Authentication and session validity

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::Validator;
use crate::core::context::SecurityContext;
use crate::core::error::GuardError;
use crate::core::operation::CriticalOperation;

/// Requires an actor and a context issued recently
pub struct SessionValidator {
    max_age: Duration,
    clock_skew: Duration,
}

impl SessionValidator {
    pub fn new(max_age: Duration, clock_skew: Duration) -> Self {
        Self {
            max_age,
            clock_skew,
        }
    }
}

#[async_trait]
impl Validator for SessionValidator {
    fn name(&self) -> &str {
        "session"
    }

    async fn validate(
        &self,
        context: &SecurityContext,
        _operation: &dyn CriticalOperation,
    ) -> Result<(), GuardError> {
        if !context.is_authenticated() {
            return Err(GuardError::AuthenticationRequired);
        }

        let age = Utc::now().signed_duration_since(context.issued_at());
        match age.to_std() {
            Ok(age) if age > self.max_age => Err(GuardError::SessionInvalid(format!(
                "context issued {}s ago exceeds {}s",
                age.as_secs(),
                self.max_age.as_secs()
            ))),
            Ok(_) => Ok(()),
            // Negative age: issued in the future
            Err(_) => {
                let ahead = (-age).to_std().unwrap_or_default();
                if ahead > self.clock_skew {
                    Err(GuardError::SessionInvalid(format!(
                        "context issued {}s in the future",
                        ahead.as_secs()
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::test_support::StubOperation;
    use chrono::Duration as ChronoDuration;

    fn validator() -> SessionValidator {
        SessionValidator::new(Duration::from_secs(3600), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_fresh_context_passes() {
        let ctx = SecurityContext::for_actor("op", "u1");
        assert!(validator().validate(&ctx, &StubOperation::new("op")).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_actor_rejected() {
        let ctx = SecurityContext::anonymous("op");
        assert_eq!(
            validator().validate(&ctx, &StubOperation::new("op")).await,
            Err(GuardError::AuthenticationRequired)
        );
    }

    #[tokio::test]
    async fn test_stale_context_rejected() {
        let ctx = SecurityContext::builder("op")
            .actor("u1")
            .issued_at(Utc::now() - ChronoDuration::hours(2))
            .build();
        let result = validator().validate(&ctx, &StubOperation::new("op")).await;
        assert!(matches!(result, Err(GuardError::SessionInvalid(_))));
    }

    #[tokio::test]
    async fn test_future_context_within_skew_passes() {
        let op = StubOperation::new("op");
        let near = SecurityContext::builder("op")
            .actor("u1")
            .issued_at(Utc::now() + ChronoDuration::seconds(5))
            .build();
        assert!(validator().validate(&near, &op).await.is_ok());

        let far = SecurityContext::builder("op")
            .actor("u1")
            .issued_at(Utc::now() + ChronoDuration::minutes(10))
            .build();
        assert!(matches!(
            validator().validate(&far, &op).await,
            Err(GuardError::SessionInvalid(_))
        ));
    }
}
