use std::{fmt, sync::Arc, time::Duration};

use reqwest::StatusCode;

/// Wait inserted between a failed attempt and the next one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryDelay {
    /// Retry immediately.
    #[default]
    None,
    /// Same delay before every retry.
    Linear(Duration),
    /// `base * 2^attempt`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl RetryDelay {
    /// Delay before the retry that follows attempt number `attempt` (0-based).
    pub fn for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Linear(delay) => delay,
            Self::Exponential { base, max } => {
                let multiplier = 1u32 << attempt.min(16);
                base.saturating_mul(multiplier).min(max)
            }
        }
    }
}

type StatusPredicate = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

/// Bounded retry budget for non-ok responses.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    /// Remaining additional attempts after the current one.
    pub attempts: u32,
    pub delay: RetryDelay,
    should_retry: Option<StatusPredicate>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("delay", &self.delay)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    pub fn linear(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay: RetryDelay::Linear(delay),
            should_retry: None,
        }
    }

    pub fn exponential(attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            attempts,
            delay: RetryDelay::Exponential { base, max },
            should_retry: None,
        }
    }

    /// Restricts retries to statuses accepted by `predicate`.
    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Whether a response with `status` may consume one unit of budget.
    pub fn should_retry(&self, status: StatusCode) -> bool {
        self.attempts > 0
            && self
                .should_retry
                .as_ref()
                .map_or(true, |predicate| predicate(status))
    }
}

impl From<u32> for RetryPolicy {
    fn from(attempts: u32) -> Self {
        Self::new(attempts)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;

    use super::{RetryDelay, RetryPolicy};

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let delay = RetryDelay::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(delay.for_attempt(0), Duration::from_millis(100));
        assert_eq!(delay.for_attempt(1), Duration::from_millis(200));
        assert_eq!(delay.for_attempt(2), Duration::from_millis(400));
        assert_eq!(delay.for_attempt(3), Duration::from_millis(500));
        assert_eq!(delay.for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn linear_delay_is_constant() {
        let delay = RetryDelay::Linear(Duration::from_millis(30));
        assert_eq!(delay.for_attempt(0), delay.for_attempt(7));
    }

    #[test]
    fn exhausted_budget_never_retries() {
        let policy = RetryPolicy::from(0);
        assert!(!policy.should_retry(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn predicate_filters_statuses() {
        let policy = RetryPolicy::new(3).with_should_retry(|status| status.is_server_error());
        assert!(policy.should_retry(StatusCode::BAD_GATEWAY));
        assert!(!policy.should_retry(StatusCode::NOT_FOUND));
    }
}
