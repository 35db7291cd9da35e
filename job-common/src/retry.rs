//! Exponential backoff with jitter, shared by Job Service retries and the
//! Webhook Dispatcher (§4.6, §4.7).

use std::time::Duration;

use rand::Rng;

/// Base, ceiling, multiplier and a queue to redirect retries to (mirrors
/// the teacher's `RetryPolicy::build(..).queue(..).provide()` builder).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    ceiling: Duration,
    multiplier: f64,
    retry_queue: Option<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            ceiling: Duration::from_secs(30 * 60),
            multiplier: 2.0,
            retry_queue: None,
        }
    }
}

pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicy {
    pub fn build(base_secs: u64, ceiling: Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: RetryPolicy {
                base: Duration::from_secs(base_secs),
                ceiling,
                multiplier: 2.0,
                retry_queue: None,
            },
        }
    }

    /// Return the queue a retry should be enqueued to: the configured
    /// retry queue if set, otherwise the job's current queue.
    pub fn retry_queue<'a>(&'a self, current_queue: &'a str) -> &'a str {
        self.retry_queue.as_deref().unwrap_or(current_queue)
    }

    /// Compute the delay before the next attempt. `attempt` is 1-indexed
    /// (the attempt number that just failed). A `retry_after` hint from
    /// the failing response (e.g. HTTP `Retry-After`) takes precedence
    /// over the computed exponential interval, but jitter is still applied
    /// to the exponential component so attempts don't synchronize.
    pub fn retry_interval(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        self.retry_interval_with_multiplier(attempt, self.multiplier, retry_after)
    }

    /// Same as `retry_interval`, but substitutes `multiplier` for the
    /// policy's own (§4.7: a webhook subscription's `backoffMultiplier` is
    /// authoritative over the Job Service's default when delaying a
    /// delivery retry). Clamped to the same `[1.0, 5.0]` range the builder
    /// enforces.
    pub fn retry_interval_with_multiplier(&self, attempt: u32, multiplier: f64, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.ceiling);
        }

        let multiplier = multiplier.clamp(1.0, 5.0);
        let exponent = attempt.saturating_sub(1);
        let scaled = self.base.as_secs_f64() * multiplier.powi(exponent as i32);
        let capped = scaled.min(self.ceiling.as_secs_f64());

        let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = (capped * jitter_factor).max(0.0);

        Duration::from_secs_f64(jittered)
    }
}

impl RetryPolicyBuilder {
    pub fn queue(mut self, queue: &str) -> Self {
        self.policy.retry_queue = Some(queue.to_owned());
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier.clamp(1.0, 5.0);
        self
    }

    pub fn provide(self) -> RetryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_interval_grows_exponentially_on_average() {
        let policy = RetryPolicy::build(1, Duration::from_secs(3600))
            .multiplier(2.0)
            .provide();

        // Average over many samples should land near base * multiplier^n,
        // since jitter is symmetric around 1.0.
        let sample = |attempt: u32| -> f64 {
            let n = 200;
            let sum: f64 = (0..n)
                .map(|_| policy.retry_interval(attempt, None).as_secs_f64())
                .sum();
            sum / n as f64
        };

        let first = sample(1);
        let second = sample(2);
        let third = sample(3);

        assert!(second > first * 1.5);
        assert!(third > second * 1.5);
    }

    #[test]
    fn test_retry_interval_respects_ceiling() {
        let policy = RetryPolicy::build(1000, Duration::from_secs(10)).provide();
        let interval = policy.retry_interval(10, None);
        // ceiling (10s) + at most 20% jitter
        assert!(interval <= Duration::from_secs(12));
    }

    #[test]
    fn test_retry_after_hint_takes_precedence() {
        let policy = RetryPolicy::build(1, Duration::from_secs(3600)).provide();
        let interval = policy.retry_interval(1, Some(Duration::from_secs(120)));
        assert_eq!(interval, Duration::from_secs(120));
    }

    #[test]
    fn test_retry_queue_defaults_to_current_queue() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_queue("parsing"), "parsing");
    }

    #[test]
    fn test_retry_queue_can_be_overridden() {
        let policy = RetryPolicy::build(0, Duration::from_secs(0))
            .queue("parsing_retry")
            .provide();
        assert_eq!(policy.retry_queue("parsing"), "parsing_retry");
    }

    #[test]
    fn test_retry_interval_with_multiplier_overrides_policy_default() {
        let policy = RetryPolicy::build(1, Duration::from_secs(3600)).multiplier(2.0).provide();

        let sample = |attempt: u32, multiplier: f64| -> f64 {
            let n = 200;
            let sum: f64 = (0..n)
                .map(|_| policy.retry_interval_with_multiplier(attempt, multiplier, None).as_secs_f64())
                .sum();
            sum / n as f64
        };

        // A subscription-level multiplier of 3.0 should grow faster than
        // the policy's own 2.0 default would for the same attempt.
        assert!(sample(3, 3.0) > sample(3, 2.0) * 1.5);
    }

    #[test]
    fn test_retry_interval_with_multiplier_is_clamped() {
        let policy = RetryPolicy::build(10, Duration::from_secs(3600)).provide();
        let unclamped = policy.retry_interval_with_multiplier(4, 50.0, None);
        let clamped = policy.retry_interval_with_multiplier(4, 5.0, None);
        // Both should fall in the same ballpark since 50.0 is clamped to 5.0.
        assert!(unclamped.as_secs_f64() <= clamped.as_secs_f64() * 1.3);
    }
}
