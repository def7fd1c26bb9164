//! Window policy evaluation.

use std::time::Duration;

/// The outcome of comparing a counter snapshot against a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// The quota for the window
    pub limit: u64,
    /// Requests left in the window after this one
    pub remaining: u64,
    /// Time until the window resets
    pub reset_after: Duration,
}

impl AdmissionDecision {
    /// Whole seconds a rejected caller should wait, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        let secs = if self.reset_after.subsec_nanos() > 0 { secs + 1 } else { secs };
        secs.max(1)
    }
}

/// Decide admission for the `current_count`-th request of a window.
///
/// The count includes the request being decided, so a request is admitted
/// while `current_count <= max_requests`.
pub fn evaluate(current_count: u64, max_requests: u64, reset_after: Duration) -> AdmissionDecision {
    AdmissionDecision {
        allowed: current_count <= max_requests,
        limit: max_requests,
        remaining: max_requests.saturating_sub(current_count),
        reset_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_at_equality() {
        let reset = Duration::from_secs(30);

        let decision = evaluate(5, 5, reset);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);

        let decision = evaluate(6, 5, reset);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_remaining_counts_down() {
        let decision = evaluate(1, 10, Duration::from_secs(60));
        assert!(decision.allowed);
        assert_eq!(decision.limit, 10);
        assert_eq!(decision.remaining, 9);
        assert_eq!(decision.reset_after, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_quota_rejects_everything() {
        assert!(!evaluate(1, 0, Duration::from_secs(1)).allowed);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = evaluate(6, 5, Duration::from_millis(1_200));
        assert_eq!(decision.retry_after_secs(), 2);

        let decision = evaluate(6, 5, Duration::from_millis(10));
        assert_eq!(decision.retry_after_secs(), 1);

        let decision = evaluate(6, 5, Duration::from_secs(42));
        assert_eq!(decision.retry_after_secs(), 42);
    }
}
