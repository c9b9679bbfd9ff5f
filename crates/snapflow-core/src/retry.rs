//! Retry resolver: whether a failed node may run again, and after how long.
//!
//! Stateless; all inputs are passed as parameters and the decision is pure
//! arithmetic. The engine records the computed `next_retry_at` but never
//! sleeps or schedules — firing at that time is the caller's responsibility.

use snapflow_types::snapshot::RetryState;
use snapflow_types::workflow::RetryPolicy;

// ---------------------------------------------------------------------------
// RetryDecision
// ---------------------------------------------------------------------------

/// Outcome of resolving a node failure against its effective retry policy.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Retry budget remains; suspend with `status = error`.
    Retry {
        /// The attempt that just failed (1-based).
        attempt: u32,
        /// Resolved attempt ceiling, for diagnostics.
        max_attempts: f64,
        /// Advisory delay before the next attempt, milliseconds.
        delay_ms: i64,
    },
    /// No policy, unresolvable policy, or budget exhausted; terminal failure.
    Fail {
        /// The attempt that just failed (1-based).
        attempt: u32,
    },
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Attempt number for the current execution of `node_id`.
///
/// Continues the counter only while the prior retry state refers to the same
/// node; any other node (or no retry state) starts over at 1.
pub fn continuation_attempt(retry_state: Option<&RetryState>, node_id: &str) -> u32 {
    match retry_state {
        Some(state) if state.node_id == node_id => state.attempts + 1,
        _ => 1,
    }
}

/// Resolve a node failure into a retry decision.
///
/// `policy` is the effective policy: the middleware-resolved override when
/// one was stashed, else the node definition's static policy. A policy whose
/// `max_attempts` does not coerce to a finite number never retries, as does
/// `max_attempts = 0` (the first failure is already attempt 1).
pub fn resolve(
    policy: Option<&RetryPolicy>,
    retry_state: Option<&RetryState>,
    node_id: &str,
) -> RetryDecision {
    let attempt = continuation_attempt(retry_state, node_id);

    let Some(policy) = policy else {
        return RetryDecision::Fail { attempt };
    };
    let Some(max_attempts) = policy.max_attempts.as_f64().filter(|m| m.is_finite()) else {
        return RetryDecision::Fail { attempt };
    };
    if f64::from(attempt) > max_attempts {
        return RetryDecision::Fail { attempt };
    }

    let interval = policy.interval.as_f64().unwrap_or(0.0);
    let delay = if policy.backoff.is_exponential() {
        interval * f64::powi(2.0, attempt as i32 - 1)
    } else {
        interval
    };

    RetryDecision::Retry {
        attempt,
        max_attempts,
        delay_ms: delay as i64,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use snapflow_types::workflow::{BackoffStrategy, BackoffValue, PolicyValue};

    fn policy(max_attempts: f64, interval: f64, backoff: BackoffValue) -> RetryPolicy {
        RetryPolicy {
            max_attempts: PolicyValue::Number(max_attempts),
            interval: PolicyValue::Number(interval),
            backoff,
        }
    }

    fn prior(node_id: &str, attempts: u32) -> RetryState {
        RetryState {
            node_id: node_id.to_string(),
            attempts,
            next_retry_at: None,
        }
    }

    // -----------------------------------------------------------------------
    // Attempt counting
    // -----------------------------------------------------------------------

    #[test]
    fn test_first_attempt_without_prior_state() {
        assert_eq!(continuation_attempt(None, "a"), 1);
    }

    #[test]
    fn test_attempt_continues_for_same_node() {
        assert_eq!(continuation_attempt(Some(&prior("a", 2)), "a"), 3);
    }

    #[test]
    fn test_attempt_resets_for_different_node() {
        assert_eq!(continuation_attempt(Some(&prior("a", 2)), "b"), 1);
    }

    // -----------------------------------------------------------------------
    // Policy resolution
    // -----------------------------------------------------------------------

    #[test]
    fn test_no_policy_fails_immediately() {
        assert_eq!(resolve(None, None, "a"), RetryDecision::Fail { attempt: 1 });
    }

    #[test]
    fn test_fixed_backoff_delay_is_constant() {
        let p = policy(3.0, 10.0, BackoffValue::Strategy(BackoffStrategy::Fixed));
        for attempts in 0..3 {
            let state = prior("a", attempts);
            let retry_state = (attempts > 0).then_some(&state);
            match resolve(Some(&p), retry_state, "a") {
                RetryDecision::Retry { delay_ms, .. } => assert_eq!(delay_ms, 10),
                other => panic!("expected retry, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let p = policy(5.0, 10.0, BackoffValue::Strategy(BackoffStrategy::Exponential));

        match resolve(Some(&p), None, "a") {
            RetryDecision::Retry { attempt, delay_ms, .. } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay_ms, 10);
            }
            other => panic!("expected retry, got {:?}", other),
        }
        match resolve(Some(&p), Some(&prior("a", 2)), "a") {
            RetryDecision::Retry { attempt, delay_ms, .. } => {
                assert_eq!(attempt, 3);
                assert_eq!(delay_ms, 40);
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_budget_exhaustion() {
        let p = policy(3.0, 10.0, BackoffValue::Strategy(BackoffStrategy::Fixed));
        // Attempts 1..=3 retry, the 4th fails terminally
        assert!(matches!(
            resolve(Some(&p), Some(&prior("a", 2)), "a"),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        assert_eq!(
            resolve(Some(&p), Some(&prior("a", 3)), "a"),
            RetryDecision::Fail { attempt: 4 }
        );
    }

    #[test]
    fn test_zero_max_attempts_never_retries() {
        let p = policy(0.0, 10.0, BackoffValue::Strategy(BackoffStrategy::Fixed));
        assert_eq!(resolve(Some(&p), None, "a"), RetryDecision::Fail { attempt: 1 });
    }

    #[test]
    fn test_expression_values_coerced() {
        let p = RetryPolicy {
            max_attempts: PolicyValue::Expression("3".to_string()),
            interval: PolicyValue::Expression("20".to_string()),
            backoff: BackoffValue::Expression("exponential".to_string()),
        };
        match resolve(Some(&p), Some(&prior("a", 1)), "a") {
            RetryDecision::Retry { attempt, delay_ms, .. } => {
                assert_eq!(attempt, 2);
                assert_eq!(delay_ms, 40);
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_expression_fails() {
        // An expression never resolved by a middleware does not coerce; no retry
        let p = RetryPolicy {
            max_attempts: PolicyValue::Expression("{{ globals.maxAttempts }}".to_string()),
            interval: PolicyValue::Number(10.0),
            backoff: BackoffValue::Strategy(BackoffStrategy::Fixed),
        };
        assert_eq!(resolve(Some(&p), None, "a"), RetryDecision::Fail { attempt: 1 });
    }
}
