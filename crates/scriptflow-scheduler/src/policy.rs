//! Retry and auto-disable rules for scheduled firings.

use std::time::Duration;

use scriptflow_core::config::SchedulerConfig;
use scriptflow_core::ExecutionState;

/// What the scheduler should do after a scheduled attempt ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Run the one retry after `delay`.
    Retry { delay: Duration },
    /// The firing is resolved. Persist the new counter; `deactivate` means the
    /// schedule reached the failure limit.
    Settle {
        consecutive_failures: u32,
        deactivate: bool,
    },
    /// The outcome does not count towards the streak.
    Ignore,
}

#[derive(Debug, Clone, Copy)]
pub struct FailurePolicy {
    pub retry_delay: Duration,
    pub max_consecutive_failures: u32,
}

impl FailurePolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
        }
    }

    /// Decide the next step for attempt `attempt` (1 = original firing,
    /// 2 = retry) that ended in `state`, given the current streak.
    pub fn evaluate(&self, attempt: u32, state: ExecutionState, consecutive_failures: u32) -> Verdict {
        match state {
            ExecutionState::Completed => Verdict::Settle {
                consecutive_failures: 0,
                deactivate: false,
            },
            ExecutionState::Failed | ExecutionState::Timeout if attempt <= 1 => Verdict::Retry {
                delay: self.retry_delay,
            },
            // a failed retry, or a launch error (never retried)
            ExecutionState::Failed | ExecutionState::Timeout | ExecutionState::LaunchError => {
                let streak = consecutive_failures.saturating_add(1);
                Verdict::Settle {
                    consecutive_failures: streak,
                    deactivate: streak >= self.max_consecutive_failures,
                }
            }
            ExecutionState::Cancelled
            | ExecutionState::SkippedNoCapacity
            | ExecutionState::Pending
            | ExecutionState::Running => Verdict::Ignore,
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FailurePolicy {
        FailurePolicy {
            retry_delay: Duration::from_secs(300),
            max_consecutive_failures: 3,
        }
    }

    #[test]
    fn first_failure_schedules_one_retry() {
        for state in [ExecutionState::Failed, ExecutionState::Timeout] {
            assert_eq!(
                policy().evaluate(1, state, 0),
                Verdict::Retry {
                    delay: Duration::from_secs(300)
                }
            );
        }
    }

    #[test]
    fn failed_retry_extends_streak() {
        assert_eq!(
            policy().evaluate(2, ExecutionState::Failed, 1),
            Verdict::Settle {
                consecutive_failures: 2,
                deactivate: false
            }
        );
    }

    #[test]
    fn third_failure_deactivates() {
        assert_eq!(
            policy().evaluate(2, ExecutionState::Timeout, 2),
            Verdict::Settle {
                consecutive_failures: 3,
                deactivate: true
            }
        );
    }

    #[test]
    fn success_on_either_attempt_resets() {
        for attempt in [1, 2] {
            assert_eq!(
                policy().evaluate(attempt, ExecutionState::Completed, 2),
                Verdict::Settle {
                    consecutive_failures: 0,
                    deactivate: false
                }
            );
        }
    }

    #[test]
    fn launch_error_is_not_retried() {
        assert_eq!(
            policy().evaluate(1, ExecutionState::LaunchError, 0),
            Verdict::Settle {
                consecutive_failures: 1,
                deactivate: false
            }
        );
    }

    #[test]
    fn cancel_and_skip_leave_streak_alone() {
        assert_eq!(policy().evaluate(1, ExecutionState::Cancelled, 2), Verdict::Ignore);
        assert_eq!(
            policy().evaluate(1, ExecutionState::SkippedNoCapacity, 2),
            Verdict::Ignore
        );
    }

    #[test]
    fn streak_scenario_with_reset() {
        let p = policy();
        let mut streak = 0;
        // fail + failed retry, twice
        for _ in 0..2 {
            assert!(matches!(p.evaluate(1, ExecutionState::Failed, streak), Verdict::Retry { .. }));
            if let Verdict::Settle { consecutive_failures, deactivate } =
                p.evaluate(2, ExecutionState::Failed, streak)
            {
                assert!(!deactivate);
                streak = consecutive_failures;
            }
        }
        assert_eq!(streak, 2);
        // a success before the third resets the counter
        if let Verdict::Settle { consecutive_failures, .. } =
            p.evaluate(1, ExecutionState::Completed, streak)
        {
            streak = consecutive_failures;
        }
        assert_eq!(streak, 0);
    }
}
