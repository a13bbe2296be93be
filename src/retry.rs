//! Bounded retry with capped exponential backoff.
//!
//! Delays are blocking sleeps: every retried operation runs on a worker
//! thread that owns exactly one partition.

use crate::config::RetryConfig;
use crate::error::{CsbError, Result};
use crate::logging::PartitionLog;
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Sleep the current backoff, then try again.
    Wait,
    /// Try again right away (the failure cause has been dealt with).
    Retry,
    /// Give up and return the error unchanged.
    Abort,
}

/// Retry policy for one kind of operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Retry without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `attempt` until it succeeds or the budget is spent.
    ///
    /// The closure receives the 1-based attempt number. Fatal errors are
    /// returned immediately without consuming further attempts.
    pub fn run<T>(
        &self,
        operation: &str,
        log: &PartitionLog,
        attempt: impl FnMut(u32) -> Result<T>,
    ) -> Result<T> {
        self.run_with_recovery(operation, log, attempt, |_| Ok(Recovery::Wait))
    }

    /// Like [`run`](Self::run), but `recover` decides how to react to each
    /// failure before the next attempt. An error from `recover` ends the
    /// operation with that error.
    pub fn run_with_recovery<T>(
        &self,
        operation: &str,
        log: &PartitionLog,
        mut attempt: impl FnMut(u32) -> Result<T>,
        mut recover: impl FnMut(&CsbError) -> Result<Recovery>,
    ) -> Result<T> {
        let mut backoff = self.initial_backoff;
        let mut number = 0;

        loop {
            number += 1;
            let err = match attempt(number) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => e,
            };

            if number >= self.max_attempts {
                log.error(format!("{} failed after {} attempts: {}", operation, number, err));
                return Err(CsbError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: number,
                    source: Box::new(err),
                });
            }

            match recover(&err)? {
                Recovery::Abort => return Err(err),
                Recovery::Retry => {
                    log.warn(format!(
                        "{} attempt {} failed: {}, retrying after recovery",
                        operation, number, err
                    ));
                }
                Recovery::Wait => {
                    log.warn(format!(
                        "{} attempt {} failed: {}, retrying in {}ms",
                        operation,
                        number,
                        err,
                        backoff.as_millis()
                    ));
                    if !backoff.is_zero() {
                        std::thread::sleep(backoff);
                    }
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn transient() -> CsbError {
        EngineError::general("combine", "raster locked").into()
    }

    /// Fails the first `k` attempts.
    fn flaky(k: u32, calls: &mut u32) -> Result<&'static str> {
        *calls += 1;
        if *calls <= k {
            Err(transient())
        } else {
            Ok("done")
        }
    }

    #[test]
    fn test_succeeds_after_k_failures() {
        let log = PartitionLog::console("AL1");
        for k in 0..4 {
            let mut calls = 0;
            let policy = RetryPolicy::immediate(k + 1);
            let result = policy.run("combine", &log, |_| flaky(k, &mut calls));
            assert_eq!(result.unwrap(), "done");
            assert_eq!(calls, k + 1);
        }
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let log = PartitionLog::console("AL1");
        let mut calls = 0;
        let policy = RetryPolicy::immediate(3);
        let err = policy.run("combine", &log, |_| flaky(5, &mut calls)).unwrap_err();

        assert_eq!(calls, 3);
        match err {
            CsbError::RetriesExhausted { attempts, ref operation, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(operation, "combine");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_fatal_errors_are_not_retried() {
        let log = PartitionLog::console("AL1");
        let mut calls = 0;
        let err = RetryPolicy::immediate(5)
            .run("resolve", &log, |_| -> Result<()> {
                calls += 1;
                Err(CsbError::InvalidAreaName("??".to_string()))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, CsbError::InvalidAreaName(_)));
    }

    #[test]
    fn test_recovery_hook_runs_between_attempts() {
        let log = PartitionLog::console("AL1");
        let mut calls = 0;
        let mut recoveries = 0;
        let result = RetryPolicy::immediate(5).run_with_recovery(
            "eliminate",
            &log,
            |_| flaky(2, &mut calls),
            |_| {
                recoveries += 1;
                Ok(Recovery::Retry)
            },
        );
        assert!(result.is_ok());
        assert_eq!(recoveries, 2);
    }

    #[test]
    fn test_abort_returns_original_error() {
        let log = PartitionLog::console("AL1");
        let mut calls = 0;
        let err = RetryPolicy::immediate(5)
            .run_with_recovery("eliminate", &log, |_| flaky(9, &mut calls), |_| Ok(Recovery::Abort))
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, CsbError::Engine(_)));
    }

    #[test]
    fn test_failed_recovery_ends_operation() {
        let log = PartitionLog::console("AL1");
        let mut calls = 0;
        let err = RetryPolicy::immediate(5)
            .run_with_recovery(
                "eliminate",
                &log,
                |_| flaky(9, &mut calls),
                |_| Err(EngineError::general("repair_geometry", "locked").into()),
            )
            .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.engine_cause().unwrap().operation, "repair_geometry");
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        };
        let policy = RetryPolicy::from_config(&config);
        let log = PartitionLog::console("AL1");
        let mut calls = 0;
        let start = std::time::Instant::now();
        assert!(policy.run("combine", &log, |_| flaky(3, &mut calls)).is_ok());
        assert!(start.elapsed() >= Duration::from_millis(5));
        assert_eq!(policy.max_attempts(), 4);
    }
}
