use std::fmt;
use std::io::{self, ErrorKind};
use std::time::Duration;

use tracing::{debug, info};

/// Default number of attempts for bounded retry loops.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default delay between two attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Bounded retry with a fixed delay between attempts.
///
/// Used wherever a process waits for its counterpart to come up: socket
/// clients waiting for the server, shared-memory attachers waiting for the
/// owner to create the segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Must be non-zero.
    pub max_attempts: u32,
    /// Fixed delay slept between two consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Why a bounded retry loop stopped without a result.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E = io::Error> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with an error that is not worth retrying.
    #[error("attempt {attempt} failed: {error}")]
    Fatal { attempt: u32, error: E },
}

impl RetryPolicy {
    /// Create a policy with explicit attempt count and delay.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. `is_retryable` decides
    /// whether a failure is transient.
    pub fn run<T, E, F, C>(&self, what: &str, is_retryable: C, op: F) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
        C: Fn(&E) -> bool,
    {
        self.run_with_sleep(what, is_retryable, op, std::thread::sleep)
    }

    /// Same as [`RetryPolicy::run`] with an injectable sleep function.
    pub fn run_with_sleep<T, E, F, C, S>(
        &self,
        what: &str,
        is_retryable: C,
        mut op: F,
        mut sleep: S,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
        C: Fn(&E) -> bool,
        S: FnMut(Duration),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match op(attempt) {
                Ok(value) => {
                    debug!(what, attempt, "retry loop succeeded");
                    return Ok(value);
                }
                Err(err) if !is_retryable(&err) => {
                    return Err(RetryError::Fatal {
                        attempt,
                        error: err,
                    });
                }
                Err(err) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    info!(
                        what,
                        attempt,
                        max_attempts,
                        error = %err,
                        "waiting before next attempt"
                    );
                    sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Connection failures that mean "the server is not up yet".
pub fn is_transient_connect_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::TimedOut | ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> io::Error {
        io::Error::from(ErrorKind::ConnectionRefused)
    }

    #[test]
    fn stops_after_exactly_max_attempts() {
        let policy = RetryPolicy::new(4, Duration::from_millis(250));
        let mut attempts = Vec::new();
        let mut sleeps = Vec::new();

        let result: Result<(), _> = policy.run_with_sleep(
            "server",
            is_transient_connect_error,
            |attempt| {
                attempts.push(attempt);
                Err(refused())
            },
            |delay| sleeps.push(delay),
        );

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 4, .. })
        ));
        assert_eq!(attempts, vec![1, 2, 3, 4]);
        assert_eq!(sleeps, vec![Duration::from_millis(250); 3]);
    }

    #[test]
    fn returns_first_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let mut sleeps = 0;
        let value = policy
            .run_with_sleep(
                "server",
                is_transient_connect_error,
                |attempt| {
                    if attempt < 3 {
                        Err(io::Error::from(ErrorKind::TimedOut))
                    } else {
                        Ok(attempt * 10)
                    }
                },
                |_| sleeps += 1,
            )
            .unwrap();

        assert_eq!(value, 30);
        assert_eq!(sleeps, 2);
    }

    #[test]
    fn non_retryable_error_surfaces_immediately() {
        let policy = RetryPolicy::new(10, Duration::from_millis(1));
        let mut calls = 0;
        let result: Result<(), _> = policy.run_with_sleep(
            "server",
            is_transient_connect_error,
            |_| {
                calls += 1;
                Err(io::Error::from(ErrorKind::PermissionDenied))
            },
            |_| panic!("must not sleep before a fatal error"),
        );

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RetryError::Fatal { attempt: 1, .. })));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let mut calls = 0;
        let result: Result<(), _> = policy.run_with_sleep(
            "server",
            is_transient_connect_error,
            |_| {
                calls += 1;
                Err(refused())
            },
            |_| {},
        );

        assert_eq!(calls, 1);
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 1, .. })
        ));
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient_connect_error(&refused()));
        assert!(is_transient_connect_error(&io::Error::from(
            ErrorKind::TimedOut
        )));
        assert!(!is_transient_connect_error(&io::Error::from(
            ErrorKind::AddrNotAvailable
        )));
    }
}
