//! Foreign-call timeout, cancellation, and the composite retry /
//! parallel / race operations.
//!
//! Every foreign call is dispatched onto the worker pool and awaited
//! with a deadline. On expiry the executor's cancellation flag is set;
//! cooperative runtimes stop, subprocesses are killed by their adapter,
//! and embedded interpreters that cannot be unwound are reported as
//! possibly still running.

use crate::pool;
use crossbeam::channel::{bounded, RecvTimeoutError};
use naab_core::{ErrorKind, NaabError};
use std::time::{Duration, Instant};

pub use naab_core::CancelFlag;

/// Default timeout for one foreign call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for compile-and-load compilation steps.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(60);

/// A cancellable unit of foreign work.
pub type Task<T> = Box<dyn FnOnce(&CancelFlag) -> Result<T, NaabError> + Send + 'static>;

/// Run `task` on the pool, waiting at most `timeout`.
///
/// On expiry the flag is set and `E_TIMEOUT` returned; the task keeps
/// its worker until it notices the flag (or never, for foreign code
/// that cannot be interrupted).
pub fn call_with_timeout<T: Send + 'static>(
    timeout: Duration,
    cancel: CancelFlag,
    task: Task<T>,
) -> Result<T, NaabError> {
    let (tx, rx) = bounded(1);
    let flag = cancel.clone();
    pool::global().spawn(move || {
        let _ = tx.send(task(&flag));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            cancel.set();
            log::warn!(
                "foreign call exceeded {:?}; cancellation requested, runtime may still be running",
                timeout
            );
            Err(NaabError::new(
                ErrorKind::Timeout,
                format!("foreign call exceeded timeout of {:?}", timeout),
            ))
        }
        Err(RecvTimeoutError::Disconnected) => Err(NaabError::new(
            ErrorKind::Cancelled,
            "foreign call worker exited before returning".to_string(),
        )),
    }
}

/// Up to `attempts` tries with a fixed delay between them. Returns the
/// first success or the last error.
pub fn retry<T>(
    attempts: usize,
    delay: Duration,
    mut f: impl FnMut() -> Result<T, NaabError>,
) -> Result<T, NaabError> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            std::thread::sleep(delay);
        }
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => {
                log::debug!("attempt {} of {} failed: {}", attempt + 1, attempts, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one attempt runs"))
}

/// Run all tasks concurrently and return their results in input order.
pub fn parallel<T: Send + 'static>(
    timeout: Duration,
    tasks: Vec<Task<T>>,
) -> Vec<Result<T, NaabError>> {
    let count = tasks.len();
    let (tx, rx) = bounded(count);
    let cancel = CancelFlag::new();

    for (index, task) in tasks.into_iter().enumerate() {
        let tx = tx.clone();
        let flag = cancel.clone();
        pool::global().spawn(move || {
            let result = task(&flag);
            let _ = tx.send((index, result));
        });
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let mut results: Vec<Option<Result<T, NaabError>>> = (0..count).map(|_| None).collect();
    let mut received = 0;
    while received < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((index, result)) => {
                results[index] = Some(result);
                received += 1;
            }
            Err(_) => {
                cancel.set();
                break;
            }
        }
    }

    results
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(NaabError::new(
                    ErrorKind::Timeout,
                    format!("parallel group exceeded timeout of {:?}", timeout),
                ))
            })
        })
        .collect()
}

/// Return the first successful result and cancel the rest. If every
/// task fails, the last error wins.
pub fn race<T: Send + 'static>(
    timeout: Duration,
    tasks: Vec<Task<T>>,
) -> Result<T, NaabError> {
    let count = tasks.len();
    if count == 0 {
        return Err(NaabError::new(
            ErrorKind::Cancelled,
            "race over an empty task set".to_string(),
        ));
    }
    let (tx, rx) = bounded(count);
    let cancel = CancelFlag::new();

    for task in tasks {
        let tx = tx.clone();
        let flag = cancel.clone();
        pool::global().spawn(move || {
            let result = task(&flag);
            let _ = tx.send(result);
        });
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let mut last_err = None;
    for _ in 0..count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Ok(value)) => {
                cancel.set();
                return Ok(value);
            }
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => {
                cancel.set();
                return Err(NaabError::new(
                    ErrorKind::Timeout,
                    format!("race exceeded timeout of {:?}", timeout),
                ));
            }
        }
    }
    Err(last_err.expect("every task reported"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_call_within_timeout() {
        let result = call_with_timeout(
            Duration::from_secs(5),
            CancelFlag::new(),
            Box::new(|_| Ok(42)),
        );
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_timeout_sets_flag() {
        let cancel = CancelFlag::new();
        let result: Result<(), _> = call_with_timeout(
            Duration::from_millis(50),
            cancel.clone(),
            Box::new(|flag| {
                // Cooperative task: poll the flag
                let deadline = Instant::now() + Duration::from_secs(10);
                while !flag.is_set() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }),
        );
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(cancel.is_set());
    }

    #[test]
    fn test_retry_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let result = retry(3, Duration::from_millis(1), || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(NaabError::new(ErrorKind::Foreign, "flaky"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_returns_last_error() {
        let result: Result<(), _> = retry(2, Duration::from_millis(1), || {
            Err(NaabError::new(ErrorKind::Foreign, "always"))
        });
        assert_eq!(result.unwrap_err().kind, ErrorKind::Foreign);
    }

    #[test]
    fn test_parallel_preserves_input_order() {
        let tasks: Vec<Task<usize>> = (0..5)
            .map(|i| {
                let task: Task<usize> = Box::new(move |_| {
                    // Later tasks finish first
                    std::thread::sleep(Duration::from_millis(50 - 10 * i as u64));
                    Ok(i)
                });
                task
            })
            .collect();
        let results = parallel(Duration::from_secs(5), tasks);
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_race_returns_first_success() {
        let tasks: Vec<Task<&'static str>> = vec![
            Box::new(|_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok("slow")
            }),
            Box::new(|_| Ok("fast")),
        ];
        let result = race(Duration::from_secs(5), tasks).unwrap();
        assert_eq!(result, "fast");
    }

    #[test]
    fn test_race_all_failures() {
        let tasks: Vec<Task<()>> = vec![
            Box::new(|_| Err(NaabError::new(ErrorKind::Foreign, "a"))),
            Box::new(|_| Err(NaabError::new(ErrorKind::Foreign, "b"))),
        ];
        assert_eq!(
            race(Duration::from_secs(5), tasks).unwrap_err().kind,
            ErrorKind::Foreign
        );
    }
}
