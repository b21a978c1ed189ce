//! Bounded retry with a fixed delay between attempts.

use crate::Result;
use std::time::Duration;
use tracing::warn;

/// Run `op` until it succeeds or `max_attempts` attempts were made.
///
/// `op` receives the 1-based attempt number.  The thread sleeps `delay` between two attempts,
/// the last error is returned when every attempt failed.
///
/// # Example
/// ```
/// use mongo_mirror::retry::retry;
/// use mongo_mirror::SyncError;
/// use std::time::Duration;
///
/// let res = retry(3, Duration::from_millis(1), |attempt| {
///     if attempt < 3 {
///         Err(SyncError::StoreFault("busy".to_string()))
///     } else {
///         Ok(attempt)
///     }
/// });
/// assert_eq!(res.unwrap(), 3);
/// ```
pub fn retry<T, F>(max_attempts: usize, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut(usize) -> Result<T>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts => {
                warn!(attempt, max_attempts, ?e, "Operation failed, retry after delay.");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
