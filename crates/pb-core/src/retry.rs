//! Bounded retry with an explicit policy
//!
//! The "keep trying for a while, then give up and move on" loops in the
//! session setup are all instances of one policy: a wall-clock window and
//! a poll interval.

use std::future::Future;
use std::time::Duration;

/// A bounded retry window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total wall-clock window before giving up
    pub max_duration: Duration,
    /// Pause between attempts
    pub poll_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_duration: Duration, poll_interval: Duration) -> Self {
        Self {
            max_duration,
            poll_interval,
        }
    }

    /// Window for reading the remote environment once the tunnel is up.
    /// Most attempts succeed within one or two iterations.
    pub fn remote_env() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_millis(250))
    }

    /// Window for the SSH tunnel to start accepting connections
    pub fn tunnel_ready() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_millis(250))
    }
}

/// Retry `op` until it succeeds or the policy window elapses.
///
/// Always makes at least one attempt. Returns `None` when the window
/// elapsed without a success; the caller decides whether that is fatal.
pub async fn retry_until<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = tokio::time::Instant::now();
    loop {
        match op().await {
            Ok(value) => return Some(value),
            Err(err) => {
                if start.elapsed() + policy.poll_interval >= policy.max_duration {
                    tracing::debug!("retry window elapsed, giving up: {}", err);
                    return None;
                }
                tracing::trace!("attempt failed, retrying: {}", err);
                tokio::time::sleep(policy.poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_later_attempt() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_millis(250));
        let result = retry_until(policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= 3 {
                    Ok(n)
                } else {
                    Err("not yet")
                }
            }
        })
        .await;
        assert_eq!(result, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_within_window() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_millis(250));
        let start = tokio::time::Instant::now();
        let result: Option<()> = retry_until(policy, || async { Err("always fails") }).await;
        assert_eq!(result, None);
        assert!(start.elapsed() <= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_makes_at_least_one_attempt() {
        let attempts = AtomicU32::new(0);
        // Window smaller than the interval still runs the op once
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(250));
        let result: Option<()> = retry_until(policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("no") }
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
