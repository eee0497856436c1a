//! # Retry and Poll Primitives
//!
//! The two bounded waits of the engine.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Bounded Waits                                     │
//! │                                                                         │
//! │  retry_until_nonempty (eventually consistent listings)                 │
//! │  ──────────────────────────────────────────────────                    │
//! │  attempt 1 ─ empty ─ sleep ─ attempt 2 ─ ... ─ attempt N               │
//! │     any non-empty result returns immediately                           │
//! │     N empty results → Ok(empty), not an error                          │
//! │                                                                         │
//! │  wait_until_absent (asynchronous deletions)                            │
//! │  ──────────────────────────────────────────                            │
//! │  poll ─ present ─ sleep ─ poll ─ ... ─ absent → Ok(polls)              │
//! │     deadline passed while present → TimedOut { polls }                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both use `tokio::time`, so tests drive them with a paused clock.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ClientResult;

// =============================================================================
// Listing Retry
// =============================================================================

/// Bounds for retrying an eventually consistent listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingRetry {
    pub attempts: u32,
    pub interval: Duration,
}

impl ListingRetry {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        ListingRetry {
            attempts: attempts.max(1),
            interval,
        }
    }
}

impl Default for ListingRetry {
    fn default() -> Self {
        ListingRetry::new(5, Duration::from_secs(1))
    }
}

/// Calls `list` until it returns at least one item or attempts run out.
///
/// Errors from `list` are returned immediately; exhausting the attempts with
/// only empty results yields an empty vector.
pub async fn retry_until_nonempty<T, F, Fut>(policy: ListingRetry, mut list: F) -> ClientResult<Vec<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<Vec<T>>>,
{
    for attempt in 1..=policy.attempts {
        let items = list().await?;
        if !items.is_empty() {
            debug!(attempt, count = items.len(), "Listing returned items");
            return Ok(items);
        }

        if attempt < policy.attempts {
            debug!(attempt, max_attempts = policy.attempts, "Listing empty, retrying");
            tokio::time::sleep(policy.interval).await;
        }
    }

    warn!(attempts = policy.attempts, "Listing still empty after all attempts");
    Ok(Vec::new())
}

// =============================================================================
// Deletion Wait
// =============================================================================

/// Bounds for confirming an asynchronous deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionWait {
    pub timeout: Duration,
    pub interval: Duration,
}

impl DeletionWait {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        DeletionWait { timeout, interval }
    }
}

impl Default for DeletionWait {
    fn default() -> Self {
        DeletionWait::new(Duration::from_secs(60), Duration::from_secs(1))
    }
}

/// Outcome of a poll that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Absent after this many polls.
    Absent { polls: u32 },
    /// Still present when the deadline passed.
    TimedOut { polls: u32, waited: Duration },
}

/// Polls `is_absent` once per interval until it reports true or the timeout
/// elapses.
pub async fn wait_until_absent<F, Fut>(policy: DeletionWait, mut is_absent: F) -> ClientResult<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<bool>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut polls = 0u32;

    loop {
        polls += 1;
        if is_absent().await? {
            debug!(polls, "Deletion confirmed");
            return Ok(PollOutcome::Absent { polls });
        }

        if Instant::now() >= deadline {
            return Ok(PollOutcome::TimedOut {
                polls,
                waited: started.elapsed(),
            });
        }

        tokio::time::sleep(policy.interval).await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_retry_converges_on_fifth_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let started = Instant::now();

        let items = retry_until_nonempty(ListingRetry::default(), || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if n >= 5 { vec!["svc-1"] } else { vec![] })
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec!["svc-1"]);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_quietly() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let items: Vec<String> = retry_until_nonempty(ListingRetry::default(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            }
        })
        .await
        .unwrap();

        assert!(items.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_absent_after_three_polls() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let outcome = wait_until_absent(DeletionWait::default(), || {
            let c = c.clone();
            async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1 >= 3) }
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Absent { polls: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_absent_times_out() {
        let outcome = wait_until_absent(DeletionWait::default(), || async { Ok(false) })
            .await
            .unwrap();

        match outcome {
            PollOutcome::TimedOut { polls, waited } => {
                assert!(polls >= 60);
                assert!(waited >= Duration::from_secs(60));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
