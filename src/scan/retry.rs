//! Bounded retries with jittered backoff around a single probe
//!
//! A probe failure is always represented as an absent result, never an
//! error: nothing propagates past this boundary.

use anyhow::Result;
use log::debug;
use rand::Rng;
use std::future::Future;
use std::ops::Range;
use std::time::Duration;

/// Retries after the first attempt; every probe gets `MAX_RETRIES + 1` tries.
pub const MAX_RETRIES: u32 = 2;

const BACKOFF_SECS: Range<f64> = 0.5..1.5;

/// Uniform random delay, used for probe pacing and retry backoff alike.
pub fn jitter(secs: Range<f64>) -> Duration {
    Duration::from_secs_f64(rand::thread_rng().gen_range(secs))
}

/// Drive `attempt` until it yields a value or the attempt budget is spent.
///
/// `Ok(Some(v))` short-circuits. `Ok(None)` retries immediately. An error
/// sleeps a jittered backoff first, if attempts remain. Exhaustion is `None`.
pub async fn with_retries<T, F, Fut>(max_retries: u32, mut attempt: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for tries_left in (0..=max_retries).rev() {
        match attempt().await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(err) => {
                debug!("probe attempt failed: {err}");
                if tries_left > 0 {
                    tokio::time::sleep(jitter(BACKOFF_SECS)).await;
                }
            }
        }
    }
    None
}

/// Boolean face of [`with_retries`] for the open-proxy classifier.
pub async fn probe_with_retries<F, Fut>(max_retries: u32, mut attempt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    with_retries(max_retries, || {
        let outcome = attempt();
        async move { Ok(outcome.await?.then_some(())) }
    })
    .await
    .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_attempts_exhaust_the_budget() {
        let calls = AtomicU32::new(0);
        let verdict = probe_with_retries(MAX_RETRIES, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("connection reset")) }
        })
        .await;
        assert!(!verdict);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_kth_attempt_stops_there() {
        let calls = AtomicU32::new(0);
        let verdict = probe_with_retries(MAX_RETRIES, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n == 2) }
        })
        .await;
        assert!(verdict);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_is_a_single_call() {
        let calls = AtomicU32::new(0);
        let verdict = probe_with_retries(MAX_RETRIES, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(true) }
        })
        .await;
        assert!(verdict);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_verdicts_also_consume_attempts() {
        let calls = AtomicU32::new(0);
        let verdict = probe_with_retries(MAX_RETRIES, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        })
        .await;
        assert!(!verdict);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_carries_the_value_through() {
        let value = with_retries(MAX_RETRIES, || async {
            Ok(Some((1234u32, "payload")))
        })
        .await;
        assert_eq!(value, Some((1234, "payload")));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..100 {
            let delay = jitter(0.5..1.5);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay < Duration::from_millis(1500));
        }
    }
}
