#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Sliding-window rate limiting for external geocoding services.
//!
//! Each external service gets exactly one [`RateLimiter`] instance, shared
//! across the whole enrichment worker pool via `Arc`. Every network call
//! (including each retry attempt) must [`acquire`](RateLimiter::acquire) an
//! admission before executing, which keeps the process inside the service's
//! request-rate contract no matter how many workers are running.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// A sliding-window rate limiter.
///
/// Tracks the timestamps of the last `max_calls` admissions; a new call is
/// admitted only when fewer than `max_calls` admissions fall inside the
/// trailing `period`. Waiters sleep until the oldest admission exits the
/// window and then re-check, so a burst of concurrent callers can never
/// overshoot the cap.
///
/// No fairness is guaranteed between waiters beyond eventual admission.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter admitting at most `max_calls` per `period`.
    ///
    /// A `max_calls` of zero is treated as one so that `acquire` always
    /// terminates.
    #[must_use]
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            period,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Creates a limiter admitting at most `max_calls` per second.
    #[must_use]
    pub fn per_second(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(1))
    }

    /// Blocks until an admission is available, then records it.
    ///
    /// The lock is only held while inspecting the window; waiters sleep
    /// outside it and re-check on wake, which handles bursts of concurrent
    /// callers correctly.
    pub async fn acquire(&self) {
        loop {
            let sleep_for = {
                let mut calls = self
                    .calls
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();

                // Admissions older than the window no longer count.
                while calls.front().is_some_and(|&t| t + self.period <= now) {
                    calls.pop_front();
                }

                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }

                match calls.front() {
                    Some(&oldest) => (oldest + self.period).saturating_duration_since(now),
                    None => continue,
                }
            };

            // A zero sleep still yields so other waiters make progress.
            tokio::time::sleep(sleep_for.max(Duration::from_millis(1))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_cap_without_waiting() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn second_window_waits_for_first_to_elapse() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..2 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Calls 3 and 4 must wait out the first window.
        for _ in 0..2 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_never_exceeds_cap_within_any_window() {
        const CAP: usize = 3;
        let period = Duration::from_secs(1);
        let limiter = Arc::new(RateLimiter::new(CAP, period));
        let admissions = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..(CAP * 2) {
            let limiter = Arc::clone(&limiter);
            let admissions = Arc::clone(&admissions);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                admissions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.expect("admission task panicked");
        }

        let admissions = admissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        assert_eq!(admissions.len(), CAP * 2);

        // Every period-length sliding window holds at most CAP admissions.
        for &window_start in &admissions {
            let in_window = admissions
                .iter()
                .filter(|&&t| t >= window_start && t < window_start + period)
                .count();
            assert!(in_window <= CAP, "{in_window} admissions in one window");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cap_is_clamped_to_one() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        limiter.acquire().await;
    }
}
