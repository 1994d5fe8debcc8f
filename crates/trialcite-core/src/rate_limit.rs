//! Spacing of validation calls.
//!
//! The validator sends one request at a time and waits on a [`RequestPacer`]
//! before each. After a 429 the spacing grows, and it returns to the
//! configured interval once the service has been quiet for a minute.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Upper bound on the multiplier applied to the interval after 429s.
const MAX_SLOWDOWN: u32 = 16;
/// Quiet time after the last 429 before the interval is restored.
const RESTORE_AFTER: Duration = Duration::from_secs(60);
/// Wait used when Retry-After carries a date instead of a number.
const DATE_RETRY_WAIT: Duration = Duration::from_secs(5);

fn limiter(period: Duration) -> Option<Arc<Limiter>> {
    Quota::with_period(period).map(|q| Arc::new(Limiter::direct(q)))
}

/// Lets one validation request through per interval.
///
/// The limiter sits behind an [`ArcSwap`] so a 429 can install a slower one
/// while other callers still hold the old one.
pub struct RequestPacer {
    limiter: ArcSwap<Limiter>,
    interval: Duration,
    /// 1 at the configured interval, doubled on every 429.
    slowdown: AtomicU32,
    last_rate_limited: Mutex<Option<Instant>>,
}

impl RequestPacer {
    /// `None` when `interval` is zero: requests go out back to back.
    pub fn new(interval: Duration) -> Option<Self> {
        Some(Self {
            limiter: ArcSwap::new(limiter(interval)?),
            interval,
            slowdown: AtomicU32::new(1),
            last_rate_limited: Mutex::new(None),
        })
    }

    /// Resolves when the next request may go out.
    pub async fn acquire(&self) {
        self.maybe_restore();
        self.limiter.load().until_ready().await;
    }

    pub fn slowdown_factor(&self) -> u32 {
        self.slowdown.load(Ordering::SeqCst)
    }

    /// Record a 429 and double the interval, up to [`MAX_SLOWDOWN`] times the base.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_rate_limited.lock() {
            *last = Some(Instant::now());
        }
        let previous = self
            .slowdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(MAX_SLOWDOWN))
            })
            .unwrap_or(MAX_SLOWDOWN);
        let factor = (previous * 2).min(MAX_SLOWDOWN);

        let Some(slowed) = self.interval.checked_mul(factor) else {
            return;
        };
        if let Some(replacement) = limiter(slowed) {
            self.limiter.store(replacement);
            tracing::info!(factor, interval_ms = slowed.as_millis() as u64, "validation pacer slowed");
        }
    }

    fn maybe_restore(&self) {
        if self.slowdown.load(Ordering::SeqCst) == 1 {
            return;
        }
        let quiet = match self.last_rate_limited.lock() {
            Ok(last) => last.is_some_and(|t| t.elapsed() >= RESTORE_AFTER),
            Err(_) => false,
        };
        if quiet && let Some(replacement) = limiter(self.interval) {
            self.slowdown.store(1, Ordering::SeqCst);
            self.limiter.store(replacement);
            tracing::debug!("validation pacer back to its base interval");
        }
    }
}

/// Read a Retry-After header.
///
/// A number is taken as seconds. Anything that looks like an HTTP date gets
/// [`DATE_RETRY_WAIT`] rather than being parsed.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    match value.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) if value.ends_with("GMT") || value.contains(',') => Some(DATE_RETRY_WAIT),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_integer_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::from_secs(0)));
    }

    #[test]
    fn parse_http_date_falls_back() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn parse_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn zero_period_disables_pacing() {
        assert!(RequestPacer::new(Duration::ZERO).is_none());
        assert!(RequestPacer::new(Duration::from_millis(500)).is_some());
    }

    #[test]
    fn rate_limited_doubles_up_to_cap() {
        let pacer = RequestPacer::new(Duration::from_millis(10)).unwrap();
        assert_eq!(pacer.slowdown_factor(), 1);
        pacer.on_rate_limited();
        assert_eq!(pacer.slowdown_factor(), 2);
        for _ in 0..10 {
            pacer.on_rate_limited();
        }
        assert_eq!(pacer.slowdown_factor(), MAX_SLOWDOWN);
    }

    #[tokio::test]
    async fn acquires_are_spaced_by_the_interval() {
        let interval = Duration::from_millis(40);
        let pacer = RequestPacer::new(interval).unwrap();
        let start = Instant::now();
        for _ in 0..4 {
            pacer.acquire().await;
        }
        // governor reads its own clock, allow it a millisecond of skew
        assert!(start.elapsed() + Duration::from_millis(1) >= interval * 3);
    }

    #[tokio::test]
    async fn first_acquire_is_immediate() {
        let pacer = RequestPacer::new(Duration::from_secs(60)).unwrap();
        let start = Instant::now();
        pacer.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
