use rand::Rng;
use std::time::{Duration, Instant};

/// Client-side pacing: at least `min_interval` between requests plus a
/// random jitter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    max_jitter: Duration,
    next_allowed: Option<Instant>,
}

const MAX_INTERVAL: Duration = Duration::from_secs(3600);

/// Seconds as a `Duration` no longer than `max`. Negative and NaN are zero.
pub(crate) fn clamped_secs(secs: f64, max: Duration) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).map_or(max, |d| d.min(max))
}

impl RateLimiter {
    pub fn new(min_interval_s: f64, jitter_s: f64) -> Self {
        Self {
            min_interval: clamped_secs(min_interval_s, MAX_INTERVAL),
            max_jitter: clamped_secs(jitter_s, MAX_INTERVAL),
            next_allowed: None,
        }
    }

    /// How long a request issued at `now` must wait, reserving the next slot.
    pub fn reserve(&mut self, now: Instant, jitter: Duration) -> Duration {
        let wait = self
            .next_allowed
            .map(|next| next.saturating_duration_since(now))
            .unwrap_or_default()
            + jitter;
        self.next_allowed = Some(now + wait + self.min_interval);
        wait
    }

    fn sample_jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..=self.max_jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    pub async fn wait(&mut self) {
        let jitter = self.sample_jitter();
        let delay = self.reserve(Instant::now(), jitter);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_does_not_wait() {
        let mut limiter = RateLimiter::new(1.0, 0.0);
        let now = Instant::now();
        assert_eq!(limiter.reserve(now, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_back_to_back_requests_are_spaced() {
        let mut limiter = RateLimiter::new(1.0, 0.0);
        let now = Instant::now();
        limiter.reserve(now, Duration::ZERO);
        assert_eq!(limiter.reserve(now, Duration::ZERO), Duration::from_secs(1));
        // The third request queues behind the second
        assert_eq!(limiter.reserve(now, Duration::ZERO), Duration::from_secs(2));
    }

    #[test]
    fn test_elapsed_interval_does_not_wait() {
        let mut limiter = RateLimiter::new(1.0, 0.0);
        let now = Instant::now();
        limiter.reserve(now, Duration::ZERO);
        let later = now + Duration::from_secs(5);
        assert_eq!(limiter.reserve(later, Duration::from_millis(20)), Duration::from_millis(20));
    }

    #[test]
    fn test_clamped_secs() {
        let max = Duration::from_secs(60);
        assert_eq!(clamped_secs(1.5, max), Duration::from_millis(1500));
        assert_eq!(clamped_secs(-3.0, max), Duration::ZERO);
        assert_eq!(clamped_secs(f64::NAN, max), Duration::ZERO);
        assert_eq!(clamped_secs(f64::INFINITY, max), max);
        assert_eq!(clamped_secs(1e30, max), max);
    }

    #[test]
    fn test_infinite_interval_is_capped() {
        let mut limiter = RateLimiter::new(f64::INFINITY, f64::INFINITY);
        let now = Instant::now();
        limiter.reserve(now, Duration::ZERO);
        assert_eq!(limiter.reserve(now, Duration::ZERO), MAX_INTERVAL);
    }
}
