use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use std::num::NonZeroU32;

/// Token bucket shared by the workers of a probe run; one permit per batch
/// launch.
pub struct RateLimiter {
    limiter: Governor<NotKeyed, InMemoryState, DefaultClock>,
    per_second: u32,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Governor::direct(Quota::per_second(rate)),
            per_second: rate.get(),
        }
    }

    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    pub fn per_second(&self) -> u32 {
        self.per_second
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn burst_then_throttle() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn zero_rate_is_clamped() {
        assert_eq!(RateLimiter::new(0).per_second(), 1);
    }
}
