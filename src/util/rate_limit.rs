//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Per-connection inbound message limiter
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    message_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new(max_msgs_per_sec: u32) -> Self {
        Self {
            message_limiter: create_limiter(max_msgs_per_sec),
        }
    }

    /// Check if one more inbound message is allowed (returns true if allowed)
    pub fn check_message(&self) -> bool {
        self.message_limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_above_quota_is_refused() {
        let limiter = ConnectionRateLimiter::new(3);
        assert!(limiter.check_message());
        assert!(limiter.check_message());
        assert!(limiter.check_message());
        assert!(!limiter.check_message());
    }

    #[test]
    fn zero_quota_still_admits_one_message() {
        let limiter = ConnectionRateLimiter::new(0);
        assert!(limiter.check_message());
        assert!(!limiter.check_message());
    }
}
