//! Per-connection token bucket (§4.1 "Back-pressure"). Distinct from
//! `middleware::rate_limit`'s per-IP HTTP limiter: one bucket lives inside
//! each producer connection task, not in a shared map, since the gateway's
//! wire protocol has no per-request IP to key on beyond the connection
//! itself.

use std::time::Instant;

pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        Self {
            capacity: burst.max(1) as f64,
            tokens: burst.max(1) as f64,
            refill_per_sec: rate_per_sec.max(1) as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Returns `true` and consumes one token if the bucket has capacity.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_consumed_then_exhausted() {
        let mut bucket = TokenBucket::new(1, 3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }
}
