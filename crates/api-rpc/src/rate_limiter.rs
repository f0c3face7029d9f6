//! Rate Limiter (Token Bucket Algorithm)
//!
//! Caps how fast clients can submit jobs.

use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by all submit calls
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Example
    /// Allow 10 submissions/sec with burst of 20:
    /// `RateLimiter::new(20, 10)`
    pub fn new(max_tokens: u32, refill_rate: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: f64::from(max_tokens),
                last_refill: Instant::now(),
            }),
            max_tokens: f64::from(max_tokens),
            refill_rate: f64::from(refill_rate),
        }
    }

    /// Consume one token; `false` when rate limited
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens left (for monitoring)
    pub fn remaining(&self) -> f64 {
        self.bucket.lock().unwrap_or_else(|p| p.into_inner()).tokens
    }
}
