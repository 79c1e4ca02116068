//! Continuous-refill token bucket.
//!
//! Tokens are fractional so refill is smooth; every admission costs exactly one
//! token. The bucket itself is `&mut self` and lock-free; callers that share a
//! bucket across tasks wrap it in their own mutex (one lock per bucket).

use std::time::Instant;

use crate::error::{BatchGateError, Result};

#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    /// Build a full bucket. `rate` is tokens/sec, `burst` the capacity.
    pub fn new(rate: f64, burst: u32) -> Result<Self> {
        Self::new_at(rate, burst, Instant::now())
    }

    /// Same as [`TokenBucket::new`] with an explicit reference instant.
    pub fn new_at(rate: f64, burst: u32, now: Instant) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(BatchGateError::BadRequest(format!(
                "rate must be a positive number, got {rate}"
            )));
        }
        if burst == 0 {
            return Err(BatchGateError::BadRequest("burst must be > 0".into()));
        }
        let capacity = burst as f64;
        Ok(Self {
            rate,
            capacity,
            tokens: capacity,
            last: now,
        })
    }

    /// Check-and-consume one token.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Check-and-consume one token as of `now`. A reject consumes nothing.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently held (as of the last refill).
    pub fn available(&self) -> f64 {
        self.tokens
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&mut self, now: Instant) {
        // Instants from before the last refill add nothing.
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        if now > self.last {
            self.last = now;
        }
    }
}
