//! Per-connection token bucket
//!
//! Admission control for outbound sends. Refill is computed lazily on each
//! call from the time elapsed since the last refill, so there is no timer
//! task and the outcome depends only on call timing.

use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

/// Token bucket rate limiter
///
/// Invariant: `0 <= tokens <= capacity` whenever the lock is released.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    /// Tokens added per second
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self::new_at(capacity, refill_per_sec, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`
    pub fn new_at(capacity: u32, refill_per_sec: u32, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate: refill_per_sec as f64,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Try to consume a token, returns true if allowed
    #[inline]
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Try to consume a token as of `now`
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill);
        let refill_amount = (elapsed.as_secs_f64() * self.refill_rate).floor();

        // Only move the clock when whole tokens were earned, so frequent
        // callers do not discard fractional progress.
        if refill_amount >= 1.0 {
            let refill = refill_amount.min(self.capacity as f64) as u32;
            state.tokens = state.tokens.saturating_add(refill).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (without refilling)
    pub fn available(&self) -> u32 {
        self.state.lock().tokens
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
