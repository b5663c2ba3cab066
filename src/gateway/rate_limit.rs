//! Process-wide limit on outbound backend calls
//!
//! Built once at startup and shared by every gateway through an `Arc`.
//! Tests build their own instance, so there is nothing global to reset.

use crate::error::BackendError;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct OutboundRateLimiter {
    limiter: DirectRateLimiter,
    issued: AtomicU64,
    denied: AtomicU64,
}

impl OutboundRateLimiter {
    /// Allows a burst of `calls` and refills at `calls` per minute. Zero is treated as one.
    pub fn per_minute(calls: u32) -> Self {
        let calls = NonZeroU32::new(calls).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(calls)),
            issued: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    /// Take one call from the budget, or report it as rate limited
    pub fn try_acquire(&self) -> Result<(), BackendError> {
        match self.limiter.check() {
            Ok(()) => {
                self.issued.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => {
                self.denied.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::RateLimited)
            }
        }
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::SeqCst)
    }
}
