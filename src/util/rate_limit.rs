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

/// Outbound limiter for high-frequency client events.
///
/// Only GPS/position updates are throttled; combat and presence events always
/// go out.
#[derive(Clone)]
pub struct OutboundLimiter {
    position_limiter: Arc<Limiter>,
}

impl OutboundLimiter {
    pub fn new(position_updates_per_second: u32) -> Self {
        Self {
            position_limiter: create_limiter(position_updates_per_second),
        }
    }

    /// Check if a position update may be sent now (returns true if allowed)
    pub fn check_position_update(&self) -> bool {
        self.position_limiter.check().is_ok()
    }
}
