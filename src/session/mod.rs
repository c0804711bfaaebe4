//! Multiplayer session: transports, retries and event delivery

pub mod backoff;
pub mod breaker;
mod driver;
mod handle;
pub mod health;
pub mod router;


pub use backoff::Backoff;
pub use breaker::{CircuitBreaker, FallbackOutcome, HttpFallback};
pub use driver::{ConnectionInfo, Phase};
pub use handle::MultiplayerSession;
pub use router::{parse_frame, EventRouter, Handler, HandlerRegistry};
