//! Client-side multiplayer session for the Airsoft AR battle game.
//!
//! A session checks server health, connects over WebSocket and falls back to a
//! server-sent event stream plus HTTP POSTs when the socket is unavailable.
//! Inbound events reach the caller through a channel and optional per-kind
//! listeners; connection changes arrive as `connection_status` events.

pub mod config;
pub mod net;
pub mod protocol;
pub mod session;
pub mod util;

pub use config::{Config, ConfigError, Endpoints, LogFormat, SessionConfig};
pub use net::{HttpNetwork, Network, NetworkError};
pub use protocol::{
    ConnectionStatus, EventKind, GameMessage, GpsCoord, Payload, Position, SessionEvent,
    TransportKind,
};
pub use session::{ConnectionInfo, MultiplayerSession, Phase};
