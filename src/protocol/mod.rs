//! Wire protocol shared with the game server

pub mod message;

pub use message::{
    ConnectionStatus, EventKind, GameMessage, GpsCoord, Payload, Position, SessionEvent,
    TransportKind,
};
