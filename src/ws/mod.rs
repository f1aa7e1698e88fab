//! WebSocket gateway, connection handles and wire protocol

pub mod connection;
pub mod handler;
pub mod protocol;

pub use connection::{ConnectionId, Delivery, PlayerConnection, PlayerSessions};
