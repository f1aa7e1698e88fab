//! Handle the core uses to talk back to one client connection

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// Identity of one WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of a non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Outbound buffer full; message dropped
    Full,
    Closed,
}

/// Cloneable sender half of a connection's outbound queue
#[derive(Debug, Clone)]
pub struct PlayerConnection {
    pub id: ConnectionId,
    outbound: mpsc::Sender<ServerMsg>,
}

impl PlayerConnection {
    pub fn new(outbound: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound,
        }
    }

    /// False once the writer side of the connection has gone away
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a message without waiting
    pub fn send(&self, msg: ServerMsg) -> Delivery {
        match self.outbound.try_send(msg) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Which connection currently owns each player id
#[derive(Debug, Default)]
pub struct PlayerSessions {
    owners: DashMap<String, ConnectionId>,
}

impl PlayerSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a player id to a connection. False if another connection holds it.
    pub fn claim(&self, player_id: &str, connection: ConnectionId) -> bool {
        match self.owners.entry(player_id.to_string()) {
            Entry::Occupied(owner) => *owner.get() == connection,
            Entry::Vacant(slot) => {
                slot.insert(connection);
                true
            }
        }
    }

    /// Drop the claim if this connection holds it; true when it did
    pub fn release(&self, player_id: &str, connection: ConnectionId) -> bool {
        self.owners
            .remove_if(player_id, |_, owner| *owner == connection)
            .is_some()
    }

    #[cfg(test)]
    pub fn owner(&self, player_id: &str) -> Option<ConnectionId> {
        self.owners.get(player_id).map(|o| *o)
    }

    /// Number of handshaken connections
    pub fn len(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_id_has_one_owner_until_released() {
        let sessions = PlayerSessions::new();
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        assert!(sessions.claim("x", first));
        assert!(sessions.claim("x", first));
        assert!(!sessions.claim("x", second));

        assert!(!sessions.release("x", second));
        assert_eq!(sessions.owner("x"), Some(first));

        assert!(sessions.release("x", first));
        assert_eq!(sessions.len(), 0);
        assert!(sessions.claim("x", second));
    }

    #[test]
    fn closed_receiver_marks_connection_closed() {
        let (tx, rx) = mpsc::channel(1);
        let conn = PlayerConnection::new(tx);
        assert!(conn.is_open());
        drop(rx);
        assert!(!conn.is_open());
        assert_eq!(conn.send(ServerMsg::Pong { t: 1 }), Delivery::Closed);
    }

    #[test]
    fn full_buffer_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let conn = PlayerConnection::new(tx);
        assert_eq!(conn.send(ServerMsg::Pong { t: 1 }), Delivery::Sent);
        assert_eq!(conn.send(ServerMsg::Pong { t: 2 }), Delivery::Full);
        assert_eq!(rx.try_recv().unwrap(), ServerMsg::Pong { t: 1 });
    }
}
