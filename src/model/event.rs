//! Events consumed by the relay loop
//!
//! Connection workers translate transport activity into these events and
//! push them onto the relay's single queue.

use crate::model::{
    connection::{Connection, ConnectionId},
    message::SignalMessage,
};

/// One unit of work for the relay.
#[derive(Debug)]
pub enum RelayEvent {
    /// A client finished the WebSocket handshake.
    Connected(Connection),

    /// A client sent a signaling message.
    Message(ConnectionId, SignalMessage),

    /// A client's transport closed.
    Disconnected(ConnectionId),
}

impl RelayEvent {
    /// The connection the event originates from.
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            RelayEvent::Connected(c) => c.id,
            RelayEvent::Message(id, _) | RelayEvent::Disconnected(id) => *id,
        }
    }
}
