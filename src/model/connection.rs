use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc::{SyncSender, TrySendError},
    Arc,
};

use chrono::{DateTime, Utc};

/// A text frame queued for one connection. Shared between all receivers of
/// the same fan-out.
pub type Frame = Arc<str>;

/// Frames a connection may have waiting before further ones are dropped.
/// Room for an offer and a burst of ICE candidates.
pub const OUTBOUND_QUEUE: usize = 64;

/// What happened to a frame handed to [`Connection::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The client is not reading; the frame was dropped.
    Full,
    /// The worker already exited; the frame was dropped.
    Gone,
}

/// One open client session as seen by the relay.
///
/// The relay owns every `Connection` for as long as the session is open.
/// Dropping it closes the outbound queue, which tells the connection worker
/// that nothing more will be written.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    outbound: SyncSender<Frame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl Deref for ConnectionId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ConnectionId {
    /// Allocates an identifier never handed out before in this process.
    pub fn next() -> ConnectionId {
        static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
        ConnectionId(ID_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        addr: Option<SocketAddr>,
        outbound: SyncSender<Frame>,
    ) -> Connection {
        Connection {
            id,
            addr,
            connected_at: Utc::now(),
            outbound,
        }
    }

    /// Queues a frame for the client without blocking the relay.
    pub fn send(&self, frame: &Frame) -> Delivery {
        match self.outbound.try_send(Frame::clone(frame)) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Disconnected(_)) => Delivery::Gone,
        }
    }

    /// How long the session has been open.
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "Connection({}, {})", self.id, addr),
            None => write!(f, "Connection({})", self.id),
        }
    }
}
