//! The signaling relay
//!
//! The relay owns the registry of open connections and forwards every
//! signaling message to all connections except the one it came from. It makes
//! no assumption about how many peers take part: with two clients this is
//! "send to the other side", with more everybody sees everybody's traffic.
//!
//! All state lives on the single thread running [`Relay::run`]. Connection
//! workers only talk to it through the event queue, so events are handled one
//! at a time in arrival order and no locking is needed.

use std::sync::{mpsc::Receiver, Arc};

use tracing::{debug, info, warn};

use crate::model::{
    connection::{Connection, ConnectionId, Delivery, Frame},
    event::RelayEvent,
    message::SignalMessage,
};

#[derive(Debug, Default)]
pub struct Relay {
    // Kept in registration order, which is also the fan-out order.
    connections: Vec<Connection>,
}

impl Relay {
    pub fn new() -> Relay {
        Relay::default()
    }

    /// Handles events until every producer has hung up, then drops all
    /// remaining connections.
    pub fn run(mut self, rx: Receiver<RelayEvent>) {
        while let Ok(event) = rx.recv() {
            self.handle(event);
        }

        if !self.is_empty() {
            info!("Relay shutting down, closing {} connection(s)", self.len());
        }
        self.connections.clear();
    }

    pub fn handle(&mut self, event: RelayEvent) {
        debug!("Event from Connection({})", event.connection_id());

        match event {
            RelayEvent::Connected(connection) => self.on_connect(connection),
            RelayEvent::Message(from, message) => {
                self.on_message(from, &message);
            }
            RelayEvent::Disconnected(id) => {
                self.on_disconnect(id);
            }
        }
    }

    pub fn on_connect(&mut self, connection: Connection) {
        info!("✅ {} connected", connection);
        self.connections.push(connection);
    }

    /// Forwards `message` to every registered connection except `from`.
    ///
    /// The payload is never looked at. Returns the number of connections the
    /// frame was queued for; a frame addressed to a worker that is already
    /// gone, or to a client whose queue is full, is dropped without telling
    /// the sender.
    pub fn on_message(&mut self, from: ConnectionId, message: &SignalMessage) -> usize {
        if !self.contains(from) {
            // Workers emit Disconnected last, so this only happens when
            // events are fed by hand.
            debug!("Dropping {} from unknown Connection({})", message.kind, from);
            return 0;
        }

        info!("📡 Received {} from Connection({})", message.kind, from);

        let frame: Frame = match message.encode() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!("Could not encode {} from Connection({}): {}", message.kind, from, e);
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in &self.connections {
            if connection.id == from {
                // Do not propagate to originating connection.
                continue;
            }

            match connection.send(&frame) {
                Delivery::Queued => delivered += 1,
                Delivery::Full => warn!("{} is not reading, dropped {}", connection, message.kind),
                Delivery::Gone => debug!("{} is gone, dropped {}", connection, message.kind),
            }
        }

        if delivered == 0 {
            debug!("No recipients for {} from Connection({})", message.kind, from);
        }

        delivered
    }

    /// Removes a connection from all future fan-outs.
    ///
    /// Returns `false` if it was not registered; calling this twice is fine.
    pub fn on_disconnect(&mut self, id: ConnectionId) -> bool {
        let Some(pos) = self.connections.iter().position(|c| c.id == id) else {
            return false;
        };

        let connection = self.connections.remove(pos);
        info!(
            "❌ {} disconnected after {}s",
            connection,
            connection.uptime().num_seconds()
        );

        true
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.iter().any(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver, TryRecvError};
    use std::thread;

    use serde_json::value::RawValue;

    use super::*;
    use crate::model::{connection::OUTBOUND_QUEUE, message::SignalKind};

    struct TestClient {
        id: ConnectionId,
        rx: Receiver<Frame>,
    }

    impl TestClient {
        fn received(&self) -> Vec<String> {
            self.rx.try_iter().map(|f| f.to_string()).collect()
        }
    }

    fn connect(relay: &mut Relay) -> TestClient {
        let (tx, rx) = mpsc::sync_channel(OUTBOUND_QUEUE);
        let id = ConnectionId::next();
        relay.on_connect(Connection::new(id, None, tx));
        TestClient { id, rx }
    }

    fn message(kind: SignalKind, payload: &str) -> SignalMessage {
        let data = RawValue::from_string(payload.to_string()).unwrap();
        SignalMessage::new(kind, Some(data))
    }

    #[test]
    fn offer_reaches_the_other_peer_only() {
        let mut relay = Relay::new();
        let x = connect(&mut relay);
        let y = connect(&mut relay);

        let delivered = relay.on_message(x.id, &message(SignalKind::Offer, r#"{"sdp":"v=0..."}"#));

        assert_eq!(delivered, 1);
        assert_eq!(y.received(), vec![r#"{"event":"offer","data":{"sdp":"v=0..."}}"#]);
        assert!(x.received().is_empty());
    }

    #[test]
    fn message_without_recipients_is_dropped() {
        let mut relay = Relay::new();
        let x = connect(&mut relay);

        let candidate = message(
            SignalKind::IceCandidate,
            r#"{"candidate":"candidate:1 1 UDP 2122252543 192.168.1.2 54321 typ host"}"#,
        );
        assert_eq!(relay.on_message(x.id, &candidate), 0);
        assert!(x.received().is_empty());

        // A late joiner does not get anything replayed.
        let y = connect(&mut relay);
        assert!(y.received().is_empty());
    }

    #[test]
    fn answer_fans_out_to_everyone_but_the_sender() {
        let mut relay = Relay::new();
        let a = connect(&mut relay);
        let b = connect(&mut relay);
        let c = connect(&mut relay);

        let delivered = relay.on_message(b.id, &message(SignalKind::Answer, r#"{"type":"answer"}"#));

        let expected = vec![r#"{"event":"answer","data":{"type":"answer"}}"#.to_string()];
        assert_eq!(delivered, 2);
        assert_eq!(a.received(), expected);
        assert_eq!(c.received(), expected);
        assert!(b.received().is_empty());
    }

    #[test]
    fn each_receiver_gets_exactly_one_copy() {
        let mut relay = Relay::new();
        let clients: Vec<TestClient> = (0..5).map(|_| connect(&mut relay)).collect();

        for kind in [SignalKind::Offer, SignalKind::Answer, SignalKind::IceCandidate] {
            let sender = &clients[2];
            relay.on_message(sender.id, &message(kind, "[1,2,3]"));

            for client in &clients {
                let frames = client.received();
                if client.id == sender.id {
                    assert!(frames.is_empty());
                } else {
                    assert_eq!(frames, vec![format!(r#"{{"event":"{}","data":[1,2,3]}}"#, kind)]);
                }
            }
        }
    }

    #[test]
    fn disconnected_connection_receives_nothing_more() {
        let mut relay = Relay::new();
        let a = connect(&mut relay);
        let b = connect(&mut relay);
        let c = connect(&mut relay);

        assert!(relay.on_disconnect(a.id));
        assert!(!relay.contains(a.id));

        relay.on_message(b.id, &message(SignalKind::Offer, "{}"));
        relay.on_message(c.id, &message(SignalKind::Answer, "{}"));

        // Dropping the connection closed its queue.
        assert_eq!(a.rx.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(b.received().len(), 1);
        assert_eq!(c.received().len(), 1);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut relay = Relay::new();
        let a = connect(&mut relay);
        let b = connect(&mut relay);

        assert!(relay.on_disconnect(a.id));
        assert!(!relay.on_disconnect(a.id));
        assert!(!relay.on_disconnect(ConnectionId::next()));
        assert_eq!(relay.len(), 1);
        assert!(relay.contains(b.id));
    }

    #[test]
    fn messages_keep_their_order() {
        let mut relay = Relay::new();
        let a = connect(&mut relay);
        let b = connect(&mut relay);
        let c = connect(&mut relay);

        relay.on_message(a.id, &message(SignalKind::Offer, "1"));
        relay.on_message(b.id, &message(SignalKind::IceCandidate, "2"));
        relay.on_message(a.id, &message(SignalKind::IceCandidate, "3"));
        relay.on_message(a.id, &message(SignalKind::IceCandidate, "4"));

        assert_eq!(
            c.received(),
            vec![
                r#"{"event":"offer","data":1}"#,
                r#"{"event":"ice-candidate","data":2}"#,
                r#"{"event":"ice-candidate","data":3}"#,
                r#"{"event":"ice-candidate","data":4}"#,
            ]
        );
        assert_eq!(
            b.received(),
            vec![
                r#"{"event":"offer","data":1}"#,
                r#"{"event":"ice-candidate","data":3}"#,
                r#"{"event":"ice-candidate","data":4}"#,
            ]
        );
        assert_eq!(a.received(), vec![r#"{"event":"ice-candidate","data":2}"#]);
    }

    #[test]
    fn gone_worker_does_not_affect_other_receivers() {
        let mut relay = Relay::new();
        let a = connect(&mut relay);
        let b = connect(&mut relay);
        let c = connect(&mut relay);

        // b's worker exited but its Disconnected event has not arrived yet.
        drop(b.rx);

        assert_eq!(relay.on_message(a.id, &message(SignalKind::Offer, "{}")), 1);
        assert_eq!(c.received().len(), 1);
        assert!(relay.contains(b.id));
    }

    #[test]
    fn client_that_never_reads_does_not_hold_up_the_others() {
        let mut relay = Relay::new();
        let sender = connect(&mut relay);
        let stalled = connect(&mut relay);
        let reader = connect(&mut relay);

        for n in 0..OUTBOUND_QUEUE + 10 {
            let delivered = relay.on_message(sender.id, &message(SignalKind::IceCandidate, &n.to_string()));
            assert_eq!(reader.received(), vec![format!(r#"{{"event":"ice-candidate","data":{}}}"#, n)]);

            let expected = if n < OUTBOUND_QUEUE { 2 } else { 1 };
            assert_eq!(delivered, expected);
        }

        // Still registered: only the transport decides when it is gone.
        assert!(relay.contains(stalled.id));
        assert_eq!(stalled.rx.try_iter().count(), OUTBOUND_QUEUE);
    }

    #[test]
    fn message_from_unknown_connection_is_dropped() {
        let mut relay = Relay::new();
        let a = connect(&mut relay);

        assert_eq!(relay.on_message(ConnectionId::next(), &message(SignalKind::Offer, "{}")), 0);
        assert!(a.received().is_empty());
    }

    #[test]
    fn run_processes_queued_events_in_order() {
        let (events_tx, events_rx) = mpsc::channel();
        let relay = thread::spawn(move || Relay::new().run(events_rx));

        let (x_tx, x_rx) = mpsc::sync_channel(OUTBOUND_QUEUE);
        let (y_tx, y_rx) = mpsc::sync_channel(OUTBOUND_QUEUE);
        let x = ConnectionId::next();
        let y = ConnectionId::next();

        events_tx.send(RelayEvent::Connected(Connection::new(x, None, x_tx))).unwrap();
        events_tx.send(RelayEvent::Connected(Connection::new(y, None, y_tx))).unwrap();
        events_tx.send(RelayEvent::Message(x, message(SignalKind::Offer, r#"{"sdp":"v=0..."}"#))).unwrap();
        events_tx.send(RelayEvent::Disconnected(y)).unwrap();
        events_tx.send(RelayEvent::Message(x, message(SignalKind::IceCandidate, "{}"))).unwrap();
        events_tx.send(RelayEvent::Disconnected(x)).unwrap();
        drop(events_tx);

        relay.join().unwrap();

        let y_frames: Vec<String> = y_rx.iter().map(|f| f.to_string()).collect();
        assert_eq!(y_frames, vec![r#"{"event":"offer","data":{"sdp":"v=0..."}}"#]);
        assert_eq!(x_rx.iter().count(), 0);
    }
}
