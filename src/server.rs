//! One port for everything
//!
//! The browser loads the page and opens the relay on the same origin, like
//! the socket.io setup it replaces. Every accepted connection is classified
//! by peeking at its request head: a WebSocket upgrade on [`SIGNALING_PATH`]
//! becomes a relay connection, anything else is piped to the `rouille` asset
//! server listening on loopback.

use std::{
    fs::File,
    io::{self, ErrorKind},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use rouille::{Request, Response, Server};
use tokio_tungstenite::tungstenite::{self, Message, WebSocket};
use tracing::{debug, info, warn};

use crate::config::ServerArgs;
use crate::error::RelayError;
use crate::model::{
    connection::{Connection, ConnectionId, Frame, OUTBOUND_QUEUE},
    event::RelayEvent,
    message::SignalMessage,
};
use crate::relay::Relay;
use crate::util::{init_log, select_host_address};

/// Path the browser opens its signaling WebSocket on.
pub const SIGNALING_PATH: &str = "/signaling";

// A client that opens a TCP connection and never completes the handshake
// should not pin a worker thread forever.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// A client that stops reading is disconnected once a write stalls this long.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// Request heads larger than this are never a signaling upgrade.
const HEAD_LIMIT: usize = 8 * 1024;

pub fn main(args: ServerArgs) -> anyhow::Result<()> {
    init_log();

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .with_context(|| format!("binding port {}", args.port))?;

    let server = start(listener, args.public_dir.clone(), args.poll_interval())?;

    let port = server.addr.port();
    info!("🚀 Signaling relay running on ws://0.0.0.0:{}{}", port, SIGNALING_PATH);
    match select_host_address() {
        Some(ip) => info!("Connect a browser to http://{}:{}", ip, port),
        None => info!("Connect a browser to http://localhost:{}", port),
    }

    server.wait();

    Ok(())
}

/// Threads serving one port: relay loop, accept loop and asset server.
pub struct RunningServer {
    pub addr: SocketAddr,
    accept: JoinHandle<()>,
    // Keeps the asset server alive for as long as the accept loop runs.
    _assets: (JoinHandle<()>, Sender<()>),
}

impl RunningServer {
    /// Blocks for as long as the accept loop runs.
    pub fn wait(self) {
        let _ = self.accept.join();
    }
}

/// Starts serving `listener`: assets from `public_dir`, the relay on
/// [`SIGNALING_PATH`].
pub fn start(
    listener: TcpListener,
    public_dir: PathBuf,
    poll_interval: Duration,
) -> anyhow::Result<RunningServer> {
    let addr = listener.local_addr()?;

    let assets = Server::new("127.0.0.1:0", move |request| {
        web_request(request, &public_dir)
    })
    .map_err(|e| anyhow!("starting the asset server: {e}"))?;
    let assets_addr = assets.server_addr();
    debug!("Asset server on {}", assets_addr);

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || Relay::new().run(rx));

    let accept = thread::spawn(move || accept_loop(listener, tx, assets_addr, poll_interval));

    Ok(RunningServer {
        addr,
        accept,
        _assets: assets.stoppable(),
    })
}

fn accept_loop(
    listener: TcpListener,
    events: Sender<RelayEvent>,
    assets: SocketAddr,
    poll_interval: Duration,
) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let events = events.clone();
                thread::spawn(move || route(stream, events, assets, poll_interval));
            }
            Err(e) => warn!("Failed to accept connection: {}", e),
        }
    }
}

fn route(
    stream: TcpStream,
    events: Sender<RelayEvent>,
    assets: SocketAddr,
    poll_interval: Duration,
) {
    let addr = stream.peer_addr().ok();

    match peek_head(&stream) {
        Ok(head) if is_signaling_upgrade(&head) => serve_connection(stream, events, poll_interval),
        Ok(_) => {
            if let Err(e) = forward(stream, assets) {
                debug!("Asset request from {:?} ended: {}", addr, e);
            }
        }
        Err(e) => debug!("No request from {:?}: {}", addr, e),
    }
}

/// Looks at the request head without consuming it, so whoever handles the
/// connection next still reads it from the start.
fn peek_head(stream: &TcpStream) -> io::Result<String> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut buf = vec![0; HEAD_LIMIT];

    loop {
        let n = stream.peek(&mut buf)?;
        let head = &buf[..n];

        let complete = head.windows(4).any(|w| w == b"\r\n\r\n");
        if complete || n == 0 || n == buf.len() || Instant::now() >= deadline {
            return Ok(String::from_utf8_lossy(head).into_owned());
        }

        // peek() returns what has arrived so far without waiting for more.
        thread::sleep(Duration::from_millis(2));
    }
}

/// `GET /signaling` carrying `Upgrade: websocket`.
fn is_signaling_upgrade(head: &str) -> bool {
    let mut lines = head.split("\r\n");

    let Some(request_line) = lines.next() else {
        return false;
    };
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return false;
    };
    let path = target.split('?').next().unwrap_or(target);

    method == "GET"
        && path == SIGNALING_PATH
        && lines.any(|line| match line.split_once(':') {
            Some((name, value)) => {
                name.trim().eq_ignore_ascii_case("upgrade")
                    && value.trim().eq_ignore_ascii_case("websocket")
            }
            None => false,
        })
}

/// Pipes a plain HTTP connection to the asset server until either side
/// closes.
fn forward(client: TcpStream, assets: SocketAddr) -> io::Result<()> {
    client.set_read_timeout(None)?;
    let upstream = TcpStream::connect(assets)?;

    let mut client_reader = client.try_clone()?;
    let mut upstream_writer = upstream.try_clone()?;
    let uplink = thread::spawn(move || {
        let _ = io::copy(&mut client_reader, &mut upstream_writer);
        let _ = upstream_writer.shutdown(Shutdown::Write);
    });

    let (mut upstream_reader, mut client_writer) = (upstream, client);
    let result = io::copy(&mut upstream_reader, &mut client_writer);
    let _ = client_writer.shutdown(Shutdown::Both);
    let _ = uplink.join();

    result.map(|_| ())
}

/// Runs one client session from handshake to disconnect.
///
/// The worker is the only producer of events for its connection, so the relay
/// always sees `Connected`, then the client's messages, then `Disconnected`.
fn serve_connection(stream: TcpStream, events: Sender<RelayEvent>, poll_interval: Duration) {
    let addr = stream.peer_addr().ok();

    let mut ws = match handshake(stream, poll_interval) {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Rejected connection from {:?}: {}", addr, e);
            return;
        }
    };

    let id = ConnectionId::next();
    let (tx, rx) = mpsc::sync_channel(OUTBOUND_QUEUE);

    if events
        .send(RelayEvent::Connected(Connection::new(id, addr, tx)))
        .is_err()
    {
        // Relay is gone, nothing to serve.
        return;
    }

    match pump(&mut ws, id, &rx, &events) {
        Ok(()) => {}
        Err(RelayError::Transport(
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
        )) => {}
        Err(e) => debug!("Connection({}) ended: {}", id, e),
    }

    let _ = events.send(RelayEvent::Disconnected(id));
    let _ = ws.close(None);
    let _ = ws.flush();
}

fn handshake(
    stream: TcpStream,
    poll_interval: Duration,
) -> Result<WebSocket<TcpStream>, RelayError> {
    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(tungstenite::Error::from)?;
    stream
        .set_write_timeout(Some(WRITE_TIMEOUT))
        .map_err(tungstenite::Error::from)?;
    stream.set_nodelay(true).map_err(tungstenite::Error::from)?;

    let ws = tungstenite::accept(stream).map_err(|e| RelayError::Handshake(e.to_string()))?;

    // From here on a read timeout just means "nothing to read yet".
    ws.get_ref()
        .set_read_timeout(Some(poll_interval))
        .map_err(tungstenite::Error::from)?;

    Ok(ws)
}

/// Alternates between reading client frames and writing queued frames until
/// either side hangs up.
fn pump(
    ws: &mut WebSocket<TcpStream>,
    id: ConnectionId,
    outbound: &Receiver<Frame>,
    events: &Sender<RelayEvent>,
) -> Result<(), RelayError> {
    loop {
        match read_message(ws)? {
            Some(Message::Text(text)) => {
                if let Some(message) = decode(id, &text) {
                    if events.send(RelayEvent::Message(id, message)).is_err() {
                        return Ok(());
                    }
                }
            }
            Some(Message::Close(_)) => return Ok(()),
            // Pings are answered by tungstenite, binary frames carry nothing
            // we relay.
            Some(_) | None => {}
        }

        loop {
            match outbound.try_recv() {
                // A stalled write fails with the write timeout and ends the
                // session like any other transport error.
                Ok(frame) => ws.send(Message::text(&*frame))?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }
}

fn read_message(ws: &mut WebSocket<TcpStream>) -> Result<Option<Message>, RelayError> {
    match ws.read() {
        Ok(message) => Ok(Some(message)),
        Err(tungstenite::Error::Io(e)) => match e.kind() {
            // Expected error for set_read_timeout(). One for windows, one for the rest.
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Ok(None),
            _ => Err(tungstenite::Error::Io(e).into()),
        },
        Err(e) => Err(e.into()),
    }
}

fn decode(id: ConnectionId, text: &str) -> Option<SignalMessage> {
    match SignalMessage::decode(text) {
        Ok(Some(message)) => Some(message),
        Ok(None) => {
            debug!("Connection({}) sent an event without handler, ignoring", id);
            None
        }
        Err(e) => {
            warn!("Connection({}) sent a frame that is not an envelope: {}", id, e);
            None
        }
    }
}

fn web_request(request: &Request, public_dir: &Path) -> Response {
    debug!("{} {}", request.method(), request.url());

    if request.method() == "GET" && request.url() == "/" {
        return match File::open(public_dir.join("index.html")) {
            Ok(file) => Response::from_file("text/html; charset=utf-8", file),
            Err(_) => Response::empty_404(),
        };
    }

    let response = rouille::match_assets(request, public_dir);
    if response.is_success() {
        response
    } else {
        Response::empty_404()
    }
}
