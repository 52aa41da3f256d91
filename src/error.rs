use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised around the relay. None of them reach the relay loop itself:
/// the connection workers log them and treat the session as closed.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("Malformed signaling envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("Signaling frame is not a JSON object")]
    NotAnObject,
}
