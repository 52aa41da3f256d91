//! Terminal signaling peer
//!
//! Joins a relay the same way a browser does, optionally sends one signaling
//! message, and logs everything the relay forwards to it. Handy for checking
//! that two browsers would see each other without opening a camera.

use std::fs;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::value::RawValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::config::PeerArgs;
use crate::model::message::SignalMessage;
use crate::util::init_log;

/// Main entry point for the signaling peer.
///
/// Runs until the relay closes the connection or Ctrl-C is pressed.
#[tokio::main]
pub async fn run(args: PeerArgs) -> Result<()> {
    init_log();

    // Reject a bad payload before bothering the relay.
    let outgoing = outgoing_message(&args)?;

    let (ws_stream, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("connecting to {}", args.url))?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    info!("✅ Connected to signaling relay at {}", args.url);

    if let Some(message) = outgoing {
        ws_sender.send(Message::text(message.encode()?)).await?;
        info!("📤 Sent {}", message.kind);
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => log_incoming(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("❌ Relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Signaling connection failed: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Leaving relay");
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

fn outgoing_message(args: &PeerArgs) -> Result<Option<SignalMessage>> {
    let Some(kind) = args.send else {
        return Ok(None);
    };

    let payload = match (&args.data, &args.file) {
        (Some(data), _) => Some(data.clone()),
        (None, Some(path)) => Some(
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let data = payload
        .map(|p| RawValue::from_string(p.trim().to_string()))
        .transpose()
        .context("payload is not valid JSON")?;

    Ok(Some(SignalMessage::new(kind, data)))
}

fn log_incoming(text: &str) {
    match SignalMessage::decode(text) {
        Ok(Some(message)) => info!(
            "📥 {}: {}",
            message.kind,
            message.payload().unwrap_or("<no payload>")
        ),
        Ok(None) => info!("📥 Unhandled event: {}", text),
        Err(e) => warn!("Relay sent something that is not an envelope ({}): {}", e, text),
    }
}
