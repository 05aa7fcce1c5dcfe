//! Push channel listener.
//!
//! The render server publishes events over Socket.IO (Engine.IO v4) on a
//! WebSocket transport. Only the handful of packet kinds needed to receive
//! events are handled:
//!
//! | Frame | Meaning | Reaction |
//! |-------|---------|----------|
//! | `0{...}` | Engine.IO open | send `40` (join default namespace) |
//! | `2` | ping | send `3` |
//! | `40...` | namespace joined | log |
//! | `42["event", payload]` | event | decode and dispatch |
//! | `41` / `1` | disconnect / close | end the connection |
//! | `{"event": ..., "data": ...}` | plain JSON envelope | decode and dispatch |
//!
//! `add_progress` goes to [`StateStore::on_push`]; telemetry goes to a
//! [`RenderProgressReporter`]. Malformed frames are logged and skipped.
//! The listener reconnects after `[push].reconnect_secs` until the shutdown
//! signal fires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

use tex_timelapse_core::events::PushEvent;

use crate::config::Config;
use crate::progress::{RenderProgressEvent, RenderProgressReporter};
use crate::store::StateStore;

/// One decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open,
    Close,
    Ping,
    Pong,
    Noop,
    Connected,
    Disconnected,
    ConnectError(String),
    Event { name: String, payload: Value },
}

/// Decode an Engine.IO/Socket.IO text frame or a plain JSON envelope.
pub fn decode_frame(text: &str) -> Result<Frame> {
    let text = text.trim();
    if text.starts_with('{') {
        return decode_envelope(text);
    }

    let mut chars = text.chars();
    let engine = chars.next().ok_or_else(|| anyhow!("empty frame"))?;
    let rest = chars.as_str();
    match engine {
        '0' => Ok(Frame::Open),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '6' => Ok(Frame::Noop),
        '4' => decode_socket_packet(rest),
        other => bail!("unknown engine.io packet type '{}'", other),
    }
}

fn decode_socket_packet(packet: &str) -> Result<Frame> {
    let mut chars = packet.chars();
    let kind = chars
        .next()
        .ok_or_else(|| anyhow!("empty socket.io packet"))?;
    let body = skip_namespace_and_ack(chars.as_str());
    match kind {
        '0' => Ok(Frame::Connected),
        '1' => Ok(Frame::Disconnected),
        '4' => Ok(Frame::ConnectError(body.to_string())),
        '2' => {
            let array: Vec<Value> =
                serde_json::from_str(body).context("event packet is not a JSON array")?;
            let mut items = array.into_iter();
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => bail!("event packet has no name"),
            };
            let payload = items.next().unwrap_or(Value::Null);
            Ok(Frame::Event { name, payload })
        }
        other => bail!("unsupported socket.io packet type '{}'", other),
    }
}

/// Strip an optional `/namespace,` prefix and numeric ack id.
fn skip_namespace_and_ack(body: &str) -> &str {
    let body = if body.starts_with('/') {
        body.split_once(',').map(|(_, rest)| rest).unwrap_or("")
    } else {
        body
    };
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn decode_envelope(text: &str) -> Result<Frame> {
    let value: Value = serde_json::from_str(text).context("invalid JSON envelope")?;
    let name = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("envelope has no 'event'"))?
        .to_string();
    let payload = value.get("data").cloned().unwrap_or(Value::Null);
    Ok(Frame::Event { name, payload })
}

pub struct PushListener {
    url: Url,
    reconnect: Duration,
    store: Arc<StateStore>,
    reporter: Arc<dyn RenderProgressReporter>,
}

impl PushListener {
    pub fn new(
        config: &Config,
        store: Arc<StateStore>,
        reporter: Arc<dyn RenderProgressReporter>,
    ) -> Result<Self> {
        Ok(Self {
            url: config.push_url()?,
            reconnect: Duration::from_secs(config.push.reconnect_secs),
            store,
            reporter,
        })
    }

    pub fn with_reconnect(mut self, reconnect: Duration) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Route one decoded event. Returns whether the store changed.
    pub fn dispatch(&self, event: PushEvent) -> bool {
        if let Some(progress) = RenderProgressEvent::from_push(&event) {
            tracing::debug!(event = ?progress, "render telemetry");
            self.reporter.report(progress);
            return false;
        }
        self.store.on_push(event)
    }

    /// Handle one text frame; returns a reply to send, if any.
    fn handle_text(&self, text: &str) -> Result<Option<&'static str>, Disconnect> {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, frame = text, "malformed push frame skipped");
                return Ok(None);
            }
        };
        match frame {
            Frame::Open => Ok(Some("40")),
            Frame::Ping => Ok(Some("3")),
            Frame::Connected => {
                tracing::debug!("push channel joined");
                Ok(None)
            }
            Frame::Event { name, payload } => {
                match PushEvent::decode(&name, payload) {
                    Ok(Some(event)) => {
                        self.dispatch(event);
                    }
                    Ok(None) => tracing::debug!(event = %name, "unknown push event ignored"),
                    Err(e) => {
                        let detail = format!("{:#}", e);
                        tracing::warn!(event = %name, error = %detail, "undecodable push event skipped");
                    }
                }
                Ok(None)
            }
            Frame::ConnectError(msg) => {
                tracing::warn!(error = %msg, "push channel refused connection");
                Err(Disconnect)
            }
            Frame::Close | Frame::Disconnected => Err(Disconnect),
            Frame::Pong | Frame::Noop => Ok(None),
        }
    }

    /// Connect, listen, and reconnect until `shutdown` turns true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.connect_once(&mut shutdown).await {
                Ok(true) => break,
                Ok(false) => tracing::debug!(url = %self.url, "push channel closed"),
                Err(e) => {
                    let detail = format!("{:#}", e);
                    tracing::warn!(url = %self.url, error = %detail, "push channel failed");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect) => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One connection. `Ok(true)` means shutdown was requested.
    async fn connect_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<bool> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        tracing::debug!(url = %self.url, "push channel connected");
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(true);
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        return Ok(false);
                    };
                    match msg.context("push channel read failed")? {
                        Message::Text(text) => match self.handle_text(text.as_str()) {
                            Ok(Some(reply)) => write.send(Message::text(reply)).await?,
                            Ok(None) => {}
                            Err(Disconnect) => return Ok(false),
                        },
                        Message::Close(_) => return Ok(false),
                        _ => {}
                    }
                }
            }
        }
    }
}

/// The server ended the session.
#[derive(Debug)]
struct Disconnect;
