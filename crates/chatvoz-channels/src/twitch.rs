//! Twitch chat over IRC-on-WebSocket.
//!
//! Connects anonymously (`justinfanNNNNN`) unless a nick and OAuth token are
//! configured, requests the tags and commands capabilities, joins one channel
//! and forwards every PRIVMSG as a [`RawChatEvent`]. Dropped connections are
//! re-established with exponential backoff when `reconnect` is enabled.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatvoz_core::config::{TwitchConfig, normalize_channel};
use chatvoz_core::types::{ConnectionState, RawChatEvent};

use crate::irc::{IrcMessage, strip_action};
use crate::{
    ChatTransport, TransportEvent, TransportHandle, TransportMeta, TransportReceiver,
    TransportSender,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECONNECT_BASE_MS: u64 = 1_000;
const RECONNECT_MAX_MS: u64 = 30_000;

/// Login identity for the IRC session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub nick: String,
    pub pass: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        let n: u32 = rand::rng().random_range(10_000..100_000);
        Self {
            nick: format!("justinfan{n}"),
            pass: None,
        }
    }

    /// Configured nick/token pair, or anonymous when either is missing.
    pub fn from_config(config: &TwitchConfig) -> Self {
        let nick = config
            .nick
            .as_deref()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty());
        match (nick, config.resolve_token()) {
            (Some(nick), Some(token)) => {
                let pass = if token.starts_with("oauth:") {
                    token
                } else {
                    format!("oauth:{token}")
                };
                Self {
                    nick,
                    pass: Some(pass),
                }
            }
            _ => Self::anonymous(),
        }
    }
}

/// Lines sent right after the socket opens.
pub fn login_lines(credentials: &Credentials, channel: &str) -> Vec<String> {
    let mut lines = vec!["CAP REQ :twitch.tv/tags twitch.tv/commands".to_string()];
    if let Some(pass) = &credentials.pass {
        lines.push(format!("PASS {pass}"));
    }
    lines.push(format!("NICK {}", credentials.nick));
    lines.push(format!("JOIN #{channel}"));
    lines
}

/// Backoff before reconnect attempt `attempt` (1-based): 1s growing by 1.5x, capped at 30s.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16) as i32;
    let ms = (RECONNECT_BASE_MS as f64 * 1.5f64.powi(exp)) as u64;
    Duration::from_millis(ms.min(RECONNECT_MAX_MS))
}

/// Convert a PRIVMSG into a chat event. Returns `None` for anything else.
pub fn privmsg_to_event(msg: &IrcMessage, own_nick: &str) -> Option<RawChatEvent> {
    if msg.command != "PRIVMSG" {
        return None;
    }
    let username = msg.nick().map(str::to_string);
    let is_self = username
        .as_deref()
        .is_some_and(|u| u.eq_ignore_ascii_case(own_nick));
    Some(RawChatEvent {
        channel: msg.channel().unwrap_or_default().to_string(),
        username,
        tags: msg.tags.clone(),
        text: strip_action(msg.trailing.as_deref().unwrap_or_default()).to_string(),
        is_self,
        timestamp: Utc::now(),
    })
}

pub struct TwitchTransport {
    config: TwitchConfig,
}

impl TwitchTransport {
    pub fn new(config: TwitchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChatTransport for TwitchTransport {
    fn id(&self) -> &str {
        "twitch"
    }

    fn meta(&self) -> TransportMeta {
        TransportMeta {
            label: "Twitch".into(),
            description: "Twitch chat via IRC over WebSocket".into(),
        }
    }

    async fn connect(&self, channel: &str) -> anyhow::Result<(TransportReceiver, TransportHandle)> {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            anyhow::bail!("Channel name is empty");
        }

        // Err only means a process-wide provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let credentials = Credentials::from_config(&self.config);
        let ws = open_session(&self.config, &credentials, &channel).await?;
        info!(%channel, nick = %credentials.nick, "Joined Twitch channel");

        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let cancel = CancellationToken::new();

        let session = Session {
            config: self.config.clone(),
            credentials,
            channel,
            event_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(session.run(ws));

        Ok((event_rx, TransportHandle::new(cancel, task)))
    }
}

/// Open the socket, log in, and wait until the channel join is confirmed.
async fn open_session(
    config: &TwitchConfig,
    credentials: &Credentials,
    channel: &str,
) -> anyhow::Result<WsStream> {
    let timeout = Duration::from_secs(config.connect_timeout_secs.max(1));
    match tokio::time::timeout(timeout, handshake(config, credentials, channel)).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("Timed out joining #{channel} after {}s", timeout.as_secs()),
    }
}

async fn handshake(
    config: &TwitchConfig,
    credentials: &Credentials,
    channel: &str,
) -> anyhow::Result<WsStream> {
    let (mut ws, _) = connect_async(config.url.as_str()).await?;
    debug!(url = %config.url, "WebSocket connected");

    for line in login_lines(credentials, channel) {
        ws.send(Message::Text(line.into())).await?;
    }

    while let Some(frame) = ws.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        for line in text.lines() {
            let Some(msg) = IrcMessage::parse(line) else {
                continue;
            };
            match msg.command.as_str() {
                "PING" => {
                    let pong = format!("PONG :{}", msg.trailing.as_deref().unwrap_or_default());
                    ws.send(Message::Text(pong.into())).await?;
                }
                "NOTICE" => {
                    let notice = msg.trailing.unwrap_or_default();
                    if notice.contains("authentication failed")
                        || notice.contains("Improperly formatted auth")
                    {
                        anyhow::bail!("Twitch login rejected: {notice}");
                    }
                    debug!(%notice, "Twitch notice during login");
                }
                "JOIN" if msg.channel() == Some(channel)
                    && msg
                        .nick()
                        .is_some_and(|n| n.eq_ignore_ascii_case(&credentials.nick)) =>
                {
                    return Ok(ws);
                }
                "ROOMSTATE" if msg.channel() == Some(channel) => return Ok(ws),
                _ => {}
            }
        }
    }

    anyhow::bail!("Connection closed before joining #{channel}")
}

/// Why a live connection stopped.
#[derive(Debug)]
enum SessionEnd {
    /// Operator disconnect or the event receiver went away.
    Cancelled,
    Lost(String),
}

struct Session {
    config: TwitchConfig,
    credentials: Credentials,
    channel: String,
    event_tx: TransportSender,
    cancel: CancellationToken,
}

impl Session {
    async fn run(self, mut ws: WsStream) {
        loop {
            match self.pump(&mut ws).await {
                SessionEnd::Cancelled => {
                    let _ = ws.close(None).await;
                    info!(channel = %self.channel, "Twitch connection closed");
                    self.emit_state(ConnectionState::Disconnected { reason: None });
                    return;
                }
                SessionEnd::Lost(reason) => {
                    warn!(channel = %self.channel, %reason, "Twitch connection lost");
                    if !self.config.reconnect {
                        self.emit_state(ConnectionState::Disconnected {
                            reason: Some(reason),
                        });
                        return;
                    }
                    match self.reconnect().await {
                        Ok(new_ws) => {
                            ws = new_ws;
                            self.emit_state(ConnectionState::Connected {
                                channel: self.channel.clone(),
                            });
                        }
                        Err(end) => {
                            let reason = match end {
                                SessionEnd::Cancelled => None,
                                SessionEnd::Lost(r) => Some(r),
                            };
                            self.emit_state(ConnectionState::Disconnected { reason });
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Read frames until the connection ends.
    async fn pump(&self, ws: &mut WsStream) -> SessionEnd {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                frame = ws.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = ws.send(Message::Pong(payload)).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".into());
                    return SessionEnd::Lost(reason);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("connection closed".into()),
            };

            for line in text.lines() {
                let Some(msg) = IrcMessage::parse(line) else {
                    continue;
                };
                match msg.command.as_str() {
                    "PING" => {
                        let pong = format!("PONG :{}", msg.trailing.as_deref().unwrap_or_default());
                        if let Err(e) = ws.send(Message::Text(pong.into())).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    "RECONNECT" => return SessionEnd::Lost("server requested reconnect".into()),
                    "PRIVMSG" => {
                        if let Some(event) = privmsg_to_event(&msg, &self.credentials.nick) {
                            if self.event_tx.send(TransportEvent::Message(event)).is_err() {
                                debug!("Event receiver dropped, closing connection");
                                return SessionEnd::Cancelled;
                            }
                        }
                    }
                    other => debug!(command = other, "Ignoring IRC command"),
                }
            }
        }
    }

    async fn reconnect(&self) -> Result<WsStream, SessionEnd> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if let Some(max) = self.config.max_reconnect_attempts {
                if attempt > max {
                    return Err(SessionEnd::Lost(format!(
                        "gave up after {max} reconnect attempts"
                    )));
                }
            }

            self.emit_state(ConnectionState::Connecting {
                channel: self.channel.clone(),
            });
            let delay = reconnect_delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to Twitch");

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionEnd::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionEnd::Cancelled),
                result = open_session(&self.config, &self.credentials, &self.channel) => result,
            };
            match result {
                Ok(ws) => {
                    info!(channel = %self.channel, attempt, "Reconnected to Twitch");
                    return Ok(ws);
                }
                Err(e) => warn!(%e, attempt, "Reconnect attempt failed"),
            }
        }
    }

    fn emit_state(&self, state: ConnectionState) {
        let _ = self.event_tx.send(TransportEvent::State(state));
    }
}
