//! Chat transport abstraction and built-in transports.
//!
//! A transport joins one chat channel and yields [`TransportEvent`]s: chat
//! messages plus connection state changes it detects on its own (drops,
//! reconnects). Only Twitch is implemented today, see [`twitch`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use chatvoz_core::types::{ConnectionState, RawChatEvent};

pub mod irc;
pub mod twitch;

/// Transport metadata for display.
#[derive(Debug, Clone)]
pub struct TransportMeta {
    pub label: String,
    pub description: String,
}

/// Something a connected transport reports.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(RawChatEvent),
    /// Connection state changed after the initial connect (drop, reconnect, final disconnect).
    State(ConnectionState),
}

/// Receiver for events from a connected transport.
pub type TransportReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Sender for events (used by transport implementations).
pub type TransportSender = mpsc::UnboundedSender<TransportEvent>;

/// Handle to stop a running transport connection.
pub struct TransportHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TransportHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Close the connection and wait for the task to wind down.
    /// A final `Disconnected` state event is sent before it exits.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// The core transport trait.
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    /// Unique transport identifier (e.g. "twitch").
    fn id(&self) -> &str;

    fn meta(&self) -> TransportMeta;

    /// Connect and join `channel`.
    ///
    /// Resolves once the channel is joined. Returns the event receiver and a
    /// handle to disconnect.
    async fn connect(&self, channel: &str) -> anyhow::Result<(TransportReceiver, TransportHandle)>;
}
