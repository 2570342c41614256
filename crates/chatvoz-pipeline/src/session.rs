//! A joined chat channel feeding the ingestion adapter.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use chatvoz_channels::{ChatTransport, TransportEvent, TransportHandle, TransportReceiver};
use chatvoz_core::config::normalize_channel;
use chatvoz_core::error::{ChatvozError, Result};
use chatvoz_core::types::ConnectionState;

use crate::ingest::IngestionAdapter;
use crate::presenter::Presenter;
use crate::queue::SpeechQueue;

/// Everything a session needs from the surrounding pipeline.
#[derive(Clone)]
pub struct SessionContext {
    pub ingest: Arc<IngestionAdapter>,
    pub presenter: Arc<dyn Presenter>,
    pub queue: SpeechQueue,
    pub clear_queue_on_disconnect: bool,
}

pub struct ChatSession {
    channel: String,
    handle: TransportHandle,
    events: JoinHandle<()>,
    ingest: Arc<IngestionAdapter>,
}

impl ChatSession {
    /// Connect `transport` to `channel` and start forwarding its events.
    ///
    /// The presenter sees `Connecting`, then `Connected` or `Error`.
    pub async fn open(
        transport: &dyn ChatTransport,
        channel: &str,
        ctx: SessionContext,
    ) -> Result<Self> {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            let message = "Channel name is empty".to_string();
            ctx.presenter
                .on_connection_state_change(&ConnectionState::Error {
                    message: message.clone(),
                });
            return Err(ChatvozError::Channel(message));
        }

        ctx.presenter
            .on_connection_state_change(&ConnectionState::Connecting {
                channel: channel.clone(),
            });

        let (rx, handle) = match transport.connect(&channel).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(transport = transport.id(), %channel, error = %e, "Connection failed");
                ctx.presenter
                    .on_connection_state_change(&ConnectionState::Error {
                        message: e.to_string(),
                    });
                return Err(ChatvozError::Channel(e.to_string()));
            }
        };

        info!(transport = transport.id(), %channel, "Joined channel");
        ctx.presenter
            .on_connection_state_change(&ConnectionState::Connected {
                channel: channel.clone(),
            });
        ctx.ingest.system(format!("Conectado al canal: {channel}"));

        let ingest = ctx.ingest.clone();
        let events = tokio::spawn(forward_events(rx, ctx));

        Ok(Self {
            channel,
            handle,
            events,
            ingest,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// False once the transport has given up (or been told to stop).
    pub fn is_active(&self) -> bool {
        !self.events.is_finished()
    }

    /// Leave the channel. Pending speech keeps playing.
    pub async fn disconnect(self) {
        let ingest = self.ingest.clone();
        let channel = self.channel.clone();
        self.release().await;
        info!(%channel, "Left channel");
        ingest.system("Desconectado.");
    }

    /// Tear down a session whose transport already gave up, without a log line.
    pub async fn release(self) {
        self.handle.shutdown().await;
        let _ = self.events.await;
    }
}

async fn forward_events(mut rx: TransportReceiver, ctx: SessionContext) {
    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::Message(raw) => {
                ctx.ingest.handle_event(&raw).await;
            }
            TransportEvent::State(state) => {
                if ctx.clear_queue_on_disconnect
                    && matches!(state, ConnectionState::Disconnected { .. })
                {
                    let dropped = ctx.queue.clear();
                    if dropped > 0 {
                        info!(dropped, "Cleared pending speech after disconnect");
                    }
                }
                ctx.presenter.on_connection_state_change(&state);
            }
        }
    }
}
