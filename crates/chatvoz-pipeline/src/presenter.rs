//! Presentation seam: where log lines and connection state end up.

use tracing::info;

use chatvoz_core::types::{ConnectionState, LogEntry};

pub trait Presenter: Send + Sync + 'static {
    fn on_log_entry(&self, entry: &LogEntry);

    fn on_connection_state_change(&self, state: &ConnectionState);
}

/// Forwards everything to `tracing`. Used when no interactive surface is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn on_log_entry(&self, entry: &LogEntry) {
        info!(sender = %entry.sender, text = %entry.text, "Chat");
    }

    fn on_connection_state_change(&self, state: &ConnectionState) {
        info!(%state, "Connection state changed");
    }
}
