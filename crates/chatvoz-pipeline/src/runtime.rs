//! Wiring of queue, driver and ingestion into one running pipeline.

use std::sync::Arc;
use std::time::Duration;

use chatvoz_channels::ChatTransport;
use chatvoz_core::config::Config;
use chatvoz_core::error::Result;
use chatvoz_core::settings::SettingsStore;
use chatvoz_core::types::LogEntry;
use chatvoz_tts::SpeechEngine;

use crate::driver::{DEFAULT_SETTLE_DELAY, DriverHandle, DriverStatsSnapshot, PlaybackDriver};
use crate::ingest::IngestionAdapter;
use crate::presenter::Presenter;
use crate::queue::{PlaybackState, SpeechQueue};
use crate::session::{ChatSession, SessionContext};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub settle_delay: Duration,
    pub clear_queue_on_disconnect: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            clear_queue_on_disconnect: false,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            clear_queue_on_disconnect: config.playback().clear_queue_on_disconnect,
        }
    }
}

/// A running pipeline: one queue, one playback driver, one ingestion adapter.
pub struct Pipeline {
    settings: SettingsStore,
    queue: SpeechQueue,
    ingest: Arc<IngestionAdapter>,
    presenter: Arc<dyn Presenter>,
    driver: DriverHandle,
    options: PipelineOptions,
}

impl Pipeline {
    /// Start the playback driver. Must be called from within a tokio runtime.
    pub fn start(
        settings: SettingsStore,
        engine: Arc<dyn SpeechEngine>,
        presenter: Arc<dyn Presenter>,
        options: PipelineOptions,
    ) -> Self {
        let queue = SpeechQueue::new();
        let ingest = Arc::new(IngestionAdapter::new(
            settings.clone(),
            queue.clone(),
            presenter.clone(),
        ));
        let driver =
            PlaybackDriver::new(queue.clone(), settings.clone(), engine, options.settle_delay)
                .start();

        Self {
            settings,
            queue,
            ingest,
            presenter,
            driver,
            options,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn queue(&self) -> &SpeechQueue {
        &self.queue
    }

    pub fn ingest(&self) -> &Arc<IngestionAdapter> {
        &self.ingest
    }

    pub fn state(&self) -> PlaybackState {
        self.queue.state()
    }

    pub fn stats(&self) -> DriverStatsSnapshot {
        self.driver.stats()
    }

    pub fn recent_log(&self) -> Vec<LogEntry> {
        self.ingest.recent_log()
    }

    pub fn sound_check(&self) -> bool {
        self.ingest.enqueue_sound_check()
    }

    /// Join `channel` over `transport`; chat flows into this pipeline until disconnected.
    pub async fn connect(&self, transport: &dyn ChatTransport, channel: &str) -> Result<ChatSession> {
        ChatSession::open(
            transport,
            channel,
            SessionContext {
                ingest: self.ingest.clone(),
                presenter: self.presenter.clone(),
                queue: self.queue.clone(),
                clear_queue_on_disconnect: self.options.clear_queue_on_disconnect,
            },
        )
        .await
    }

    pub async fn shutdown(self) {
        self.driver.shutdown().await;
    }
}
