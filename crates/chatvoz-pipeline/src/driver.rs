//! Playback driver: speaks queued items one at a time, in order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatvoz_core::settings::SettingsStore;
use chatvoz_core::types::SpeechItem;
use chatvoz_tts::{SpeechEngine, Utterance};

use crate::queue::SpeechQueue;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// What happened to one dequeued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Spoken,
    SkippedMuted,
    Failed,
}

#[derive(Debug, Default)]
pub struct DriverStats {
    spoken: AtomicU64,
    skipped_muted: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStatsSnapshot {
    pub spoken: u64,
    pub skipped_muted: u64,
    pub failed: u64,
}

impl DriverStats {
    fn record(&self, outcome: ItemOutcome) {
        let counter = match outcome {
            ItemOutcome::Spoken => &self.spoken,
            ItemOutcome::SkippedMuted => &self.skipped_muted,
            ItemOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DriverStatsSnapshot {
        DriverStatsSnapshot {
            spoken: self.spoken.load(Ordering::Relaxed),
            skipped_muted: self.skipped_muted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Handle for the running driver task.
pub struct DriverHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<DriverStats>,
}

impl DriverHandle {
    pub fn stats(&self) -> DriverStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the driver. An utterance in flight is abandoned.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

pub struct PlaybackDriver {
    queue: SpeechQueue,
    settings: SettingsStore,
    engine: Arc<dyn SpeechEngine>,
    settle_delay: Duration,
    stats: Arc<DriverStats>,
}

impl PlaybackDriver {
    pub fn new(
        queue: SpeechQueue,
        settings: SettingsStore,
        engine: Arc<dyn SpeechEngine>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            queue,
            settings,
            engine,
            settle_delay,
            stats: Arc::new(DriverStats::default()),
        }
    }

    /// Spawn the driver loop. There must be exactly one driver per queue.
    pub fn start(self) -> DriverHandle {
        let cancel = CancellationToken::new();
        let stats = self.stats.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            info!(engine = self.engine.id(), "Playback driver started");
            self.run(token).await;
            info!("Playback driver stopped");
        });

        DriverHandle {
            cancel,
            task,
            stats,
        }
    }

    async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.started() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.drain() => debug!("Queue drained, driver idle"),
            }
        }
    }

    /// Run one playback cycle until the queue is empty.
    async fn drain(&self) {
        while let Some(item) = self.queue.dequeue_next() {
            let outcome = self.play(&item).await;
            self.stats.record(outcome);
            if outcome == ItemOutcome::Spoken && !self.settle_delay.is_zero() {
                tokio::time::sleep(self.settle_delay).await;
            }
        }
    }

    async fn play(&self, item: &SpeechItem) -> ItemOutcome {
        let settings = self.settings.playback().await;
        if settings.muted {
            debug!(speaker = %item.speaker, "Muted, dropping item");
            return ItemOutcome::SkippedMuted;
        }

        let utterance = Utterance::new(item.text.clone(), &settings);
        debug!(
            speaker = %item.speaker,
            volume = utterance.volume,
            rate = utterance.rate,
            "Speaking item"
        );
        match self.engine.speak(&utterance).await {
            Ok(()) => ItemOutcome::Spoken,
            Err(e) => {
                warn!(speaker = %item.speaker, %e, "Speech failed, skipping item");
                ItemOutcome::Failed
            }
        }
    }
}
