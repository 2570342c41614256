//! FIFO speech queue shared by the ingestion side and the playback driver.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::Notify;

use chatvoz_core::types::SpeechItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Speaking,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<SpeechItem>,
    speaking: bool,
}

/// Pending utterances plus the "a playback cycle is running" flag.
///
/// Both live under one lock so that an enqueue racing with the end of a
/// cycle either lands in the running cycle or starts a new one, never neither.
/// Cloning shares the same queue.
#[derive(Debug, Clone, Default)]
pub struct SpeechQueue {
    state: Arc<Mutex<QueueState>>,
    wake: Arc<Notify>,
}

impl SpeechQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Critical sections never panic halfway; a poisoned lock still holds a valid queue.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an item. Returns true when this started a new playback cycle.
    pub fn enqueue(&self, item: SpeechItem) -> bool {
        let started = {
            let mut state = self.lock();
            state.items.push_back(item);
            !std::mem::replace(&mut state.speaking, true)
        };
        if started {
            self.wake.notify_one();
        }
        started
    }

    /// Pop the oldest item. An empty queue ends the current cycle (state becomes Idle).
    pub fn dequeue_next(&self) -> Option<SpeechItem> {
        let mut state = self.lock();
        let next = state.items.pop_front();
        if next.is_none() {
            state.speaking = false;
        }
        next
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Drop all pending items. An in-flight utterance is unaffected.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }

    pub fn state(&self) -> PlaybackState {
        if self.lock().speaking {
            PlaybackState::Speaking
        } else {
            PlaybackState::Idle
        }
    }

    /// Resolves once an enqueue has started a cycle.
    pub(crate) async fn started(&self) {
        self.wake.notified().await;
    }
}
