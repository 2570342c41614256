//! Ingestion: turns raw chat events into log lines and queued speech.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use chatvoz_core::settings::SettingsStore;
use chatvoz_core::types::{ChatMessage, LogEntry, RawChatEvent, SenderAttributes, SpeechItem};

use crate::filter::{self, Verdict};
use crate::log::MessageLog;
use crate::presenter::Presenter;
use crate::queue::SpeechQueue;

/// Parse a Twitch `badges` tag (`broadcaster/1,subscriber/12`) into name -> version.
pub fn parse_badges(raw: &str) -> HashMap<&str, &str> {
    raw.split(',')
        .filter_map(|badge| {
            let badge = badge.trim();
            if badge.is_empty() {
                return None;
            }
            Some(badge.split_once('/').unwrap_or((badge, "")))
        })
        .collect()
}

fn flag(event: &RawChatEvent, key: &str) -> bool {
    event.tag(key) == Some("1")
}

/// Derive sender identity and roles. Missing data means the role is absent.
pub fn sender_attributes(event: &RawChatEvent) -> SenderAttributes {
    let display_tag = event
        .tag("display-name")
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let login = event
        .username
        .as_deref()
        .or(event.tag("login"))
        .or(display_tag)
        .unwrap_or_default();
    let badges = parse_badges(event.tag("badges").unwrap_or_default());

    SenderAttributes {
        username: login.to_lowercase(),
        display_name: display_tag.unwrap_or(login).to_string(),
        is_mod: flag(event, "mod") || badges.contains_key("moderator"),
        is_vip: flag(event, "vip") || badges.contains_key("vip"),
        is_broadcaster: badges.contains_key("broadcaster"),
        is_subscriber: flag(event, "subscriber")
            || badges.contains_key("subscriber")
            || badges.contains_key("founder"),
    }
}

pub fn chat_message(event: &RawChatEvent) -> ChatMessage {
    ChatMessage {
        sender: sender_attributes(event),
        text: event.text.clone(),
        is_self: event.is_self,
    }
}

/// Receives chat events and feeds the log, the presenter and the speech queue.
pub struct IngestionAdapter {
    settings: SettingsStore,
    queue: SpeechQueue,
    log: Mutex<MessageLog>,
    presenter: Arc<dyn Presenter>,
}

impl IngestionAdapter {
    pub fn new(settings: SettingsStore, queue: SpeechQueue, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            settings,
            queue,
            log: Mutex::new(MessageLog::default()),
            presenter,
        }
    }

    fn log(&self) -> MutexGuard<'_, MessageLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle one chat event. Every message is logged, admitted ones are queued.
    pub async fn handle_event(&self, event: &RawChatEvent) -> Verdict {
        let message = chat_message(event);
        self.record(LogEntry::new(
            message.sender.display_name.clone(),
            message.text.clone(),
        ));

        let rules = self.settings.rules().await;
        let verdict = filter::evaluate(&message, &rules);
        match verdict {
            Verdict::Admit => {
                let started = self.queue.enqueue(SpeechItem::from_message(&message));
                debug!(
                    user = %message.sender.username,
                    started,
                    pending = self.queue.len(),
                    "Message queued"
                );
            }
            Verdict::Reject(reason) => {
                debug!(user = %message.sender.username, %reason, "Message not read");
            }
        }
        verdict
    }

    /// Append a line from the application itself.
    pub fn system(&self, text: impl Into<String>) {
        self.record(LogEntry::system(text));
    }

    /// Queue the sound-check utterance, bypassing the filter.
    pub fn enqueue_sound_check(&self) -> bool {
        self.queue.enqueue(SpeechItem::sound_check())
    }

    /// Log entries, newest first.
    pub fn recent_log(&self) -> Vec<LogEntry> {
        self.log().recent().cloned().collect()
    }

    fn record(&self, entry: LogEntry) {
        self.log().push(entry.clone());
        self.presenter.on_log_entry(&entry);
    }
}
