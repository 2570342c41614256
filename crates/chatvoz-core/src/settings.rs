//! Live, operator-mutable settings shared across the pipeline.
//!
//! The permission rules and playback parameters can change at any moment
//! (operator console, config reload). Consumers never cache them: the filter
//! reads [`RuleConfig`] once per message and the playback driver reads
//! [`PlaybackSettings`] once per dequeued item.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::Config;

pub const MIN_RATE: f32 = 0.1;
pub const MAX_RATE: f32 = 10.0;

/// Permission rules evaluated for every incoming chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Lowercased usernames that are never read.
    pub ignored_users: BTreeSet<String>,
    pub ignore_mods: bool,
    pub ignore_vips: bool,
    pub ignore_broadcaster: bool,
    pub subscribers_only: bool,
}

/// Split a comma-separated user list into trimmed, lowercased, non-empty names.
pub fn parse_ignored_users(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty())
        .collect()
}

/// Speech parameters applied when an item is dequeued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    pub voice: Option<String>,
    /// Linear volume as entered by the operator, 0-100.
    pub volume: u8,
    pub rate: f32,
    pub muted: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::new(None, 100, 1.0, false)
    }
}

impl PlaybackSettings {
    /// Build settings, clamping volume to 0-100 and rate to the supported range.
    pub fn new(voice: Option<String>, volume: u8, rate: f32, muted: bool) -> Self {
        Self {
            voice: voice.filter(|v| !v.trim().is_empty()),
            volume: volume.min(100),
            rate: clamp_rate(rate),
            muted,
        }
    }

    /// Engine volume in 0.0-1.0 after the perceptual curve.
    pub fn effective_volume(&self) -> f32 {
        effective_volume(self.volume)
    }
}

/// Map the 0-100 linear volume onto a quadratic curve: `(linear / 100)^2`.
pub fn effective_volume(linear: u8) -> f32 {
    let scaled = f32::from(linear.min(100)) / 100.0;
    scaled * scaled
}

/// Clamp a rate multiplier into `MIN_RATE..=MAX_RATE`; non-finite input becomes 1.0.
pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_RATE, MAX_RATE)
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSettings {
    pub rules: RuleConfig,
    pub playback: PlaybackSettings,
}

/// Live values plus the file-derived values they were last reloaded from.
#[derive(Debug, Default)]
struct State {
    live: LiveSettings,
    loaded: LiveSettings,
}

/// Shared handle to the live settings. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    inner: Arc<RwLock<State>>,
}

impl SettingsStore {
    pub fn new(settings: LiveSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(State {
                loaded: settings.clone(),
                live: settings,
            })),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(LiveSettings {
            rules: config.rules(),
            playback: config.playback_settings(),
        })
    }

    pub async fn snapshot(&self) -> LiveSettings {
        self.inner.read().await.live.clone()
    }

    pub async fn rules(&self) -> RuleConfig {
        self.inner.read().await.live.rules.clone()
    }

    pub async fn playback(&self) -> PlaybackSettings {
        self.inner.read().await.live.playback.clone()
    }

    pub async fn is_muted(&self) -> bool {
        self.inner.read().await.live.playback.muted
    }

    pub async fn set_muted(&self, muted: bool) {
        self.inner.write().await.live.playback.muted = muted;
    }

    /// Flip mute and return the new value.
    pub async fn toggle_mute(&self) -> bool {
        let mut guard = self.inner.write().await;
        let playback = &mut guard.live.playback;
        playback.muted = !playback.muted;
        playback.muted
    }

    pub async fn set_volume(&self, volume: u8) {
        self.inner.write().await.live.playback.volume = volume.min(100);
    }

    pub async fn set_rate(&self, rate: f32) {
        self.inner.write().await.live.playback.rate = clamp_rate(rate);
    }

    pub async fn set_voice(&self, voice: Option<String>) {
        self.inner.write().await.live.playback.voice = voice.filter(|v| !v.trim().is_empty());
    }

    /// Replace the ignore list from operator input (comma-separated).
    pub async fn set_ignored_users(&self, raw: &str) {
        self.inner.write().await.live.rules.ignored_users = parse_ignored_users(raw);
    }

    /// Apply an arbitrary edit to the rules under one write lock.
    pub async fn update_rules(&self, f: impl FnOnce(&mut RuleConfig)) {
        f(&mut self.inner.write().await.live.rules);
    }

    /// Merge a (re)loaded config into the live settings.
    ///
    /// Only values that differ from the previous load are written, so console
    /// edits to anything the file did not touch survive. Mute is never taken
    /// from a reload, and the voice only when the file names a new one.
    pub async fn apply_config(&self, config: &Config) {
        let mut guard = self.inner.write().await;
        guard.apply(config);
    }

    /// Blocking variant of [`apply_config`](Self::apply_config) for non-async callers
    /// such as file-watcher callbacks. Must not be called from within the runtime.
    pub fn blocking_apply_config(&self, config: &Config) {
        let mut guard = self.inner.blocking_write();
        guard.apply(config);
    }
}

/// Overwrite `live` with `new` when the file value moved away from `old`.
fn merge<T: PartialEq + Clone>(live: &mut T, old: &T, new: &T) {
    if old != new {
        *live = new.clone();
    }
}

impl State {
    fn apply(&mut self, config: &Config) {
        let rules = config.rules();
        let playback = config.playback_settings();
        let (live, old) = (&mut self.live, &self.loaded);

        merge(&mut live.rules.ignored_users, &old.rules.ignored_users, &rules.ignored_users);
        merge(&mut live.rules.ignore_mods, &old.rules.ignore_mods, &rules.ignore_mods);
        merge(&mut live.rules.ignore_vips, &old.rules.ignore_vips, &rules.ignore_vips);
        merge(
            &mut live.rules.ignore_broadcaster,
            &old.rules.ignore_broadcaster,
            &rules.ignore_broadcaster,
        );
        merge(
            &mut live.rules.subscribers_only,
            &old.rules.subscribers_only,
            &rules.subscribers_only,
        );

        merge(&mut live.playback.volume, &old.playback.volume, &playback.volume);
        merge(&mut live.playback.rate, &old.playback.rate, &playback.rate);
        if playback.voice.is_some() {
            merge(&mut live.playback.voice, &old.playback.voice, &playback.voice);
        }

        self.loaded = LiveSettings { rules, playback };
    }
}
