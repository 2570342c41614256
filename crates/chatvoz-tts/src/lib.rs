//! Speech synthesis engines.
//!
//! Every engine implements [`SpeechEngine`]. `speak` resolves when the
//! utterance has finished playing (or failed), which is what the playback
//! driver waits on before advancing its queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chatvoz_core::config::SpeechConfig;
use chatvoz_core::settings::PlaybackSettings;

pub mod espeak;
pub mod silent;
pub mod voices;

pub use espeak::EspeakEngine;
pub use silent::SilentEngine;

/// A voice the engine can speak with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    /// Identifier passed back to the engine when selecting this voice.
    pub id: String,
    pub name: String,
    /// BCP-47-ish language tag, e.g. "es" or "es-419".
    pub language: String,
    pub is_default: bool,
}

impl VoiceInfo {
    /// True when `selector` names this voice by id or name (case-insensitive).
    pub fn matches(&self, selector: &str) -> bool {
        let selector = selector.trim();
        self.id.eq_ignore_ascii_case(selector) || self.name.eq_ignore_ascii_case(selector)
    }
}

/// Fully resolved request for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<String>,
    /// 0.0-1.0, already on the perceptual curve.
    pub volume: f32,
    pub rate: f32,
}

impl Utterance {
    /// Apply the current playback settings to `text`.
    pub fn new(text: impl Into<String>, settings: &PlaybackSettings) -> Self {
        Self {
            text: text.into(),
            voice: settings.voice.clone(),
            volume: settings.effective_volume(),
            rate: settings.rate,
        }
    }
}

#[derive(Debug, Error)]
pub enum SpeechError {
    /// The engine cannot run at all (binary missing, no audio backend).
    #[error("speech engine unavailable: {0}")]
    Unavailable(String),

    /// The engine ran and reported a failure for this utterance.
    #[error("speech synthesis failed: {0}")]
    Failed(String),

    #[error("speech engine IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The core speech engine trait.
#[async_trait]
pub trait SpeechEngine: Send + Sync + 'static {
    /// Engine identifier (e.g. "espeak").
    fn id(&self) -> &str;

    /// Speak one utterance; resolves when playback has finished.
    async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError>;

    /// Voices currently known to the engine. May be empty while the engine warms up.
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, SpeechError>;
}

/// Build the engine named in config.
pub fn build_engine(config: &SpeechConfig) -> anyhow::Result<Arc<dyn SpeechEngine>> {
    match config.engine.as_str() {
        "espeak" => {
            let engine = match &config.command {
                Some(command) => EspeakEngine::new(command.clone()),
                None => EspeakEngine::default(),
            };
            Ok(Arc::new(engine))
        }
        "silent" => Ok(Arc::new(SilentEngine)),
        other => anyhow::bail!("Unknown speech engine: {other}"),
    }
}
