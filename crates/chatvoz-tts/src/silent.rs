//! Engine that only logs what it would have said. Used for `--dry-run`.

use async_trait::async_trait;
use tracing::info;

use crate::{SpeechEngine, SpeechError, Utterance, VoiceInfo};

pub struct SilentEngine;

#[async_trait]
impl SpeechEngine for SilentEngine {
    fn id(&self) -> &str {
        "silent"
    }

    async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError> {
        info!(
            text = %utterance.text,
            voice = utterance.voice.as_deref().unwrap_or("default"),
            volume = utterance.volume,
            rate = utterance.rate,
            "(silent) speak"
        );
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, SpeechError> {
        Ok(vec![VoiceInfo {
            id: "silent".into(),
            name: "Silent".into(),
            language: "und".into(),
            is_default: true,
        }])
    }
}
