//! Voice discovery and selection.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{SpeechEngine, SpeechError, VoiceInfo};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Ask the engine for voices until it reports some.
///
/// Engines may enumerate voices lazily, so an empty list is retried with
/// exponential backoff (100ms doubling, capped at 2s). Returns an empty list if
/// `attempts` runs out; errors from the last attempt are returned as-is.
pub async fn wait_for_voices(
    engine: &dyn SpeechEngine,
    attempts: u32,
) -> Result<Vec<VoiceInfo>, SpeechError> {
    let attempts = attempts.max(1);
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=attempts {
        match engine.list_voices().await {
            Ok(voices) if !voices.is_empty() => {
                info!(engine = engine.id(), count = voices.len(), "Voices available");
                return Ok(voices);
            }
            Ok(_) => debug!(attempt, "Engine reported no voices yet"),
            Err(e @ SpeechError::Unavailable(_)) => return Err(e),
            Err(e) if attempt == attempts => return Err(e),
            Err(e) => debug!(attempt, %e, "Voice listing failed, retrying"),
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    warn!(engine = engine.id(), attempts, "Engine never reported any voices");
    Ok(Vec::new())
}

/// Pick the voice to use.
///
/// Order: the configured voice if the engine knows it, then the first voice
/// whose language starts with `preferred_language`, then the engine default,
/// then the first voice listed.
pub fn select_voice<'a>(
    voices: &'a [VoiceInfo],
    configured: Option<&str>,
    preferred_language: &str,
) -> Option<&'a VoiceInfo> {
    if let Some(wanted) = configured.filter(|v| !v.trim().is_empty()) {
        match voices.iter().find(|v| v.matches(wanted)) {
            Some(voice) => return Some(voice),
            None => warn!(voice = wanted, "Configured voice not found, falling back"),
        }
    }

    let preferred = preferred_language.trim().to_lowercase();
    if !preferred.is_empty() {
        if let Some(voice) = voices
            .iter()
            .find(|v| v.language.to_lowercase().starts_with(&preferred))
        {
            return Some(voice);
        }
    }

    voices.iter().find(|v| v.is_default).or_else(|| voices.first())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::Utterance;

    fn voice(id: &str, language: &str, is_default: bool) -> VoiceInfo {
        VoiceInfo {
            id: id.into(),
            name: format!("Voice {id}"),
            language: language.into(),
            is_default,
        }
    }

    /// Reports no voices for the first `empty_calls` calls.
    struct WarmingEngine {
        calls: AtomicU32,
        empty_calls: u32,
    }

    #[async_trait]
    impl SpeechEngine for WarmingEngine {
        fn id(&self) -> &str {
            "warming"
        }

        async fn speak(&self, _utterance: &Utterance) -> Result<(), SpeechError> {
            Ok(())
        }

        async fn list_voices(&self) -> Result<Vec<VoiceInfo>, SpeechError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.empty_calls {
                Ok(Vec::new())
            } else {
                Ok(vec![voice("en", "en", true)])
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_voices_retries_until_ready() {
        let engine = WarmingEngine {
            calls: AtomicU32::new(0),
            empty_calls: 3,
        };
        let voices = wait_for_voices(&engine, 10).await.unwrap();
        assert_eq!(voices.len(), 1);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_voices_gives_up() {
        let engine = WarmingEngine {
            calls: AtomicU32::new(0),
            empty_calls: u32::MAX,
        };
        let voices = wait_for_voices(&engine, 3).await.unwrap();
        assert!(voices.is_empty());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_select_configured_voice() {
        let voices = vec![voice("en", "en", true), voice("es", "es", false)];
        let picked = select_voice(&voices, Some("Voice en"), "es").unwrap();
        assert_eq!(picked.id, "en");
    }

    #[test]
    fn test_select_prefers_language_over_default() {
        let voices = vec![
            voice("en", "en", true),
            voice("es-419", "es-419", false),
            voice("es", "es", false),
        ];
        let picked = select_voice(&voices, Some("missing"), "es").unwrap();
        assert_eq!(picked.id, "es-419");
    }

    #[test]
    fn test_select_falls_back_to_default_then_first() {
        let voices = vec![voice("fr", "fr", false), voice("en", "en", true)];
        assert_eq!(select_voice(&voices, None, "es").unwrap().id, "en");

        let no_default = vec![voice("fr", "fr", false), voice("de", "de", false)];
        assert_eq!(select_voice(&no_default, None, "").unwrap().id, "fr");

        assert!(select_voice(&[], Some("es"), "es").is_none());
    }
}
