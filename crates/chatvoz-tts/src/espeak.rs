//! espeak-ng engine: one child process per utterance.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::{SpeechEngine, SpeechError, Utterance, VoiceInfo};

const DEFAULT_COMMAND: &str = "espeak-ng";
/// espeak-ng's own default speed, words per minute.
const BASE_WPM: f32 = 175.0;
const MIN_WPM: f32 = 80.0;
const MAX_WPM: f32 = 450.0;
/// The voice espeak-ng uses when none is given.
const ENGINE_DEFAULT_VOICE: &str = "en";

pub struct EspeakEngine {
    command: String,
}

impl Default for EspeakEngine {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

impl EspeakEngine {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Command-line arguments for one utterance.
    pub fn speak_args(utterance: &Utterance) -> Vec<String> {
        // Amplitude runs 0-200 with 100 as normal; the quadratic volume tops out at normal.
        let amplitude = (utterance.volume.clamp(0.0, 1.0) * 100.0).round() as u32;
        let wpm = (BASE_WPM * utterance.rate).clamp(MIN_WPM, MAX_WPM).round() as u32;

        let mut args = vec![
            "-a".to_string(),
            amplitude.to_string(),
            "-s".to_string(),
            wpm.to_string(),
        ];
        if let Some(voice) = utterance.voice.as_deref().filter(|v| !v.is_empty()) {
            args.push("-v".into());
            args.push(voice.to_string());
        }
        args.push("--".into());
        args.push(utterance.text.clone());
        args
    }

    fn map_spawn_error(&self, e: std::io::Error) -> SpeechError {
        if e.kind() == std::io::ErrorKind::NotFound {
            SpeechError::Unavailable(format!("'{}' not found in PATH", self.command))
        } else {
            SpeechError::Io(e)
        }
    }
}

/// Parse the table printed by `espeak-ng --voices`.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  af              --/M      Afrikaans          gmw/af
///  5  es              --/M      Spanish_(Spain)    roa/es
/// ```
pub fn parse_voice_list(output: &str) -> Vec<VoiceInfo> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("Pty"))
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let _priority = cols.next()?;
            let language = cols.next()?;
            let _age_gender = cols.next()?;
            let name = cols.next()?;
            Some(VoiceInfo {
                id: language.to_string(),
                name: name.to_string(),
                language: language.to_string(),
                is_default: language == ENGINE_DEFAULT_VOICE,
            })
        })
        .collect()
}

#[async_trait]
impl SpeechEngine for EspeakEngine {
    fn id(&self) -> &str {
        "espeak"
    }

    async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError> {
        let args = Self::speak_args(utterance);
        debug!(command = %self.command, text_len = utterance.text.len(), "Speaking");

        let output = tokio::process::Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.map_spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SpeechError::Failed(format!(
                "{} exited with {}: {stderr}",
                self.command, output.status
            )));
        }
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, SpeechError> {
        let output = tokio::process::Command::new(&self.command)
            .arg("--voices")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.map_spawn_error(e))?;

        if !output.status.success() {
            return Err(SpeechError::Failed(format!(
                "{} --voices exited with {}",
                self.command, output.status
            )));
        }
        Ok(parse_voice_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance(volume: f32, rate: f32, voice: Option<&str>) -> Utterance {
        Utterance {
            text: "alice dice: hola".into(),
            voice: voice.map(String::from),
            volume,
            rate,
        }
    }

    #[test]
    fn test_speak_args() {
        let args = EspeakEngine::speak_args(&utterance(0.25, 1.0, Some("es")));
        assert_eq!(
            args,
            vec!["-a", "25", "-s", "175", "-v", "es", "--", "alice dice: hola"]
        );
    }

    #[test]
    fn test_speak_args_clamps_rate_and_skips_voice() {
        let args = EspeakEngine::speak_args(&utterance(1.0, 10.0, None));
        assert_eq!(args, vec!["-a", "100", "-s", "450", "--", "alice dice: hola"]);
        let slow = EspeakEngine::speak_args(&utterance(0.0, 0.1, None));
        assert_eq!(slow[1], "0");
        assert_eq!(slow[3], "80");
    }

    #[test]
    fn test_parse_voice_list() {
        let output = "Pty Language       Age/Gender VoiceName          File                 Other Languages\n \
 5  af              --/M      Afrikaans          gmw/af\n \
 5  en              --/M      English_(Great_Britain) gmw/en   (en 2)\n \
 5  es              --/M      Spanish_(Spain)    roa/es\n \
 5  es-419          --/M      Spanish_(Latin_America) roa/es-419\n";
        let voices = parse_voice_list(output);
        assert_eq!(voices.len(), 4);
        assert_eq!(voices[2].id, "es");
        assert_eq!(voices[2].name, "Spanish_(Spain)");
        assert!(voices[1].is_default);
        assert!(!voices[3].is_default);
        assert!(parse_voice_list("").is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let engine = EspeakEngine::new("chatvoz-definitely-not-installed");
        let err = engine
            .speak(&utterance(1.0, 1.0, None))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::Unavailable(_)));
        assert!(matches!(
            engine.list_voices().await.unwrap_err(),
            SpeechError::Unavailable(_)
        ));
    }
}
