//! Configuration loading, validation, and dotted-path editing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::settings::{PlaybackSettings, RuleConfig, parse_ignored_users};

pub const DEFAULT_TWITCH_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

/// Top-level chatvoz configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Channel to join when `run` is given no `--channel`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitch: Option<TwitchConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

fn default_true() -> bool {
    true
}

/// Twitch chat connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitchConfig {
    #[serde(default = "default_twitch_url")]
    pub url: String,

    /// Login name. Omit to connect anonymously (read-only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Give up after this many consecutive failed reconnects (unset = never).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            url: default_twitch_url(),
            nick: None,
            token: None,
            token_env: None,
            reconnect: true,
            max_reconnect_attempts: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_twitch_url() -> String {
    DEFAULT_TWITCH_URL.into()
}

fn default_connect_timeout() -> u64 {
    10
}

impl TwitchConfig {
    /// Resolve the OAuth token: check `token` first, then `token_env`.
    pub fn resolve_token(&self) -> Option<String> {
        resolve_secret_field(&self.token, &self.token_env)
    }
}

/// Permission rules as written by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Comma-separated usernames whose messages are never read.
    #[serde(default)]
    pub ignored_users: String,

    #[serde(default)]
    pub ignore_mods: bool,

    #[serde(default)]
    pub ignore_vips: bool,

    #[serde(default)]
    pub ignore_broadcaster: bool,

    #[serde(default)]
    pub subscribers_only: bool,
}

impl FilterConfig {
    pub fn rules(&self) -> RuleConfig {
        RuleConfig {
            ignored_users: parse_ignored_users(&self.ignored_users),
            ignore_mods: self.ignore_mods,
            ignore_vips: self.ignore_vips,
            ignore_broadcaster: self.ignore_broadcaster,
            subscribers_only: self.subscribers_only,
        }
    }
}

/// Speech output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Voice name; when unset a voice is picked from `preferred_language`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Linear volume, 0-100.
    #[serde(default = "default_volume")]
    pub volume: u8,

    #[serde(default = "default_rate")]
    pub rate: f32,

    #[serde(default)]
    pub muted: bool,

    /// Pause after each spoken item before starting the next one.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_preferred_language")]
    pub preferred_language: String,

    /// Drop pending speech when the chat connection goes away.
    #[serde(default)]
    pub clear_queue_on_disconnect: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            voice: None,
            volume: default_volume(),
            rate: default_rate(),
            muted: false,
            settle_delay_ms: default_settle_delay_ms(),
            preferred_language: default_preferred_language(),
            clear_queue_on_disconnect: false,
        }
    }
}

fn default_volume() -> u8 {
    100
}

fn default_rate() -> f32 {
    1.0
}

fn default_settle_delay_ms() -> u64 {
    300
}

fn default_preferred_language() -> String {
    "es".into()
}

impl PlaybackConfig {
    pub fn settings(&self) -> PlaybackSettings {
        PlaybackSettings::new(self.voice.clone(), self.volume, self.rate, self.muted)
    }
}

/// Speech engine selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Engine id: "espeak" (default) or "silent".
    #[serde(default = "default_speech_engine")]
    pub engine: String,

    /// Override the engine executable (default: "espeak-ng").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// How many times to ask the engine for voices before giving up.
    #[serde(default = "default_voice_retry_attempts")]
    pub voice_retry_attempts: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            engine: default_speech_engine(),
            command: None,
            voice_retry_attempts: default_voice_retry_attempts(),
        }
    }
}

fn default_speech_engine() -> String {
    "espeak".into()
}

fn default_voice_retry_attempts() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "chatvoz_channels=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::ChatvozError::Io)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5), substituting `${ENV_VAR}` references.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::ChatvozError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Channel to join, normalized; `None` when unset or blank.
    pub fn channel(&self) -> Option<String> {
        self.channel
            .as_deref()
            .map(normalize_channel)
            .filter(|c| !c.is_empty())
    }

    pub fn twitch(&self) -> TwitchConfig {
        self.twitch.clone().unwrap_or_default()
    }

    pub fn filter(&self) -> FilterConfig {
        self.filter.clone().unwrap_or_default()
    }

    pub fn playback(&self) -> PlaybackConfig {
        self.playback.clone().unwrap_or_default()
    }

    pub fn speech(&self) -> SpeechConfig {
        self.speech.clone().unwrap_or_default()
    }

    /// Current permission rules.
    pub fn rules(&self) -> RuleConfig {
        self.filter().rules()
    }

    /// Current playback settings.
    pub fn playback_settings(&self) -> PlaybackSettings {
        self.playback().settings()
    }

    /// Settling pause inserted after each audible utterance.
    pub fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.playback().settle_delay_ms)
    }

    /// Get a config value by dotted path (e.g. "playback.volume", "filter.ignore_mods").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Set a config value by dotted path.
    pub fn set_path(&mut self, path: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let mut json = serde_json::to_value(&*self)
            .map_err(|e| anyhow::anyhow!("Config serialization error: {e}"))?;

        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(anyhow::anyhow!("Empty path"));
        };

        // Navigate to the parent of the target key
        let mut current = &mut json;
        for segment in parents {
            if !current.get(*segment).is_some_and(|v| v.is_object()) {
                current[*segment] = serde_json::json!({});
            }
            current = current
                .get_mut(*segment)
                .ok_or_else(|| anyhow::anyhow!("Cannot descend into '{segment}'"))?;
        }

        current[*last] = value;

        *self = serde_json::from_value(json)
            .map_err(|e| anyhow::anyhow!("Config deserialization error: {e}"))?;
        Ok(())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(raw) = &self.channel {
            if normalize_channel(raw).is_empty() {
                warnings.push("Channel is set but blank".to_string());
            }
        }

        if let Some(filter) = &self.filter {
            let blanks = filter
                .ignored_users
                .split(',')
                .filter(|t| t.trim().is_empty())
                .count();
            if blanks > 0 && !filter.ignored_users.trim().is_empty() {
                warnings.push(format!(
                    "Ignored users list has {blanks} blank entr{} (skipped)",
                    if blanks == 1 { "y" } else { "ies" }
                ));
            }
        }

        if let Some(playback) = &self.playback {
            if playback.volume > 100 {
                warnings.push(format!(
                    "Volume {} is above 100 and will be clamped",
                    playback.volume
                ));
            }
            if !playback.rate.is_finite() || playback.rate < 0.1 || playback.rate > 10.0 {
                warnings.push(format!(
                    "Rate {} is outside 0.1-10 and will be clamped",
                    playback.rate
                ));
            }
        }

        if let Some(twitch) = &self.twitch {
            if !twitch.url.starts_with("ws://") && !twitch.url.starts_with("wss://") {
                errors.push(format!("Twitch URL must be a ws:// or wss:// URL: {}", twitch.url));
            }
            if twitch.nick.is_some() && twitch.resolve_token().is_none() {
                warnings.push("Twitch nick is set but no token is configured".to_string());
            }
        }

        if let Some(speech) = &self.speech {
            if !matches!(speech.engine.as_str(), "espeak" | "silent") {
                errors.push(format!("Unknown speech engine: {}", speech.engine));
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Normalize a channel name: trim, strip a leading `#`, lowercase.
pub fn normalize_channel(raw: &str) -> String {
    raw.trim().trim_start_matches('#').to_lowercase()
}

/// Base directory for chatvoz data: `~/.chatvoz/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatvoz")
}
