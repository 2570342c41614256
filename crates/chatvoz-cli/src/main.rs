mod console;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use chatvoz_channels::ChatTransport;
use chatvoz_channels::twitch::TwitchTransport;
use chatvoz_core::config::{Config, normalize_channel};
use chatvoz_core::settings::SettingsStore;
use chatvoz_pipeline::hot_reload::ConfigWatcher;
use chatvoz_pipeline::{Pipeline, PipelineOptions};
use chatvoz_tts::voices::{select_voice, wait_for_voices};
use chatvoz_tts::{SilentEngine, SpeechEngine, Utterance, build_engine};

use crate::console::{Console, ConsolePresenter};

#[derive(Parser)]
#[command(
    name = "chatvoz",
    about = "Reads Twitch chat aloud, one message at a time",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a channel and read its chat aloud
    Run {
        /// Channel to join (overrides the config)
        #[arg(long)]
        channel: Option<String>,

        /// Process chat without producing audio
        #[arg(long)]
        dry_run: bool,
    },

    /// List the speech engine's voices
    Voices,

    /// Speak one line with the current playback settings
    Say { text: String },

    /// Show configuration status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Run { channel, dry_run } => run(config, &config_path, channel, dry_run).await?,
        Commands::Voices => {
            let engine = build_engine(&config.speech())?;
            let voices = wait_for_voices(engine.as_ref(), config.speech().voice_retry_attempts).await?;
            let playback = config.playback();
            let selected = select_voice(&voices, playback.voice.as_deref(), &playback.preferred_language)
                .map(|v| v.id.clone());
            for voice in &voices {
                let marker = if selected.as_deref() == Some(voice.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {:<12} {:<10} {}", voice.id, voice.language, voice.name);
            }
            if voices.is_empty() {
                println!("The engine reported no voices");
            }
        }
        Commands::Say { text } => {
            let engine = build_engine(&config.speech())?;
            let mut settings = config.playback_settings();
            settings.voice = resolve_voice(engine.as_ref(), &config).await;
            engine.speak(&Utterance::new(text, &settings)).await?;
        }
        Commands::Status => {
            println!("chatvoz v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!(
                "Channel: {}",
                config.channel().map(|c| format!("#{c}")).unwrap_or_else(|| "(not set)".into())
            );
            let twitch = config.twitch();
            println!(
                "Twitch: {} as {}",
                twitch.url,
                twitch.nick.as_deref().unwrap_or("anonymous")
            );
            println!("Speech engine: {}", config.speech().engine);

            let (warnings, errors) = config.validate();
            for w in &warnings {
                println!("warning: {w}");
            }
            for e in &errors {
                println!("error: {e}");
            }
            if warnings.is_empty() && errors.is_empty() {
                println!("Config OK");
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("{key} is not set"),
            },
            ConfigAction::Set { key, value } => {
                // Accept JSON literals (numbers, booleans, quoted strings); anything else is a string.
                let parsed = serde_json::from_str(&value)
                    .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
                let mut config = config;
                config.set_path(&key, parsed)?;
                config.save(&config_path)?;
                println!("{key} updated in {}", config_path.display());
            }
        },
    }

    Ok(())
}

async fn run(
    config: Config,
    config_path: &Path,
    channel: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let engine: Arc<dyn SpeechEngine> = if dry_run {
        info!("Dry run: chat is processed but nothing is spoken");
        Arc::new(SilentEngine)
    } else {
        build_engine(&config.speech())?
    };

    let settings = SettingsStore::from_config(&config);
    if let Some(voice) = resolve_voice(engine.as_ref(), &config).await {
        info!(%voice, "Voice selected");
        settings.set_voice(Some(voice)).await;
    }

    let _watcher = match ConfigWatcher::start(config_path.to_path_buf(), settings.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(%e, "Config hot reload disabled");
            None
        }
    };

    let pipeline = Pipeline::start(
        settings,
        engine.clone(),
        Arc::new(ConsolePresenter),
        PipelineOptions::from_config(&config),
    );
    let transport = TwitchTransport::new(config.twitch());
    info!(transport = transport.id(), "Chat transport ready");

    let channel = channel
        .map(|c| normalize_channel(&c))
        .filter(|c| !c.is_empty())
        .or_else(|| config.channel());

    let result = Console::new(&pipeline, &transport, engine, channel).run().await;
    pipeline.shutdown().await;
    result
}

/// Voice to use: configured, else one matching the preferred language, else the engine default.
async fn resolve_voice(engine: &dyn SpeechEngine, config: &Config) -> Option<String> {
    let playback = config.playback();
    match wait_for_voices(engine, config.speech().voice_retry_attempts).await {
        Ok(voices) => select_voice(&voices, playback.voice.as_deref(), &playback.preferred_language)
            .map(|v| v.id.clone())
            .or(playback.voice),
        Err(e) => {
            warn!(%e, "Could not list voices");
            playback.voice
        }
    }
}
