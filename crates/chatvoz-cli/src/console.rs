//! Operator console: line commands on stdin while the pipeline runs.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use chatvoz_channels::ChatTransport;
use chatvoz_core::config::normalize_channel;
use chatvoz_core::settings::RuleConfig;
use chatvoz_core::types::{ConnectionState, LogEntry};
use chatvoz_pipeline::{ChatSession, Pipeline, Presenter};
use chatvoz_tts::SpeechEngine;

/// Prints chat lines and connection changes for the operator.
pub struct ConsolePresenter;

impl Presenter for ConsolePresenter {
    fn on_log_entry(&self, entry: &LogEntry) {
        let time = entry.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S");
        println!("[{time}] {}: {}", entry.sender, entry.text);
    }

    fn on_connection_state_change(&self, state: &ConnectionState) {
        println!("* {state}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Mods,
    Vips,
    Broadcaster,
    Subscribers,
}

impl Rule {
    fn flag(self, rules: &mut RuleConfig) -> &mut bool {
        match self {
            Self::Mods => &mut rules.ignore_mods,
            Self::Vips => &mut rules.ignore_vips,
            Self::Broadcaster => &mut rules.ignore_broadcaster,
            Self::Subscribers => &mut rules.subscribers_only,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Mute,
    Unmute,
    Volume(u8),
    Rate(f32),
    Voice(Option<String>),
    Voices,
    Ignore(String),
    Rule(Rule, bool),
    Test,
    Log,
    Status,
    Connect(Option<String>),
    Disconnect,
    Help,
    Quit,
}

const HELP: &str = "\
Commands:
  mute | unmute              stop or resume reading (pending messages are dropped while muted)
  volume <0-100>             set the volume
  rate <0.1-10>              set the speech rate multiplier
  voice [NAME]               pick a voice (no name: engine default)
  voices                     list the engine's voices
  ignore [a,b,...]           replace the ignored users list (empty clears it)
  mods|vips|broadcaster on|off   ignore that role
  subs on|off                subscribers-only mode
  test                       queue a sound check
  log                        show the recent message log
  status                     show connection, queue and settings
  connect [CHANNEL]          join a channel (default: the last one)
  disconnect                 leave the channel
  quit                       exit";

fn parse_switch(arg: Option<&str>) -> Result<bool, String> {
    match arg {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err("Expected 'on' or 'off'".into()),
    }
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let arg = (!rest.is_empty()).then_some(rest);

    let command = match cmd.to_lowercase().as_str() {
        "mute" => Command::Mute,
        "unmute" => Command::Unmute,
        "volume" => {
            let value: u32 = arg
                .and_then(|a| a.parse().ok())
                .ok_or("Usage: volume <0-100>")?;
            Command::Volume(value.min(100) as u8)
        }
        "rate" => {
            let value: f32 = arg
                .and_then(|a| a.parse().ok())
                .filter(|r: &f32| r.is_finite())
                .ok_or("Usage: rate <0.1-10>")?;
            Command::Rate(value)
        }
        "voice" => Command::Voice(arg.map(String::from)),
        "voices" => Command::Voices,
        "ignore" => Command::Ignore(rest.to_string()),
        "mods" => Command::Rule(Rule::Mods, parse_switch(arg)?),
        "vips" => Command::Rule(Rule::Vips, parse_switch(arg)?),
        "broadcaster" => Command::Rule(Rule::Broadcaster, parse_switch(arg)?),
        "subs" => Command::Rule(Rule::Subscribers, parse_switch(arg)?),
        "test" => Command::Test,
        "log" => Command::Log,
        "status" => Command::Status,
        "connect" => Command::Connect(arg.map(String::from)),
        "disconnect" => Command::Disconnect,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command '{other}', type 'help'")),
    };
    Ok(command)
}

pub struct Console<'a> {
    pipeline: &'a Pipeline,
    transport: &'a dyn ChatTransport,
    engine: Arc<dyn SpeechEngine>,
    session: Option<ChatSession>,
    channel: Option<String>,
}

impl<'a> Console<'a> {
    pub fn new(
        pipeline: &'a Pipeline,
        transport: &'a dyn ChatTransport,
        engine: Arc<dyn SpeechEngine>,
        channel: Option<String>,
    ) -> Self {
        Self {
            pipeline,
            transport,
            engine,
            session: None,
            channel,
        }
    }

    /// Read commands until `quit`, end of input or Ctrl-C, then leave the channel.
    pub async fn run(mut self) -> anyhow::Result<()> {
        if self.channel.is_some() {
            self.connect(None).await;
        } else {
            println!("No channel configured. Use 'connect <channel>'.");
        }
        println!("Type 'help' for commands.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => self.execute(command).await,
                        Err(message) => println!("{message}"),
                    }
                }
            }
        }

        if let Some(session) = self.session.take() {
            session.disconnect().await;
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command) {
        let settings = self.pipeline.settings();
        match command {
            Command::Mute => {
                settings.set_muted(true).await;
                println!("Muted");
            }
            Command::Unmute => {
                settings.set_muted(false).await;
                println!("Unmuted");
            }
            Command::Volume(volume) => {
                settings.set_volume(volume).await;
                println!("Volume {volume}");
            }
            Command::Rate(rate) => {
                settings.set_rate(rate).await;
                println!("Rate {}", settings.playback().await.rate);
            }
            Command::Voice(voice) => {
                settings.set_voice(voice).await;
                match settings.playback().await.voice {
                    Some(voice) => println!("Voice {voice}"),
                    None => println!("Using the engine's default voice"),
                }
            }
            Command::Voices => match self.engine.list_voices().await {
                Ok(voices) => {
                    let current = settings.playback().await.voice;
                    for voice in voices {
                        let marker = if current.as_deref().is_some_and(|c| voice.matches(c)) {
                            "*"
                        } else {
                            " "
                        };
                        println!("{marker} {:<12} {:<10} {}", voice.id, voice.language, voice.name);
                    }
                }
                Err(e) => println!("Could not list voices: {e}"),
            },
            Command::Ignore(list) => {
                settings.set_ignored_users(&list).await;
                let rules = settings.rules().await;
                let users: Vec<&str> = rules.ignored_users.iter().map(String::as_str).collect();
                println!("Ignoring: {}", if users.is_empty() { "nobody".into() } else { users.join(", ") });
            }
            Command::Rule(rule, on) => {
                settings.update_rules(|rules| *rule.flag(rules) = on).await;
                println!("{rule:?}: {}", if on { "on" } else { "off" });
            }
            Command::Test => {
                self.pipeline.sound_check();
            }
            Command::Log => {
                for entry in self.pipeline.recent_log().iter().rev() {
                    ConsolePresenter.on_log_entry(entry);
                }
            }
            Command::Status => self.print_status().await,
            Command::Connect(channel) => self.connect(channel).await,
            Command::Disconnect => match self.session.take() {
                Some(session) => session.disconnect().await,
                None => println!("Not connected"),
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
    }

    async fn connect(&mut self, channel: Option<String>) {
        if let Some(session) = &self.session {
            if session.is_active() {
                println!("Already connected to #{}, disconnect first", session.channel());
                return;
            }
        }
        if let Some(stale) = self.session.take() {
            stale.release().await;
        }

        let Some(channel) = channel
            .map(|c| normalize_channel(&c))
            .filter(|c| !c.is_empty())
            .or_else(|| self.channel.clone())
        else {
            println!("Usage: connect <channel>");
            return;
        };

        match self.pipeline.connect(self.transport, &channel).await {
            Ok(session) => {
                self.channel = Some(session.channel().to_string());
                self.session = Some(session);
            }
            Err(e) => warn!(%channel, error = %e, "Could not join channel"),
        }
    }

    async fn print_status(&self) {
        let live = self.pipeline.settings().snapshot().await;
        let stats = self.pipeline.stats();
        let meta = self.transport.meta();
        println!("Transport: {} ({})", meta.label, meta.description);
        match &self.session {
            Some(s) if s.is_active() => println!("Channel:   #{}", s.channel()),
            _ => println!("Channel:   (not connected)"),
        }
        println!(
            "Playback:  {:?}, {} pending",
            self.pipeline.state(),
            self.pipeline.queue().len()
        );
        println!(
            "Spoken:    {} ({} skipped while muted, {} failed)",
            stats.spoken, stats.skipped_muted, stats.failed
        );
        println!(
            "Voice:     {}  volume {}  rate {}{}",
            live.playback.voice.as_deref().unwrap_or("(default)"),
            live.playback.volume,
            live.playback.rate,
            if live.playback.muted { "  [muted]" } else { "" }
        );
        let rules = &live.rules;
        println!(
            "Ignore:    mods {}  vips {}  broadcaster {}  |  subs-only {}",
            on_off(rules.ignore_mods),
            on_off(rules.ignore_vips),
            on_off(rules.ignore_broadcaster),
            on_off(rules.subscribers_only)
        );
        if !rules.ignored_users.is_empty() {
            let users: Vec<&str> = rules.ignored_users.iter().map(String::as_str).collect();
            println!("Ignored:   {}", users.join(", "));
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
