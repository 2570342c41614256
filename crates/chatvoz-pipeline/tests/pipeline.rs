//! Pipeline tests: scripted speech engine, in-memory transport.
//!
//! Run with: `cargo test -p chatvoz-pipeline --test pipeline`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use chatvoz_channels::{
    ChatTransport, TransportEvent, TransportHandle, TransportMeta, TransportReceiver,
};
use chatvoz_core::error::ChatvozError;
use chatvoz_core::settings::{LiveSettings, RuleConfig, SettingsStore};
use chatvoz_core::types::{ConnectionState, LogEntry, RawChatEvent};
use chatvoz_pipeline::filter::{RejectReason, Verdict};
use chatvoz_pipeline::{PlaybackState, Pipeline, PipelineOptions, Presenter};
use chatvoz_tts::{SpeechEngine, SpeechError, Utterance, VoiceInfo};

const WAIT: Duration = Duration::from_secs(5);

/// Records every utterance. With a gate, each `speak` blocks until a permit is released.
#[derive(Default)]
struct ScriptedEngine {
    gate: Option<Semaphore>,
    started: Mutex<Vec<(Utterance, Instant)>>,
}

impl ScriptedEngine {
    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    fn texts(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(u, _)| u.text.clone())
            .collect()
    }

    fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechEngine for ScriptedEngine {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError> {
        self.started
            .lock()
            .unwrap()
            .push((utterance.clone(), Instant::now()));
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| SpeechError::Failed(e.to_string()))?
                .forget();
        }
        if utterance.text.contains("FAIL") {
            return Err(SpeechError::Failed("scripted failure".into()));
        }
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, SpeechError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingPresenter {
    entries: Mutex<Vec<LogEntry>>,
    states: Mutex<Vec<ConnectionState>>,
}

impl RecordingPresenter {
    fn texts(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| format!("{}: {}", e.sender, e.text))
            .collect()
    }

    fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn on_log_entry(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }

    fn on_connection_state_change(&self, state: &ConnectionState) {
        self.states.lock().unwrap().push(state.clone());
    }
}

/// Transport whose events are injected by the test.
struct MockTransport {
    inject: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    refuse: bool,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            inject: Mutex::new(None),
            refuse: false,
        }
    }

    fn emit(&self, event: TransportEvent) {
        self.inject
            .lock()
            .unwrap()
            .as_ref()
            .expect("not connected")
            .send(event)
            .unwrap();
    }

    /// Report a drop and end the connection task, as a transport that gave up would.
    fn hang_up(&self, reason: &str) {
        self.emit(TransportEvent::State(ConnectionState::Disconnected {
            reason: Some(reason.into()),
        }));
        self.inject.lock().unwrap().take();
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn id(&self) -> &str {
        "mock"
    }

    fn meta(&self) -> TransportMeta {
        TransportMeta {
            label: "Mock".into(),
            description: "In-memory test transport".into(),
        }
    }

    async fn connect(&self, _channel: &str) -> anyhow::Result<(TransportReceiver, TransportHandle)> {
        if self.refuse {
            anyhow::bail!("Login authentication failed");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel();
        *self.inject.lock().unwrap() = Some(inject_tx);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = tx.send(TransportEvent::State(ConnectionState::Disconnected { reason: None }));
                        break;
                    }
                    event = inject_rx.recv() => match event {
                        Some(event) => {
                            let _ = tx.send(event);
                        }
                        None => break,
                    },
                }
            }
        });
        Ok((rx, TransportHandle::new(cancel, task)))
    }
}

fn chat(username: &str, tags: &[(&str, &str)], text: &str) -> RawChatEvent {
    RawChatEvent {
        channel: "foo".into(),
        username: Some(username.into()),
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        text: text.into(),
        is_self: false,
        timestamp: Utc::now(),
    }
}

fn start(
    engine: &Arc<ScriptedEngine>,
    presenter: &Arc<RecordingPresenter>,
    options: PipelineOptions,
) -> Pipeline {
    Pipeline::start(
        SettingsStore::default(),
        engine.clone(),
        presenter.clone(),
        options,
    )
}

fn no_delay() -> PipelineOptions {
    PipelineOptions {
        settle_delay: Duration::ZERO,
        ..PipelineOptions::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_admitted_message_is_spoken() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());

    let verdict = pipeline
        .ingest()
        .handle_event(&chat("alice", &[], "hola"))
        .await;
    assert_eq!(verdict, Verdict::Admit);

    wait_until(|| engine.started_count() == 1).await;
    assert_eq!(engine.texts(), vec!["alice dice: hola"]);
    assert_eq!(presenter.texts(), vec!["alice: hola"]);
    wait_until(|| pipeline.state() == PlaybackState::Idle).await;
    assert_eq!(pipeline.stats().spoken, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_ignored_moderator_is_logged_but_not_queued() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());
    pipeline
        .settings()
        .update_rules(|rules| rules.ignore_mods = true)
        .await;

    let verdict = pipeline
        .ingest()
        .handle_event(&chat("bob", &[("mod", "1")], "hi"))
        .await;

    assert_eq!(verdict, Verdict::Reject(RejectReason::Moderator));
    assert_eq!(presenter.texts(), vec!["bob: hi"]);
    assert_eq!(pipeline.recent_log().len(), 1);
    assert!(pipeline.queue().is_empty());
    assert_eq!(pipeline.state(), PlaybackState::Idle);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.started_count(), 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_rules_are_read_per_message() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());
    let ingest = pipeline.ingest();

    assert!(ingest.handle_event(&chat("Nightbot", &[], "spam")).await.is_admitted());
    pipeline.settings().set_ignored_users(" nightbot , ").await;
    assert_eq!(
        ingest.handle_event(&chat("Nightbot", &[], "spam")).await,
        Verdict::Reject(RejectReason::IgnoredUser)
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_items_are_spoken_in_enqueue_order() {
    let engine = Arc::new(ScriptedEngine::gated());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());

    for (user, text) in [("a", "uno"), ("b", "dos"), ("c", "tres")] {
        pipeline.ingest().handle_event(&chat(user, &[], text)).await;
    }
    wait_until(|| engine.started_count() == 1).await;
    assert_eq!(pipeline.state(), PlaybackState::Speaking);
    assert_eq!(pipeline.queue().len(), 2);

    engine.release(3);
    wait_until(|| pipeline.state() == PlaybackState::Idle).await;
    assert_eq!(
        engine.texts(),
        vec!["a dice: uno", "b dice: dos", "c dice: tres"]
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_mute_consumes_pending_items_without_audio() {
    let engine = Arc::new(ScriptedEngine::gated());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());
    let ingest = pipeline.ingest();

    ingest.handle_event(&chat("a", &[], "uno")).await;
    wait_until(|| engine.started_count() == 1).await;
    ingest.handle_event(&chat("b", &[], "dos")).await;
    ingest.handle_event(&chat("c", &[], "tres")).await;

    pipeline.settings().set_muted(true).await;
    engine.release(1);

    wait_until(|| pipeline.state() == PlaybackState::Idle).await;
    assert_eq!(engine.texts(), vec!["a dice: uno"]);
    assert!(pipeline.queue().is_empty());
    let stats = pipeline.stats();
    assert_eq!(stats.spoken, 1);
    assert_eq!(stats.skipped_muted, 2);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_mute_toggled_back_before_next_dequeue_keeps_everything() {
    let engine = Arc::new(ScriptedEngine::gated());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());
    let ingest = pipeline.ingest();

    ingest.handle_event(&chat("a", &[], "uno")).await;
    wait_until(|| engine.started_count() == 1).await;
    ingest.handle_event(&chat("b", &[], "dos")).await;
    ingest.handle_event(&chat("c", &[], "tres")).await;

    assert!(pipeline.settings().toggle_mute().await);
    assert!(!pipeline.settings().toggle_mute().await);
    engine.release(3);

    wait_until(|| pipeline.state() == PlaybackState::Idle).await;
    assert_eq!(
        engine.texts(),
        vec!["a dice: uno", "b dice: dos", "c dice: tres"]
    );
    assert_eq!(pipeline.stats().skipped_muted, 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_failed_item_is_skipped() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());

    for text in ["antes", "FAIL", "despues"] {
        pipeline.ingest().handle_event(&chat("a", &[], text)).await;
    }

    wait_until(|| engine.started_count() == 3).await;
    wait_until(|| pipeline.state() == PlaybackState::Idle).await;
    let stats = pipeline.stats();
    assert_eq!(stats.spoken, 2);
    assert_eq!(stats.failed, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_playback_settings_read_at_dequeue() {
    let engine = Arc::new(ScriptedEngine::gated());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());
    let ingest = pipeline.ingest();

    ingest.handle_event(&chat("a", &[], "uno")).await;
    ingest.handle_event(&chat("b", &[], "dos")).await;
    wait_until(|| engine.started_count() == 1).await;

    // Queued at full volume, changed before it is dequeued.
    pipeline.settings().set_volume(50).await;
    pipeline.settings().set_rate(2.0).await;
    pipeline.settings().set_voice(Some("es".into())).await;
    engine.release(2);
    wait_until(|| pipeline.state() == PlaybackState::Idle).await;

    let started = engine.started.lock().unwrap();
    assert_eq!(started[0].0.volume, 1.0);
    assert!(started[0].0.voice.is_none());
    assert!((started[1].0.volume - 0.25).abs() < f32::EPSILON);
    assert_eq!(started[1].0.rate, 2.0);
    assert_eq!(started[1].0.voice.as_deref(), Some("es"));
    drop(started);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_settle_delay_only_follows_audio() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, PipelineOptions::default());

    for text in ["FAIL", "uno", "dos"] {
        pipeline.ingest().handle_event(&chat("a", &[], text)).await;
    }
    wait_until(|| engine.started_count() == 3).await;

    let started = engine.started.lock().unwrap();
    let after_failure = started[1].1 - started[0].1;
    let after_audio = started[2].1 - started[1].1;
    assert!(after_failure < Duration::from_millis(300), "{after_failure:?}");
    assert!(after_audio >= Duration::from_millis(300), "{after_audio:?}");
    drop(started);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_sound_check_bypasses_filter() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = Pipeline::start(
        SettingsStore::new(LiveSettings {
            rules: RuleConfig {
                subscribers_only: true,
                ..RuleConfig::default()
            },
            ..LiveSettings::default()
        }),
        engine.clone(),
        presenter.clone(),
        no_delay(),
    );

    assert!(pipeline.sound_check());
    wait_until(|| engine.started_count() == 1).await;
    assert_eq!(
        engine.texts(),
        vec!["Sistema dice: Prueba de sonido exitosa"]
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_session_lifecycle() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());
    let transport = MockTransport::new();

    let session = pipeline.connect(&transport, "#Foo").await.unwrap();
    assert_eq!(session.channel(), "foo");
    assert_eq!(
        presenter.states(),
        vec![
            ConnectionState::Connecting {
                channel: "foo".into()
            },
            ConnectionState::Connected {
                channel: "foo".into()
            },
        ]
    );

    transport.emit(TransportEvent::Message(chat(
        "Alice",
        &[("display-name", "Alice")],
        "  hola  ",
    )));
    wait_until(|| engine.started_count() == 1).await;
    assert_eq!(engine.texts(), vec!["Alice dice: hola"]);

    session.disconnect().await;
    assert_eq!(
        presenter.states().last(),
        Some(&ConnectionState::Disconnected { reason: None })
    );
    assert_eq!(
        presenter.texts(),
        vec![
            "Sistema: Conectado al canal: foo",
            "Alice:   hola  ",
            "Sistema: Desconectado.",
        ]
    );
    let newest = pipeline.recent_log();
    assert_eq!(newest[0].text, "Desconectado.");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_log_keeps_newest_twenty_events() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());
    pipeline.settings().set_ignored_users("bot").await;

    for i in 0..25 {
        let user = if i % 2 == 0 { "alice" } else { "bot" };
        pipeline
            .ingest()
            .handle_event(&chat(user, &[], &format!("mensaje {i}")))
            .await;
    }

    let log = pipeline.recent_log();
    assert_eq!(log.len(), 20);
    assert_eq!(log[0].text, "mensaje 24");
    assert_eq!(log[19].text, "mensaje 5");
    assert_eq!(presenter.texts().len(), 25);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_release_after_drop_adds_no_log_line() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());
    let transport = MockTransport::new();

    let session = pipeline.connect(&transport, "foo").await.unwrap();
    transport.hang_up("connection reset");
    wait_until(|| !session.is_active()).await;
    session.release().await;

    let session = pipeline.connect(&transport, "foo").await.unwrap();
    assert!(session.is_active());
    assert_eq!(
        presenter.texts(),
        vec![
            "Sistema: Conectado al canal: foo",
            "Sistema: Conectado al canal: foo",
        ]
    );
    assert!(matches!(
        presenter.states()[2],
        ConnectionState::Disconnected { reason: Some(_) }
    ));

    session.disconnect().await;
    assert_eq!(pipeline.recent_log()[0].text, "Desconectado.");
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_connection_failure_reports_error() {
    let engine = Arc::new(ScriptedEngine::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(&engine, &presenter, no_delay());
    let transport = MockTransport {
        refuse: true,
        ..MockTransport::new()
    };

    let err = pipeline.connect(&transport, "foo").await.err().unwrap();
    assert!(matches!(err, ChatvozError::Channel(_)));
    assert!(matches!(
        presenter.states().last(),
        Some(ConnectionState::Error { message }) if message.contains("authentication")
    ));

    let err = pipeline.connect(&transport, " # ").await.err().unwrap();
    assert!(matches!(err, ChatvozError::Channel(_)));

    pipeline.shutdown().await;
}

async fn pending_after_drop(clear_queue_on_disconnect: bool) -> (usize, Vec<String>) {
    let engine = Arc::new(ScriptedEngine::gated());
    let presenter = Arc::new(RecordingPresenter::default());
    let pipeline = start(
        &engine,
        &presenter,
        PipelineOptions {
            clear_queue_on_disconnect,
            ..no_delay()
        },
    );
    let transport = MockTransport::new();
    let session = pipeline.connect(&transport, "foo").await.unwrap();

    for text in ["uno", "dos", "tres"] {
        transport.emit(TransportEvent::Message(chat("a", &[], text)));
    }
    wait_until(|| engine.started_count() == 1 && pipeline.queue().len() == 2).await;

    transport.emit(TransportEvent::State(ConnectionState::Disconnected {
        reason: Some("connection reset".into()),
    }));
    wait_until(|| presenter.states().len() == 3).await;
    let pending = pipeline.queue().len();

    engine.release(3);
    wait_until(|| pipeline.state() == PlaybackState::Idle).await;
    let spoken = engine.texts();

    session.disconnect().await;
    pipeline.shutdown().await;
    (pending, spoken)
}

#[tokio::test]
async fn test_disconnect_keeps_queue_by_default() {
    let (pending, spoken) = pending_after_drop(false).await;
    assert_eq!(pending, 2);
    assert_eq!(spoken.len(), 3);
}

#[tokio::test]
async fn test_disconnect_can_clear_queue() {
    let (pending, spoken) = pending_after_drop(true).await;
    assert_eq!(pending, 0);
    assert_eq!(spoken, vec!["a dice: uno"]);
}
