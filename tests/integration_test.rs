//! Integration tests for the orchestration engine
//!
//! Drives the full bootstrap / dispatch / main-loop stack with scripted
//! collaborators: audio arrives through channels, speech is recorded
//! instead of played, and recognition returns pre-scripted transcripts.

use async_trait::async_trait;
use aura_core::{
    CaptureStream, Command, CoreConfig, DetectError, EnergyGateEngine, IntentMatcher,
    KeywordEngine, KeywordSpotter, ObjectDetector, Orchestrator, OrchestratorError,
    RecognizerError, RiskEngine, SessionHandle, SpeechController, SpeechError, SpeechRecognizer,
    SpeechSession, SpeechSynthesizer, SpotterBackend, SpotterError,
};
use aura_core::runtime::{CoreLoop, SHUTDOWN_TEXT};
use aura_core::spotter::ENGINE_FRAME_LENGTH;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// One loud chunk: exactly one engine frame above the test threshold
fn trigger_burst() -> Vec<f32> {
    vec![0.9; ENGINE_FRAME_LENGTH]
}

/// Capture stream fed through a channel so tests control when the trigger
/// phrase "arrives"
struct ChannelStream {
    rx: UnboundedReceiver<Vec<f32>>,
}

#[async_trait]
impl CaptureStream for ChannelStream {
    async fn next_chunk(&mut self) -> Option<Vec<f32>> {
        self.rx.recv().await
    }

    fn close(&mut self) {
        self.rx.close();
    }
}

/// Backend whose capture stream is a channel; single-frame energy engine
struct ChannelBackend {
    rx: Mutex<Option<UnboundedReceiver<Vec<f32>>>>,
    fail_engine: bool,
}

impl ChannelBackend {
    fn new() -> (Self, UnboundedSender<Vec<f32>>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
                fail_engine: false,
            },
            tx,
        )
    }

    fn failing() -> Self {
        Self {
            rx: Mutex::new(None),
            fail_engine: true,
        }
    }
}

impl SpotterBackend for ChannelBackend {
    fn open_engine(&self) -> Result<Box<dyn KeywordEngine>, SpotterError> {
        if self.fail_engine {
            return Err(SpotterError::EngineInit("no model available".to_string()));
        }
        Ok(Box::new(EnergyGateEngine::new(ENGINE_FRAME_LENGTH, 0.5, 1)))
    }

    fn open_capture(&self) -> Result<Box<dyn CaptureStream>, SpotterError> {
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| SpotterError::CaptureInit("capture already taken".to_string()))?;
        Ok(Box::new(ChannelStream { rx }))
    }
}

/// Recorded speech session; optionally takes real time so barge-in has
/// something to interrupt
struct TimedHandle {
    finished: AtomicBool,
    ends: Notify,
}

impl TimedHandle {
    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.ends.notify_waiters();
    }
}

impl SessionHandle for TimedHandle {
    fn terminate(&self) {
        self.finish();
    }

    fn kill(&self) {
        self.finish();
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

struct TimedSession {
    handle: Arc<TimedHandle>,
    duration: Duration,
}

#[async_trait]
impl SpeechSession for TimedSession {
    fn handle(&self) -> Arc<dyn SessionHandle> {
        Arc::clone(&self.handle) as Arc<dyn SessionHandle>
    }

    async fn wait(&mut self) -> Result<(), SpeechError> {
        if self.handle.is_finished() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => self.handle.finish(),
            _ = self.handle.ends.notified() => {}
        }
        Ok(())
    }
}

struct RecordingSynthesizer {
    spoken: Arc<Mutex<Vec<String>>>,
    duration: Duration,
    /// When set, only utterances starting with this prefix take
    /// `duration`; everything else completes immediately
    slow_prefix: Option<&'static str>,
}

impl RecordingSynthesizer {
    fn instant() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        Self::with_duration(Duration::ZERO)
    }

    fn with_duration(duration: Duration) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                spoken: Arc::clone(&spoken),
                duration,
                slow_prefix: None,
            }),
            spoken,
        )
    }

    fn slow_for_prefix(
        prefix: &'static str,
        duration: Duration,
    ) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                spoken: Arc::clone(&spoken),
                duration,
                slow_prefix: Some(prefix),
            }),
            spoken,
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Box<dyn SpeechSession>, SpeechError> {
        self.spoken.lock().push(text.to_string());
        let duration = match self.slow_prefix {
            Some(prefix) if !text.starts_with(prefix) => Duration::ZERO,
            _ => self.duration,
        };
        Ok(Box::new(TimedSession {
            handle: Arc::new(TimedHandle {
                finished: AtomicBool::new(false),
                ends: Notify::new(),
            }),
            duration,
        }))
    }
}

struct ScriptedRecognizer {
    transcripts: VecDeque<String>,
}

impl ScriptedRecognizer {
    fn new(transcripts: &[&str]) -> Box<Self> {
        Box::new(Self {
            transcripts: transcripts.iter().map(|t| t.to_string()).collect(),
        })
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn transcribe(&mut self) -> Result<String, RecognizerError> {
        Ok(self.transcripts.pop_front().unwrap_or_default())
    }
}

struct ScriptedDetector {
    labels: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    fn with_labels(labels: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ObjectDetector for ScriptedDetector {
    async fn detect_once(&self) -> Result<Vec<String>, DetectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.labels.clone())
    }
}

/// Fast timings for tests: short grace window, one-second cycles
fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.grace_window_ms = 100;
    config.detection_interval_secs = 1;
    config
}

#[tokio::test]
async fn test_voice_shutdown_end_to_end() {
    let mut config = test_config();
    config.announce_on_detect = false;

    let (synth, spoken) = RecordingSynthesizer::instant();
    let speech = Arc::new(SpeechController::new(synth, Duration::from_millis(10)));
    let (backend, audio_tx) = ChannelBackend::new();

    let orchestrator = Orchestrator::new(
        config,
        speech,
        KeywordSpotter::new(Box::new(backend)),
        None,
        ScriptedRecognizer::new(&["shut down"]),
        ScriptedDetector::with_labels(&[]),
    );

    let run = tokio::spawn(orchestrator.run());

    // Let the grace window lapse, then speak the trigger
    tokio::time::sleep(Duration::from_millis(300)).await;
    audio_tx.send(trigger_burst()).unwrap();

    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("orchestrator did not shut down")
        .unwrap()
        .unwrap();

    let spoken = spoken.lock();
    assert_eq!(
        spoken.as_slice(),
        [
            "Aura started. Say 'hey aura' now to hear the full instructions.",
            "Normal mode",
            "I'm listening.",
            SHUTDOWN_TEXT,
        ]
    );
}

#[tokio::test]
async fn test_mode_change_and_hazard_announcements_end_to_end() {
    let config = test_config();

    let (synth, spoken) = RecordingSynthesizer::instant();
    let speech = Arc::new(SpeechController::new(synth, Duration::from_millis(10)));
    let (backend, audio_tx) = ChannelBackend::new();
    let detector = ScriptedDetector::with_labels(&["person", "chair"]);

    let orchestrator = Orchestrator::new(
        config,
        speech,
        KeywordSpotter::new(Box::new(backend)),
        None,
        ScriptedRecognizer::new(&["change mode", "shut down"]),
        detector.clone(),
    );

    let run = tokio::spawn(orchestrator.run());

    tokio::time::sleep(Duration::from_millis(300)).await;
    audio_tx.send(trigger_burst()).unwrap();

    // Give the loop time to process the toggle and run a Hazard cycle
    tokio::time::sleep(Duration::from_millis(1500)).await;
    audio_tx.send(trigger_burst()).unwrap();

    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("orchestrator did not shut down")
        .unwrap()
        .unwrap();

    let spoken = spoken.lock();
    assert!(spoken.contains(&"Hazard mode".to_string()));
    // Hazard cycles filter the label list down to the hazardous subset;
    // Normal cycles before the toggle announce everything.
    assert!(spoken.contains(&"Caution: person".to_string()));
    assert!(!spoken
        .iter()
        .any(|s| s.starts_with("Caution") && s.contains("chair")));
    assert_eq!(spoken.last().map(String::as_str), Some(SHUTDOWN_TEXT));
    assert!(detector.calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_instructions_offered_when_trigger_arrives_in_grace_window() {
    let config = test_config();
    let instructions = config.instructions.clone();

    let (synth, spoken) = RecordingSynthesizer::instant();
    let speech = Arc::new(SpeechController::new(synth, Duration::from_millis(10)));
    let (backend, audio_tx) = ChannelBackend::new();

    let orchestrator = Orchestrator::new(
        config,
        speech,
        KeywordSpotter::new(Box::new(backend)),
        None,
        ScriptedRecognizer::new(&[]),
        ScriptedDetector::with_labels(&[]),
    );
    let shutdown = orchestrator.shutdown_token();

    // Trigger before run starts: the handshake listener sees it immediately
    audio_tx.send(trigger_burst()).unwrap();

    let run = tokio::spawn(orchestrator.run());
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("orchestrator did not stop")
        .unwrap()
        .unwrap();

    let spoken = spoken.lock();
    for line in &instructions {
        assert!(
            spoken.contains(line),
            "instruction line not spoken: {}",
            line
        );
    }
}

#[tokio::test]
async fn test_instruction_sequence_skippable_by_second_trigger() {
    let config = test_config();
    let instructions = config.instructions.clone();

    // Real playback time so the skip can land mid-sequence
    let (synth, spoken) = RecordingSynthesizer::with_duration(Duration::from_millis(80));
    let speech = Arc::new(SpeechController::new(synth, Duration::from_millis(10)));
    let (backend, audio_tx) = ChannelBackend::new();
    let (skip_backend, skip_tx) = ChannelBackend::new();

    let orchestrator = Orchestrator::new(
        config,
        speech,
        KeywordSpotter::new(Box::new(backend)),
        Some(Box::new(skip_backend)),
        ScriptedRecognizer::new(&[]),
        ScriptedDetector::with_labels(&[]),
    );
    let shutdown = orchestrator.shutdown_token();

    // First trigger opens the instruction sequence, second one skips it
    audio_tx.send(trigger_burst()).unwrap();
    skip_tx.send(trigger_burst()).unwrap();

    let run = tokio::spawn(orchestrator.run());
    tokio::time::sleep(Duration::from_millis(800)).await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("orchestrator did not stop")
        .unwrap()
        .unwrap();

    let spoken = spoken.lock();
    let lines_spoken = instructions.iter().filter(|l| spoken.contains(l)).count();
    assert!(
        lines_spoken < instructions.len(),
        "skip had no effect: all {} instruction lines were spoken",
        lines_spoken
    );
}

#[tokio::test]
async fn test_engine_init_failure_is_fatal_and_announced() {
    let config = test_config();

    let (synth, spoken) = RecordingSynthesizer::instant();
    let speech = Arc::new(SpeechController::new(synth, Duration::from_millis(10)));

    let orchestrator = Orchestrator::new(
        config,
        speech,
        KeywordSpotter::new(Box::new(ChannelBackend::failing())),
        None,
        ScriptedRecognizer::new(&[]),
        ScriptedDetector::with_labels(&[]),
    );

    let result = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .expect("orchestrator hung on init failure");

    match result {
        Err(OrchestratorError::Spotter(e)) => assert!(e.is_init_failure()),
        other => panic!("expected fatal spotter error, got {:?}", other),
    }

    // The failure is announced once before the process dies
    assert!(spoken.lock().iter().any(|s| s.contains("unavailable")));
}

#[tokio::test]
async fn test_fifo_command_processing_through_core_loop() {
    // Starting in Normal mode, enqueued ["change mode", "what is it",
    // "shut down"] must transition to Hazard, answer the query under
    // Hazard, then shut down, in that order.
    let config = CoreConfig::default();
    let (synth, spoken) = RecordingSynthesizer::instant();
    let speech = Arc::new(SpeechController::new(synth, Duration::from_millis(10)));
    let detector = ScriptedDetector::with_labels(&["chair", "person", "table"]);
    let (tx, rx) = unbounded_channel();
    let cancel = CancellationToken::new();

    let core = CoreLoop::new(
        rx,
        IntentMatcher::from_config(&config),
        speech,
        detector.clone(),
        RiskEngine::new(config.hazardous_objects.clone()),
        Duration::from_secs(60),
        true,
        cancel,
    );

    for text in ["change mode", "what is it", "shut down"] {
        tx.send(Command::normalized(text)).unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), core.run())
        .await
        .expect("loop did not shut down");

    assert_eq!(
        spoken.lock().as_slice(),
        ["Hazard mode", "Nearby: person", SHUTDOWN_TEXT]
    );
    // Only the on-demand query invoked the detector; the exit phrase
    // prevented any periodic cycle from starting.
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_barge_in_interrupts_periodic_announcement() {
    // The first periodic announcement would play for 20s; the trigger must
    // cut it off so the main loop unblocks and the shutdown command gets
    // through well before the test timeout.
    let mut config = test_config();
    config.ack_text = String::new();

    let (synth, spoken) =
        RecordingSynthesizer::slow_for_prefix("I can see", Duration::from_secs(20));
    let speech = Arc::new(SpeechController::new(synth, Duration::from_millis(10)));
    let (backend, audio_tx) = ChannelBackend::new();

    let orchestrator = Orchestrator::new(
        config,
        speech,
        KeywordSpotter::new(Box::new(backend)),
        None,
        ScriptedRecognizer::new(&["shut down"]),
        ScriptedDetector::with_labels(&["person"]),
    );

    let run = tokio::spawn(orchestrator.run());

    // By now the loop is a few hundred ms into "I can see: person"
    tokio::time::sleep(Duration::from_millis(500)).await;
    audio_tx.send(trigger_burst()).unwrap();

    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("barge-in did not unblock the announcement")
        .unwrap()
        .unwrap();

    let spoken = spoken.lock();
    assert!(spoken.contains(&"I can see: person".to_string()));
    assert_eq!(spoken.last().map(String::as_str), Some(SHUTDOWN_TEXT));
}
