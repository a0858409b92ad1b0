//! Bootstrap and supervision
//!
//! Wires the spotter, dispatcher, speech controller and main loop together:
//! plays the intro, races a grace window against the trigger phrase to offer
//! the full instruction sequence (skippable via a disposable listener),
//! starts the dispatcher, then runs the main loop until shutdown. A
//! dispatcher initialization failure is escalated as a fatal error rather
//! than lost with the thread.

use crate::command::IntentMatcher;
use crate::config::CoreConfig;
use crate::detection::ObjectDetector;
use crate::dispatcher::{CommandDispatcher, DispatcherError};
use crate::recognizer::SpeechRecognizer;
use crate::risk::RiskEngine;
use crate::runtime::{CoreLoop, Mode};
use crate::speech::SpeechController;
use crate::spotter::{KeywordSpotter, SpotterBackend, SpotterError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long to wait for the dispatcher to observe shutdown before
/// abandoning it (it may be blocked inside a collaborator call)
const DISPATCHER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Spoken once if voice control cannot be brought up
const VOICE_UNAVAILABLE_TEXT: &str = "Voice control is unavailable. Aura is shutting down.";

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Keyword spotter failed during startup: {0}")]
    Spotter(#[from] SpotterError),

    #[error("Command dispatcher failed: {0}")]
    Dispatcher(#[from] DispatcherError),

    #[error("Command dispatcher panicked")]
    DispatcherPanicked,
}

pub struct Orchestrator {
    config: CoreConfig,
    speech: Arc<SpeechController>,
    spotter: KeywordSpotter,
    /// Backend for the disposable skip listener used during instructions
    skip_backend: Option<Box<dyn SpotterBackend>>,
    recognizer: Box<dyn SpeechRecognizer>,
    detector: Arc<dyn ObjectDetector>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: CoreConfig,
        speech: Arc<SpeechController>,
        spotter: KeywordSpotter,
        skip_backend: Option<Box<dyn SpotterBackend>>,
        recognizer: Box<dyn SpeechRecognizer>,
        detector: Arc<dyn ObjectDetector>,
    ) -> Self {
        Self {
            config,
            speech,
            spotter,
            skip_backend,
            recognizer,
            detector,
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed by every loop; cancelling it from outside shuts the
    /// whole system down cooperatively.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(mut self) -> Result<(), OrchestratorError> {
        self.config.log_summary();

        self.speech.speak(&self.config.intro_text).await;

        match self.offer_instructions().await {
            Ok(true) => self.play_instructions().await,
            Ok(false) => info!("No trigger during grace window, skipping instructions"),
            Err(e) => {
                // The dispatcher needs the same engine and device; if they
                // cannot be acquired now, the system has no voice control.
                warn!("Trigger listener failed during intro: {}", e);
                self.speech.speak(VOICE_UNAVAILABLE_TEXT).await;
                return Err(e.into());
            }
        }

        // Hand the spotter to the dispatcher and the queue to the main loop
        let (commands_tx, commands_rx) = tokio::sync::mpsc::unbounded_channel();
        let Orchestrator {
            config,
            speech,
            spotter,
            recognizer,
            detector,
            cancel,
            ..
        } = self;

        let dispatcher = CommandDispatcher::new(
            spotter,
            recognizer,
            Arc::clone(&speech),
            commands_tx,
            cancel.clone(),
            config.ack_text.clone(),
        );
        let dispatcher_task = tokio::spawn(dispatcher.run());

        speech.speak(Mode::Normal.announcement()).await;

        let core = CoreLoop::new(
            commands_rx,
            IntentMatcher::from_config(&config),
            Arc::clone(&speech),
            detector,
            RiskEngine::new(config.hazardous_objects.clone()),
            Duration::from_secs(config.detection_interval_secs),
            config.announce_on_detect,
            cancel.clone(),
        );
        let core_task = tokio::spawn(core.run());

        supervise(cancel, speech, core_task, dispatcher_task).await
    }

    /// Race the grace window against the trigger phrase
    async fn offer_instructions(&mut self) -> Result<bool, SpotterError> {
        let grace = Duration::from_millis(self.config.grace_window_ms);

        match tokio::time::timeout(grace, self.spotter.detect_blocking(&self.cancel)).await {
            Ok(result) => result,
            Err(_) => Ok(false),
        }
    }

    /// Speak the instruction sequence; a disposable listener lets the user
    /// skip the rest by saying the trigger phrase again.
    async fn play_instructions(&mut self) {
        info!("Trigger during grace window, offering full instructions");

        let done = CancellationToken::new();
        let skipped = CancellationToken::new();

        let listener = self.skip_backend.take().map(|backend| {
            let done = done.clone();
            let skipped = skipped.clone();
            let speech = Arc::clone(&self.speech);

            tokio::spawn(async move {
                let mut spotter = KeywordSpotter::new(backend);
                match spotter.detect_blocking(&done).await {
                    Ok(true) => {
                        speech.stop().await;
                        skipped.cancel();
                    }
                    Ok(false) => {}
                    // The skip listener is best-effort; losing it only
                    // means the instructions play to the end.
                    Err(e) => warn!("Skip listener unavailable: {}", e),
                }
                spotter.close();
            })
        });

        for line in &self.config.instructions {
            if skipped.is_cancelled() {
                info!("Instruction sequence skipped");
                break;
            }
            self.speech.speak(line).await;
        }

        done.cancel();
        if let Some(listener) = listener {
            let _ = listener.await;
        }

        info!("Instructions offered");
    }
}

/// Wait for either loop to finish and unwind the other accordingly
async fn supervise(
    cancel: CancellationToken,
    speech: Arc<SpeechController>,
    mut core_task: JoinHandle<()>,
    mut dispatcher_task: JoinHandle<Result<(), DispatcherError>>,
) -> Result<(), OrchestratorError> {
    tokio::select! {
        result = &mut dispatcher_task => {
            match result {
                // A clean dispatcher exit only happens on shutdown; let
                // the main loop finish draining.
                Ok(Ok(())) => {
                    let _ = core_task.await;
                    Ok(())
                }
                Ok(Err(e)) => {
                    warn!("Dispatcher failed, shutting the system down: {}", e);
                    speech.speak(VOICE_UNAVAILABLE_TEXT).await;
                    cancel.cancel();
                    let _ = core_task.await;
                    Err(e.into())
                }
                Err(_) => {
                    cancel.cancel();
                    let _ = core_task.await;
                    Err(OrchestratorError::DispatcherPanicked)
                }
            }
        }
        _ = &mut core_task => {
            // Main loop exited (exit phrase or external cancel); the
            // dispatcher observes the token between blocking calls.
            cancel.cancel();
            match tokio::time::timeout(DISPATCHER_JOIN_TIMEOUT, dispatcher_task).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => {
                    // Already shutting down; log but do not fail shutdown
                    warn!("Dispatcher reported an error during shutdown: {}", e);
                    Ok(())
                }
                Ok(Err(_)) => Err(OrchestratorError::DispatcherPanicked),
                Err(_) => {
                    warn!(
                        "Dispatcher still blocked after {:?}, abandoning it",
                        DISPATCHER_JOIN_TIMEOUT
                    );
                    Ok(())
                }
            }
        }
    }
}
