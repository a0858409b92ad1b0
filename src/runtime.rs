//! Mode state machine and the periodic detection loop
//!
//! Each iteration drains the command queue completely (FIFO), then runs one
//! periodic detection cycle, then sleeps the configured interval. A burst of
//! commands therefore delays periodic detection; that latency trade-off is
//! intentional. The exit phrase stops the loop before any further periodic
//! cycle starts.

use crate::command::{Command, Intent, IntentMatcher};
use crate::detection::ObjectDetector;
use crate::risk::RiskEngine;
use crate::speech::SpeechController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spoken when a detection cycle in Normal mode finds nothing
pub const NOTHING_DETECTED: &str = "Nothing detected";

/// Spoken when an on-demand query finds no hazards
pub const NO_HAZARDS: &str = "No hazards detected";

/// Spoken on shutdown, before the loop exits
pub const SHUTDOWN_TEXT: &str = "Shutting down. Goodbye.";

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Announce everything the detector sees
    Normal,

    /// Announce only hazardous objects; enables on-demand queries
    Hazard,
}

impl Mode {
    pub fn toggle(self) -> Self {
        match self {
            Mode::Normal => Mode::Hazard,
            Mode::Hazard => Mode::Normal,
        }
    }

    pub fn announcement(self) -> &'static str {
        match self {
            Mode::Normal => "Normal mode",
            Mode::Hazard => "Hazard mode",
        }
    }
}

enum Flow {
    Continue,
    Shutdown,
}

/// The main loop: command consumption plus periodic hazard announcements
pub struct CoreLoop {
    mode: Mode,
    commands: UnboundedReceiver<Command>,
    matcher: IntentMatcher,
    speech: Arc<SpeechController>,
    detector: Arc<dyn ObjectDetector>,
    risk: RiskEngine,
    interval: Duration,
    announce_on_detect: bool,
    cancel: CancellationToken,
}

impl CoreLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        commands: UnboundedReceiver<Command>,
        matcher: IntentMatcher,
        speech: Arc<SpeechController>,
        detector: Arc<dyn ObjectDetector>,
        risk: RiskEngine,
        interval: Duration,
        announce_on_detect: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mode: Mode::Normal,
            commands,
            matcher,
            speech,
            detector,
            risk,
            interval,
            announce_on_detect,
            cancel,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub async fn run(mut self) {
        info!("Main loop started in {:?} mode", self.mode);

        while !self.cancel.is_cancelled() {
            if let Flow::Shutdown = self.drain_commands().await {
                break;
            }

            // The exit handler may have fired from elsewhere while we were
            // draining; never start a new cycle after that.
            if self.cancel.is_cancelled() {
                break;
            }

            self.periodic_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        info!("Main loop stopped");
    }

    /// Process every currently enqueued command, in arrival order
    async fn drain_commands(&mut self) -> Flow {
        while let Ok(command) = self.commands.try_recv() {
            match self.matcher.classify(&command) {
                Intent::Shutdown => {
                    info!("Exit phrase received: '{}'", command);
                    self.speech.speak(SHUTDOWN_TEXT).await;
                    self.cancel.cancel();
                    return Flow::Shutdown;
                }
                Intent::ToggleMode => {
                    self.mode = self.mode.toggle();
                    info!("Mode changed to {:?}", self.mode);
                    self.speech.speak(self.mode.announcement()).await;
                }
                Intent::Query => {
                    if self.mode == Mode::Hazard {
                        self.query_cycle().await;
                    } else {
                        debug!("Query '{}' ignored outside Hazard mode", command);
                    }
                }
                Intent::Unknown => {
                    if !command.is_empty() {
                        debug!("Unrecognized command: '{}'", command);
                    }
                }
            }
        }

        Flow::Continue
    }

    async fn detect_labels(&self) -> Vec<String> {
        match self.detector.detect_once().await {
            Ok(labels) => labels,
            Err(e) => {
                warn!("Detection failed: {}", e);
                Vec::new()
            }
        }
    }

    /// On-demand scan requested by a query command (Hazard mode only)
    async fn query_cycle(&mut self) {
        let labels = self.detect_labels().await;
        let hazards = self.risk.evaluate(&labels);

        if hazards.is_empty() {
            self.speech.speak(NO_HAZARDS).await;
        } else {
            self.speech
                .speak(&format!("Nearby: {}", hazards.join(", ")))
                .await;
        }
    }

    /// One periodic detection cycle with mode-dependent announcements
    async fn periodic_cycle(&mut self) {
        let labels = self.detect_labels().await;

        match self.mode {
            Mode::Normal => {
                if !self.announce_on_detect {
                    return;
                }
                if labels.is_empty() {
                    self.speech.speak(NOTHING_DETECTED).await;
                } else {
                    self.speech
                        .speak(&format!("I can see: {}", labels.join(", ")))
                        .await;
                }
            }
            Mode::Hazard => {
                let hazards = self.risk.evaluate(&labels);
                if hazards.is_empty() {
                    debug!("No hazards this cycle");
                } else if self.announce_on_detect {
                    self.speech
                        .speak(&format!("Caution: {}", hazards.join(", ")))
                        .await;
                }
            }
        }
    }
}
