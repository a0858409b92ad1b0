//! Background command dispatcher
//!
//! Blocks on the keyword spotter; on each trigger it barges in on any
//! in-progress announcement, optionally speaks a short acknowledgment,
//! captures and transcribes the command window, and enqueues the normalized
//! command. An initialization failure is returned to the orchestrator
//! instead of dying silently.

use crate::command::Command;
use crate::recognizer::SpeechRecognizer;
use crate::speech::SpeechController;
use crate::spotter::{KeywordSpotter, SpotterError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error("Keyword spotter failed: {0}")]
    Spotter(#[from] SpotterError),

    #[error("Command queue closed")]
    QueueClosed,
}

pub struct CommandDispatcher {
    spotter: KeywordSpotter,
    recognizer: Box<dyn SpeechRecognizer>,
    speech: Arc<SpeechController>,
    commands: UnboundedSender<Command>,
    cancel: CancellationToken,
    ack_text: String,
}

impl CommandDispatcher {
    pub fn new(
        spotter: KeywordSpotter,
        recognizer: Box<dyn SpeechRecognizer>,
        speech: Arc<SpeechController>,
        commands: UnboundedSender<Command>,
        cancel: CancellationToken,
        ack_text: String,
    ) -> Self {
        Self {
            spotter,
            recognizer,
            speech,
            commands,
            cancel,
            ack_text,
        }
    }

    pub async fn run(mut self) -> Result<(), DispatcherError> {
        info!("Command dispatcher started");

        while !self.cancel.is_cancelled() {
            let detected = self.spotter.detect_blocking(&self.cancel).await?;
            if !detected {
                break;
            }

            info!("Trigger phrase detected");
            self.speech.stop().await;

            if !self.ack_text.is_empty() {
                self.speech.speak(&self.ack_text).await;
            }

            let transcript = match self.recognizer.transcribe().await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Recognition failed, treating as empty command: {}", e);
                    String::new()
                }
            };

            let command = Command::normalized(&transcript);
            debug!("Enqueueing command: '{}'", command);

            if self.commands.send(command).is_err() {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.spotter.close();
                return Err(DispatcherError::QueueClosed);
            }
        }

        self.spotter.close();
        info!("Command dispatcher stopped");
        Ok(())
    }
}
