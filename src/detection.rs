//! Object detection collaborator
//!
//! One detection cycle is one invocation returning a list of labels. The
//! production implementation runs an external detector process and parses a
//! JSON array of label strings from its stdout; when the detector cannot be
//! acquired at startup, the subsystem degrades to a permanent no-op instead
//! of retrying in a tight loop.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("No detector command configured")]
    NotConfigured,

    #[error("Failed to spawn detector: {0}")]
    Spawn(String),

    #[error("Detector failed: {0}")]
    Failed(String),

    #[error("Detector timed out after {0}s")]
    Timeout(u64),

    #[error("Unparseable detector output: {0}")]
    Parse(String),
}

/// Performs one detection cycle on demand
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detected labels, possibly empty. May block for the duration of
    /// model inference.
    async fn detect_once(&self) -> Result<Vec<String>, DetectError>;
}

/// External detector process, one invocation per cycle
pub struct CommandDetector {
    argv: Vec<String>,
    timeout_secs: u64,
}

impl CommandDetector {
    pub fn new(argv: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            argv,
            timeout_secs,
        }
    }

    /// Run one cycle at startup to verify the detector works at all
    pub async fn probe(&self) -> Result<(), DetectError> {
        self.detect_once().await.map(|labels| {
            info!("Detector probe succeeded ({} labels)", labels.len());
        })
    }

    async fn run(&self) -> Result<Vec<String>, DetectError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or(DetectError::NotConfigured)?;

        let output = TokioCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| DetectError::Spawn(format!("{}: {}", program, e)))?;

        if !output.status.success() {
            return Err(DetectError::Failed(format!(
                "{} exited with {}",
                program, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let labels: Vec<String> =
            serde_json::from_str(stdout.trim()).map_err(|e| DetectError::Parse(e.to_string()))?;

        debug!("Detector returned {} labels", labels.len());
        Ok(labels)
    }
}

#[async_trait]
impl ObjectDetector for CommandDetector {
    async fn detect_once(&self) -> Result<Vec<String>, DetectError> {
        timeout(Duration::from_secs(self.timeout_secs), self.run())
            .await
            .map_err(|_| DetectError::Timeout(self.timeout_secs))?
    }
}

/// Permanently-disabled detector: always an empty result, never an error
pub struct DisabledDetector;

#[async_trait]
impl ObjectDetector for DisabledDetector {
    async fn detect_once(&self) -> Result<Vec<String>, DetectError> {
        Ok(Vec::new())
    }
}
