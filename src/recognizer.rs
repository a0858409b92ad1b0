//! Speech recognition collaborator
//!
//! The production recognizer records a bounded window from the microphone,
//! writes it to a temporary WAV file, and runs an offline command-line
//! decoder over it. Recognition failures surface as errors here; the
//! dispatcher absorbs them into an empty (no-op) command.

use crate::audio::{to_pcm16, CaptureStream, MicCapture};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

/// Longest wait for a single capture chunk before giving up on the mic
const CHUNK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Failed to write WAV: {0}")]
    Wav(String),

    #[error("Decoder failed: {0}")]
    Decoder(String),
}

/// Captures and transcribes a bounded window of speech
#[async_trait]
pub trait SpeechRecognizer: Send {
    /// Returns the transcript, or an empty string when nothing was said
    async fn transcribe(&mut self) -> Result<String, RecognizerError>;
}

/// Offline CLI decoder over a recorded WAV window
pub struct CliRecognizer {
    program: String,
    sample_rate: u32,
    channels: u16,
    window: Duration,
}

impl CliRecognizer {
    pub fn new(program: &str, sample_rate: u32, channels: u16, window: Duration) -> Self {
        Self {
            program: program.to_string(),
            sample_rate,
            channels,
            window,
        }
    }

    /// Record `window` seconds of PCM16 from the default input device
    async fn record_window(&self) -> Result<Vec<i16>, RecognizerError> {
        let mut capture = MicCapture::open(self.sample_rate, self.channels)
            .map_err(|e| RecognizerError::Capture(e.to_string()))?;

        let target = self.sample_rate as usize * self.window.as_secs() as usize;
        let mut samples = Vec::with_capacity(target);

        while samples.len() < target {
            match tokio::time::timeout(CHUNK_TIMEOUT, capture.next_chunk()).await {
                Ok(Some(chunk)) => samples.extend(to_pcm16(&chunk)),
                Ok(None) => break,
                Err(_) => {
                    warn!("Capture stalled mid-window, transcribing what we have");
                    break;
                }
            }
        }

        capture.close();
        samples.truncate(target);
        debug!("Recorded {} samples for recognition", samples.len());
        Ok(samples)
    }

    fn scratch_path(&self) -> PathBuf {
        std::env::temp_dir().join(format!("aura-stt-{}.wav", std::process::id()))
    }
}

#[async_trait]
impl SpeechRecognizer for CliRecognizer {
    async fn transcribe(&mut self) -> Result<String, RecognizerError> {
        let samples = self.record_window().await?;
        if samples.is_empty() {
            return Ok(String::new());
        }

        let wav_path = self.scratch_path();
        write_wav(&wav_path, &samples, self.sample_rate)?;

        let result = decode_wav(&self.program, &wav_path).await;
        let _ = tokio::fs::remove_file(&wav_path).await;
        result
    }
}

/// Write mono PCM16 samples as a WAV file
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), RecognizerError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| RecognizerError::Wav(e.to_string()))?;

    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| RecognizerError::Wav(e.to_string()))?;
    }

    writer
        .finalize()
        .map_err(|e| RecognizerError::Wav(e.to_string()))
}

/// Run the decoder over a WAV file and return its trimmed stdout
pub async fn decode_wav(program: &str, wav_path: &Path) -> Result<String, RecognizerError> {
    let output = TokioCommand::new(program)
        .arg("-infile")
        .arg(wav_path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| RecognizerError::Decoder(format!("{}: {}", program, e)))?;

    if !output.status.success() {
        return Err(RecognizerError::Decoder(format!(
            "{} exited with {}",
            program, output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
