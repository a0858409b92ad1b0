//! Streaming keyword spotting
//!
//! Wraps a frame-based keyword engine and a live capture stream behind a
//! single spotter with blocking and non-blocking detection. The engine and
//! stream are acquired lazily on first use and persist across calls; the
//! accumulation buffer carries partial frames between non-blocking polls so
//! a trigger straddling two polls is never missed.

use crate::audio::{to_pcm16, AudioSample, CaptureStream, MicCapture};
use crate::config::CoreConfig;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Frame size expected by the builtin engine (samples at 16 kHz)
pub const ENGINE_FRAME_LENGTH: usize = 512;

#[derive(Error, Debug)]
pub enum SpotterError {
    #[error("Keyword engine initialization failed: {0}")]
    EngineInit(String),

    #[error("Capture device initialization failed: {0}")]
    CaptureInit(String),

    #[error("Capture stream closed")]
    StreamClosed,
}

impl SpotterError {
    /// Initialization failures are fatal to the loop that owns the spotter
    /// and must be escalated instead of retried.
    pub fn is_init_failure(&self) -> bool {
        matches!(self, Self::EngineInit(_) | Self::CaptureInit(_))
    }
}

/// Frame-processing contract of a keyword engine
///
/// Deterministic per frame: identical frame bytes yield identical results.
pub trait KeywordEngine: Send {
    /// Required frame size in samples
    fn frame_length(&self) -> usize;

    /// Process one frame; a return value >= 0 is the matched keyword index
    fn process(&mut self, frame: &[i16]) -> i32;
}

/// Creates the engine and capture stream for a spotter on demand
pub trait SpotterBackend: Send {
    fn open_engine(&self) -> Result<Box<dyn KeywordEngine>, SpotterError>;
    fn open_capture(&self) -> Result<Box<dyn CaptureStream>, SpotterError>;
}

/// Builtin energy-gate engine
///
/// Stands in for a trained keyword model using the same frame contract:
/// a run of consecutive high-energy frames counts as a match. Real engines
/// plug in through [`KeywordEngine`] without touching the spotter.
pub struct EnergyGateEngine {
    frame_length: usize,
    threshold: f32,
    required_frames: u32,
    hot_frames: u32,
}

impl EnergyGateEngine {
    pub fn new(frame_length: usize, threshold: f32, required_frames: u32) -> Self {
        Self {
            frame_length,
            threshold,
            required_frames,
            hot_frames: 0,
        }
    }

    fn rms(frame: &[i16]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }

        let sum_squares: f64 = frame
            .iter()
            .map(|&s| {
                let normalized = s as f64 / i16::MAX as f64;
                normalized * normalized
            })
            .sum();

        (sum_squares / frame.len() as f64).sqrt() as f32
    }
}

impl Default for EnergyGateEngine {
    fn default() -> Self {
        Self::new(ENGINE_FRAME_LENGTH, 0.35, 3)
    }
}

impl KeywordEngine for EnergyGateEngine {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn process(&mut self, frame: &[i16]) -> i32 {
        let rms = Self::rms(frame);
        trace!("Frame rms: {:.4}", rms);

        if rms > self.threshold {
            self.hot_frames += 1;
            if self.hot_frames >= self.required_frames {
                self.hot_frames = 0;
                return 0;
            }
        } else {
            self.hot_frames = 0;
        }

        -1
    }
}

/// Production backend: builtin engine plus a microphone capture stream
pub struct MicBackend {
    sample_rate: u32,
    channels: u16,
}

impl MicBackend {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.sample_rate, config.channels)
    }
}

impl SpotterBackend for MicBackend {
    fn open_engine(&self) -> Result<Box<dyn KeywordEngine>, SpotterError> {
        Ok(Box::new(EnergyGateEngine::default()))
    }

    fn open_capture(&self) -> Result<Box<dyn CaptureStream>, SpotterError> {
        let capture = MicCapture::open(self.sample_rate, self.channels)
            .map_err(|e| SpotterError::CaptureInit(e.to_string()))?;
        Ok(Box::new(capture))
    }
}

/// Live detection state: engine, stream, and not-yet-processed samples.
/// The pending buffer always holds fewer samples than one frame after a
/// processing pass.
struct DetectionContext {
    engine: Box<dyn KeywordEngine>,
    stream: Box<dyn CaptureStream>,
    pending: Vec<i16>,
}

impl DetectionContext {
    /// Convert a captured chunk, append it, and process every complete
    /// frame. Returns true on the first positive match; the pending buffer
    /// is cleared on match so detection restarts cleanly after the trigger.
    fn ingest(&mut self, chunk: &[AudioSample]) -> bool {
        self.pending.extend(to_pcm16(chunk));

        let frame_length = self.engine.frame_length();
        let mut offset = 0;

        while self.pending.len() - offset >= frame_length {
            let frame = &self.pending[offset..offset + frame_length];
            let matched = self.engine.process(frame) >= 0;
            offset += frame_length;

            if matched {
                self.pending.clear();
                return true;
            }
        }

        self.pending.drain(..offset);
        false
    }
}

enum Step {
    Matched,
    NoMatch,
    Closed,
}

/// Streaming keyword spotter
pub struct KeywordSpotter {
    backend: Box<dyn SpotterBackend>,
    context: Option<DetectionContext>,
}

impl KeywordSpotter {
    pub fn new(backend: Box<dyn SpotterBackend>) -> Self {
        Self {
            backend,
            context: None,
        }
    }

    /// Acquire the engine and capture stream if not already live.
    /// Idempotent; a failure here is fatal to the calling loop.
    pub fn open_if_needed(&mut self) -> Result<(), SpotterError> {
        self.context_mut().map(|_| ())
    }

    fn context_mut(&mut self) -> Result<&mut DetectionContext, SpotterError> {
        match &mut self.context {
            Some(context) => Ok(context),
            slot => {
                let engine = self.backend.open_engine()?;
                let stream = self.backend.open_capture()?;
                info!(
                    "Keyword engine ready (frame length: {} samples)",
                    engine.frame_length()
                );
                Ok(slot.insert(DetectionContext {
                    engine,
                    stream,
                    pending: Vec::new(),
                }))
            }
        }
    }

    /// Block until the trigger phrase is heard or `cancel` fires.
    /// Returns `Ok(true)` on detection, `Ok(false)` on cancellation.
    pub async fn detect_blocking(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<bool, SpotterError> {
        self.open_if_needed()?;

        loop {
            let step = {
                let context = self.context_mut()?;
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return Ok(false),
                    chunk = context.stream.next_chunk() => chunk,
                };

                match chunk {
                    Some(chunk) => {
                        if context.ingest(&chunk) {
                            Step::Matched
                        } else {
                            Step::NoMatch
                        }
                    }
                    None => Step::Closed,
                }
            };

            match step {
                Step::Matched => {
                    debug!("Trigger phrase matched (blocking path)");
                    return Ok(true);
                }
                Step::NoMatch => continue,
                Step::Closed => {
                    warn!("Capture stream closed during blocking detection");
                    self.close();
                    return Err(SpotterError::StreamClosed);
                }
            }
        }
    }

    /// Poll for the trigger without blocking past `timeout`.
    ///
    /// Pulls at most one chunk; leftover partial-frame samples stay in the
    /// accumulation buffer for the next call. No audio within the timeout
    /// is a normal "not detected" result, not an error.
    pub async fn detect_non_blocking(
        &mut self,
        timeout: Duration,
    ) -> Result<bool, SpotterError> {
        self.open_if_needed()?;

        let step = {
            let context = self.context_mut()?;
            match tokio::time::timeout(timeout, context.stream.next_chunk()).await {
                Err(_) => Step::NoMatch,
                Ok(None) => Step::Closed,
                Ok(Some(chunk)) => {
                    if context.ingest(&chunk) {
                        Step::Matched
                    } else {
                        Step::NoMatch
                    }
                }
            }
        };

        match step {
            Step::Matched => {
                debug!("Trigger phrase matched (non-blocking path)");
                Ok(true)
            }
            Step::NoMatch => Ok(false),
            Step::Closed => {
                warn!("Capture stream closed during non-blocking detection");
                self.close();
                Err(SpotterError::StreamClosed)
            }
        }
    }

    /// Release the engine and capture stream. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.stream.close();
            debug!("Keyword spotter closed");
        }
    }

    /// Whether the detection context is currently live
    pub fn is_open(&self) -> bool {
        self.context.is_some()
    }
}

impl Drop for KeywordSpotter {
    fn drop(&mut self) {
        self.close();
    }
}
