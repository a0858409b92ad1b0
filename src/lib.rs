//! Aura core runtime library
//!
//! Concurrency and orchestration engine for the Aura wearable assistive
//! device: streaming keyword detection, a thread-safe command queue and
//! dispatcher, an interruptible single-active-speech controller, and the
//! mode state machine driving periodic hazard announcements.

pub mod audio;
pub mod command;
pub mod config;
pub mod detection;
pub mod dispatcher;
pub mod orchestrator;
pub mod recognizer;
pub mod risk;
pub mod runtime;
pub mod speech;
pub mod spotter;

// Re-export main types
pub use audio::{CaptureStream, MicCapture, SampleQueue};
pub use command::{Command, Intent, IntentMatcher};
pub use config::{ConfigError, CoreConfig};
pub use detection::{CommandDetector, DetectError, DisabledDetector, ObjectDetector};
pub use dispatcher::{CommandDispatcher, DispatcherError};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use recognizer::{CliRecognizer, RecognizerError, SpeechRecognizer};
pub use risk::RiskEngine;
pub use runtime::{CoreLoop, Mode};
pub use speech::{
    EspeakSynthesizer, SessionHandle, SpeechController, SpeechError, SpeechSession,
    SpeechSynthesizer,
};
pub use spotter::{
    EnergyGateEngine, KeywordEngine, KeywordSpotter, MicBackend, SpotterBackend, SpotterError,
};
