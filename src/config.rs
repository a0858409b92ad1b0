//! Runtime configuration for the coordinator
//!
//! All phrases, intervals and collaborator command lines live here.
//! Values load from an optional JSON file (`AURA_CONFIG`) with environment
//! overrides for the common knobs; everything has a sensible default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Invalid config file {0}: {1}")]
    ParseFailed(String, String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Core configuration
///
/// Every field has a default matching the shipped device profile, so a
/// partial (or absent) config file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Wake phrase the keyword engine is trained on (used in announcements)
    pub trigger_phrase: String,

    /// Phrases that shut the whole system down
    pub exit_phrases: Vec<String>,

    /// Phrases that toggle between Normal and Hazard mode
    pub mode_phrases: Vec<String>,

    /// Phrases that request an on-demand scan (Hazard mode only)
    pub query_phrases: Vec<String>,

    /// Detection labels treated as alert-worthy in Hazard mode
    pub hazardous_objects: Vec<String>,

    /// Seconds between periodic detection cycles
    pub detection_interval_secs: u64,

    /// Milliseconds to wait for the trigger after the intro before giving up
    /// on offering the full instructions
    pub grace_window_ms: u64,

    /// Seconds of speech captured after the trigger for recognition
    pub listen_window_secs: u64,

    /// Milliseconds between advisory terminate and forcible kill when
    /// stopping a speech session
    pub stop_grace_ms: u64,

    /// Capture sample rate (Hz); the keyword engine expects 16 kHz
    pub sample_rate: u32,

    /// Capture channel count (mono or stereo, downmixed to mono)
    pub channels: u16,

    /// Whether periodic detection cycles announce their results
    pub announce_on_detect: bool,

    /// Speech synthesizer program
    pub tts_program: String,

    /// Voice passed to the synthesizer via `-v`
    pub tts_voice: String,

    /// Offline speech decoder program, invoked as `<program> -infile <wav>`
    pub stt_program: String,

    /// Object detector argv; one invocation per detection cycle, prints a
    /// JSON array of label strings. Empty = detection disabled.
    pub detector_command: Vec<String>,

    /// Seconds allowed for one detector invocation
    pub detector_timeout_secs: u64,

    /// Spoken once at startup
    pub intro_text: String,

    /// Spoken after barge-in, before the recognition window opens
    pub ack_text: String,

    /// Instruction sequence offered when the trigger arrives during the
    /// grace window; each entry is one utterance
    pub instructions: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            trigger_phrase: "hey aura".to_string(),
            exit_phrases: vec![
                "shut down".to_string(),
                "system shutdown".to_string(),
                "system shut down".to_string(),
            ],
            mode_phrases: vec!["change mode".to_string()],
            query_phrases: vec!["what is it".to_string(), "what do you see".to_string()],
            hazardous_objects: vec![
                "person".to_string(),
                "bicycle".to_string(),
                "car".to_string(),
                "bus".to_string(),
                "truck".to_string(),
            ],
            detection_interval_secs: 10,
            grace_window_ms: 3000,
            listen_window_secs: 7,
            stop_grace_ms: 50,
            sample_rate: 16000,
            channels: 1,
            announce_on_detect: true,
            tts_program: "espeak".to_string(),
            tts_voice: "en+f1".to_string(),
            stt_program: "pocketsphinx_continuous".to_string(),
            detector_command: Vec::new(),
            detector_timeout_secs: 15,
            intro_text: "Aura started. Say 'hey aura' now to hear the full instructions."
                .to_string(),
            ack_text: "I'm listening.".to_string(),
            instructions: vec![
                "Say 'hey aura' followed by a command.".to_string(),
                "Say 'change mode' to switch between normal and hazard mode.".to_string(),
                "In hazard mode, say 'what is it' for an immediate scan.".to_string(),
                "Say 'shut down' to stop Aura.".to_string(),
            ],
        }
    }
}

impl CoreConfig {
    /// Load configuration: defaults, then the JSON file named by
    /// `AURA_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("AURA_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(interval) = std::env::var("AURA_DETECTION_INTERVAL_SECS") {
            config.detection_interval_secs = interval
                .parse::<u64>()
                .map_err(|e| ConfigError::Invalid(format!("AURA_DETECTION_INTERVAL_SECS: {}", e)))?;
        }

        if let Ok(program) = std::env::var("AURA_TTS_PROGRAM") {
            config.tts_program = program;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;

        serde_json::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.display().to_string(), e.to_string()))
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger_phrase.trim().is_empty() {
            return Err(ConfigError::Invalid("trigger_phrase must not be empty".to_string()));
        }

        if self.exit_phrases.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one exit phrase is required".to_string(),
            ));
        }

        if self.detection_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "detection_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.listen_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "listen_window_secs must be greater than 0".to_string(),
            ));
        }

        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be greater than 0".to_string()));
        }

        if self.channels == 0 || self.channels > 2 {
            return Err(ConfigError::Invalid(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }

        if self.tts_program.trim().is_empty() {
            return Err(ConfigError::Invalid("tts_program must not be empty".to_string()));
        }

        Ok(())
    }

    /// Log a startup summary of the loaded configuration
    pub fn log_summary(&self) {
        info!("Trigger phrase: '{}'", self.trigger_phrase);
        info!("Exit phrases: {:?}", self.exit_phrases);
        info!("Hazardous objects: {:?}", self.hazardous_objects);
        info!(
            "Detection every {}s, listen window {}s, grace window {}ms",
            self.detection_interval_secs, self.listen_window_secs, self.grace_window_ms
        );
        info!(
            "Capture: {} Hz, {} channel(s); TTS: {} ({})",
            self.sample_rate, self.channels, self.tts_program, self.tts_voice
        );
        if self.detector_command.is_empty() {
            info!("Object detector: disabled");
        } else {
            info!("Object detector: {:?}", self.detector_command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert!(config.exit_phrases.contains(&"shut down".to_string()));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = CoreConfig::default();
        config.detection_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.channels = 3;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.exit_phrases.clear();
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.trigger_phrase = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"trigger_phrase": "hey tester", "detection_interval_secs": 2}}"#
        )
        .unwrap();

        let config = CoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.trigger_phrase, "hey tester");
        assert_eq!(config.detection_interval_secs, 2);
        // Untouched fields fall back to defaults
        assert_eq!(config.listen_window_secs, 7);
        assert_eq!(config.tts_program, "espeak");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let result = CoreConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseFailed(_, _))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = CoreConfig::from_file("/nonexistent/aura.json");
        assert!(matches!(result, Err(ConfigError::ReadFailed(_, _))));
    }
}
