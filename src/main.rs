//! Aura coordinator service binary
//!
//! Brings up speech output, the keyword spotter, the recognizer and the
//! object detector, then hands control to the orchestrator.

use aura_core::{
    CliRecognizer, CommandDetector, CoreConfig, DisabledDetector, EspeakSynthesizer,
    KeywordSpotter, MicBackend, ObjectDetector, Orchestrator, SpeechController,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aura_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Aura coordinator service");

    // Load configuration
    let config = match CoreConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let speech = Arc::new(SpeechController::new(
        Arc::new(EspeakSynthesizer::new(&config.tts_program, &config.tts_voice)),
        Duration::from_millis(config.stop_grace_ms),
    ));

    let detector = build_detector(&config, &speech).await;

    let spotter = KeywordSpotter::new(Box::new(MicBackend::from_config(&config)));
    let skip_backend = Box::new(MicBackend::from_config(&config));

    let recognizer = Box::new(CliRecognizer::new(
        &config.stt_program,
        config.sample_rate,
        config.channels,
        Duration::from_secs(config.listen_window_secs),
    ));

    let orchestrator = Orchestrator::new(
        config,
        speech,
        spotter,
        Some(skip_backend),
        recognizer,
        detector,
    );

    if let Err(e) = orchestrator.run().await {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }

    info!("Aura coordinator service stopped");
}

/// Probe the configured detector once; on failure, announce it and degrade
/// detection to a permanent no-op instead of retrying every cycle.
async fn build_detector(
    config: &CoreConfig,
    speech: &Arc<SpeechController>,
) -> Arc<dyn ObjectDetector> {
    if config.detector_command.is_empty() {
        info!("No object detector configured, detection disabled");
        return Arc::new(DisabledDetector);
    }

    let detector = CommandDetector::new(
        config.detector_command.clone(),
        config.detector_timeout_secs,
    );

    match detector.probe().await {
        Ok(()) => Arc::new(detector),
        Err(e) => {
            warn!("Object detector unavailable, detection disabled: {}", e);
            speech.speak("Object detection is unavailable.").await;
            Arc::new(DisabledDetector)
        }
    }
}
