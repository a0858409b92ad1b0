//! Interruptible speech output
//!
//! At most one speech session is active system-wide. `speak` blocks its
//! caller until playback completes; `stop` can interrupt from any thread
//! (barge-in) with an advisory-terminate / grace / forcible-kill ladder.
//! The active handle lives in a guarded slot and is only ever mutated
//! through `try_set` / `clear_if_current` / `take`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command as TokioCommand};
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Failed to spawn synthesizer: {0}")]
    Spawn(String),

    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Control side of a speech session, shared with whoever may interrupt it
pub trait SessionHandle: Send + Sync {
    /// Request graceful termination (advisory)
    fn terminate(&self);

    /// Force termination
    fn kill(&self);

    /// Whether playback has ended, naturally or otherwise
    fn is_finished(&self) -> bool;
}

/// One synthesis-and-playback session
#[async_trait]
pub trait SpeechSession: Send {
    /// Control handle for this session
    fn handle(&self) -> Arc<dyn SessionHandle>;

    /// Block until playback completes
    async fn wait(&mut self) -> Result<(), SpeechError>;
}

/// Produces speech sessions from text
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Box<dyn SpeechSession>, SpeechError>;
}

/// Handle over a synthesizer child process
struct ProcessHandle {
    pid: Option<i32>,
    finished: AtomicBool,
}

impl ProcessHandle {
    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) {
        if self.is_finished() {
            return;
        }
        if let Some(pid) = self.pid {
            let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal);
        }
    }
}

impl SessionHandle for ProcessHandle {
    fn terminate(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGTERM);
        #[cfg(not(unix))]
        warn!("terminate unsupported on this platform; waiting for kill");
    }

    fn kill(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGKILL);
        #[cfg(not(unix))]
        warn!("kill unsupported on this platform");
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Session backed by a spawned synthesizer process
pub struct ProcessSession {
    child: Child,
    handle: Arc<ProcessHandle>,
}

#[async_trait]
impl SpeechSession for ProcessSession {
    fn handle(&self) -> Arc<dyn SessionHandle> {
        Arc::clone(&self.handle) as Arc<dyn SessionHandle>
    }

    async fn wait(&mut self) -> Result<(), SpeechError> {
        let result = self.child.wait().await;
        self.handle.finished.store(true, Ordering::Release);

        match result {
            Ok(status) if status.success() => Ok(()),
            // An interrupted session exits nonzero or by signal; that is
            // a normal end of playback, not a failure worth surfacing.
            Ok(_) => Ok(()),
            Err(e) => Err(SpeechError::Playback(e.to_string())),
        }
    }
}

/// Command-line synthesizer, invoked once per utterance
pub struct EspeakSynthesizer {
    program: String,
    voice: String,
}

impl EspeakSynthesizer {
    pub fn new(program: &str, voice: &str) -> Self {
        Self {
            program: program.to_string(),
            voice: voice.to_string(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for EspeakSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Box<dyn SpeechSession>, SpeechError> {
        let child = TokioCommand::new(&self.program)
            .arg("-v")
            .arg(&self.voice)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SpeechError::Spawn(format!("{}: {}", self.program, e)))?;

        let handle = Arc::new(ProcessHandle {
            pid: child.id().map(|pid| pid as i32),
            finished: AtomicBool::new(false),
        });

        Ok(Box::new(ProcessSession { child, handle }))
    }
}

/// Guarded slot for the one active session handle
#[derive(Default)]
struct ActiveSlot {
    inner: Mutex<Option<Arc<dyn SessionHandle>>>,
}

impl ActiveSlot {
    /// Claim the slot. Fails if another unfinished session holds it.
    fn try_set(&self, handle: Arc<dyn SessionHandle>) -> bool {
        let mut slot = self.inner.lock();
        match slot.as_ref() {
            Some(current) if !current.is_finished() => false,
            _ => {
                *slot = Some(handle);
                true
            }
        }
    }

    /// Clear the slot only if it still holds this session's handle
    fn clear_if_current(&self, handle: &Arc<dyn SessionHandle>) {
        let mut slot = self.inner.lock();
        if let Some(current) = slot.as_ref() {
            if Arc::ptr_eq(current, handle) {
                *slot = None;
            }
        }
    }

    fn take(&self) -> Option<Arc<dyn SessionHandle>> {
        self.inner.lock().take()
    }

    fn is_active(&self) -> bool {
        self.inner
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

/// Single-active-session speech controller
pub struct SpeechController {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    active: ActiveSlot,
    stop_grace: Duration,
}

impl SpeechController {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, stop_grace: Duration) -> Self {
        Self {
            synthesizer,
            active: ActiveSlot::default(),
            stop_grace,
        }
    }

    /// Speak `text`, blocking until playback completes.
    ///
    /// Synthesis or playback failures are logged and swallowed; the call
    /// returns as if the announcement had been skipped. If a previous
    /// session is still active it is stopped before this one starts.
    pub async fn speak(&self, text: &str) {
        let mut session = match self.synthesizer.synthesize(text).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Speech skipped: {}", e);
                return;
            }
        };

        let handle = session.handle();
        if !self.active.try_set(Arc::clone(&handle)) {
            self.stop().await;
            if !self.active.try_set(Arc::clone(&handle)) {
                warn!("Speech slot contested, dropping utterance");
                handle.kill();
                return;
            }
        }

        debug!("Speaking: {}", text);
        if let Err(e) = session.wait().await {
            warn!("Speech playback failed: {}", e);
        }
        self.active.clear_if_current(&handle);
    }

    /// Interrupt the active session, if any (barge-in).
    ///
    /// The active handle is cleared before this returns; a session that
    /// ignores the advisory terminate is killed after the grace interval.
    /// Calling with no active session is a no-op.
    pub async fn stop(&self) {
        let Some(handle) = self.active.take() else {
            return;
        };

        if handle.is_finished() {
            return;
        }

        debug!("Stopping active speech session");
        handle.terminate();
        tokio::time::sleep(self.stop_grace).await;

        if !handle.is_finished() {
            handle.kill();
        }
    }

    /// Whether a session is currently active
    pub fn is_speaking(&self) -> bool {
        self.active.is_active()
    }
}
