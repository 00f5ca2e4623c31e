//! Spoken answers via the platform `say` command.

use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start speaking; any in-progress utterance is stopped first so two
    /// answers never overlap.
    async fn speak(&self, text: &str);
    fn stop(&self);
}

pub struct SayCommand {
    program: String,
    current: Mutex<Option<Child>>,
}

impl SayCommand {
    pub fn new() -> Self {
        Self::with_program("say")
    }

    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
            current: Mutex::new(None),
        }
    }
}

impl Default for SayCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for SayCommand {
    async fn speak(&self, text: &str) {
        self.stop();
        match Command::new(&self.program)
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => *self.current.lock() = Some(child),
            Err(e) => tracing::warn!("speech synthesis unavailable: {}", e),
        }
    }

    fn stop(&self) {
        if let Some(mut child) = self.current.lock().take() {
            let _ = child.start_kill();
        }
    }
}

/// Synthesizer that does nothing, for hosts with speech disabled.
pub struct SilentSpeech;

#[async_trait]
impl SpeechSynthesizer for SilentSpeech {
    async fn speak(&self, _text: &str) {}
    fn stop(&self) {}
}
