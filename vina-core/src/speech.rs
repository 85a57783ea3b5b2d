//! Fire-and-forget speech output.
//!
//! Each accepted request runs on its own detached thread. A shared gate
//! remembers when the last utterance started and whether one is still
//! running; the caller checks it before spawning, so a request arriving
//! within `min_interval` of the last start, or while another utterance is
//! playing, is dropped rather than queued.

use crate::config::SpeechConfig;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub trait Speaker {
    /// Speak `text`. Failures are logged, never returned.
    fn speak(&self, text: &str);
}

impl<S: Speaker + ?Sized> Speaker for Box<S> {
    fn speak(&self, text: &str) {
        (**self).speak(text)
    }
}

type Runner = dyn Fn(&str) + Send + Sync;

#[derive(Debug, Default)]
struct Gate {
    last_start: Option<Instant>,
    speaking: bool,
}

fn lock(gate: &Mutex<Gate>) -> MutexGuard<'_, Gate> {
    gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the speaking flag when the utterance thread finishes, even on panic
struct Speaking(Arc<Mutex<Gate>>);

impl Drop for Speaking {
    fn drop(&mut self) {
        lock(&self.0).speaking = false;
    }
}

/// Rate-limited speech dispatcher around a blocking runner
pub struct SpeechDispatcher {
    runner: Arc<Runner>,
    gate: Arc<Mutex<Gate>>,
    min_interval: Duration,
}

impl SpeechDispatcher {
    pub fn new<F>(runner: F, min_interval: Duration) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            runner: Arc::new(runner),
            gate: Arc::new(Mutex::new(Gate::default())),
            min_interval,
        }
    }

    /// Speak through an external command such as `espeak`
    pub fn command(config: &SpeechConfig) -> Self {
        let program = config.command.clone();
        let args = config.args.clone();
        Self::new(move |text| run_command(&program, &args, text), config.min_interval())
    }

    /// Spawn the speaking thread, or return `None` when the gate drops the
    /// request. The gate lock is only held for the check, never while speaking.
    pub fn dispatch(&self, text: &str) -> Option<JoinHandle<()>> {
        let now = Instant::now();
        {
            let mut gate = lock(&self.gate);
            let too_soon = gate
                .last_start
                .is_some_and(|last| now.saturating_duration_since(last) < self.min_interval);
            if gate.speaking || too_soon {
                log::debug!("Dropping speech request '{}': too soon after the last one", text);
                return None;
            }
            gate.last_start = Some(now);
            gate.speaking = true;
        }

        let runner = Arc::clone(&self.runner);
        let speaking = Speaking(Arc::clone(&self.gate));
        let text = text.to_string();
        Some(thread::spawn(move || {
            let _speaking = speaking;
            log::debug!("Speaking: {}", text);
            runner(&text);
        }))
    }
}

impl Speaker for SpeechDispatcher {
    fn speak(&self, text: &str) {
        // Detached; shutdown never waits for speech
        drop(self.dispatch(text));
    }
}

/// Speaker that waits for each utterance, for one-shot commands that exit
/// right after speaking
pub struct BlockingSpeaker(pub SpeechDispatcher);

impl Speaker for BlockingSpeaker {
    fn speak(&self, text: &str) {
        if let Some(handle) = self.0.dispatch(text) {
            if handle.join().is_err() {
                log::warn!("Speech thread panicked");
            }
        }
    }
}

/// Speaker used when speech is disabled
pub struct SilentSpeaker;

impl Speaker for SilentSpeaker {
    fn speak(&self, text: &str) {
        log::info!("(speech disabled) {}", text);
    }
}

/// Build the speaker described by `config`
pub fn from_config(config: &SpeechConfig) -> Box<dyn Speaker> {
    if config.enabled {
        log::debug!("Speech via '{}'", config.command);
        Box::new(SpeechDispatcher::command(config))
    } else {
        Box::new(SilentSpeaker)
    }
}

/// Like `from_config`, but `speak` returns only once the text has been spoken
pub fn blocking_from_config(config: &SpeechConfig) -> Box<dyn Speaker> {
    if config.enabled {
        Box::new(BlockingSpeaker(SpeechDispatcher::command(config)))
    } else {
        Box::new(SilentSpeaker)
    }
}

fn run_command(program: &str, args: &[String], text: &str) {
    let status = Command::new(program)
        .args(args)
        .arg(text)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => log::warn!("Speech command '{}' exited with {}", program, status),
        Err(e) => log::warn!("Failed to run speech command '{}': {}", program, e),
    }
}
