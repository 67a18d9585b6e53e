//! Speech backend over a system TTS command.
//!
//! Each utterance runs as one child process (`espeak-ng "text"` or
//! `say "text"`). Pause and resume stop and continue the child with
//! `SIGSTOP`/`SIGCONT` on Unix; cancel kills it.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::VoiceConfig;
use crate::error::{MuseError, Result};
use crate::speech::backend::{SpeechBackend, SpeechFailure, UtteranceEvent, Voice, VoiceOptions};

/// Command-line conventions of the supported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// `espeak-ng -s <wpm> -v <voice> <text>`
    Espeak,
    /// macOS `say -r <wpm> -v <voice> <text>`
    Say,
    /// Any other program; receives the text as its only argument.
    Plain,
}

impl Engine {
    /// Guess the engine from the program name.
    pub fn detect(program: &str) -> Self {
        let name = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        match name {
            "espeak-ng" | "espeak" => Self::Espeak,
            "say" => Self::Say,
            _ => Self::Plain,
        }
    }

    fn args(self, text: &str, options: &VoiceOptions) -> Vec<String> {
        let mut args = Vec::new();
        let (rate_flag, voice_flag) = match self {
            Self::Espeak => ("-s", "-v"),
            Self::Say => ("-r", "-v"),
            Self::Plain => return vec![text.to_owned()],
        };
        args.push(rate_flag.to_owned());
        args.push(options.rate.to_string());
        if let Some(voice) = &options.voice {
            args.push(voice_flag.to_owned());
            args.push(voice.clone());
        }
        args.push("--".to_owned());
        args.push(text.to_owned());
        args
    }
}

struct Active {
    id: u64,
    pid: Option<u32>,
    events: mpsc::UnboundedSender<UtteranceEvent>,
    kill: Option<oneshot::Sender<()>>,
}

/// Child-process speech engine.
pub struct CommandSpeechBackend {
    program: String,
    engine: Engine,
    default_voice: Option<String>,
    current: Arc<Mutex<Option<Active>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for CommandSpeechBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpeechBackend")
            .field("program", &self.program)
            .field("engine", &self.engine)
            .finish()
    }
}

impl CommandSpeechBackend {
    pub fn new(program: impl Into<String>, default_voice: Option<String>) -> Self {
        let program = program.into();
        let engine = Engine::detect(&program);
        Self {
            program,
            engine,
            default_voice,
            current: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(config.command.clone(), config.voice.clone())
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Active>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) -> bool {
        let Some(pid) = self.lock().as_ref().and_then(|a| a.pid) else {
            return false;
        };
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: kill(2) has no memory-safety preconditions; the pid is our
        // own child, still registered as the active utterance.
        unsafe { libc::kill(pid, signal) == 0 }
    }

    fn notify(&self, event: UtteranceEvent) {
        if let Some(active) = self.lock().as_ref() {
            let _ = active.events.send(event);
        }
    }
}

/// Parse `espeak-ng --voices` output.
fn parse_espeak_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let (language, name) = (cols.get(1)?, cols.get(3)?);
            Some(Voice {
                id: (*language).to_owned(),
                name: name.replace('_', " "),
                language: (*language).to_owned(),
            })
        })
        .collect()
}

/// Parse `say -v ?` output: `Name   lang_REGION   # sample`.
fn parse_say_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter_map(|line| {
            let head = line.split('#').next()?.trim_end();
            let (name, language) = head.rsplit_once(char::is_whitespace)?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Voice {
                id: name.to_owned(),
                name: name.to_owned(),
                language: language.replace('_', "-"),
            })
        })
        .collect()
}

#[async_trait]
impl SpeechBackend for CommandSpeechBackend {
    async fn voices(&self) -> Result<Vec<Voice>> {
        let args: &[&str] = match self.engine {
            Engine::Espeak => &["--voices"],
            Engine::Say => &["-v", "?"],
            Engine::Plain => return Ok(Vec::new()),
        };
        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(MuseError::Speech(format!(
                "{} could not list voices ({})",
                self.program, output.status
            )));
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(match self.engine {
            Engine::Espeak => parse_espeak_voices(&listing),
            _ => parse_say_voices(&listing),
        })
    }

    fn speak(&self, text: &str, options: &VoiceOptions) -> Result<mpsc::UnboundedReceiver<UtteranceEvent>> {
        self.cancel();

        let mut options = options.clone();
        if options.voice.is_none() {
            options.voice = self.default_voice.clone();
        }
        let mut child = tokio::process::Command::new(&self.program)
            .args(self.engine.args(text, &options))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MuseError::Speech(format!("failed to start {}: {e}", self.program)))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (events, rx) = mpsc::unbounded_channel();
        let (kill, mut kill_rx) = oneshot::channel::<()>();
        let _ = events.send(UtteranceEvent::Start);
        *self.lock() = Some(Active {
            id,
            pid: child.id(),
            events: events.clone(),
            kill: Some(kill),
        });
        debug!(id, program = self.program.as_str(), "utterance process started");

        let current = Arc::clone(&self.current);
        let program = self.program.clone();
        tokio::spawn(async move {
            let event = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => UtteranceEvent::End,
                    Ok(status) => UtteranceEvent::Error(SpeechFailure::Other(format!("{program} exited with {status}"))),
                    Err(e) => UtteranceEvent::Error(SpeechFailure::Other(format!("{program} wait failed: {e}"))),
                },
                _ = &mut kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(id, error = %e, "failed to kill utterance process");
                    }
                    UtteranceEvent::Error(SpeechFailure::Canceled)
                }
            };
            {
                let mut guard = current.lock().unwrap_or_else(|e| e.into_inner());
                if guard.as_ref().is_some_and(|a| a.id == id) {
                    *guard = None;
                }
            }
            let _ = events.send(event);
        });
        Ok(rx)
    }

    fn pause(&self) {
        #[cfg(unix)]
        if self.signal(libc::SIGSTOP) {
            self.notify(UtteranceEvent::Pause);
            return;
        }
        debug!("pause ignored: no active utterance process");
    }

    fn resume(&self) {
        #[cfg(unix)]
        if self.signal(libc::SIGCONT) {
            self.notify(UtteranceEvent::Resume);
            return;
        }
        debug!("resume ignored: no active utterance process");
    }

    fn cancel(&self) {
        let active = self.lock().take();
        if let Some(mut active) = active {
            // A stopped child cannot act on SIGKILL delivery until continued.
            #[cfg(unix)]
            if let Some(pid) = active.pid.and_then(|p| libc::pid_t::try_from(p).ok()) {
                // SAFETY: see `signal`.
                unsafe {
                    libc::kill(pid, libc::SIGCONT);
                }
            }
            if let Some(kill) = active.kill.take() {
                let _ = kill.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn engine_detection() {
        assert_eq!(Engine::detect("espeak-ng"), Engine::Espeak);
        assert_eq!(Engine::detect("/usr/bin/say"), Engine::Say);
        assert_eq!(Engine::detect("festival"), Engine::Plain);
    }

    #[test]
    fn espeak_args() {
        let options = VoiceOptions {
            voice: Some("en-us".into()),
            rate: 160,
        };
        assert_eq!(
            Engine::Espeak.args("-hi", &options),
            vec!["-s", "160", "-v", "en-us", "--", "-hi"]
        );
        assert_eq!(Engine::Plain.args("hi", &options), vec!["hi"]);
    }

    #[test]
    fn parses_espeak_listing() {
        let listing = "Pty Language       Age/Gender VoiceName          File                 Other Languages\n \
                       5  af              --/M      Afrikaans          gmw/af\n \
                       5  en-us           --/M      English_(America)  gmw/en-US            (en 10)\n";
        let voices = parse_espeak_voices(listing);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[1].id, "en-us");
        assert_eq!(voices[1].name, "English (America)");
    }

    #[test]
    fn parses_say_listing() {
        let listing = "Alex                en_US    # Most people recognize me by my voice.\n\
                       Good News           en_US    # Hello! My name is Good News.\n";
        let voices = parse_say_voices(listing);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].language, "en-US");
        assert_eq!(voices[1].name, "Good News");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_command_ends_utterance() {
        let backend = CommandSpeechBackend::new("true", None);
        let mut events = backend.speak("hello", &VoiceOptions::default()).unwrap();
        assert_eq!(events.recv().await, Some(UtteranceEvent::Start));
        assert_eq!(events.recv().await, Some(UtteranceEvent::End));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_reports_other_failure() {
        let backend = CommandSpeechBackend::new("false", None);
        let mut events = backend.speak("hello", &VoiceOptions::default()).unwrap();
        assert_eq!(events.recv().await, Some(UtteranceEvent::Start));
        match events.recv().await {
            Some(UtteranceEvent::Error(SpeechFailure::Other(_))) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pause_resume_and_cancel_a_running_process() {
        let backend = CommandSpeechBackend::new("sleep", None);
        let mut events = backend.speak("30", &VoiceOptions::default()).unwrap();
        assert_eq!(events.recv().await, Some(UtteranceEvent::Start));

        backend.pause();
        assert_eq!(events.recv().await, Some(UtteranceEvent::Pause));
        backend.resume();
        assert_eq!(events.recv().await, Some(UtteranceEvent::Resume));

        backend.cancel();
        assert_eq!(
            events.recv().await,
            Some(UtteranceEvent::Error(SpeechFailure::Canceled))
        );
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn missing_program_is_a_speech_error() {
        let backend = CommandSpeechBackend::new("/nonexistent/muse-tts", None);
        let err = backend.speak("hi", &VoiceOptions::default()).unwrap_err();
        assert_eq!(err.code(), "SPEECH_FAILED");
    }
}
