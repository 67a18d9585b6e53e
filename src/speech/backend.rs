//! Injectable speech capabilities.
//!
//! The queue and recognition session never talk to an audio engine
//! directly; they drive a [`SpeechBackend`] / [`RecognitionBackend`], so a
//! fake adapter can stand in during tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// An installed synthesis voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Identifier passed back in [`VoiceOptions::voice`].
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Language tag, e.g. `en-US`.
    pub language: String,
}

/// Per-utterance synthesis options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOptions {
    /// Voice id; `None` uses the engine default.
    pub voice: Option<String>,
    /// Speaking rate in words per minute.
    pub rate: u32,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 175,
        }
    }
}

/// Why an utterance stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechFailure {
    /// Another utterance or a stop cut this one off.
    Interrupted,
    /// The engine's cancel was invoked.
    Canceled,
    /// Engine error, unsupported voice, ...
    Other(String),
}

impl SpeechFailure {
    /// Interruption and cancellation end a request normally.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Interrupted | Self::Canceled)
    }
}

impl std::fmt::Display for SpeechFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupted => f.write_str("interrupted"),
            Self::Canceled => f.write_str("canceled"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

/// Lifecycle events of one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceEvent {
    Start,
    Pause,
    Resume,
    End,
    Error(SpeechFailure),
}

/// Text-to-speech engine.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Installed voices.
    async fn voices(&self) -> Result<Vec<Voice>>;

    /// Begin speaking `text`. Events for this utterance arrive on the
    /// returned channel; `End` or `Error` is the last one.
    fn speak(&self, text: &str, options: &VoiceOptions) -> Result<mpsc::UnboundedReceiver<UtteranceEvent>>;

    /// Pause the current utterance.
    fn pause(&self);

    /// Resume a paused utterance.
    fn resume(&self);

    /// Abort the current utterance.
    fn cancel(&self);
}

/// A recognized transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    /// `false` for interim hypotheses.
    pub is_final: bool,
}

/// Events of one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Result(Transcript),
    End,
    Error(String),
}

/// Speech-to-text engine.
pub trait RecognitionBackend: Send + Sync {
    /// Begin a capture.
    fn start(&self) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>>;

    /// Stop the current capture.
    fn stop(&self);
}
