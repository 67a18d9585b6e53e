//! Voice output and input.
//!
//! - [`backend`]: the engine capability traits
//! - [`queue`]: FIFO speech queue over a [`SpeechBackend`]
//! - [`recognition`]: single-shot capture over a [`RecognitionBackend`]
//! - [`sentences`]: token-to-sentence grouping for voice output
//! - [`command`] / [`fake`]: a system-command engine and scriptable fakes

pub mod backend;
pub mod command;
pub mod fake;
pub mod queue;
pub mod recognition;
pub mod sentences;

pub use backend::{
    RecognitionBackend, RecognitionEvent, SpeechBackend, SpeechFailure, Transcript, UtteranceEvent,
    Voice, VoiceOptions,
};
pub use queue::{SpeechOutcome, SpeechQueue, SpeechRequest, SpeechState};
pub use recognition::{RecognitionSession, RecognitionState};
pub use sentences::SentenceBuffer;
