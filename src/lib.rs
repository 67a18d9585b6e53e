//! Muse: streaming and resilience orchestration for a creative assistant.
//!
//! This crate drives the real-time parts of the assistant:
//! Gateway/Provider → ChunkAssembler → FeatureMarkerExtractor → caller
//!
//! # Architecture
//!
//! - **Streaming**: [`stream::StreamTransport`] opens a reply stream on the
//!   gateway tier and falls back to the provider tier once on failure;
//!   [`stream::ChatStreamSession`] assembles records, strips feature markers
//!   and reports tokens through callbacks
//! - **Progress**: [`progress::ProgressSimulator`] shows phased status while a
//!   generation or reasoning job runs, with cooperative cancellation
//! - **Speech**: [`speech::SpeechQueue`] plays one utterance at a time in FIFO
//!   order; [`speech::RecognitionSession`] runs single-shot voice capture
//! - **Assistant**: [`assistant::Assistant`] ties the above together for one
//!   conversation

pub mod assistant;
pub mod cancel;
pub mod config;
pub mod error;
pub mod features;
pub mod progress;
pub mod speech;
pub mod stream;

pub use assistant::Assistant;
pub use cancel::CancelHandle;
pub use config::MuseConfig;
pub use error::{MuseError, Result};
pub use features::FeatureId;
pub use progress::{ProgressHandle, ProgressSession, ProgressSimulator};
pub use stream::{ChatStreamSession, Completion, SessionHandle, SessionState, StreamTransport};
