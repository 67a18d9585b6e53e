//! Streaming chat layer.
//!
//! - [`message`]: logical request/message types shared by both tiers
//! - [`assembler`]: chunk-boundary-safe record assembly
//! - [`marker`]: feature marker extraction
//! - [`transport`]: primary-then-fallback byte stream transport
//! - [`gateway`] / [`provider`]: the two tier adapters
//! - [`session`]: cancellable session tying the above together

pub mod assembler;
pub mod gateway;
pub mod marker;
pub mod message;
pub mod provider;
pub mod session;
pub mod transport;

pub use assembler::{ChunkAssembler, Framing, Record};
pub use marker::{Extraction, FeatureMarkerExtractor};
pub use message::{ChatMessage, Role, StreamRequest};
pub use session::{ChatStreamSession, Completion, STREAM_FAILURE_MESSAGE, SessionHandle, SessionState};
pub use transport::{StreamTier, StreamTransport, TierKind, TransportStream};
