//! Chat stream session: transport + assembly + marker extraction.
//!
//! A [`ChatStreamSession`] drives one streamed exchange end to end. It feeds
//! every received chunk through the tier's framing, cuts the first feature
//! marker out of the display text, and reports incremental text through
//! `on_token` in arrival order. Gateway text is reported once per display
//! record; provider output once per JSON record. When the stream ends it
//! calls `on_complete` exactly once with a [`Completion`].
//!
//! Cancellation is cooperative. The flag is checked before every callback,
//! so once a cancel is observed neither `on_token` nor `on_complete` fire
//! again.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use muse::config::MuseConfig;
//! use muse::stream::message::{ChatMessage, StreamRequest};
//! use muse::stream::session::ChatStreamSession;
//! use muse::stream::transport::StreamTransport;
//!
//! # async fn example() {
//! let transport = Arc::new(StreamTransport::from_config(&MuseConfig::default()));
//! let request = StreamRequest::new(vec![ChatMessage::user("hi")]);
//! let handle = ChatStreamSession::new(transport).start(
//!     request,
//!     |token| print!("{token}"),
//!     |done| println!("\n{:?}", done.features),
//! );
//! let completion = handle.wait().await;
//! # }
//! ```

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cancel::CancelHandle;
use crate::features::{FeatureId, push_unique};
use crate::stream::assembler::{ChunkAssembler, Framing, MARKER_OPEN, Record};
use crate::stream::marker::FeatureMarkerExtractor;
use crate::stream::message::StreamRequest;
use crate::stream::transport::{StreamTransport, TierKind, TransportStream};

/// User-facing text delivered when neither tier can serve the request.
pub const STREAM_FAILURE_MESSAGE: &str =
    "I'm sorry, I'm having trouble connecting right now. Please try again in a moment.";

/// Lifecycle of a chat stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not started.
    Idle,
    /// Receiving records.
    Streaming,
    /// Stream ended normally.
    Completed,
    /// Both tiers failed.
    Failed,
    /// Caller requested termination.
    Canceled,
}

impl SessionState {
    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// Final result of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Terminal state.
    pub state: SessionState,
    /// Accumulated display text, or [`STREAM_FAILURE_MESSAGE`] on failure.
    pub text: String,
    /// Suggested features, first-seen order.
    pub features: Vec<FeatureId>,
    /// Tier that served the stream, if one was opened.
    pub tier: Option<TierKind>,
    /// The session's request id.
    pub request_id: String,
}

/// State shared between a running session and its handle.
#[derive(Debug, Clone)]
struct Shared {
    state: Arc<Mutex<SessionState>>,
    cancel: CancelHandle,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next` unless already terminal. Returns the resulting state.
    fn transition(&self, next: SessionState) -> SessionState {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.is_terminal() {
            *guard = next;
        }
        *guard
    }

    fn cancel(&self) {
        self.transition(SessionState::Canceled);
        self.cancel.abort();
    }
}

/// One cancellable streaming chat exchange.
pub struct ChatStreamSession {
    transport: Arc<StreamTransport>,
    shared: Shared,
    extractor: FeatureMarkerExtractor,
}

impl std::fmt::Debug for ChatStreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStreamSession")
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Handle to a spawned session.
#[derive(Debug)]
pub struct SessionHandle {
    shared: Shared,
    task: JoinHandle<Completion>,
    request_id: String,
}

impl SessionHandle {
    /// Request cancellation. Idempotent; no effect once terminal.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// A clonable cancellation handle for this session.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.shared.cancel.clone()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Wait for the session to reach a terminal state.
    pub async fn wait(self) -> Completion {
        match self.task.await {
            Ok(completion) => completion,
            Err(e) => {
                error!(request_id = self.request_id.as_str(), error = %e, "chat session task failed");
                Completion {
                    state: self.shared.transition(SessionState::Failed),
                    text: STREAM_FAILURE_MESSAGE.to_owned(),
                    features: Vec::new(),
                    tier: None,
                    request_id: self.request_id,
                }
            }
        }
    }
}

/// Per-run mutable state.
struct RunState {
    accumulated: String,
    features: Vec<FeatureId>,
    structured: bool,
    emitted: usize,
    /// Provider text holding an unclosed marker, prepended to the next record.
    carry: String,
}

impl ChatStreamSession {
    /// Create a session over `transport`.
    pub fn new(transport: Arc<StreamTransport>) -> Self {
        Self {
            transport,
            shared: Shared {
                state: Arc::new(Mutex::new(SessionState::Idle)),
                cancel: CancelHandle::new(),
            },
            extractor: FeatureMarkerExtractor::new(),
        }
    }

    /// Cancellation handle, available before the session starts.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.shared.cancel.clone()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Spawn the session on the current tokio runtime.
    pub fn start<T, C>(self, request: StreamRequest, on_token: T, on_complete: C) -> SessionHandle
    where
        T: FnMut(&str) + Send + 'static,
        C: FnOnce(&Completion) + Send + 'static,
    {
        let shared = self.shared.clone();
        let request_id = request.request_id.clone();
        let task = tokio::spawn(self.run(request, on_token, on_complete));
        SessionHandle {
            shared,
            task,
            request_id,
        }
    }

    /// Run the session on the calling task.
    pub async fn run<T, C>(self, request: StreamRequest, mut on_token: T, on_complete: C) -> Completion
    where
        T: FnMut(&str) + Send,
        C: FnOnce(&Completion) + Send,
    {
        let request_id = request.request_id.clone();
        if self.shared.transition(SessionState::Streaming) != SessionState::Streaming {
            return self.canceled(&request_id, None);
        }

        let opened = tokio::select! {
            biased;
            _ = self.shared.cancel.canceled() => return self.canceled(&request_id, None),
            opened = self.transport.open(&request, &self.shared.cancel) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!(request_id = request_id.as_str(), error = %e, "all stream tiers failed");
                return self.failed(&request_id, None, on_complete);
            }
        };

        let mut progress = RunState {
            accumulated: String::new(),
            features: Vec::new(),
            structured: false,
            emitted: 0,
            carry: String::new(),
        };
        let mut framing = ChunkAssembler::new(stream.framing());
        let mut fell_back = stream.tier() == TierKind::Provider;

        loop {
            let chunk = stream.next_chunk().await;
            if self.shared.cancel.is_canceled() {
                return self.canceled(&request_id, Some(stream.tier()));
            }
            match chunk {
                Some(Ok(bytes)) => {
                    let records = framing.feed(&bytes);
                    if !self.deliver(&stream, records, &mut progress, &mut on_token) {
                        return self.canceled(&request_id, Some(stream.tier()));
                    }
                }
                Some(Err(e)) if !fell_back && progress.emitted == 0 => {
                    warn!(
                        request_id = request_id.as_str(),
                        error = %e,
                        "primary stream failed before any output, switching to provider"
                    );
                    fell_back = true;
                    let reopened = tokio::select! {
                        biased;
                        _ = self.shared.cancel.canceled() => {
                            return self.canceled(&request_id, Some(stream.tier()));
                        }
                        reopened = self.transport.open_fallback(&request, &self.shared.cancel) => reopened,
                    };
                    match reopened {
                        Ok(next) => {
                            stream = next;
                            framing = ChunkAssembler::new(stream.framing());
                            progress.carry.clear();
                        }
                        Err(e) => {
                            error!(request_id = request_id.as_str(), error = %e, "fallback tier failed");
                            return self.failed(&request_id, Some(TierKind::Provider), on_complete);
                        }
                    }
                }
                Some(Err(e)) => {
                    error!(
                        request_id = request_id.as_str(),
                        tier = %stream.tier(),
                        error = %e,
                        "stream failed mid-response"
                    );
                    return self.failed(&request_id, Some(stream.tier()), on_complete);
                }
                None => break,
            }
        }

        let tail = framing.finish();
        if !self.deliver(&stream, tail, &mut progress, &mut on_token) {
            return self.canceled(&request_id, Some(stream.tier()));
        }
        let rest = std::mem::take(&mut progress.carry);
        if !self.emit_text(rest, &mut progress, &mut on_token) {
            return self.canceled(&request_id, Some(stream.tier()));
        }

        if !progress.structured {
            progress.features = self.extractor.implicit_features(&progress.accumulated);
        }

        if self.shared.transition(SessionState::Completed) != SessionState::Completed {
            return self.canceled(&request_id, Some(stream.tier()));
        }
        let completion = Completion {
            state: SessionState::Completed,
            text: progress.accumulated,
            features: progress.features,
            tier: Some(stream.tier()),
            request_id,
        };
        info!(
            request_id = completion.request_id.as_str(),
            tier = %stream.tier(),
            chars = completion.text.len(),
            features = completion.features.len(),
            "chat stream completed"
        );
        on_complete(&completion);
        completion
    }

    /// Route framing records to the token callback.
    /// Returns `false` once cancellation has been observed.
    fn deliver<T: FnMut(&str)>(
        &self,
        stream: &TransportStream,
        records: Vec<Record>,
        progress: &mut RunState,
        on_token: &mut T,
    ) -> bool {
        for record in records {
            let text = match record {
                Record::Json(value) => match stream.record_text(&value) {
                    Some(text) => self.record_display(text, progress),
                    None => continue,
                },
                Record::Text(text) if stream.framing() == Framing::Ndjson => {
                    self.record_display(text, progress)
                }
                Record::Text(text) => text,
                Record::Marker(marker) => self.strip_marker(marker, progress),
            };
            if !self.emit_text(text, progress, on_token) {
                return false;
            }
        }
        true
    }

    /// Display text for one provider record. An unclosed marker at the end
    /// of the record is held back and prepended to the next one.
    fn record_display(&self, text: String, progress: &mut RunState) -> String {
        let mut combined = std::mem::take(&mut progress.carry);
        combined.push_str(&text);
        let unclosed = combined
            .rfind(MARKER_OPEN)
            .filter(|&start| !progress.structured && !combined[start + MARKER_OPEN.len()..].contains(']'));
        if let Some(start) = unclosed {
            progress.carry = combined.split_off(start);
        }
        self.strip_marker(combined, progress)
    }

    /// Remove the first well-formed marker of the stream and merge its
    /// features. Later markers are left as ordinary text.
    fn strip_marker(&self, text: String, progress: &mut RunState) -> String {
        if progress.structured {
            return text;
        }
        let extraction = self.extractor.extract(&text);
        if !extraction.structured {
            return text;
        }
        progress.structured = true;
        for feature in extraction.features {
            push_unique(&mut progress.features, feature);
        }
        extraction.display_text
    }

    /// Report one piece of display text. Empty text is skipped.
    /// Returns `false` once cancellation has been observed.
    fn emit_text<T: FnMut(&str)>(&self, text: String, progress: &mut RunState, on_token: &mut T) -> bool {
        if self.shared.cancel.is_canceled() {
            return false;
        }
        if text.is_empty() {
            return true;
        }
        progress.accumulated.push_str(&text);
        progress.emitted += 1;
        on_token(&text);
        true
    }

    fn canceled(&self, request_id: &str, tier: Option<TierKind>) -> Completion {
        let state = self.shared.transition(SessionState::Canceled);
        info!(request_id, "chat stream canceled");
        Completion {
            state,
            text: String::new(),
            features: Vec::new(),
            tier,
            request_id: request_id.to_owned(),
        }
    }

    fn failed<C: FnOnce(&Completion)>(
        &self,
        request_id: &str,
        tier: Option<TierKind>,
        on_complete: C,
    ) -> Completion {
        let state = self.shared.transition(SessionState::Failed);
        let completion = Completion {
            state,
            text: STREAM_FAILURE_MESSAGE.to_owned(),
            features: Vec::new(),
            tier,
            request_id: request_id.to_owned(),
        };
        if state == SessionState::Failed && !self.shared.cancel.is_canceled() {
            on_complete(&completion);
        }
        completion
    }
}
