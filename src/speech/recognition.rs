//! Single-shot speech recognition.
//!
//! One capture at a time: starting while listening stops the running
//! capture first. A capture ends after its first final transcript, an
//! engine end, an engine error, or an explicit [`RecognitionSession::stop`].

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancelHandle;
use crate::error::MuseError;
use crate::speech::backend::{RecognitionBackend, RecognitionEvent, Transcript};

/// Capture lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionState {
    Idle,
    Listening,
    Stopped,
}

struct Inner {
    state: RecognitionState,
    transcript: String,
    /// Bumped on every start/stop so a stale capture task cannot touch state.
    generation: u64,
    cancel: Option<CancelHandle>,
}

/// Owner of at most one running capture.
pub struct RecognitionSession {
    backend: Arc<dyn RecognitionBackend>,
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for RecognitionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionSession")
            .field("state", &self.state())
            .finish()
    }
}

impl RecognitionSession {
    pub fn new(backend: Arc<dyn RecognitionBackend>) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(Inner {
                state: RecognitionState::Idle,
                transcript: String::new(),
                generation: 0,
                cancel: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> RecognitionState {
        self.lock().state
    }

    /// Text of the last final transcript.
    pub fn transcript(&self) -> String {
        self.lock().transcript.clone()
    }

    /// Begin a capture. Returns `false` when the engine refuses to start.
    ///
    /// `on_result` sees interim hypotheses and at most one final
    /// transcript. `on_end` fires when the capture stops normally,
    /// including after [`stop`](Self::stop); `on_error` fires instead of
    /// `on_end` on engine failure.
    pub fn start<R, E, X>(&self, on_result: R, on_end: E, on_error: X) -> bool
    where
        R: FnMut(&Transcript) + Send + 'static,
        E: FnOnce() + Send + 'static,
        X: FnOnce(&MuseError) + Send + 'static,
    {
        if self.state() == RecognitionState::Listening {
            debug!("recognition already listening, restarting");
            self.stop();
        }

        let events = match self.backend.start() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "recognition failed to start");
                self.lock().state = RecognitionState::Stopped;
                return false;
            }
        };

        let cancel = CancelHandle::new();
        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.state = RecognitionState::Listening;
            inner.transcript.clear();
            inner.cancel = Some(cancel.clone());
            inner.generation
        };
        info!(generation, "recognition listening");

        let capture = Capture {
            backend: Arc::clone(&self.backend),
            inner: Arc::clone(&self.inner),
            generation,
        };
        tokio::spawn(capture.run(events, cancel, on_result, on_end, on_error));
        true
    }

    /// Stop the running capture. No-op unless listening.
    pub fn stop(&self) {
        let cancel = {
            let mut inner = self.lock();
            if inner.state != RecognitionState::Listening {
                return;
            }
            inner.state = RecognitionState::Stopped;
            inner.generation += 1;
            inner.cancel.take()
        };
        self.backend.stop();
        if let Some(cancel) = cancel {
            cancel.abort();
        }
        info!("recognition stopped");
    }
}

/// Task-side view of one capture.
struct Capture {
    backend: Arc<dyn RecognitionBackend>,
    inner: Arc<Mutex<Inner>>,
    generation: u64,
}

impl Capture {
    /// Mark the capture stopped. Returns `false` when a newer start or a
    /// stop has already superseded this capture.
    fn finish(&self, transcript: Option<&str>) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.generation != self.generation {
            return false;
        }
        inner.state = RecognitionState::Stopped;
        inner.cancel = None;
        if let Some(text) = transcript {
            inner.transcript = text.to_owned();
        }
        true
    }

    async fn run<R, E, X>(
        self,
        mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
        cancel: CancelHandle,
        mut on_result: R,
        on_end: E,
        on_error: X,
    ) where
        R: FnMut(&Transcript) + Send + 'static,
        E: FnOnce() + Send + 'static,
        X: FnOnce(&MuseError) + Send + 'static,
    {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.canceled() => {
                    on_end();
                    return;
                }
                event = events.recv() => event,
            };
            match event {
                Some(RecognitionEvent::Result(transcript)) if transcript.is_final => {
                    if self.finish(Some(&transcript.text)) {
                        self.backend.stop();
                    }
                    debug!(chars = transcript.text.len(), "final transcript");
                    on_result(&transcript);
                    on_end();
                    return;
                }
                Some(RecognitionEvent::Result(transcript)) => on_result(&transcript),
                Some(RecognitionEvent::End) | None => {
                    self.finish(None);
                    debug!("recognition ended without a final transcript");
                    on_end();
                    return;
                }
                Some(RecognitionEvent::Error(message)) => {
                    self.finish(None);
                    warn!(error = message.as_str(), "recognition error");
                    on_error(&MuseError::Recognition(message));
                    return;
                }
            }
        }
    }
}
