//! In-memory speech adapters for tests and headless runs.
//!
//! [`FakeSpeechBackend`] records what it was asked to say. In manual mode
//! an utterance stays "playing" until the test calls
//! [`FakeSpeechBackend::finish_current`] or
//! [`FakeSpeechBackend::fail_current`]; in auto mode every utterance ends
//! immediately.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::{MuseError, Result};
use crate::speech::backend::{
    RecognitionBackend, RecognitionEvent, SpeechBackend, SpeechFailure, Transcript, UtteranceEvent,
    Voice, VoiceOptions,
};

#[derive(Default)]
struct SpeechInner {
    spoken: Vec<String>,
    active: Option<mpsc::UnboundedSender<UtteranceEvent>>,
    failures: HashMap<String, SpeechFailure>,
    pauses: usize,
    resumes: usize,
    cancels: usize,
}

/// Scriptable speech engine.
pub struct FakeSpeechBackend {
    auto_finish: bool,
    inner: Mutex<SpeechInner>,
    started: watch::Sender<usize>,
}

impl std::fmt::Debug for FakeSpeechBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSpeechBackend")
            .field("auto_finish", &self.auto_finish)
            .field("spoken", &self.spoken())
            .finish()
    }
}

impl FakeSpeechBackend {
    /// Utterances play until finished by the test.
    pub fn manual() -> Self {
        Self::with_mode(false)
    }

    /// Utterances end as soon as they start.
    pub fn auto() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(auto_finish: bool) -> Self {
        Self {
            auto_finish,
            inner: Mutex::new(SpeechInner::default()),
            started: watch::channel(0).0,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpeechInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `text` fail with `failure` when spoken.
    pub fn fail_on(&self, text: impl Into<String>, failure: SpeechFailure) {
        self.lock().failures.insert(text.into(), failure);
    }

    /// Every text passed to `speak`, in call order.
    pub fn spoken(&self) -> Vec<String> {
        self.lock().spoken.clone()
    }

    /// `(pauses, resumes, cancels)` seen so far.
    pub fn control_counts(&self) -> (usize, usize, usize) {
        let inner = self.lock();
        (inner.pauses, inner.resumes, inner.cancels)
    }

    /// Wait until at least `count` utterances have started.
    pub async fn wait_started(&self, count: usize) {
        let mut rx = self.started.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    /// End the current utterance normally.
    pub fn finish_current(&self) {
        if let Some(tx) = self.lock().active.take() {
            let _ = tx.send(UtteranceEvent::End);
        }
    }

    /// End the current utterance with `failure`.
    pub fn fail_current(&self, failure: SpeechFailure) {
        if let Some(tx) = self.lock().active.take() {
            let _ = tx.send(UtteranceEvent::Error(failure));
        }
    }
}

#[async_trait]
impl SpeechBackend for FakeSpeechBackend {
    async fn voices(&self) -> Result<Vec<Voice>> {
        Ok(vec![Voice {
            id: "fake".into(),
            name: "Fake Voice".into(),
            language: "en-US".into(),
        }])
    }

    fn speak(&self, text: &str, _options: &VoiceOptions) -> Result<mpsc::UnboundedReceiver<UtteranceEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.lock();
            inner.spoken.push(text.to_owned());
            let _ = tx.send(UtteranceEvent::Start);
            if let Some(failure) = inner.failures.get(text).cloned() {
                let _ = tx.send(UtteranceEvent::Error(failure));
            } else if self.auto_finish {
                let _ = tx.send(UtteranceEvent::End);
            } else {
                inner.active = Some(tx);
            }
        }
        self.started.send_modify(|n| *n += 1);
        Ok(rx)
    }

    fn pause(&self) {
        let mut inner = self.lock();
        inner.pauses += 1;
        if let Some(tx) = &inner.active {
            let _ = tx.send(UtteranceEvent::Pause);
        }
    }

    fn resume(&self) {
        let mut inner = self.lock();
        inner.resumes += 1;
        if let Some(tx) = &inner.active {
            let _ = tx.send(UtteranceEvent::Resume);
        }
    }

    fn cancel(&self) {
        let mut inner = self.lock();
        inner.cancels += 1;
        if let Some(tx) = inner.active.take() {
            let _ = tx.send(UtteranceEvent::Error(SpeechFailure::Canceled));
        }
    }
}

#[derive(Default)]
struct RecognitionInner {
    active: Option<mpsc::UnboundedSender<RecognitionEvent>>,
    starts: usize,
    stops: usize,
    fail_next_start: bool,
}

/// Scriptable recognition engine.
#[derive(Default)]
pub struct FakeRecognitionBackend {
    inner: Mutex<RecognitionInner>,
}

impl std::fmt::Debug for FakeRecognitionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("FakeRecognitionBackend")
            .field("capturing", &inner.active.is_some())
            .field("starts", &inner.starts)
            .field("stops", &inner.stops)
            .finish()
    }
}

impl FakeRecognitionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecognitionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `start` fail (no microphone, permission denied, ...).
    pub fn fail_next_start(&self) {
        self.lock().fail_next_start = true;
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.lock().stops
    }

    fn emit(&self, event: RecognitionEvent) {
        if let Some(tx) = &self.lock().active {
            let _ = tx.send(event);
        }
    }

    /// Deliver an interim hypothesis.
    pub fn emit_interim(&self, text: &str) {
        self.emit(RecognitionEvent::Result(Transcript {
            text: text.to_owned(),
            is_final: false,
        }));
    }

    /// Deliver a final transcript.
    pub fn emit_final(&self, text: &str) {
        self.emit(RecognitionEvent::Result(Transcript {
            text: text.to_owned(),
            is_final: true,
        }));
    }

    /// Report an engine error.
    pub fn emit_error(&self, message: &str) {
        self.emit(RecognitionEvent::Error(message.to_owned()));
    }

    /// End the capture without a result.
    pub fn emit_end(&self) {
        if let Some(tx) = self.lock().active.take() {
            let _ = tx.send(RecognitionEvent::End);
        }
    }
}

impl RecognitionBackend for FakeRecognitionBackend {
    fn start(&self) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_start) {
            return Err(MuseError::Recognition("microphone unavailable".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.starts += 1;
        inner.active = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        let mut inner = self.lock();
        inner.stops += 1;
        if let Some(tx) = inner.active.take() {
            let _ = tx.send(RecognitionEvent::End);
        }
    }
}
