//! Per-conversation orchestration.
//!
//! [`Assistant`] owns the conversation history and the optional voice
//! pieces for one user session. `send` runs a chat stream, forwards whole
//! sentences to the speech queue while voice output is on, and records the
//! reply in history once the stream completes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::MuseConfig;
use crate::error::{MuseError, Result};
use crate::features::FeatureId;
use crate::progress::generation::{
    GeneratedArtifact, GenerationProvider, GenerationRequest, run_generation,
};
use crate::progress::reasoning::run_reasoning;
use crate::progress::{ProgressHandle, ProgressSimulator};
use crate::speech::backend::{Transcript, VoiceOptions};
use crate::speech::queue::{SpeechQueue, SpeechRequest};
use crate::speech::recognition::RecognitionSession;
use crate::speech::sentences::SentenceBuffer;
use crate::stream::message::{ChatMessage, StreamRequest};
use crate::stream::session::{ChatStreamSession, Completion, SessionHandle, SessionState};
use crate::stream::transport::StreamTransport;

/// One user's assistant session.
pub struct Assistant {
    transport: Arc<StreamTransport>,
    temperature: f32,
    history: Arc<Mutex<Vec<ChatMessage>>>,
    user_context: BTreeMap<String, String>,
    voice_enabled: Arc<AtomicBool>,
    voice_options: VoiceOptions,
    speech: Option<SpeechQueue>,
    recognition: Option<RecognitionSession>,
    generation: Option<Arc<dyn GenerationProvider>>,
    generation_progress: ProgressSimulator,
    reasoning_progress: ProgressSimulator,
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("transport", &self.transport)
            .field("turns", &self.history().len())
            .field("voice_enabled", &self.voice_enabled())
            .finish()
    }
}

impl Assistant {
    /// Create an assistant over `transport`.
    pub fn new(config: &MuseConfig, transport: Arc<StreamTransport>) -> Self {
        Self {
            transport,
            temperature: config.chat.temperature,
            history: Arc::new(Mutex::new(Vec::new())),
            user_context: BTreeMap::new(),
            voice_enabled: Arc::new(AtomicBool::new(config.voice.enabled)),
            voice_options: VoiceOptions {
                voice: config.voice.voice.clone(),
                rate: config.voice.rate,
            },
            speech: None,
            recognition: None,
            generation: None,
            generation_progress: ProgressSimulator::new(Duration::from_millis(
                config.progress.generation_interval_ms,
            )),
            reasoning_progress: ProgressSimulator::new(Duration::from_millis(
                config.progress.reasoning_interval_ms,
            )),
        }
    }

    /// Attach a speech queue for voice output.
    pub fn with_speech(mut self, queue: SpeechQueue) -> Self {
        self.speech = Some(queue);
        self
    }

    /// Attach a recognition session for voice input.
    pub fn with_recognition(mut self, session: RecognitionSession) -> Self {
        self.recognition = Some(session);
        self
    }

    /// Attach the backend used by [`generate`](Self::generate).
    pub fn with_generation(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.generation = Some(provider);
        self
    }

    /// Add a fact about the user (`FIRSTNAME`, ...).
    pub fn set_user_context(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.user_context.insert(key.into(), value.into());
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice_enabled.load(Ordering::SeqCst)
    }

    /// Toggle voice output. Turning it off silences anything queued.
    pub fn set_voice_enabled(&self, enabled: bool) {
        self.voice_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.stop_speaking();
        }
    }

    /// Conversation so far.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Send a user message and stream the reply.
    ///
    /// `on_token` receives display text as it arrives; `on_complete` fires
    /// once with the final result (including the failure message when no
    /// tier could serve the request). The user message and the reply enter
    /// the history together, and only when the turn completes.
    pub fn send<T, C>(&self, text: &str, mut on_token: T, on_complete: C) -> SessionHandle
    where
        T: FnMut(&str) + Send + 'static,
        C: FnOnce(&Completion) + Send + 'static,
    {
        let user = ChatMessage::user(text);
        let mut messages = self.history();
        messages.push(user.clone());
        let mut request = StreamRequest::new(messages).with_temperature(self.temperature);
        request.user_context = self.user_context.clone();
        debug!(
            request_id = request.request_id.as_str(),
            turns = request.messages.len(),
            "sending chat turn"
        );

        let voice = VoiceOutput {
            queue: self.speech.clone(),
            enabled: Arc::clone(&self.voice_enabled),
            options: self.voice_options.clone(),
            buffer: Arc::new(Mutex::new(SentenceBuffer::new())),
        };
        let tail = voice.clone();
        let history = Arc::clone(&self.history);

        ChatStreamSession::new(Arc::clone(&self.transport)).start(
            request,
            move |token| {
                voice.push(token);
                on_token(token);
            },
            move |completion| {
                tail.finish(completion.state == SessionState::Completed);
                if completion.state == SessionState::Completed {
                    let mut history = history.lock().unwrap_or_else(|e| e.into_inner());
                    history.push(user);
                    history.push(ChatMessage::assistant(completion.text.clone()));
                }
                on_complete(completion);
            },
        )
    }

    /// Generate an artifact for `feature` with simulated progress.
    ///
    /// # Errors
    ///
    /// Returns [`MuseError::Config`] when no generation backend is attached.
    pub fn generate<P, C>(
        &self,
        feature: FeatureId,
        prompt: &str,
        on_phase: P,
        on_complete: C,
    ) -> Result<ProgressHandle<Result<GeneratedArtifact>>>
    where
        P: FnMut(&str, u8) + Send + 'static,
        C: FnOnce(&Result<GeneratedArtifact>) + Send + 'static,
    {
        let provider = self
            .generation
            .clone()
            .ok_or_else(|| MuseError::Config("no generation backend configured".into()))?;
        info!(%feature, "starting generation");
        Ok(run_generation(
            &self.generation_progress,
            provider,
            GenerationRequest {
                feature,
                prompt: prompt.to_owned(),
            },
            on_phase,
            on_complete,
        ))
    }

    /// Narrate reasoning about `topic` while the next reply is produced.
    ///
    /// The narration resolves when `reply` completes.
    pub fn narrate<P>(&self, topic: &str, on_phase: P, reply: SessionHandle) -> ProgressHandle<Completion>
    where
        P: FnMut(&str, u8) + Send + 'static,
    {
        run_reasoning(&self.reasoning_progress, topic, on_phase, reply.wait(), |_| {})
    }

    /// Start listening for one spoken request.
    ///
    /// Returns `false` when no recognition engine is attached or it fails
    /// to start.
    pub fn listen<R, E, X>(&self, on_result: R, on_end: E, on_error: X) -> bool
    where
        R: FnMut(&Transcript) + Send + 'static,
        E: FnOnce() + Send + 'static,
        X: FnOnce(&MuseError) + Send + 'static,
    {
        match &self.recognition {
            Some(session) => {
                self.stop_speaking();
                session.start(on_result, on_end, on_error)
            }
            None => false,
        }
    }

    pub fn stop_listening(&self) {
        if let Some(session) = &self.recognition {
            session.stop();
        }
    }

    /// Silence voice output and drop anything queued.
    pub fn stop_speaking(&self) {
        if let Some(queue) = &self.speech {
            queue.stop();
        }
    }
}

/// Sentence-grouped forwarding of streamed text to the speech queue.
#[derive(Clone)]
struct VoiceOutput {
    queue: Option<SpeechQueue>,
    enabled: Arc<AtomicBool>,
    options: VoiceOptions,
    buffer: Arc<Mutex<SentenceBuffer>>,
}

impl VoiceOutput {
    fn active(&self) -> Option<&SpeechQueue> {
        self.queue
            .as_ref()
            .filter(|_| self.enabled.load(Ordering::SeqCst))
    }

    fn push(&self, token: &str) {
        let Some(queue) = self.active() else {
            return;
        };
        let sentences = self
            .buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(token);
        for sentence in sentences {
            self.say(queue, sentence);
        }
    }

    fn finish(&self, speak_rest: bool) {
        let rest = self.buffer.lock().unwrap_or_else(|e| e.into_inner()).flush();
        if let (true, Some(queue), Some(rest)) = (speak_rest, self.active(), rest) {
            self.say(queue, rest);
        }
    }

    fn say(&self, queue: &SpeechQueue, text: String) {
        let done = queue.speak(SpeechRequest::new(text).with_options(self.options.clone()));
        tokio::spawn(async move {
            if let Err(e) = done.await {
                warn!(error = %e, "spoken reply failed");
            }
        });
    }
}
