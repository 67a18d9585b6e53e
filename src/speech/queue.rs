//! FIFO text-to-speech queue.
//!
//! A single driver task owns the pending requests and the one utterance
//! that is currently audible. Callers talk to it over a command channel,
//! so every mutation (enqueue, advance, pause, stop) is applied in order
//! by one owner and the queue invariants hold after each step:
//!
//! - requests start in the order `speak` was called
//! - at most one utterance is speaking or paused at any time
//!
//! `speak` returns a future that resolves when that request ends.
//! Interruption and cancellation resolve with
//! [`SpeechOutcome::Interrupted`]; any other engine failure resolves with
//! an error. Either way the queue moves on to the next request.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{MuseError, Result};
use crate::speech::backend::{SpeechBackend, UtteranceEvent, VoiceOptions};

/// What to say and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: String,
    pub options: VoiceOptions,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: VoiceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VoiceOptions) -> Self {
        self.options = options;
        self
    }
}

/// How a request ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Played to the end.
    Finished,
    /// Cut short by a stop, an interruption, or engine cancel.
    Interrupted,
}

/// Audible state of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    Idle,
    Speaking,
    Paused,
}

type Responder = oneshot::Sender<Result<SpeechOutcome>>;

enum Command {
    Speak { request: SpeechRequest, done: Responder },
    Pause,
    Resume,
    Stop,
}

/// Handle to the speech queue. Clones share one queue.
#[derive(Clone)]
pub struct SpeechQueue {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SpeechState>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for SpeechQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechQueue")
            .field("state", &self.state())
            .field("pending", &self.len())
            .finish()
    }
}

impl SpeechQueue {
    /// Start a queue over `backend`. Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SpeechState::Idle);
        let pending = Arc::new(AtomicUsize::new(0));
        let driver = Driver {
            backend,
            queue: VecDeque::new(),
            current: None,
            state: state_tx,
            pending: Arc::clone(&pending),
        };
        tokio::spawn(driver.run(rx));
        Self {
            commands,
            state,
            pending,
        }
    }

    /// Enqueue `request`. The returned future resolves when it ends.
    ///
    /// The request is queued when this is called, not when the future is
    /// first polled.
    pub fn speak(&self, request: SpeechRequest) -> impl Future<Output = Result<SpeechOutcome>> + Send + use<> {
        let (done, rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = self.commands.send(Command::Speak { request, done }).is_ok();
        if !sent {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        async move {
            if !sent {
                return Err(MuseError::Channel("speech queue has shut down".into()));
            }
            rx.await
                .map_err(|_| MuseError::Channel("speech queue dropped the request".into()))?
        }
    }

    /// Pause the current utterance.
    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    /// Resume a paused utterance.
    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    /// Drop every pending request and silence the current one.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn state(&self) -> SpeechState {
        *self.state.borrow()
    }

    /// Requests waiting behind the current utterance.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver for state changes.
    pub fn subscribe(&self) -> watch::Receiver<SpeechState> {
        self.state.clone()
    }
}

struct Pending {
    request: SpeechRequest,
    done: Responder,
}

struct Current {
    text: String,
    events: mpsc::UnboundedReceiver<UtteranceEvent>,
    done: Responder,
}

struct Driver {
    backend: Arc<dyn SpeechBackend>,
    queue: VecDeque<Pending>,
    current: Option<Current>,
    state: watch::Sender<SpeechState>,
    pending: Arc<AtomicUsize>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            if self.current.is_none() {
                self.advance();
            }
            tokio::select! {
                biased;
                event = next_event(&mut self.current) => self.on_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        if self.current.is_some() || !self.queue.is_empty() {
            self.stop();
        }
        debug!("speech queue driver stopped");
    }

    fn set_state(&self, state: SpeechState) {
        self.state.send_if_modified(|s| {
            let changed = *s != state;
            *s = state;
            changed
        });
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Speak { request, done } => {
                debug!(pending = self.queue.len() + 1, "speech request queued");
                self.queue.push_back(Pending { request, done });
            }
            Command::Pause => {
                if self.current.is_some() {
                    self.backend.pause();
                    self.set_state(SpeechState::Paused);
                }
            }
            Command::Resume => {
                if self.current.is_some() {
                    self.backend.resume();
                    self.set_state(SpeechState::Speaking);
                }
            }
            Command::Stop => self.stop(),
        }
    }

    /// Start the next pending request, skipping any the engine rejects.
    fn advance(&mut self) {
        while let Some(Pending { request, done }) = self.queue.pop_front() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            match self.backend.speak(&request.text, &request.options) {
                Ok(events) => {
                    debug!(chars = request.text.len(), "utterance started");
                    self.current = Some(Current {
                        text: request.text,
                        events,
                        done,
                    });
                    self.set_state(SpeechState::Speaking);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "speech engine rejected utterance");
                    let _ = done.send(Err(e));
                }
            }
        }
        self.set_state(SpeechState::Idle);
    }

    fn on_event(&mut self, event: Option<UtteranceEvent>) {
        let outcome = match event {
            Some(UtteranceEvent::Start) | Some(UtteranceEvent::Resume) => {
                self.set_state(SpeechState::Speaking);
                return;
            }
            Some(UtteranceEvent::Pause) => {
                self.set_state(SpeechState::Paused);
                return;
            }
            Some(UtteranceEvent::End) => Ok(SpeechOutcome::Finished),
            Some(UtteranceEvent::Error(failure)) if failure.is_benign() => {
                debug!(reason = %failure, "utterance interrupted");
                Ok(SpeechOutcome::Interrupted)
            }
            Some(UtteranceEvent::Error(failure)) => {
                warn!(error = %failure, "utterance failed");
                Err(MuseError::Speech(failure.to_string()))
            }
            None => Err(MuseError::Speech(
                "speech engine closed the utterance without ending it".into(),
            )),
        };
        if let Some(current) = self.current.take() {
            debug!(chars = current.text.len(), "utterance ended");
            let _ = current.done.send(outcome);
        }
    }

    fn stop(&mut self) {
        let dropped = self.queue.len();
        for Pending { done, .. } in self.queue.drain(..) {
            let _ = done.send(Ok(SpeechOutcome::Interrupted));
        }
        self.pending.fetch_sub(dropped, Ordering::SeqCst);
        if let Some(current) = self.current.take() {
            self.backend.cancel();
            let _ = current.done.send(Ok(SpeechOutcome::Interrupted));
        }
        info!(dropped, "speech queue stopped");
        self.set_state(SpeechState::Idle);
    }
}

/// Next event of the current utterance; pends forever when idle.
async fn next_event(current: &mut Option<Current>) -> Option<UtteranceEvent> {
    match current {
        Some(current) => current.events.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::speech::backend::SpeechFailure;
    use crate::speech::fake::FakeSpeechBackend;
    use std::time::Duration;

    async fn wait_state(queue: &SpeechQueue, state: SpeechState) {
        let mut rx = queue.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
            .await
            .expect("state reached")
            .unwrap();
    }

    #[tokio::test]
    async fn second_request_waits_for_first() {
        let backend = Arc::new(FakeSpeechBackend::manual());
        let queue = SpeechQueue::new(backend.clone());

        let a = queue.speak(SpeechRequest::new("A"));
        let b = queue.speak(SpeechRequest::new("B"));
        backend.wait_started(1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.spoken(), vec!["A"]);
        assert_eq!(queue.state(), SpeechState::Speaking);
        assert_eq!(queue.len(), 1);

        backend.finish_current();
        assert_eq!(a.await.unwrap(), SpeechOutcome::Finished);
        backend.wait_started(2).await;
        assert_eq!(backend.spoken(), vec!["A", "B"]);

        backend.finish_current();
        assert_eq!(b.await.unwrap(), SpeechOutcome::Finished);
        wait_state(&queue, SpeechState::Idle).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn interruption_resolves_and_queue_continues() {
        let backend = Arc::new(FakeSpeechBackend::manual());
        let queue = SpeechQueue::new(backend.clone());
        let a = queue.speak(SpeechRequest::new("A"));
        let b = queue.speak(SpeechRequest::new("B"));
        backend.wait_started(1).await;
        backend.fail_current(SpeechFailure::Interrupted);
        assert_eq!(a.await.unwrap(), SpeechOutcome::Interrupted);
        backend.wait_started(2).await;
        backend.finish_current();
        assert_eq!(b.await.unwrap(), SpeechOutcome::Finished);
    }

    #[tokio::test]
    async fn other_failure_rejects_only_that_request() {
        let backend = Arc::new(FakeSpeechBackend::auto());
        backend.fail_on("bad", SpeechFailure::Other("voice not found".into()));
        let queue = SpeechQueue::new(backend.clone());
        let bad = queue.speak(SpeechRequest::new("bad"));
        let good = queue.speak(SpeechRequest::new("good"));
        let err = bad.await.unwrap_err();
        assert_eq!(err.code(), "SPEECH_FAILED");
        assert_eq!(good.await.unwrap(), SpeechOutcome::Finished);
        assert_eq!(backend.spoken(), vec!["bad", "good"]);
    }

    #[tokio::test]
    async fn stop_clears_queue_and_goes_idle() {
        let backend = Arc::new(FakeSpeechBackend::manual());
        let queue = SpeechQueue::new(backend.clone());
        let a = queue.speak(SpeechRequest::new("A"));
        let b = queue.speak(SpeechRequest::new("B"));
        let c = queue.speak(SpeechRequest::new("C"));
        backend.wait_started(1).await;

        queue.stop();
        assert_eq!(a.await.unwrap(), SpeechOutcome::Interrupted);
        assert_eq!(b.await.unwrap(), SpeechOutcome::Interrupted);
        assert_eq!(c.await.unwrap(), SpeechOutcome::Interrupted);
        wait_state(&queue, SpeechState::Idle).await;
        assert_eq!(backend.spoken(), vec!["A"]);
        assert_eq!(backend.control_counts().2, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let backend = Arc::new(FakeSpeechBackend::manual());
        let queue = SpeechQueue::new(backend.clone());
        let a = queue.speak(SpeechRequest::new("A"));
        backend.wait_started(1).await;

        queue.pause();
        wait_state(&queue, SpeechState::Paused).await;
        queue.resume();
        wait_state(&queue, SpeechState::Speaking).await;
        assert_eq!(backend.control_counts(), (1, 1, 0));

        backend.finish_current();
        assert_eq!(a.await.unwrap(), SpeechOutcome::Finished);
        wait_state(&queue, SpeechState::Idle).await;
    }

    #[tokio::test]
    async fn pause_while_idle_is_ignored() {
        let backend = Arc::new(FakeSpeechBackend::auto());
        let queue = SpeechQueue::new(backend.clone());
        queue.pause();
        assert_eq!(queue.speak(SpeechRequest::new("x")).await.unwrap(), SpeechOutcome::Finished);
        assert_eq!(backend.control_counts(), (0, 0, 0));
    }
}
