//! Phase-based progress simulation.
//!
//! Long-running jobs (image generation, "thinking" narration) report
//! progress as a fixed list of phases advanced by a timer. The timer state
//! is an explicit [`ProgressSession`] value; each tick produces the next
//! value and reports it through `on_phase(status, percent)`.
//!
//! The job itself runs concurrently with the timer. Completion fires only
//! after the last phase has been shown *and* the job has resolved, and
//! never after cancellation.

pub mod generation;
pub mod reasoning;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::cancel::CancelHandle;

/// Immutable snapshot of a progress run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSession {
    phase_index: u32,
    total_phases: u32,
    status_text: String,
    canceled: bool,
}

impl ProgressSession {
    /// A fresh session at phase 0. `total_phases` is clamped to at least 1.
    pub fn new(total_phases: u32) -> Self {
        Self {
            phase_index: 0,
            total_phases: total_phases.max(1),
            status_text: String::new(),
            canceled: false,
        }
    }

    /// Advance by exactly one phase. No-op once finished or canceled.
    #[must_use]
    pub fn advance(&self, status_text: impl Into<String>) -> Self {
        if self.canceled || self.is_finished() {
            return self.clone();
        }
        Self {
            phase_index: self.phase_index + 1,
            total_phases: self.total_phases,
            status_text: status_text.into(),
            canceled: false,
        }
    }

    /// Mark the session canceled.
    #[must_use]
    pub fn cancel(&self) -> Self {
        Self {
            canceled: true,
            ..self.clone()
        }
    }

    pub fn phase_index(&self) -> u32 {
        self.phase_index
    }

    pub fn total_phases(&self) -> u32 {
        self.total_phases
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Whether every phase has been shown.
    pub fn is_finished(&self) -> bool {
        self.phase_index >= self.total_phases
    }

    /// Percentage in `0..=100`, `round(phase / total * 100)`.
    pub fn progress(&self) -> u8 {
        let pct = (f64::from(self.phase_index) / f64::from(self.total_phases) * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }
}

/// Latest session value, shared between the timer task and its handle.
/// Once canceled it stays canceled.
fn publish(slot: &Mutex<ProgressSession>, session: &ProgressSession) {
    let mut current = slot.lock().unwrap_or_else(|e| e.into_inner());
    *current = if current.is_canceled() {
        session.cancel()
    } else {
        session.clone()
    };
}

/// Handle to a running simulation.
#[derive(Debug)]
pub struct ProgressHandle<T> {
    cancel: CancelHandle,
    session: Arc<Mutex<ProgressSession>>,
    task: JoinHandle<Option<T>>,
}

impl<T> ProgressHandle<T> {
    /// Stop the timer. Idempotent; completion never fires afterwards.
    pub fn cancel(&self) {
        self.cancel.abort();
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        *session = session.cancel();
    }

    /// Snapshot of the timer state.
    pub fn session(&self) -> ProgressSession {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Whether the run has ended (completed or canceled).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run. `None` when canceled.
    pub async fn wait(self) -> Option<T> {
        self.task.await.ok().flatten()
    }
}

/// Timer-driven phase emitter.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSimulator {
    interval: Duration,
}

impl ProgressSimulator {
    /// Simulator ticking once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `phases` while `job` executes.
    ///
    /// Phase `i` (1-based) reports `phases[i - 1]` with
    /// `round(i / phases.len() * 100)`. The first phase is shown one
    /// interval after the call.
    pub fn run<P, F, T, C>(
        &self,
        phases: Vec<String>,
        mut on_phase: P,
        job: F,
        on_complete: C,
    ) -> ProgressHandle<T>
    where
        P: FnMut(&str, u8) + Send + 'static,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(&T) + Send + 'static,
    {
        let cancel = CancelHandle::new();
        let interval = self.interval;
        let total = u32::try_from(phases.len()).unwrap_or(u32::MAX);
        let token = cancel.clone();
        let shared = Arc::new(Mutex::new(ProgressSession::new(total)));
        let slot = Arc::clone(&shared);

        let task = tokio::spawn(async move {
            let mut session = ProgressSession::new(total);
            let stop = |session: &ProgressSession| {
                let session = session.cancel();
                debug!(phase = session.phase_index(), "progress run canceled");
                publish(&slot, &session);
            };
            let mut job = Box::pin(job);
            let mut output: Option<T> = None;
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while !session.is_finished() {
                tokio::select! {
                    biased;
                    _ = token.canceled() => {
                        stop(&session);
                        return None;
                    }
                    _ = ticker.tick() => {
                        if token.is_canceled() {
                            stop(&session);
                            return None;
                        }
                        let status = phases
                            .get(session.phase_index() as usize)
                            .cloned()
                            .unwrap_or_default();
                        session = session.advance(status);
                        publish(&slot, &session);
                        debug!(
                            phase = session.phase_index(),
                            progress = session.progress(),
                            "progress phase"
                        );
                        on_phase(session.status_text(), session.progress());
                    }
                    out = &mut job, if output.is_none() => {
                        output = Some(out);
                    }
                }
            }

            let output = match output {
                Some(out) => out,
                None => tokio::select! {
                    biased;
                    _ = token.canceled() => {
                        stop(&session);
                        return None;
                    }
                    out = &mut job => out,
                },
            };
            if token.is_canceled() {
                stop(&session);
                return None;
            }
            on_complete(&output);
            Some(output)
        });

        ProgressHandle {
            cancel,
            session: shared,
            task,
        }
    }
}
