//! Bounded, per-session-serialized access to the recognition capability.
//!
//! Invariants enforced here:
//! - at most one inference call in flight per session;
//! - a global cap on concurrently executing calls across all sessions
//!   (each session holds at most one semaphore waiter, so the semaphore's
//!   FIFO wakeup is fair across sessions);
//! - queued partial triggers coalesce to the latest and are dropped when a
//!   final supersedes them; finals are never dropped, only queued;
//! - submission never blocks the caller; outcomes return asynchronously on
//!   the session's reply channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;

use super::{SpeechRecognizer, Transcription};
use crate::error::RecognizeError;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Partial,
    Final,
}

/// One inference job: an owned copy of the audio span to recognize.
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub kind: JobKind,
    pub samples: Vec<f32>,
    /// Set for finals only; strictly increasing per session.
    pub segment_id: Option<u64>,
}

/// Result of a completed job, delivered on the session's reply channel.
#[derive(Debug)]
pub struct JobOutcome {
    pub kind: JobKind,
    pub segment_id: Option<u64>,
    pub result: Result<Transcription, RecognizeError>,
}

struct QueuedJob {
    request: RecognitionRequest,
    reply: UnboundedSender<JobOutcome>,
}

#[derive(Default)]
struct SessionSlot {
    in_flight: bool,
    queued_partial: Option<QueuedJob>,
    queued_finals: VecDeque<QueuedJob>,
}

impl SessionSlot {
    fn pending(&self) -> usize {
        self.in_flight as usize + self.queued_partial.is_some() as usize + self.queued_finals.len()
    }
}

pub struct InferenceDispatcher {
    recognizer: Arc<dyn SpeechRecognizer>,
    permits: Arc<Semaphore>,
    slots: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl InferenceDispatcher {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, max_workers: usize) -> Arc<Self> {
        Arc::new(Self {
            recognizer,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Enqueue a job for `session`. Never blocks; the outcome arrives on
    /// `reply`. Must only be called from the session's own task, so a
    /// submission cannot race that session's teardown.
    pub fn submit(
        self: &Arc<Self>,
        session: SessionId,
        request: RecognitionRequest,
        reply: UnboundedSender<JobOutcome>,
    ) {
        let job = QueuedJob { request, reply };
        let launch_now = {
            let mut slots = self.slots.lock().unwrap();
            let slot = slots.entry(session).or_default();
            if slot.in_flight {
                match job.request.kind {
                    JobKind::Partial => {
                        if slot.queued_partial.replace(job).is_some() {
                            debug!("session {}: coalesced queued partial", session);
                        }
                    }
                    JobKind::Final => {
                        if slot.queued_partial.take().is_some() {
                            debug!("session {}: dropped partial superseded by final", session);
                        }
                        slot.queued_finals.push_back(job);
                    }
                }
                None
            } else {
                slot.in_flight = true;
                Some(job)
            }
        };

        if let Some(job) = launch_now {
            self.launch(session, job);
        }
    }

    /// Drop queued jobs and forget the session. An executing job finishes
    /// but finds the slot gone and its reply receiver dropped, so its result
    /// goes nowhere.
    pub fn remove_session(&self, session: SessionId) {
        self.slots.lock().unwrap().remove(&session);
    }

    /// Queued plus in-flight jobs for a session. Used to drain before close.
    pub fn pending(&self, session: SessionId) -> usize {
        self.slots
            .lock()
            .unwrap()
            .get(&session)
            .map_or(0, SessionSlot::pending)
    }

    fn launch(self: &Arc<Self>, session: SessionId, job: QueuedJob) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let permit = match this.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            // The session may have closed while this job waited for a
            // permit; don't burn a worker on a result nobody will read.
            if !this.slots.lock().unwrap().contains_key(&session) {
                return;
            }

            let recognizer = Arc::clone(&this.recognizer);
            let QueuedJob { request, reply } = job;
            let RecognitionRequest {
                kind,
                samples,
                segment_id,
            } = request;

            let result =
                match tokio::task::spawn_blocking(move || recognizer.recognize(&samples)).await {
                    Ok(result) => result,
                    Err(join_err) => {
                        Err(RecognizeError(format!("inference task failed: {join_err}")))
                    }
                };
            drop(permit);

            // Receiver gone means the session is being torn down.
            let _ = reply.send(JobOutcome {
                kind,
                segment_id,
                result,
            });

            let next = {
                let mut slots = this.slots.lock().unwrap();
                match slots.get_mut(&session) {
                    // Session removed while we were executing.
                    None => None,
                    Some(slot) => {
                        let next = slot
                            .queued_finals
                            .pop_front()
                            .or_else(|| slot.queued_partial.take());
                        if next.is_none() {
                            slot.in_flight = false;
                        }
                        next
                    }
                }
            };
            if let Some(job) = next {
                this.launch(session, job);
            }
        });
    }
}
