//! Per-connection streaming pipeline.
//!
//! `SessionEngine` is the synchronous core behind one connection: append
//! inbound samples, cut VAD windows, advance the segmentation state machine,
//! and decide which recognition jobs to submit. It never blocks and never
//! talks to the transport, so the whole pipeline is testable in isolation.

use std::time::Instant;

use log::{debug, info};

use crate::audio::{AudioRingBuffer, SegmentEvent, VoiceActivitySegmenter};
use crate::config::AudioConfig;
use crate::engine::dispatcher::{JobKind, RecognitionRequest};
use crate::engine::VoiceDetector;
use crate::scheduler::RecognitionScheduler;

/// Opaque session identifier handed out by the registry.
pub type SessionId = u64;

pub struct SessionEngine {
    buffer: AudioRingBuffer,
    segmenter: VoiceActivitySegmenter,
    scheduler: RecognitionScheduler,
    vad: Box<dyn VoiceDetector>,
}

impl SessionEngine {
    pub fn new(cfg: &AudioConfig, vad: Box<dyn VoiceDetector>) -> Self {
        Self {
            buffer: AudioRingBuffer::new(cfg.max_buffer_samples()),
            segmenter: VoiceActivitySegmenter::new(cfg),
            scheduler: RecognitionScheduler::new(cfg.partial_interval()),
            vad,
        }
    }

    /// Ingest one audio chunk. Returns the jobs to submit, in order:
    /// finals for any segments that just endpointed, then at most one
    /// partial for the segment still in progress.
    pub fn on_audio(&mut self, samples: &[f32], now: Instant) -> Vec<RecognitionRequest> {
        let evicted = self.buffer.append(samples);
        if evicted > 0 {
            self.segmenter.rebase(evicted);
        }

        let events = self.segmenter.process(&mut self.buffer, self.vad.as_mut());

        let mut requests = Vec::new();
        let mut reset_at: Option<usize> = None;
        for event in events {
            match event {
                SegmentEvent::SpeechStart => {
                    debug!("speech started");
                    self.scheduler.on_speech_start(now);
                }
                SegmentEvent::Endpoint { start, end, reason } => {
                    // Copy the span before any reset invalidates positions.
                    let segment = self.buffer.span(start, end);
                    let segment_id = self.scheduler.on_endpoint();
                    info!(
                        "segment {} endpointed ({:?}, {} samples)",
                        segment_id,
                        reason,
                        segment.len()
                    );
                    requests.push(RecognitionRequest {
                        kind: JobKind::Final,
                        samples: segment,
                        segment_id: Some(segment_id),
                    });
                    reset_at = Some(reset_at.map_or(end, |at| at.max(end)));
                }
            }
        }

        if let Some(at) = reset_at {
            self.buffer.reset(at);
            self.segmenter.rebase(at);
        }

        if let Some(req) = self.maybe_partial(now) {
            requests.push(req);
        }
        requests
    }

    /// Timer tick: fires a partial when one is due mid-speech even if no
    /// audio arrived since the last check.
    pub fn on_tick(&mut self, now: Instant) -> Vec<RecognitionRequest> {
        self.maybe_partial(now).into_iter().collect()
    }

    /// End of stream: force an endpoint for a pending segment, if any.
    pub fn flush(&mut self) -> Option<RecognitionRequest> {
        let event = self.segmenter.flush(&self.buffer)?;
        let SegmentEvent::Endpoint { start, end, reason } = event else {
            return None;
        };
        let segment = self.buffer.span(start, end);
        let segment_id = self.scheduler.on_endpoint();
        info!(
            "segment {} flushed ({:?}, {} samples)",
            segment_id,
            reason,
            segment.len()
        );
        self.buffer.reset(end);
        self.segmenter.rebase(end);
        Some(RecognitionRequest {
            kind: JobKind::Final,
            samples: segment,
            segment_id: Some(segment_id),
        })
    }

    pub fn is_speaking(&self) -> bool {
        self.segmenter.is_speaking()
    }

    pub fn segments_finalized(&self) -> u64 {
        self.scheduler.segments_finalized()
    }

    /// Non-destructive partial over the in-progress segment up to the
    /// buffer head; leaves the consume offset untouched.
    fn maybe_partial(&mut self, now: Instant) -> Option<RecognitionRequest> {
        if !self.segmenter.is_speaking() || !self.scheduler.partial_due(now) {
            return None;
        }
        let span = self
            .buffer
            .span(self.segmenter.segment_start(), self.buffer.len());
        if span.is_empty() {
            return None;
        }
        self.scheduler.mark_partial(now);
        Some(RecognitionRequest {
            kind: JobKind::Partial,
            samples: span,
            segment_id: None,
        })
    }
}
