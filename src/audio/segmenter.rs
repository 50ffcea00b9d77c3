//! Voice-activity segmentation over fixed-size windows.
//!
//! Windows are cut from the session buffer in strict arrival order and each
//! is classified exactly once, so segmentation depends only on the total
//! samples received, never on how the transport chunked them. Sub-window
//! remainders stay in the buffer until enough samples arrive.

use log::debug;

use crate::audio::buffer::AudioRingBuffer;
use crate::config::AudioConfig;
use crate::engine::VoiceDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Idle,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointReason {
    /// Trailing silence reached the minimum silence duration.
    Silence,
    /// Continuous speech hit the maximum segment duration.
    MaxDuration,
    /// End of stream flushed a segment still in progress.
    Flush,
}

/// Events produced while consuming windows, in chronological order.
/// Endpoint ranges are buffer positions valid until the next buffer reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    SpeechStart,
    Endpoint {
        start: usize,
        end: usize,
        reason: EndpointReason,
    },
}

pub struct VoiceActivitySegmenter {
    window_size: usize,
    min_speech_samples: usize,
    min_silence_samples: usize,
    max_speech_samples: usize,
    state: VadState,
    /// Buffer position where the current segment began.
    segment_start: usize,
    /// Total samples elapsed since the segment began. Unlike buffer
    /// positions this is never rebased, so the max-duration cutoff still
    /// fires when the buffer cap is smaller than the cutoff.
    segment_samples: usize,
    /// Samples classified as speech since the segment began.
    speech_samples: usize,
    /// Trailing run of silence samples.
    silence_run: usize,
}

impl VoiceActivitySegmenter {
    pub fn new(cfg: &AudioConfig) -> Self {
        Self {
            window_size: cfg.window_size,
            min_speech_samples: cfg.min_speech_samples(),
            min_silence_samples: cfg.min_silence_samples(),
            max_speech_samples: cfg.max_speech_samples(),
            state: VadState::Idle,
            segment_start: 0,
            segment_samples: 0,
            speech_samples: 0,
            silence_run: 0,
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speaking
    }

    /// Start of the in-progress segment; meaningful only while speaking.
    pub fn segment_start(&self) -> usize {
        self.segment_start
    }

    /// Shift retained positions down after the buffer dropped or reset
    /// `removed` samples from the front.
    pub fn rebase(&mut self, removed: usize) {
        self.segment_start = self.segment_start.saturating_sub(removed);
    }

    /// Consume every complete window currently buffered and advance the
    /// state machine. Returned endpoint ranges refer to buffer positions as
    /// of this call; the caller copies spans before resetting the buffer.
    pub fn process(
        &mut self,
        buffer: &mut AudioRingBuffer,
        vad: &mut dyn VoiceDetector,
    ) -> Vec<SegmentEvent> {
        let mut events = Vec::new();

        while let Some(window) = buffer.consume_window(self.window_size) {
            let is_speech = vad.update(&window);
            let pos = buffer.consume_offset();

            match self.state {
                VadState::Idle => {
                    if is_speech {
                        self.state = VadState::Speaking;
                        self.segment_start = pos - self.window_size;
                        self.segment_samples = self.window_size;
                        self.speech_samples = self.window_size;
                        self.silence_run = 0;
                        events.push(SegmentEvent::SpeechStart);
                    }
                }
                VadState::Speaking => {
                    self.segment_samples += self.window_size;
                    if is_speech {
                        self.speech_samples += self.window_size;
                        self.silence_run = 0;
                    } else {
                        self.silence_run += self.window_size;
                    }

                    if self.silence_run >= self.min_silence_samples {
                        if self.speech_samples >= self.min_speech_samples {
                            // Eviction can leave the silence run longer than
                            // the retained history; clamp rather than panic.
                            events.push(SegmentEvent::Endpoint {
                                start: self.segment_start,
                                end: pos.saturating_sub(self.silence_run),
                                reason: EndpointReason::Silence,
                            });
                        } else {
                            // Too short to be speech: noise, no endpoint.
                            debug!(
                                "discarding {}-sample burst below min speech duration",
                                self.speech_samples
                            );
                        }
                        self.enter_idle();
                    } else if self.segment_samples >= self.max_speech_samples {
                        events.push(SegmentEvent::Endpoint {
                            start: self.segment_start,
                            end: pos,
                            reason: EndpointReason::MaxDuration,
                        });
                        self.enter_idle();
                    }
                }
            }
        }

        events
    }

    /// Forced endpoint for end-of-stream. Emits only if the in-progress
    /// segment already met the minimum speech duration.
    pub fn flush(&mut self, buffer: &AudioRingBuffer) -> Option<SegmentEvent> {
        if self.state != VadState::Speaking {
            return None;
        }
        let emit = self.speech_samples >= self.min_speech_samples;
        let start = self.segment_start;
        let end = buffer.len();
        self.enter_idle();
        if emit {
            Some(SegmentEvent::Endpoint {
                start,
                end,
                reason: EndpointReason::Flush,
            })
        } else {
            None
        }
    }

    fn enter_idle(&mut self) {
        self.state = VadState::Idle;
        self.segment_start = 0;
        self.segment_samples = 0;
        self.speech_samples = 0;
        self.silence_run = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Detector scripted by sample position: windows whose start falls in a
    /// speech range are classified as speech.
    struct ScriptedDetector {
        speech_ranges: Vec<(usize, usize)>,
        pos: usize,
    }

    impl ScriptedDetector {
        fn new(speech_ranges: Vec<(usize, usize)>) -> Self {
            Self {
                speech_ranges,
                pos: 0,
            }
        }
    }

    impl VoiceDetector for ScriptedDetector {
        fn update(&mut self, window: &[f32]) -> bool {
            let start = self.pos;
            self.pos += window.len();
            self.speech_ranges
                .iter()
                .any(|&(lo, hi)| start >= lo && start < hi)
        }
    }

    fn test_config() -> AudioConfig {
        AudioConfig {
            sample_rate: 1000,
            window_size: 10,
            max_buffer_secs: 100.0,
            min_speech_ms: 30,
            min_silence_ms: 50,
            max_speech_secs: 1.0,
            ..AudioConfig::default()
        }
    }

    fn run(
        cfg: &AudioConfig,
        detector: &mut ScriptedDetector,
        chunks: &[&[f32]],
    ) -> Vec<SegmentEvent> {
        let mut buffer = AudioRingBuffer::new(cfg.max_buffer_samples());
        let mut seg = VoiceActivitySegmenter::new(cfg);
        let mut events = Vec::new();
        for chunk in chunks {
            buffer.append(chunk);
            events.extend(seg.process(&mut buffer, detector));
        }
        events
    }

    #[test]
    fn silence_only_produces_no_events() {
        let cfg = test_config();
        let mut det = ScriptedDetector::new(vec![]);
        let audio = vec![0.0f32; 500];
        let events = run(&cfg, &mut det, &[&audio]);
        assert!(events.is_empty());
    }

    #[test]
    fn speech_then_silence_endpoints_once() {
        let cfg = test_config();
        // 100 samples of speech, then silence.
        let mut det = ScriptedDetector::new(vec![(0, 100)]);
        let audio = vec![0.0f32; 300];
        let events = run(&cfg, &mut det, &[&audio]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SegmentEvent::SpeechStart);
        assert_eq!(
            events[1],
            SegmentEvent::Endpoint {
                start: 0,
                end: 100,
                reason: EndpointReason::Silence,
            }
        );
    }

    #[test]
    fn short_burst_is_rejected_as_noise() {
        let cfg = test_config();
        // One 10-sample window of speech, below the 30-sample minimum.
        let mut det = ScriptedDetector::new(vec![(0, 10)]);
        let audio = vec![0.0f32; 200];
        let events = run(&cfg, &mut det, &[&audio]);

        assert_eq!(events, vec![SegmentEvent::SpeechStart]);
    }

    #[test]
    fn chunking_does_not_change_events() {
        let cfg = test_config();
        let audio = vec![0.0f32; 400];

        let mut det = ScriptedDetector::new(vec![(50, 160)]);
        let whole = run(&cfg, &mut det, &[&audio]);

        let mut det = ScriptedDetector::new(vec![(50, 160)]);
        let split: Vec<&[f32]> = audio.chunks(7).collect();
        let pieces = run(&cfg, &mut det, &split);

        assert_eq!(whole, pieces);
        assert!(whole
            .iter()
            .any(|e| matches!(e, SegmentEvent::Endpoint { .. })));
    }

    #[test]
    fn partial_window_is_held_not_dropped() {
        let cfg = test_config();
        let mut buffer = AudioRingBuffer::new(cfg.max_buffer_samples());
        let mut seg = VoiceActivitySegmenter::new(&cfg);
        let mut det = ScriptedDetector::new(vec![(0, 100)]);

        buffer.append(&[0.0; 6]);
        assert!(seg.process(&mut buffer, &mut det).is_empty());
        assert_eq!(buffer.consume_offset(), 0);

        buffer.append(&[0.0; 4]);
        let events = seg.process(&mut buffer, &mut det);
        assert_eq!(events, vec![SegmentEvent::SpeechStart]);
        assert_eq!(buffer.consume_offset(), 10);
    }

    #[test]
    fn continuous_speech_hits_max_duration_cutoff() {
        let cfg = test_config();
        // Speech never stops; max segment is 1000 samples.
        let mut det = ScriptedDetector::new(vec![(0, usize::MAX)]);
        let audio = vec![0.0f32; 2500];
        let events = run(&cfg, &mut det, &[&audio]);

        let endpoints: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SegmentEvent::Endpoint { .. }))
            .collect();
        assert_eq!(endpoints.len(), 2);
        assert!(matches!(
            endpoints[0],
            SegmentEvent::Endpoint {
                reason: EndpointReason::MaxDuration,
                ..
            }
        ));
    }

    /// Feed in chunks the way the session does: rebase positions whenever
    /// the buffer evicts from the front.
    fn run_with_eviction(
        cfg: &AudioConfig,
        detector: &mut ScriptedDetector,
        total: usize,
    ) -> Vec<SegmentEvent> {
        let mut buffer = AudioRingBuffer::new(cfg.max_buffer_samples());
        let mut seg = VoiceActivitySegmenter::new(cfg);
        let mut events = Vec::new();
        for _ in 0..total / 10 {
            let evicted = buffer.append(&[0.0; 10]);
            if evicted > 0 {
                seg.rebase(evicted);
            }
            events.extend(seg.process(&mut buffer, detector));
        }
        events
    }

    #[test]
    fn max_duration_cutoff_fires_with_buffer_smaller_than_cutoff() {
        // 500-sample buffer, 2000-sample cutoff: positions alone can never
        // span the cutoff, only the elapsed-sample count can.
        let cfg = AudioConfig {
            sample_rate: 1000,
            window_size: 10,
            max_buffer_secs: 0.5,
            min_speech_ms: 30,
            min_silence_ms: 50,
            max_speech_secs: 2.0,
            ..AudioConfig::default()
        };
        let mut det = ScriptedDetector::new(vec![(0, usize::MAX)]);
        let events = run_with_eviction(&cfg, &mut det, 5000);

        let cutoffs = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    SegmentEvent::Endpoint {
                        reason: EndpointReason::MaxDuration,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(cutoffs, 2);
    }

    #[test]
    fn silence_endpoint_survives_heavy_eviction() {
        // Buffer cap below the silence threshold: by the time the run
        // completes, eviction has pushed positions under the run length.
        let cfg = AudioConfig {
            sample_rate: 1000,
            window_size: 10,
            max_buffer_secs: 0.04,
            min_speech_ms: 30,
            min_silence_ms: 50,
            max_speech_secs: 100.0,
            ..AudioConfig::default()
        };
        let mut det = ScriptedDetector::new(vec![(0, 30)]);
        let events = run_with_eviction(&cfg, &mut det, 200);

        assert_eq!(
            events,
            vec![
                SegmentEvent::SpeechStart,
                SegmentEvent::Endpoint {
                    start: 0,
                    end: 0,
                    reason: EndpointReason::Silence,
                },
            ]
        );
    }

    #[test]
    fn flush_emits_only_after_min_speech() {
        let cfg = test_config();
        let mut buffer = AudioRingBuffer::new(cfg.max_buffer_samples());
        let mut seg = VoiceActivitySegmenter::new(&cfg);
        let mut det = ScriptedDetector::new(vec![(0, usize::MAX)]);

        buffer.append(&[0.0; 10]);
        seg.process(&mut buffer, &mut det);
        assert!(seg.is_speaking());
        // Only one speech window so far, below minimum: flush discards.
        assert!(seg.flush(&buffer).is_none());
        assert!(!seg.is_speaking());

        let mut buffer = AudioRingBuffer::new(cfg.max_buffer_samples());
        let mut seg = VoiceActivitySegmenter::new(&cfg);
        let mut det = ScriptedDetector::new(vec![(0, usize::MAX)]);
        buffer.append(&[0.0; 50]);
        seg.process(&mut buffer, &mut det);
        assert_eq!(
            seg.flush(&buffer),
            Some(SegmentEvent::Endpoint {
                start: 0,
                end: 50,
                reason: EndpointReason::Flush,
            })
        );
    }
}
