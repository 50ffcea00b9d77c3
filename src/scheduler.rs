//! Dual-trigger recognition policy.
//!
//! Partials fire on a fixed cadence while speech is active; finals fire on
//! endpoints with a strictly increasing per-session segment id. Every
//! decision takes `now` as a parameter so the cadence is testable without
//! real-time delays; the socket loop owns the only real ticker.

use std::time::{Duration, Instant};

pub struct RecognitionScheduler {
    partial_interval: Duration,
    /// Set while speech is active; cleared on endpoint.
    last_partial_at: Option<Instant>,
    segment_counter: u64,
}

impl RecognitionScheduler {
    pub fn new(partial_interval: Duration) -> Self {
        Self {
            partial_interval,
            last_partial_at: None,
            segment_counter: 0,
        }
    }

    /// Speech began: the first partial becomes due one interval from `now`.
    pub fn on_speech_start(&mut self, now: Instant) {
        self.last_partial_at = Some(now);
    }

    /// Whether a partial trigger is due. Only meaningful while the caller's
    /// VAD state is Speaking; outside speech no timer is armed.
    pub fn partial_due(&self, now: Instant) -> bool {
        match self.last_partial_at {
            Some(at) => now.duration_since(at) >= self.partial_interval,
            None => false,
        }
    }

    pub fn mark_partial(&mut self, now: Instant) {
        self.last_partial_at = Some(now);
    }

    /// Endpoint reached: disarm the partial timer and hand out the next
    /// segment id (1, 2, 3, ... per session, never reused).
    pub fn on_endpoint(&mut self) -> u64 {
        self.last_partial_at = None;
        self.segment_counter += 1;
        self.segment_counter
    }

    pub fn segments_finalized(&self) -> u64 {
        self.segment_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_cadence() {
        let mut sched = RecognitionScheduler::new(Duration::from_millis(200));
        let base = Instant::now();

        assert!(!sched.partial_due(base));

        sched.on_speech_start(base);
        assert!(!sched.partial_due(base + Duration::from_millis(150)));
        assert!(sched.partial_due(base + Duration::from_millis(200)));

        sched.mark_partial(base + Duration::from_millis(200));
        assert!(!sched.partial_due(base + Duration::from_millis(350)));
        assert!(sched.partial_due(base + Duration::from_millis(420)));
    }

    #[test]
    fn endpoint_disarms_timer_and_counts_segments() {
        let mut sched = RecognitionScheduler::new(Duration::from_millis(200));
        let base = Instant::now();

        sched.on_speech_start(base);
        assert_eq!(sched.on_endpoint(), 1);
        assert!(!sched.partial_due(base + Duration::from_secs(10)));

        sched.on_speech_start(base + Duration::from_secs(1));
        assert_eq!(sched.on_endpoint(), 2);
        assert_eq!(sched.on_endpoint(), 3);
        assert_eq!(sched.segments_finalized(), 3);
    }
}
