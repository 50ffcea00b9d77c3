use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server-level limits and liveness tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum number of concurrent sessions; further connections are
    /// rejected at handshake with an explicit error.
    pub max_sessions: usize,
    /// Global bound on concurrently executing inference jobs.
    pub max_inference_workers: usize,
    /// Sessions with no inbound traffic for this long are closed.
    pub idle_timeout_secs: u64,
    /// Inactivity before a liveness ping is sent.
    pub ping_interval_secs: u64,
    /// Time allowed for the peer to answer a liveness ping.
    pub pong_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            max_sessions: 100,
            max_inference_workers: 4,
            idle_timeout_secs: 300,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

/// Audio pipeline tunables shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// VAD window size in samples.
    pub window_size: usize,
    /// Hard cap on buffered audio per session.
    pub max_buffer_secs: f32,
    /// Cadence of partial results while speech is active.
    pub partial_interval_ms: u64,
    /// Speech shorter than this is discarded as noise.
    pub min_speech_ms: u64,
    /// Silence that endpoints a segment.
    pub min_silence_ms: u64,
    /// Forced endpoint on continuous speech.
    pub max_speech_secs: f32,
    /// RMS energy threshold for the default detector.
    pub vad_threshold: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_size: 512,
            max_buffer_secs: 10.0,
            partial_interval_ms: 200,
            min_speech_ms: 300,
            min_silence_ms: 800,
            max_speech_secs: 15.0,
            vad_threshold: 0.02,
        }
    }
}

impl AudioConfig {
    pub fn max_buffer_samples(&self) -> usize {
        ((self.sample_rate as f32 * self.max_buffer_secs) as usize).max(1)
    }

    pub fn min_speech_samples(&self) -> usize {
        (self.sample_rate as u64 * self.min_speech_ms / 1000) as usize
    }

    pub fn min_silence_samples(&self) -> usize {
        (self.sample_rate as u64 * self.min_silence_ms / 1000) as usize
    }

    pub fn max_speech_samples(&self) -> usize {
        ((self.sample_rate as f32 * self.max_speech_secs) as usize).max(self.window_size)
    }

    pub fn partial_interval(&self) -> Duration {
        Duration::from_millis(self.partial_interval_ms)
    }
}
