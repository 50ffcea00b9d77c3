//! Capability seams for recognition and voice-activity detection.
//!
//! Both capabilities are consumed as opaque, synchronous, CPU-bound calls.
//! The recognizer is shared across sessions and dispatched through the
//! [`dispatcher::InferenceDispatcher`]; detectors are cheap per-session
//! instances produced by a [`VoiceDetectorFactory`].

pub mod dispatcher;
pub mod energy_vad;

use crate::error::RecognizeError;

/// A transcription of an audio span.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
}

/// Speech recognition capability: given samples, produce text.
///
/// Calls may block for non-trivial wall-clock time; the dispatcher runs them
/// off the ingestion path. Implementations must be safe to call from
/// multiple sessions concurrently up to the dispatcher's worker bound.
pub trait SpeechRecognizer: Send + Sync {
    fn recognize(&self, samples: &[f32]) -> Result<Transcription, RecognizeError>;

    /// Reported in the `status` message on connect.
    fn model_loaded(&self) -> bool {
        true
    }
}

/// Voice-activity capability: classify one fixed-size window.
pub trait VoiceDetector: Send {
    /// `true` when the window contains speech.
    fn update(&mut self, window: &[f32]) -> bool;
}

/// Produces an independent detector per session, so sessions never share
/// detector state.
pub trait VoiceDetectorFactory: Send + Sync {
    fn create(&self) -> Box<dyn VoiceDetector>;
}

/// Placeholder recognizer used until a real model backend is wired in.
/// Returns empty transcripts and reports the model as not loaded.
pub struct StubRecognizer;

impl SpeechRecognizer for StubRecognizer {
    fn recognize(&self, _samples: &[f32]) -> Result<Transcription, RecognizeError> {
        Ok(Transcription {
            text: String::new(),
            confidence: 0.0,
        })
    }

    fn model_loaded(&self) -> bool {
        false
    }
}
