//! RMS-energy voice detector, the default `VoiceDetector` implementation.

use super::{VoiceDetector, VoiceDetectorFactory};

/// Classifies a window as speech when its RMS energy exceeds a fixed
/// threshold. Hysteresis and minimum durations are the segmenter's job, so
/// this stays a pure per-window classifier.
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    fn rms(window: &[f32]) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = window.iter().map(|s| s * s).sum();
        (sum_squares / window.len() as f32).sqrt()
    }
}

impl VoiceDetector for EnergyVad {
    fn update(&mut self, window: &[f32]) -> bool {
        Self::rms(window) > self.threshold
    }
}

pub struct EnergyVadFactory {
    threshold: f32,
}

impl EnergyVadFactory {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl VoiceDetectorFactory for EnergyVadFactory {
    fn create(&self) -> Box<dyn VoiceDetector> {
        Box::new(EnergyVad::new(self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_signal() {
        let energy = EnergyVad::rms(&[0.5, -0.5, 0.5, -0.5]);
        assert!((energy - 0.5).abs() < 1e-6);
        assert_eq!(EnergyVad::rms(&[]), 0.0);
    }

    #[test]
    fn classifies_against_threshold() {
        let mut vad = EnergyVad::new(0.02);
        assert!(!vad.update(&[0.001; 512]));
        assert!(vad.update(&[0.3; 512]));
    }
}
