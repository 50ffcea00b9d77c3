pub mod buffer;
pub mod segmenter;

pub use buffer::AudioRingBuffer;
pub use segmenter::{EndpointReason, SegmentEvent, VadState, VoiceActivitySegmenter};
