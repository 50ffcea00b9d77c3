use thiserror::Error;

/// Failure of the recognition capability on a single job.
///
/// Scoped to that job: the session and its VAD state machine continue.
#[derive(Debug, Clone, Error)]
#[error("recognition failed: {0}")]
pub struct RecognizeError(pub String);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("server at capacity: {active} of {limit} sessions in use")]
    AtCapacity { active: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("binary frame length {0} is not a multiple of 4 bytes")]
    MisalignedFrame(usize),
    #[error("malformed control message: {0}")]
    BadControlMessage(String),
}

impl ProtocolError {
    pub fn code(&self) -> u16 {
        400
    }
}
