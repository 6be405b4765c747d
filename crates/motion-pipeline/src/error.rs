use std::{io, sync::Arc};

use thiserror::Error;
use video_ingest::FrameSize;

/// Failures of a single recording session or one of its appends.
#[derive(Clone, Debug, Error)]
pub enum RecordError {
    #[error("video writer is not ready for more data")]
    NotReady,
    #[error("frame is {actual}, recording expects {expected}")]
    FrameSizeMismatch { expected: FrameSize, actual: FrameSize },
    #[error("frame index {got} out of order, expected {expected}")]
    NonMonotonic { expected: u64, got: u64 },
    #[error("video writer I/O failed: {0}")]
    Io(Arc<io::Error>),
    #[error("video writer exited: {0}")]
    WriterExited(String),
}

impl From<io::Error> for RecordError {
    fn from(err: io::Error) -> Self {
        RecordError::Io(Arc::new(err))
    }
}

/// Session-level failures reported to callers of the coordinator.
#[derive(Clone, Debug, Error)]
pub enum PipelineError {
    #[error("failed to open video writer")]
    WriterInitFailed(#[source] RecordError),
    #[error("recording failed")]
    WriterFailed(#[source] RecordError),
    #[error("previous recording is still finishing")]
    RecordingBusy,
    #[error("{0} worker is unavailable")]
    WorkerUnavailable(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
