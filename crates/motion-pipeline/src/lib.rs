//! Frame pipeline coordination for pose estimation and video recording.
//!
//! [`PipelineCoordinator`] receives every captured frame, hands it to the
//! active [`recording`] session and, when no inference is running, to the
//! pose estimator. Completed poses are transformed into display space and
//! delivered to a [`PoseConsumer`].

pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod gate;
mod inference;
pub mod recording;
pub mod telemetry;

pub use config::{PipelineConfig, TelemetryOptions};
pub use consumer::{PoseConsumer, PoseUpdate};
pub use coordinator::{
    FinishHandle, FinishResult, PipelineCoordinator, PipelineStats, RecordingState,
    RecordingStatus, SourceInfo,
};
pub use error::{PipelineError, RecordError};
pub use recording::{
    FfmpegWriterFactory, OutputArtifact, PresentationTime, RecordingSession, VideoWriter,
    WriterFactory, WriterSettings,
};
