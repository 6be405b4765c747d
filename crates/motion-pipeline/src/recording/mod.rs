//! Video recording: per-session pacing and the writer abstraction.
//!
//! A [`RecordingSession`] owns one open [`VideoWriter`] and turns the frame
//! index chosen by the coordinator into a presentation timestamp. Indices must
//! arrive in order without gaps, so the recorded timeline is exactly
//! `index / frame_rate` regardless of capture jitter.

mod ffmpeg;
mod path;
mod worker;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use video_ingest::{Frame, FrameFormat, FrameSize};

use crate::error::RecordError;

pub use ffmpeg::{FfmpegWriter, FfmpegWriterFactory};
pub use path::{allocate_output_path, output_path};
pub(crate) use worker::{WriteJob, WriterSignals, spawn_writer_worker};

/// Timestamp of the `index`-th frame of a session recorded at `frame_rate`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PresentationTime {
    pub index: u64,
    pub frame_rate: f64,
}

impl PresentationTime {
    pub fn new(index: u64, frame_rate: f64) -> Self {
        Self { index, frame_rate }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.index as f64 / self.frame_rate
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs_f64(self.as_secs_f64())
    }
}

/// What a writer needs to open its output.
#[derive(Clone, Debug, PartialEq)]
pub struct WriterSettings {
    pub path: PathBuf,
    pub frame_size: FrameSize,
    pub frame_rate: f64,
    pub input_format: FrameFormat,
}

/// Encoder sink for one output file.
pub trait VideoWriter: Send {
    /// Whether the writer can take another frame right now.
    fn is_ready(&mut self) -> bool;

    fn append(&mut self, frame: &Frame, pts: PresentationTime) -> Result<(), RecordError>;

    /// Flush and close the output. Blocks until the file is complete.
    fn finish(self: Box<Self>) -> Result<(), RecordError>;

    fn path(&self) -> &Path;
}

/// Opens a fresh [`VideoWriter`] for each recording session.
pub trait WriterFactory: Send + Sync {
    fn open(&self, settings: &WriterSettings) -> Result<Box<dyn VideoWriter>, RecordError>;
}

/// A closed video file produced by one session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub frame_count: u64,
    pub frame_rate: f64,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

/// Writer state and frame-pacing counter for one recording.
pub struct RecordingSession {
    writer: Box<dyn VideoWriter>,
    frame_rate: f64,
    frame_size: FrameSize,
    started_at: DateTime<Utc>,
    next_index: u64,
}

impl RecordingSession {
    pub fn open(
        writer: Box<dyn VideoWriter>,
        frame_rate: f64,
        frame_size: FrameSize,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            writer,
            frame_rate,
            frame_size,
            started_at,
            next_index: 0,
        }
    }

    /// Append the frame the coordinator numbered `frame_index`.
    ///
    /// The index must be the next one expected; a writer that cannot take data
    /// yields [`RecordError::NotReady`] and the index is not consumed.
    pub fn append(
        &mut self,
        frame: &Frame,
        frame_index: u64,
    ) -> Result<PresentationTime, RecordError> {
        if frame_index != self.next_index {
            return Err(RecordError::NonMonotonic {
                expected: self.next_index,
                got: frame_index,
            });
        }
        if frame.size() != self.frame_size {
            return Err(RecordError::FrameSizeMismatch {
                expected: self.frame_size,
                actual: frame.size(),
            });
        }
        if !self.writer.is_ready() {
            return Err(RecordError::NotReady);
        }

        let pts = PresentationTime::new(frame_index, self.frame_rate);
        self.writer.append(frame, pts)?;
        self.next_index += 1;
        Ok(pts)
    }

    pub fn frames_written(&self) -> u64 {
        self.next_index
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Close the writer and describe the finished file.
    pub fn finish(self) -> Result<OutputArtifact, RecordError> {
        let path = self.writer.path().to_path_buf();
        self.writer.finish()?;
        Ok(OutputArtifact {
            path,
            frame_count: self.next_index,
            frame_rate: self.frame_rate,
            duration: PresentationTime::new(self.next_index, self.frame_rate).as_duration(),
            started_at: self.started_at,
        })
    }
}
