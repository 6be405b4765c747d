//! Configuration shared by the coordinator, the recorder, and the binary.
//!
//! A `PipelineConfig` is loaded from an optional JSON file and then overridden
//! by command-line flags; stages read it without re-parsing anything.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use pose_core::ModelConfig;
use serde::{Deserialize, Serialize};
use video_ingest::{FrameFormat, FrameSize};

use crate::error::PipelineError;

/// Portrait output used by the recorder unless configured otherwise.
pub const DEFAULT_OUTPUT_SIZE: FrameSize = FrameSize::new(540, 960);

/// Poses scoring at or below this are not published.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.2;

/// Fraction of each frame edge a pose must stay clear of to count as in frame.
pub const DEFAULT_FRAME_MARGIN: f32 = 0.15;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frame size fed to the recorder; frames of any other size are dropped.
    pub output_size: FrameSize,
    /// Directory that receives recorded videos.
    pub output_dir: PathBuf,
    /// Container extension, e.g. `mov`.
    pub container: String,
    /// Pixel layout of frames handed to the recorder.
    pub pixel_format: FrameFormat,
    /// Encoder passed to ffmpeg.
    pub codec: String,
    /// Exclusive lower bound on the overall pose score.
    pub confidence_threshold: f32,
    /// Frames buffered ahead of the video writer before drops begin.
    pub writer_queue_depth: usize,
    /// How long the writer may report not-ready before the pending frame is
    /// dropped.
    pub writer_ready_timeout_ms: u64,
    /// Edge margin for [`Person::within_margin`](pose_core::Person::within_margin).
    pub frame_margin: f32,
    pub model: ModelConfig,
    pub telemetry: TelemetryOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_size: DEFAULT_OUTPUT_SIZE,
            output_dir: PathBuf::from("recordings"),
            container: "mov".into(),
            pixel_format: FrameFormat::Bgr8,
            codec: "libx264".into(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            writer_queue_depth: 8,
            writer_ready_timeout_ms: 2000,
            frame_margin: DEFAULT_FRAME_MARGIN,
            model: ModelConfig::default(),
            telemetry: TelemetryOptions::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Optional telemetry knobs for tracing output.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl PipelineConfig {
    /// Read a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let FrameSize { width, height } = self.output_size;
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "output size {} must be non-empty",
                self.output_size
            )));
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "output size {} must have even dimensions",
                self.output_size
            )));
        }
        if self.container.is_empty() || !self.container.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(PipelineError::InvalidConfig(format!(
                "container {:?} is not a file extension",
                self.container
            )));
        }
        if !(0.0..1.0).contains(&self.confidence_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "confidence threshold {} must be in [0, 1)",
                self.confidence_threshold
            )));
        }
        if self.writer_queue_depth == 0 {
            return Err(PipelineError::InvalidConfig(
                "writer queue depth must be at least 1".into(),
            ));
        }
        if !(0.0..0.5).contains(&self.frame_margin) {
            return Err(PipelineError::InvalidConfig(format!(
                "frame margin {} must be in [0, 0.5)",
                self.frame_margin
            )));
        }
        self.model.validate().map_err(PipelineError::InvalidConfig)
    }

    pub fn writer_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.writer_ready_timeout_ms)
    }
}
