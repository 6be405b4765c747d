//! Command-line surface of `motion-camera`.
//!
//! Arguments are parsed with clap and folded into a [`RunConfig`] on top of
//! the optional JSON config file, so the pipeline never re-reads flags.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use motion_pipeline::PipelineConfig;
use pose_core::ModelType;
use video_ingest::{CameraFacing, FrameSize};

/// Capture resolution requested from devices when none is given.
pub const DEFAULT_CAPTURE_SIZE: FrameSize = FrameSize::new(1280, 720);

#[derive(Debug, Parser)]
#[command(
    name = "motion-camera",
    version,
    about = "Pose estimation and recording over a live camera feed"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pipeline against a camera, stream, or file.
    Run(RunArgs),
    /// List the capture formats a V4L2 device advertises.
    Formats(FormatsArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModelTypeArg {
    /// Single-frame 2D keypoints.
    #[value(name = "pose-2d")]
    Pose2D,
    /// Streaming 3D keypoints with depth.
    #[value(name = "pose-3d")]
    Pose3D,
}

impl From<ModelTypeArg> for ModelType {
    fn from(arg: ModelTypeArg) -> Self {
        match arg {
            ModelTypeArg::Pose2D => ModelType::Pose2D,
            ModelTypeArg::Pose3D => ModelType::Pose3D,
        }
    }
}

/// CLI arguments accepted by the `run` subcommand.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Camera index, `/dev/videoN`, RTSP URI, or video file.
    #[arg(long = "source", value_name = "URI", default_value = "/dev/video0")]
    pub source: String,
    /// JSON pipeline config; flags below override its fields.
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// TorchScript pose model.
    #[arg(long = "model", value_name = "PATH")]
    pub model: Option<PathBuf>,
    #[arg(long = "model-type", value_enum, value_name = "KIND")]
    pub model_type: Option<ModelTypeArg>,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Treat the source as a user-facing camera and mirror poses.
    #[arg(long = "front-facing", action = clap::ArgAction::SetTrue)]
    pub front_facing: bool,
    /// Output (recording and pose) width in pixels.
    #[arg(long = "width", value_name = "PX")]
    pub width: Option<u32>,
    /// Output (recording and pose) height in pixels.
    #[arg(long = "height", value_name = "PX")]
    pub height: Option<u32>,
    /// Capture width requested from a device.
    #[arg(long = "capture-width", value_name = "PX")]
    pub capture_width: Option<u32>,
    /// Capture height requested from a device.
    #[arg(long = "capture-height", value_name = "PX")]
    pub capture_height: Option<u32>,
    /// Minimum overall pose score (exclusive).
    #[arg(long = "threshold", value_name = "SCORE")]
    pub threshold: Option<f32>,
    /// Directory receiving recordings.
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
    /// Start recording this many seconds after launch.
    #[arg(long = "record-after", value_name = "SECS")]
    pub record_after: Option<f64>,
    /// Stop recording after this many seconds.
    #[arg(long = "record-for", value_name = "SECS")]
    pub record_for: Option<f64>,
    /// Print every published pose as a JSON line on stdout.
    #[arg(long = "emit-json", action = clap::ArgAction::SetTrue)]
    pub emit_json: bool,
    /// Enable debug logging unless `RUST_LOG` says otherwise.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

/// CLI arguments accepted by the `formats` subcommand.
#[derive(Debug, Args)]
pub struct FormatsArgs {
    /// Camera index or `/dev/videoN`.
    #[arg(long = "device", value_name = "DEVICE", default_value = "/dev/video0")]
    pub device: String,
    /// Also report the mode negotiated for this resolution, e.g. `1280x720`.
    #[arg(long = "select", value_name = "WxH", value_parser = parse_size)]
    pub select: Option<FrameSize>,
    /// Print the formats as JSON.
    #[arg(long = "json", action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

/// Everything the `run` subcommand needs, resolved and validated.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub source_uri: String,
    pub facing: CameraFacing,
    pub capture_size: FrameSize,
    pub pipeline: PipelineConfig,
    pub record_after: Option<Duration>,
    pub record_for: Option<Duration>,
    pub emit_json: bool,
}

impl TryFrom<RunArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: RunArgs) -> Result<Self> {
        let mut pipeline = match args.config.as_deref() {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        let width = args.width.unwrap_or(pipeline.output_size.width);
        let height = args.height.unwrap_or(pipeline.output_size.height);
        pipeline.output_size = FrameSize::new(width, height);
        if let Some(dir) = args.output_dir {
            pipeline.output_dir = dir;
        }
        if let Some(threshold) = args.threshold {
            pipeline.confidence_threshold = threshold;
        }
        if let Some(model) = args.model {
            pipeline.model.model_path = Some(model);
        }
        if let Some(kind) = args.model_type {
            pipeline.model.model_type = kind.into();
        }
        pipeline.model.force_cpu |= args.use_cpu;
        if args.verbose {
            pipeline.telemetry.log_filter = Some("debug".into());
        }
        if args.chrome_trace.is_some() {
            pipeline.telemetry.chrome_trace_path = args.chrome_trace;
        }
        pipeline
            .validate()
            .context("invalid pipeline configuration")?;

        let capture_size = match (args.capture_width, args.capture_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => FrameSize::new(w, h),
            (None, None) => DEFAULT_CAPTURE_SIZE,
            _ => bail!("--capture-width and --capture-height must be given together and be positive"),
        };

        let record_after = args
            .record_after
            .map(|secs| seconds("--record-after", secs))
            .transpose()?;
        let record_for = args
            .record_for
            .map(|secs| seconds("--record-for", secs))
            .transpose()?;
        // A bounded recording without an explicit start begins immediately.
        let record_after = match (record_after, record_for) {
            (None, Some(_)) => Some(Duration::ZERO),
            (after, _) => after,
        };

        let facing = if args.front_facing {
            CameraFacing::Front
        } else {
            CameraFacing::Back
        };

        Ok(Self {
            source_uri: args.source,
            facing,
            capture_size,
            pipeline,
            record_after,
            record_for,
            emit_json: args.emit_json,
        })
    }
}

fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("{flag} must be a non-negative number of seconds"))
}

fn parse_size(value: &str) -> Result<FrameSize, String> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let width = w.parse::<u32>().map_err(|err| format!("bad width {w:?}: {err}"))?;
    let height = h.parse::<u32>().map_err(|err| format!("bad height {h:?}: {err}"))?;
    Ok(FrameSize::new(width, height))
}
