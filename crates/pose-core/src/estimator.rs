//! The pose-estimation capability and backend selection.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use video_ingest::Frame;

use crate::keypoints::Person;

/// Turns one frame into a single-person skeleton.
///
/// Implementations may keep state across calls (stream-mode trackers), which
/// is why `estimate` takes `&mut self`. The pipeline calls an estimator from a
/// single worker thread and never concurrently.
pub trait PoseEstimator: Send {
    fn estimate(&mut self, frame: &Frame) -> Result<Person, InferenceError>;

    fn name(&self) -> &'static str {
        "pose-estimator"
    }
}

impl<E: PoseEstimator + ?Sized> PoseEstimator for Box<E> {
    fn estimate(&mut self, frame: &Frame) -> Result<Person, InferenceError> {
        (**self).estimate(frame)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no person detected")]
    NoPerson,
    #[error("inference backend failed: {0}")]
    Backend(String),
    #[error("malformed pose: {0}")]
    MalformedPose(String),
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),
    #[error("estimator panicked: {0}")]
    Panicked(String),
    #[error("failed to load model: {0}")]
    ModelLoad(String),
}

impl InferenceError {
    /// Short metric label for the failure kind.
    pub fn label(&self) -> &'static str {
        match self {
            InferenceError::NoPerson => "no_person",
            InferenceError::Backend(_) => "backend",
            InferenceError::MalformedPose(_) => "malformed_pose",
            InferenceError::UnsupportedFrame(_) => "unsupported_frame",
            InferenceError::Panicked(_) => "panicked",
            InferenceError::ModelLoad(_) => "model_load",
        }
    }
}

/// Which family of model backs the estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    /// Single-frame 2D keypoints (MoveNet style).
    #[default]
    #[serde(rename = "pose_2d")]
    Pose2D,
    /// Stream-mode tracker reporting per-keypoint depth.
    #[serde(rename = "pose_3d")]
    Pose3D,
}

impl ModelType {
    pub fn label(self) -> &'static str {
        match self {
            ModelType::Pose2D => "pose-2d",
            ModelType::Pose3D => "pose-3d",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_type: ModelType,
    /// TorchScript module exported from the pose model.
    pub model_path: Option<PathBuf>,
    /// Square input resolution the model expects.
    pub input_size: u32,
    /// Run on CPU even when CUDA is available.
    pub force_cpu: bool,
    /// Exponential smoothing factor for stream-mode models, in `(0, 1]`.
    pub smoothing: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::Pose2D,
            model_path: None,
            input_size: 192,
            force_cpu: false,
            smoothing: 0.5,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.input_size == 0 {
            return Err("model input size must be positive".into());
        }
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(format!(
                "smoothing factor must be in (0, 1], got {}",
                self.smoothing
            ));
        }
        Ok(())
    }
}

/// Build the estimator for `config.model_type`. Selection happens once.
#[cfg(feature = "with-tch")]
pub fn build_estimator(config: &ModelConfig) -> Result<Box<dyn PoseEstimator>, InferenceError> {
    let path = config
        .model_path
        .as_deref()
        .ok_or_else(|| InferenceError::ModelLoad("no model path configured".into()))?;
    let device = if config.force_cpu {
        tch::Device::Cpu
    } else {
        tch::Device::cuda_if_available()
    };
    tracing::info!(
        "loading {} model from {} on {device:?}",
        config.model_type.label(),
        path.display()
    );

    let estimator: Box<dyn PoseEstimator> = match config.model_type {
        ModelType::Pose2D => Box::new(crate::movenet::MoveNetEstimator::new(
            path,
            device,
            config.input_size as i64,
        )?),
        ModelType::Pose3D => Box::new(crate::streaming::StreamingPoseEstimator::new(
            path,
            device,
            config.input_size as i64,
            config.smoothing,
        )?),
    };
    Ok(estimator)
}

#[cfg(not(feature = "with-tch"))]
pub fn build_estimator(config: &ModelConfig) -> Result<Box<dyn PoseEstimator>, InferenceError> {
    Err(InferenceError::ModelLoad(format!(
        "{} models need the `with-tch` feature",
        config.model_type.label()
    )))
}
