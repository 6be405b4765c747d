//! Pose data model and estimation backends.
//!
//! Estimators turn a [`video_ingest::Frame`] into a [`Person`]; the TorchScript
//! backends need the `with-tch` feature.

pub mod estimator;
pub mod keypoints;
pub mod transform;

#[cfg(feature = "with-tch")]
mod movenet;
#[cfg(feature = "with-tch")]
mod streaming;

pub use estimator::{InferenceError, ModelConfig, ModelType, PoseEstimator, build_estimator};
pub use keypoints::{BodyPart, KeyPoint, Person, Point, SKELETON_EDGES};
pub use transform::transform;

#[cfg(feature = "with-tch")]
pub use movenet::MoveNetEstimator;
#[cfg(feature = "with-tch")]
pub use streaming::StreamingPoseEstimator;

#[cfg(feature = "with-tch")]
pub use tch;
