use std::{convert::TryFrom, path::Path};

use tch::{self, Device, Kind};
use tracing::debug;
use video_ingest::Frame;

use crate::{
    estimator::{InferenceError, PoseEstimator},
    keypoints::{BodyPart, KeyPoint, Person, Point},
    movenet::frame_to_tensor,
};

/// Values per keypoint in the model output: `(x, y, z, visibility)`.
const KEYPOINT_STRIDE: usize = 4;

/// Below this mean visibility the track is considered lost.
const LOST_TRACK_SCORE: f32 = 0.05;

/// Stream-mode 3D estimator.
///
/// Consecutive frames are treated as one track: positions and depth are
/// exponentially smoothed with factor `alpha` until the person is lost, at
/// which point the track restarts from the next detection.
pub struct StreamingPoseEstimator {
    module: tch::CModule,
    device: Device,
    input_size: i64,
    alpha: f32,
    track: Option<[[f32; KEYPOINT_STRIDE]; BodyPart::COUNT]>,
}

impl StreamingPoseEstimator {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: i64,
        alpha: f32,
    ) -> Result<Self, InferenceError> {
        let module = tch::CModule::load_on_device(model_path, device)
            .map_err(|err| InferenceError::ModelLoad(err.to_string()))?;
        Ok(Self {
            module,
            device,
            input_size,
            alpha,
            track: None,
        })
    }
}

impl PoseEstimator for StreamingPoseEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Person, InferenceError> {
        let input = frame_to_tensor(frame, self.device, self.input_size)?;
        let output = tch::no_grad(|| self.module.forward_ts(&[input]))
            .map_err(|err| InferenceError::Backend(err.to_string()))?;
        let flat = output.to_device(Device::Cpu).to_kind(Kind::Float).flatten(0, -1);
        let values =
            Vec::<f32>::try_from(&flat).map_err(|err| InferenceError::Backend(err.to_string()))?;

        let rows = parse_rows(&values)?;
        let visibility = rows.iter().map(|row| row[3]).sum::<f32>() / BodyPart::COUNT as f32;
        if visibility < LOST_TRACK_SCORE {
            if self.track.take().is_some() {
                debug!("stream track lost");
            }
            return Err(InferenceError::NoPerson);
        }

        let smoothed = smooth(self.track.as_ref(), &rows, self.alpha);
        self.track = Some(smoothed);
        Ok(to_person(&smoothed, frame.width as f32, frame.height as f32))
    }

    fn name(&self) -> &'static str {
        "streaming-pose"
    }
}

fn parse_rows(values: &[f32]) -> Result<[[f32; KEYPOINT_STRIDE]; BodyPart::COUNT], InferenceError> {
    let expected = BodyPart::COUNT * KEYPOINT_STRIDE;
    if values.len() != expected {
        return Err(InferenceError::Backend(format!(
            "expected {expected} output values, got {}",
            values.len()
        )));
    }
    let mut rows = [[0.0; KEYPOINT_STRIDE]; BodyPart::COUNT];
    for (row, chunk) in rows.iter_mut().zip(values.chunks_exact(KEYPOINT_STRIDE)) {
        row.copy_from_slice(chunk);
    }
    Ok(rows)
}

fn smooth(
    previous: Option<&[[f32; KEYPOINT_STRIDE]; BodyPart::COUNT]>,
    current: &[[f32; KEYPOINT_STRIDE]; BodyPart::COUNT],
    alpha: f32,
) -> [[f32; KEYPOINT_STRIDE]; BodyPart::COUNT] {
    let Some(previous) = previous else {
        return *current;
    };
    let mut out = *current;
    for (row, prev) in out.iter_mut().zip(previous) {
        for (value, old) in row.iter_mut().zip(prev) {
            *value = alpha * *value + (1.0 - alpha) * old;
        }
    }
    out
}

fn to_person(rows: &[[f32; KEYPOINT_STRIDE]; BodyPart::COUNT], width: f32, height: f32) -> Person {
    let score = rows.iter().map(|row| row[3]).sum::<f32>() / BodyPart::COUNT as f32;
    Person::from_fn(score.clamp(0.0, 1.0), |part| {
        let [x, y, z, visibility] = rows[part.index()];
        KeyPoint::new(part, Point::new(x * width, y * height), visibility.clamp(0.0, 1.0))
            .with_depth(z)
    })
}
