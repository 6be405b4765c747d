use std::{convert::TryFrom, path::Path};

use tch::{self, Device, Kind, Tensor};
use tracing::trace;
use video_ingest::{Frame, FrameFormat};

use crate::{
    estimator::{InferenceError, PoseEstimator},
    keypoints::{BodyPart, KeyPoint, Person, Point},
};

/// Values per keypoint in the model output: `(y, x, score)`.
const KEYPOINT_STRIDE: usize = 3;

/// Single-frame 2D estimator backed by a TorchScript export of MoveNet.
///
/// The module takes an RGB `[1, 3, S, S]` float tensor scaled to `[0, 1]` and
/// returns `[1, 1, 17, 3]` rows of normalized `(y, x, score)`.
pub struct MoveNetEstimator {
    module: tch::CModule,
    device: Device,
    input_size: i64,
}

impl MoveNetEstimator {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: i64,
    ) -> Result<Self, InferenceError> {
        let module = tch::CModule::load_on_device(model_path, device)
            .map_err(|err| InferenceError::ModelLoad(err.to_string()))?;
        Ok(Self {
            module,
            device,
            input_size,
        })
    }

    fn run(&self, frame: &Frame) -> Result<Vec<f32>, InferenceError> {
        let input = frame_to_tensor(frame, self.device, self.input_size)?;
        let output = tch::no_grad(|| self.module.forward_ts(&[input]))
            .map_err(|err| InferenceError::Backend(err.to_string()))?;
        trace!("movenet output shape {:?}", output.size());

        let flat = output.to_device(Device::Cpu).to_kind(Kind::Float).flatten(0, -1);
        Vec::<f32>::try_from(&flat).map_err(|err| InferenceError::Backend(err.to_string()))
    }
}

impl PoseEstimator for MoveNetEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Person, InferenceError> {
        let values = self.run(frame)?;
        decode_rows(&values, frame.width as f32, frame.height as f32)
    }

    fn name(&self) -> &'static str {
        "movenet"
    }
}

/// Convert a BGR(A) frame into a resized, normalized RGB NCHW tensor.
pub(crate) fn frame_to_tensor(
    frame: &Frame,
    device: Device,
    input_size: i64,
) -> Result<Tensor, InferenceError> {
    if !frame.is_well_formed() {
        return Err(InferenceError::UnsupportedFrame(format!(
            "buffer of {} bytes does not match {}x{} {:?}",
            frame.data.len(),
            frame.width,
            frame.height,
            frame.format
        )));
    }

    let channels = frame.format.bytes_per_pixel() as i64;
    let (w, h) = (frame.width as i64, frame.height as i64);
    let tensor = Tensor::from_slice(&frame.data)
        .to_device(device)
        .view([1, h, w, channels]);
    let bgr = match frame.format {
        FrameFormat::Bgr8 => tensor,
        FrameFormat::Bgra8 => tensor.narrow(3, 0, 3),
    };

    let rgb = bgr
        .flip([3])
        .permute([0, 3, 1, 2])
        .to_kind(Kind::Float)
        / 255.0;
    Ok(rgb.upsample_bilinear2d([input_size, input_size], false, None, None))
}

fn decode_rows(values: &[f32], width: f32, height: f32) -> Result<Person, InferenceError> {
    let expected = BodyPart::COUNT * KEYPOINT_STRIDE;
    if values.len() != expected {
        return Err(InferenceError::Backend(format!(
            "expected {expected} output values, got {}",
            values.len()
        )));
    }

    let mut keypoints = Vec::with_capacity(BodyPart::COUNT);
    for (part, row) in BodyPart::ALL.iter().zip(values.chunks_exact(KEYPOINT_STRIDE)) {
        let (y, x, score) = (row[0], row[1], row[2]);
        keypoints.push(KeyPoint::new(
            *part,
            Point::new(x * width, y * height),
            score.clamp(0.0, 1.0),
        ));
    }

    let score = Person::mean_keypoint_score(&keypoints);
    Person::new(keypoints, score)
}
