//! Skeleton data model: body parts, keypoints, and the per-frame pose.

use serde::{Deserialize, Serialize};

use video_ingest::FrameSize;

use crate::estimator::InferenceError;

/// Anatomical landmark produced by the pose models.
///
/// The declaration order is the array order used by [`Person`]; downstream
/// skeleton drawing indexes keypoints by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPart {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl BodyPart {
    pub const COUNT: usize = 17;

    pub const ALL: [BodyPart; BodyPart::COUNT] = [
        BodyPart::Nose,
        BodyPart::LeftEye,
        BodyPart::RightEye,
        BodyPart::LeftEar,
        BodyPart::RightEar,
        BodyPart::LeftShoulder,
        BodyPart::RightShoulder,
        BodyPart::LeftElbow,
        BodyPart::RightElbow,
        BodyPart::LeftWrist,
        BodyPart::RightWrist,
        BodyPart::LeftHip,
        BodyPart::RightHip,
        BodyPart::LeftKnee,
        BodyPart::RightKnee,
        BodyPart::LeftAnkle,
        BodyPart::RightAnkle,
    ];

    /// Position of this part in [`BodyPart::ALL`] and in model output.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The contralateral part, or `None` for the unpaired nose.
    pub const fn mirror(self) -> Option<BodyPart> {
        use BodyPart::*;
        match self {
            Nose => None,
            LeftEye => Some(RightEye),
            RightEye => Some(LeftEye),
            LeftEar => Some(RightEar),
            RightEar => Some(LeftEar),
            LeftShoulder => Some(RightShoulder),
            RightShoulder => Some(LeftShoulder),
            LeftElbow => Some(RightElbow),
            RightElbow => Some(LeftElbow),
            LeftWrist => Some(RightWrist),
            RightWrist => Some(LeftWrist),
            LeftHip => Some(RightHip),
            RightHip => Some(LeftHip),
            LeftKnee => Some(RightKnee),
            RightKnee => Some(LeftKnee),
            LeftAnkle => Some(RightAnkle),
            RightAnkle => Some(LeftAnkle),
        }
    }

    /// The part occupying this part's slot after a left/right mirror.
    pub fn mirrored(self) -> BodyPart {
        self.mirror().unwrap_or(self)
    }

    pub fn label(self) -> &'static str {
        use BodyPart::*;
        match self {
            Nose => "nose",
            LeftEye => "left eye",
            RightEye => "right eye",
            LeftEar => "left ear",
            RightEar => "right ear",
            LeftShoulder => "left shoulder",
            RightShoulder => "right shoulder",
            LeftElbow => "left elbow",
            RightElbow => "right elbow",
            LeftWrist => "left wrist",
            RightWrist => "right wrist",
            LeftHip => "left hip",
            RightHip => "right hip",
            LeftKnee => "left knee",
            RightKnee => "right knee",
            LeftAnkle => "left ankle",
            RightAnkle => "right ankle",
        }
    }
}

/// Limbs connecting keypoints when a skeleton is drawn.
pub const SKELETON_EDGES: [(BodyPart, BodyPart); 12] = [
    (BodyPart::LeftWrist, BodyPart::LeftElbow),
    (BodyPart::LeftElbow, BodyPart::LeftShoulder),
    (BodyPart::LeftShoulder, BodyPart::RightShoulder),
    (BodyPart::RightShoulder, BodyPart::RightElbow),
    (BodyPart::RightElbow, BodyPart::RightWrist),
    (BodyPart::LeftShoulder, BodyPart::LeftHip),
    (BodyPart::LeftHip, BodyPart::RightHip),
    (BodyPart::RightHip, BodyPart::RightShoulder),
    (BodyPart::LeftHip, BodyPart::LeftKnee),
    (BodyPart::LeftKnee, BodyPart::LeftAnkle),
    (BodyPart::RightHip, BodyPart::RightKnee),
    (BodyPart::RightKnee, BodyPart::RightAnkle),
];

/// Location in frame pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub body_part: BodyPart,
    pub coordinate: Point,
    /// Confidence in `[0, 1]`.
    pub score: f32,
    /// Relative depth reported by 3D models; `None` for 2D models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f32>,
}

impl KeyPoint {
    pub fn new(body_part: BodyPart, coordinate: Point, score: f32) -> Self {
        Self {
            body_part,
            coordinate,
            score,
            depth: None,
        }
    }

    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Strict containment within the open box `x_bounds` × `y_bounds`.
    pub fn within(&self, x_bounds: (f32, f32), y_bounds: (f32, f32)) -> bool {
        self.coordinate.x > x_bounds.0
            && self.coordinate.x < x_bounds.1
            && self.coordinate.y > y_bounds.0
            && self.coordinate.y < y_bounds.1
    }
}

/// A single detected person: one keypoint per [`BodyPart`], in order.
///
/// The constructors guarantee `keypoints()[i].body_part == BodyPart::ALL[i]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPerson")]
pub struct Person {
    keypoints: [KeyPoint; BodyPart::COUNT],
    score: f32,
}

#[derive(Deserialize)]
struct RawPerson {
    keypoints: Vec<KeyPoint>,
    score: f32,
}

impl TryFrom<RawPerson> for Person {
    type Error = InferenceError;

    fn try_from(raw: RawPerson) -> Result<Self, Self::Error> {
        Person::new(raw.keypoints, raw.score)
    }
}

impl Person {
    /// Build a person from keypoints already in [`BodyPart::ALL`] order.
    pub fn new(keypoints: Vec<KeyPoint>, score: f32) -> Result<Self, InferenceError> {
        let keypoints: [KeyPoint; BodyPart::COUNT] =
            keypoints.try_into().map_err(|kps: Vec<KeyPoint>| {
                InferenceError::MalformedPose(format!(
                    "expected {} keypoints, got {}",
                    BodyPart::COUNT,
                    kps.len()
                ))
            })?;

        for (index, keypoint) in keypoints.iter().enumerate() {
            if keypoint.body_part.index() != index {
                return Err(InferenceError::MalformedPose(format!(
                    "slot {index} holds {} instead of {}",
                    keypoint.body_part.label(),
                    BodyPart::ALL[index].label()
                )));
            }
        }

        Ok(Self { keypoints, score })
    }

    /// Build a person from keypoints in any order, placing each by its tag.
    ///
    /// Every body part must appear exactly once.
    pub fn from_unordered(keypoints: Vec<KeyPoint>, score: f32) -> Result<Self, InferenceError> {
        let mut slots: [Option<KeyPoint>; BodyPart::COUNT] = [None; BodyPart::COUNT];
        for keypoint in keypoints {
            let slot = &mut slots[keypoint.body_part.index()];
            if slot.is_some() {
                return Err(InferenceError::MalformedPose(format!(
                    "duplicate {}",
                    keypoint.body_part.label()
                )));
            }
            *slot = Some(keypoint);
        }

        let mut ordered = Vec::with_capacity(BodyPart::COUNT);
        for (part, slot) in BodyPart::ALL.iter().zip(slots) {
            let keypoint = slot.ok_or_else(|| {
                InferenceError::MalformedPose(format!("missing {}", part.label()))
            })?;
            ordered.push(keypoint);
        }
        Person::new(ordered, score)
    }

    /// Build a person by evaluating `f` for every body part; the tag is set here
    /// so alignment cannot be broken by the caller.
    pub fn from_fn(score: f32, mut f: impl FnMut(BodyPart) -> KeyPoint) -> Self {
        let keypoints = std::array::from_fn(|index| {
            let part = BodyPart::ALL[index];
            KeyPoint {
                body_part: part,
                ..f(part)
            }
        });
        Self { keypoints, score }
    }

    pub fn keypoints(&self) -> &[KeyPoint] {
        &self.keypoints
    }

    pub fn keypoint(&self, part: BodyPart) -> &KeyPoint {
        &self.keypoints[part.index()]
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    /// True when the overall score is strictly above `threshold`.
    pub fn is_confident(&self, threshold: f32) -> bool {
        self.score > threshold
    }

    /// True when every keypoint lies strictly inside `frame` shrunk by
    /// `margin` (a fraction of each dimension) on all four sides.
    pub fn within_margin(&self, frame: FrameSize, margin: f32) -> bool {
        let (width, height) = (frame.width as f32, frame.height as f32);
        let x_bounds = (width * margin, width * (1.0 - margin));
        let y_bounds = (height * margin, height * (1.0 - margin));
        self.keypoints
            .iter()
            .all(|keypoint| keypoint.within(x_bounds, y_bounds))
    }

    /// Mean keypoint score, the overall score used by single-pose models.
    pub fn mean_keypoint_score(keypoints: &[KeyPoint]) -> f32 {
        if keypoints.is_empty() {
            return 0.0;
        }
        keypoints.iter().map(|kp| kp.score).sum::<f32>() / keypoints.len() as f32
    }
}
