use video_ingest::{CameraFacing, FrameSize};

use crate::keypoints::{KeyPoint, Person, Point};

/// Map a pose from sensor space into display space for the given camera.
///
/// The back camera is not mirrored, so its poses pass through unchanged. The
/// front camera image is a mirror: every x is flipped about the frame width
/// and each left/right slot takes the flipped point of its partner, so the
/// person's left wrist stays labelled as their left wrist. The nose keeps its
/// slot. Applying the front transform twice restores the input.
pub fn transform(pose: &Person, frame_size: FrameSize, facing: CameraFacing) -> Person {
    match facing {
        CameraFacing::Back => pose.clone(),
        CameraFacing::Front => mirror(pose, frame_size.width as f32),
    }
}

fn mirror(pose: &Person, width: f32) -> Person {
    Person::from_fn(pose.score(), |part| {
        let source = pose.keypoint(part.mirrored());
        KeyPoint {
            body_part: part,
            coordinate: Point::new(width - source.coordinate.x, source.coordinate.y),
            score: source.score,
            depth: source.depth,
        }
    })
}
