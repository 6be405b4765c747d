//! Pose delivery to the embedding application.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use pose_core::{KeyPoint, Person};
use video_ingest::FrameSize;

/// Receives the keypoints of every completed inference.
///
/// Called from the `pose-publish` thread only. A cleared pose (nobody
/// confidently detected) arrives as an empty slice.
pub trait PoseConsumer: Send {
    fn on_pose(&mut self, keypoints: &[KeyPoint], frame_size: FrameSize);
}

impl<F> PoseConsumer for F
where
    F: FnMut(&[KeyPoint], FrameSize) + Send,
{
    fn on_pose(&mut self, keypoints: &[KeyPoint], frame_size: FrameSize) {
        self(keypoints, frame_size)
    }
}

/// One published result.
#[derive(Clone, Debug)]
pub struct PoseUpdate {
    pub person: Option<Arc<Person>>,
    pub frame_size: FrameSize,
    pub timestamp_ms: i64,
}

impl PoseUpdate {
    pub fn keypoints(&self) -> &[KeyPoint] {
        self.person.as_deref().map(Person::keypoints).unwrap_or(&[])
    }
}

/// Single-slot channel where a newer value replaces an undelivered one.
///
/// Only one producer may post; it drains the slot itself when it is full.
pub(crate) struct LatestMailbox<T> {
    tx: Sender<T>,
    drain: Receiver<T>,
}

impl<T> LatestMailbox<T> {
    pub(crate) fn new() -> (Self, Receiver<T>) {
        let (tx, rx) = bounded(1);
        (
            Self {
                tx,
                drain: rx.clone(),
            },
            rx,
        )
    }

    /// Post `value`, returning `true` when it displaced an undelivered one.
    pub(crate) fn post(&self, mut value: T) -> bool {
        let mut replaced = false;
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return replaced,
                Err(TrySendError::Full(back)) => {
                    replaced |= self.drain.try_recv().is_ok();
                    value = back;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}
