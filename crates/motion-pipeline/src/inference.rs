//! Inference and publication workers.
//!
//! The inference worker runs one estimator call at a time, applies the
//! keypoint transform, stores the latest pose and releases the gate before
//! handing the update to the publish worker. The publish worker is the only
//! caller of the consumer, so a slow consumer never holds the gate.

use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::Instant,
};

use crossbeam_channel::Receiver;
use pose_core::{InferenceError, PoseEstimator, transform};
use tracing::{debug, error, warn};
use video_ingest::Frame;

use crate::{
    consumer::{LatestMailbox, PoseConsumer, PoseUpdate},
    coordinator::{Counters, Shared, lock},
    gate::GatePermit,
    telemetry,
};

/// A frame admitted through the gate, carrying the permit that admitted it.
pub(crate) struct InferenceJob {
    pub(crate) frame: Arc<Frame>,
    pub(crate) permit: GatePermit,
}

pub(crate) fn spawn_inference_worker(
    shared: Arc<Shared>,
    mut estimator: Box<dyn PoseEstimator>,
    jobs: Receiver<InferenceJob>,
    mailbox: LatestMailbox<PoseUpdate>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("pose-inference", move || {
        let worker_span =
            tracing::info_span!("inference.worker", estimator = estimator.name());
        let _worker_guard = worker_span.enter();
        for job in jobs {
            run_inference(&shared, &mut *estimator, job, &mailbox);
        }
        debug!("inference queue closed");
    })
}

fn run_inference(
    shared: &Shared,
    estimator: &mut dyn PoseEstimator,
    job: InferenceJob,
    mailbox: &LatestMailbox<PoseUpdate>,
) {
    let InferenceJob { frame, permit } = job;
    let _span = tracing::info_span!("pipeline.inference", timestamp = frame.timestamp_ms).entered();

    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| estimator.estimate(&frame)))
        .unwrap_or_else(|payload| Err(InferenceError::Panicked(panic_message(payload.as_ref()))));
    metrics::histogram!("pose_inference_seconds").record(started.elapsed().as_secs_f64());
    Counters::bump(&shared.counters.inferences_run);

    let person = match outcome {
        Ok(person) => person,
        Err(err) => {
            Counters::bump(&shared.counters.inference_failures);
            metrics::counter!("pose_inference_failures_total", "kind" => err.label()).increment(1);
            match err {
                InferenceError::NoPerson => debug!("no person in frame"),
                err => warn!("pose inference failed: {err}"),
            }
            return;
        }
    };

    let frame_size = frame.size();
    let published = if person.is_confident(shared.config.confidence_threshold) {
        let facing = lock(&shared.source).facing;
        let person = transform(&person, frame_size, facing);
        if !person.within_margin(frame_size, shared.config.frame_margin) {
            Counters::bump(&shared.counters.poses_out_of_frame);
            metrics::counter!("pose_out_of_frame_total").increment(1);
            debug!("pose extends into the frame margin");
        }
        Some(Arc::new(person))
    } else {
        Counters::bump(&shared.counters.poses_cleared);
        None
    };
    *lock(&shared.latest) = published.clone();

    let replaced = mailbox.post(PoseUpdate {
        person: published,
        frame_size,
        timestamp_ms: frame.timestamp_ms,
    });
    drop(permit);
    if replaced {
        metrics::counter!("pipeline_pose_updates_replaced_total").increment(1);
    }
}

pub(crate) fn spawn_publish_worker(
    shared: Arc<Shared>,
    updates: Receiver<PoseUpdate>,
    mut consumer: Box<dyn PoseConsumer>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("pose-publish", move || {
        for update in updates {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                consumer.on_pose(update.keypoints(), update.frame_size)
            }));
            if delivered.is_err() {
                error!("pose consumer panicked; continuing with the next update");
            }
            Counters::bump(&shared.counters.poses_published);
        }
        debug!("publish mailbox closed");
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
