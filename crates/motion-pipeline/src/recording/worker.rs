//! The `frame-writer` thread: serializes appends and the final close for one
//! session.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use tracing::{debug, error, trace, warn};
use video_ingest::Frame;

use super::{OutputArtifact, PresentationTime, RecordingSession};
use crate::{error::RecordError, telemetry};

const READY_POLL: Duration = Duration::from_millis(2);

/// A frame numbered by the coordinator at enqueue time.
pub(crate) struct WriteJob {
    pub(crate) frame: Arc<Frame>,
    pub(crate) index: u64,
}

/// What the writer thread reports back to the producer while it runs.
#[derive(Debug, Default)]
pub(crate) struct WriterSignals {
    /// Raised after the first hard failure; later jobs are drained unwritten.
    pub(crate) failed: AtomicBool,
    /// Frames skipped because the writer stayed busy past the ready timeout.
    pub(crate) dropped: AtomicU64,
}

impl WriterSignals {
    pub(crate) fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Run `session` on a dedicated thread until `jobs` disconnects, then finish
/// it and report the outcome through `on_finish`.
///
/// A frame the writer is not ready for within `ready_timeout` is skipped and
/// the session carries on. Any other append error ends the session: the
/// remaining jobs are drained unwritten and `signals.failed` is raised so the
/// producer can stop feeding the queue.
pub(crate) fn spawn_writer_worker<F>(
    session: RecordingSession,
    jobs: Receiver<WriteJob>,
    signals: Arc<WriterSignals>,
    ready_timeout: Duration,
    on_finish: F,
) -> io::Result<thread::JoinHandle<()>>
where
    F: FnOnce(Result<OutputArtifact, RecordError>) + Send + 'static,
{
    telemetry::spawn_thread("frame-writer", move || {
        let worker_span = tracing::info_span!(
            "recording.writer",
            path = %session.path().display()
        );
        let _worker_guard = worker_span.enter();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            drive(session, jobs, &signals, ready_timeout)
        }))
        .unwrap_or_else(|_| {
            signals.failed.store(true, Ordering::Release);
            Err(RecordError::WriterExited("video writer panicked".into()))
        });
        on_finish(outcome);
    })
}

fn drive(
    mut session: RecordingSession,
    jobs: Receiver<WriteJob>,
    signals: &WriterSignals,
    ready_timeout: Duration,
) -> Result<OutputArtifact, RecordError> {
    let backlog = jobs.clone();
    let mut failure: Option<RecordError> = None;
    // Coordinator indices are gapless; skipped frames shift later ones down.
    let mut skipped = 0u64;
    for job in jobs {
        if failure.is_some() {
            continue;
        }
        metrics::gauge!("pipeline_queue_depth", "queue" => "writer").set(backlog.len() as f64);

        let index = job.index - skipped;
        match append_when_ready(&mut session, &job.frame, index, ready_timeout) {
            Ok(pts) => {
                metrics::counter!("recording_frames_written_total").increment(1);
                trace!(index = pts.index, pts = pts.as_secs_f64(), "frame appended");
            }
            Err(RecordError::NotReady) => {
                skipped += 1;
                signals.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("recording_frames_dropped_total", "reason" => "writer_busy")
                    .increment(1);
                warn!(
                    "writer not ready within {:?}, skipping frame {}",
                    ready_timeout, job.index
                );
            }
            Err(err) => {
                error!("recording append failed at frame {}: {err}", job.index);
                metrics::counter!("recording_failures_total").increment(1);
                signals.failed.store(true, Ordering::Release);
                failure = Some(err);
            }
        }
    }

    debug!(
        "writer queue closed after {} frame(s), {} skipped",
        session.frames_written(),
        skipped
    );
    let finish_start = Instant::now();
    let finished = session.finish();
    metrics::histogram!("recording_finish_seconds").record(finish_start.elapsed().as_secs_f64());

    match (failure, finished) {
        (Some(err), _) => Err(err),
        (None, result) => result,
    }
}

fn append_when_ready(
    session: &mut RecordingSession,
    frame: &Frame,
    index: u64,
    ready_timeout: Duration,
) -> Result<PresentationTime, RecordError> {
    let deadline = Instant::now() + ready_timeout;
    loop {
        match session.append(frame, index) {
            Err(RecordError::NotReady) if Instant::now() < deadline => thread::sleep(READY_POLL),
            other => return other,
        }
    }
}
