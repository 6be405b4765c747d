//! Pipeline coordinator: fans each captured frame out to the recorder and the
//! single-flight inference path, and owns the recording state machine.
//!
//! `on_frame` runs on the capture delivery thread and only ever holds short
//! locks. Inference, publication, and encoding happen on the `pose-inference`,
//! `pose-publish`, and `frame-writer` threads respectively.

use std::{
    future::Future,
    path::PathBuf,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll},
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{Sender, TrySendError, bounded};
use pose_core::{Person, PoseEstimator};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};
use video_ingest::{CameraFacing, Frame};

use crate::{
    config::PipelineConfig,
    consumer::{LatestMailbox, PoseConsumer},
    error::{PipelineError, RecordError},
    gate::InferenceGate,
    inference::{InferenceJob, spawn_inference_worker, spawn_publish_worker},
    recording::{
        OutputArtifact, RecordingSession, WriteJob, WriterFactory, WriterSettings, WriterSignals,
        allocate_output_path, output_path, spawn_writer_worker,
    },
};

/// What the frame source reports about the stream it is delivering.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub frame_rate: f64,
    pub facing: CameraFacing,
}

impl Default for SourceInfo {
    fn default() -> Self {
        Self {
            frame_rate: 30.0,
            facing: CameraFacing::Back,
        }
    }
}

/// Snapshot of the recording state machine.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    /// The writer for a new session is being opened.
    Starting,
    Recording {
        started_at: DateTime<Utc>,
        frame_index: u64,
        frame_rate: f64,
    },
    Finishing,
}

impl RecordingState {
    pub fn label(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Starting => "starting",
            RecordingState::Recording { .. } => "recording",
            RecordingState::Finishing => "finishing",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RecordingStatus {
    pub state: RecordingState,
    pub path: Option<PathBuf>,
    pub frames_dropped: u64,
    pub elapsed: Option<Duration>,
    pub last_artifact: Option<OutputArtifact>,
}

/// Cumulative counters since the coordinator started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_seen: u64,
    pub inferences_run: u64,
    pub inference_dropped: u64,
    pub inference_failures: u64,
    pub poses_published: u64,
    pub poses_cleared: u64,
    /// Published poses with a keypoint inside the configured frame margin.
    pub poses_out_of_frame: u64,
    pub writer_dropped: u64,
}

/// Outcome delivered by a [`FinishHandle`]: the artifact of the session that
/// just closed, or the previous one when nothing was recording.
pub type FinishResult = Result<Option<OutputArtifact>, PipelineError>;

/// Resolves once the recording that was active at `end_recording` is closed.
///
/// Await it from async code or call [`FinishHandle::wait`] from a thread.
#[derive(Debug)]
pub struct FinishHandle {
    rx: oneshot::Receiver<FinishResult>,
}

impl FinishHandle {
    fn ready(result: FinishResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Block the calling thread until the recording is closed.
    ///
    /// Must not be called from inside an async runtime; await the handle there.
    pub fn wait(self) -> FinishResult {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(PipelineError::WorkerUnavailable("frame-writer")))
    }
}

impl Future for FinishHandle {
    type Output = FinishResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(PipelineError::WorkerUnavailable("frame-writer"))))
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) frames_seen: AtomicU64,
    pub(crate) inferences_run: AtomicU64,
    pub(crate) inference_dropped: AtomicU64,
    pub(crate) inference_failures: AtomicU64,
    pub(crate) poses_published: AtomicU64,
    pub(crate) poses_cleared: AtomicU64,
    pub(crate) poses_out_of_frame: AtomicU64,
    pub(crate) writer_dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            inferences_run: self.inferences_run.load(Ordering::Relaxed),
            inference_dropped: self.inference_dropped.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            poses_published: self.poses_published.load(Ordering::Relaxed),
            poses_cleared: self.poses_cleared.load(Ordering::Relaxed),
            poses_out_of_frame: self.poses_out_of_frame.load(Ordering::Relaxed),
            writer_dropped: self.writer_dropped.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the coordinator and its worker threads.
pub(crate) struct Shared {
    pub(crate) config: PipelineConfig,
    pub(crate) source: Mutex<SourceInfo>,
    pub(crate) latest: Mutex<Option<Arc<Person>>>,
    pub(crate) counters: Counters,
    recorder: Mutex<Recorder>,
    factory: Arc<dyn WriterFactory>,
    running: AtomicBool,
}

struct Recorder {
    phase: Phase,
    last_artifact: Option<OutputArtifact>,
    next_path: Option<PathBuf>,
    /// Failure of a session that stopped with nobody waiting on it.
    unclaimed_failure: Option<PipelineError>,
    waiters: Vec<oneshot::Sender<FinishResult>>,
    writer_thread: Option<thread::JoinHandle<()>>,
}

enum Phase {
    Idle,
    /// The writer is being opened without the recorder lock held.
    Starting { end_requested: bool },
    Recording(ActiveRecording),
    Finishing(ClosingRecording),
}

struct ActiveRecording {
    started_at: DateTime<Utc>,
    started: Instant,
    frame_index: u64,
    frame_rate: f64,
    dropped: u64,
    path: PathBuf,
    jobs: Sender<WriteJob>,
    signals: Arc<WriterSignals>,
}

impl ActiveRecording {
    /// Frames refused at enqueue plus those the writer skipped.
    fn frames_dropped(&self) -> u64 {
        self.dropped + self.signals.dropped()
    }

    /// Close the job queue, letting the writer drain it and then finish.
    fn close(self) -> ClosingRecording {
        ClosingRecording {
            started: self.started,
            path: self.path,
            dropped: self.dropped,
            signals: self.signals,
        }
    }
}

struct ClosingRecording {
    started: Instant,
    path: PathBuf,
    dropped: u64,
    signals: Arc<WriterSignals>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Allocate an output path that cannot collide with the last artifact,
    /// even when two sessions start within the same millisecond.
    fn fresh_output_path(&self, last: Option<&OutputArtifact>) -> Result<PathBuf, RecordError> {
        let (dir, container) = (&self.config.output_dir, self.config.container.as_str());
        let mut now = Utc::now();
        while last.is_some_and(|artifact| artifact.path == output_path(dir, container, now)) {
            now += TimeDelta::milliseconds(1);
        }
        allocate_output_path(dir, container, now)
    }

    fn complete_recording(
        &self,
        outcome: Result<OutputArtifact, RecordError>,
        signals: &WriterSignals,
    ) {
        let mut recorder = lock(&self.recorder);
        let result = match outcome {
            Ok(artifact) => {
                info!(
                    "recording closed: {} ({} frames, {:.2}s)",
                    artifact.path.display(),
                    artifact.frame_count,
                    artifact.duration.as_secs_f64()
                );
                metrics::counter!("recording_sessions_total", "outcome" => "ok").increment(1);
                recorder.last_artifact = Some(artifact.clone());
                Ok(Some(artifact))
            }
            Err(err) => {
                error!("recording failed: {err}");
                metrics::counter!("recording_sessions_total", "outcome" => "failed").increment(1);
                Err(PipelineError::WriterFailed(err))
            }
        };
        self.counters
            .writer_dropped
            .fetch_add(signals.dropped(), Ordering::Relaxed);
        if let Phase::Recording(active) = &recorder.phase {
            warn!(
                "frame-writer stopped while {} was recording; later frames are not recorded",
                active.path.display()
            );
        }
        recorder.phase = Phase::Idle;
        metrics::gauge!("recording_active").set(0.0);

        match (&result, recorder.waiters.is_empty()) {
            (Err(err), true) => recorder.unclaimed_failure = Some(err.clone()),
            _ => {
                for waiter in recorder.waiters.drain(..) {
                    let _ = waiter.send(result.clone());
                }
            }
        }
        let last_artifact = recorder.last_artifact.clone();
        drop(recorder);

        let path = match self.fresh_output_path(last_artifact.as_ref()) {
            Ok(path) => path,
            Err(err) => {
                warn!("failed to prepare next recording path: {err}");
                return;
            }
        };
        let mut recorder = lock(&self.recorder);
        if matches!(recorder.phase, Phase::Idle) {
            recorder.next_path = Some(path);
        }
    }
}

/// Central orchestrator of the frame pipeline.
///
/// Frames enter through [`on_frame`](Self::on_frame). Recording is driven by
/// [`start_recording`](Self::start_recording) and
/// [`end_recording`](Self::end_recording); dropping the coordinator shuts it
/// down and finishes any active recording.
pub struct PipelineCoordinator {
    shared: Arc<Shared>,
    gate: Arc<InferenceGate>,
    inference_tx: Mutex<Option<Sender<InferenceJob>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl PipelineCoordinator {
    /// Validate `config` and start the inference and publish workers.
    pub fn new(
        config: PipelineConfig,
        source: SourceInfo,
        estimator: Box<dyn PoseEstimator>,
        consumer: impl PoseConsumer + 'static,
        factory: Arc<dyn WriterFactory>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            config,
            source: Mutex::new(source),
            latest: Mutex::new(None),
            counters: Counters::default(),
            recorder: Mutex::new(Recorder {
                phase: Phase::Idle,
                last_artifact: None,
                next_path: None,
                unclaimed_failure: None,
                waiters: Vec::new(),
                writer_thread: None,
            }),
            factory,
            running: AtomicBool::new(true),
        });

        let (mailbox, updates) = LatestMailbox::new();
        let publish = spawn_publish_worker(shared.clone(), updates, Box::new(consumer))
            .map_err(|err| {
                error!("failed to spawn pose-publish worker: {err}");
                PipelineError::WorkerUnavailable("pose-publish")
            })?;

        let (inference_tx, inference_rx) = bounded::<InferenceJob>(1);
        let inference = spawn_inference_worker(shared.clone(), estimator, inference_rx, mailbox)
            .map_err(|err| {
                error!("failed to spawn pose-inference worker: {err}");
                PipelineError::WorkerUnavailable("pose-inference")
            })?;

        debug!(
            "pipeline coordinator started (output {}, threshold {})",
            shared.config.output_size, shared.config.confidence_threshold
        );

        Ok(Self {
            shared,
            gate: InferenceGate::new(),
            inference_tx: Mutex::new(Some(inference_tx)),
            workers: Mutex::new(vec![inference, publish]),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Handle one captured frame.
    pub fn on_frame(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let span = tracing::info_span!(
            "pipeline.frame",
            timestamp = frame.timestamp_ms,
            width = frame.width,
            height = frame.height
        );
        let _guard = span.enter();

        Counters::bump(&self.shared.counters.frames_seen);
        metrics::counter!("pipeline_frames_total").increment(1);
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }

        self.record_frame(&frame);
        self.dispatch_inference(frame);
    }

    fn record_frame(&self, frame: &Arc<Frame>) {
        let config = &self.shared.config;
        let mut recorder = lock(&self.shared.recorder);
        let Phase::Recording(active) = &mut recorder.phase else {
            return;
        };

        let reason = if active.signals.has_failed() {
            "writer_failed"
        } else if frame.size() != config.output_size || frame.format != config.pixel_format {
            "frame_mismatch"
        } else {
            let job = WriteJob {
                frame: Arc::clone(frame),
                index: active.frame_index,
            };
            match active.jobs.try_send(job) {
                Ok(()) => {
                    active.frame_index += 1;
                    return;
                }
                Err(TrySendError::Full(_)) => "not_ready",
                Err(TrySendError::Disconnected(_)) => "writer_exited",
            }
        };

        active.dropped += 1;
        Counters::bump(&self.shared.counters.writer_dropped);
        metrics::counter!("recording_frames_dropped_total", "reason" => reason).increment(1);
        debug!(
            "dropping frame from recording ({reason}): {}x{} {:?}",
            frame.width, frame.height, frame.format
        );
    }

    fn dispatch_inference(&self, frame: Arc<Frame>) {
        let Some(permit) = self.gate.try_acquire() else {
            Counters::bump(&self.shared.counters.inference_dropped);
            metrics::counter!("pipeline_inference_dropped_total").increment(1);
            trace!("inference busy, skipping frame");
            return;
        };

        let inference_tx = lock(&self.inference_tx);
        let Some(tx) = inference_tx.as_ref() else {
            return;
        };
        if let Err(err) = tx.try_send(InferenceJob { frame, permit }) {
            warn!("pose-inference worker unavailable: {err}");
        }
    }

    /// Begin recording at the current source frame rate.
    ///
    /// A no-op while already recording or starting. Fails with
    /// [`PipelineError::RecordingBusy`] while the previous session is still
    /// closing, and with [`PipelineError::WriterInitFailed`] if the writer
    /// cannot be opened; in both cases the coordinator keeps running.
    ///
    /// The writer is opened without holding the recorder lock, so frames keep
    /// flowing to inference while a slow encoder starts up.
    pub fn start_recording(&self) -> Result<(), PipelineError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(PipelineError::WorkerUnavailable("coordinator"));
        }

        let (previous, next_path, last_artifact) = {
            let mut recorder = lock(&self.shared.recorder);
            match recorder.phase {
                Phase::Recording(_) | Phase::Starting { .. } => {
                    debug!("start_recording ignored: already recording");
                    return Ok(());
                }
                Phase::Finishing(_) => return Err(PipelineError::RecordingBusy),
                Phase::Idle => {}
            }
            if let Some(err) = recorder.unclaimed_failure.take() {
                warn!("discarding unreported failure of the previous recording: {err}");
            }
            recorder.phase = Phase::Starting {
                end_requested: false,
            };
            (
                recorder.writer_thread.take(),
                recorder.next_path.take(),
                recorder.last_artifact.clone(),
            )
        };

        let opened = self.open_session(previous, next_path, last_artifact.as_ref());

        let mut recorder = lock(&self.shared.recorder);
        let end_requested = matches!(
            recorder.phase,
            Phase::Starting {
                end_requested: true
            }
        );
        let (active, handle) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                recorder.phase = Phase::Idle;
                for waiter in recorder.waiters.drain(..) {
                    let _ = waiter.send(Err(err.clone()));
                }
                return Err(err);
            }
        };

        recorder.writer_thread = Some(handle);
        if end_requested {
            info!(
                "recording {} ended before its first frame",
                active.path.display()
            );
            recorder.phase = Phase::Finishing(active.close());
            return Ok(());
        }
        info!(
            "recording started: {} at {} fps",
            active.path.display(),
            active.frame_rate
        );
        recorder.phase = Phase::Recording(active);
        metrics::gauge!("recording_active").set(1.0);
        Ok(())
    }

    /// Join the previous writer, open the next one, and start its thread.
    fn open_session(
        &self,
        previous: Option<thread::JoinHandle<()>>,
        next_path: Option<PathBuf>,
        last_artifact: Option<&OutputArtifact>,
    ) -> Result<(ActiveRecording, thread::JoinHandle<()>), PipelineError> {
        let config = &self.shared.config;
        if let Some(previous) = previous {
            if previous.join().is_err() {
                warn!("previous frame-writer thread panicked");
            }
        }

        let source = *lock(&self.shared.source);
        if !(source.frame_rate.is_finite() && source.frame_rate > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "source frame rate {} cannot pace a recording",
                source.frame_rate
            )));
        }

        let path = match next_path {
            Some(path) => path,
            None => self
                .shared
                .fresh_output_path(last_artifact)
                .map_err(PipelineError::WriterInitFailed)?,
        };
        let settings = WriterSettings {
            path: path.clone(),
            frame_size: config.output_size,
            frame_rate: source.frame_rate,
            input_format: config.pixel_format,
        };
        let writer = self.shared.factory.open(&settings).map_err(|err| {
            warn!("failed to open video writer at {}: {err}", path.display());
            metrics::counter!("recording_sessions_total", "outcome" => "init_failed").increment(1);
            PipelineError::WriterInitFailed(err)
        })?;

        let started_at = Utc::now();
        let session =
            RecordingSession::open(writer, source.frame_rate, config.output_size, started_at);
        let (jobs_tx, jobs_rx) = bounded(config.writer_queue_depth);
        let signals = Arc::new(WriterSignals::default());
        let shared = Arc::clone(&self.shared);
        let finished_signals = Arc::clone(&signals);
        let handle = spawn_writer_worker(
            session,
            jobs_rx,
            Arc::clone(&signals),
            config.writer_ready_timeout(),
            move |outcome| shared.complete_recording(outcome, &finished_signals),
        )
        .map_err(|err| {
            error!("failed to spawn frame-writer worker: {err}");
            PipelineError::WorkerUnavailable("frame-writer")
        })?;

        let active = ActiveRecording {
            started_at,
            started: Instant::now(),
            frame_index: 0,
            frame_rate: source.frame_rate,
            dropped: 0,
            path,
            jobs: jobs_tx,
            signals,
        };
        Ok((active, handle))
    }

    /// Stop recording and return a handle resolving once the file is closed.
    ///
    /// Frames already queued for the writer are still appended. With nothing
    /// recording the handle resolves immediately with the last artifact, or
    /// with the failure of a session whose writer stopped on its own.
    pub fn end_recording(&self) -> FinishHandle {
        let mut recorder = lock(&self.shared.recorder);
        match std::mem::replace(&mut recorder.phase, Phase::Idle) {
            Phase::Idle => match recorder.unclaimed_failure.take() {
                Some(err) => {
                    warn!("reporting failure of a recording that stopped on its own: {err}");
                    FinishHandle::ready(Err(err))
                }
                None => FinishHandle::ready(Ok(recorder.last_artifact.clone())),
            },
            Phase::Starting { .. } => {
                recorder.phase = Phase::Starting {
                    end_requested: true,
                };
                let (tx, rx) = oneshot::channel();
                recorder.waiters.push(tx);
                FinishHandle { rx }
            }
            Phase::Finishing(closing) => {
                recorder.phase = Phase::Finishing(closing);
                let (tx, rx) = oneshot::channel();
                recorder.waiters.push(tx);
                FinishHandle { rx }
            }
            Phase::Recording(active) => {
                let (tx, rx) = oneshot::channel();
                recorder.waiters.push(tx);
                info!(
                    "ending recording {} after {} frame(s), {} dropped",
                    active.path.display(),
                    active.frame_index,
                    active.frames_dropped()
                );
                recorder.phase = Phase::Finishing(active.close());
                FinishHandle { rx }
            }
        }
    }

    /// Record a change of the delivered stream (camera switch or renegotiation).
    ///
    /// An active recording keeps the frame rate it started with.
    pub fn update_source(&self, info: SourceInfo) {
        let mut source = lock(&self.shared.source);
        if *source != info {
            info!(
                "source updated: {} fps, {:?} camera",
                info.frame_rate, info.facing
            );
        }
        *source = info;
    }

    pub fn source(&self) -> SourceInfo {
        *lock(&self.shared.source)
    }

    /// The most recently published pose, if one cleared the threshold.
    pub fn latest_pose(&self) -> Option<Arc<Person>> {
        lock(&self.shared.latest).clone()
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording_status().state
    }

    pub fn recording_status(&self) -> RecordingStatus {
        let recorder = lock(&self.shared.recorder);
        let last_artifact = recorder.last_artifact.clone();
        match &recorder.phase {
            Phase::Idle => RecordingStatus {
                state: RecordingState::Idle,
                path: None,
                frames_dropped: 0,
                elapsed: None,
                last_artifact,
            },
            Phase::Starting { .. } => RecordingStatus {
                state: RecordingState::Starting,
                path: None,
                frames_dropped: 0,
                elapsed: None,
                last_artifact,
            },
            Phase::Recording(active) => RecordingStatus {
                state: RecordingState::Recording {
                    started_at: active.started_at,
                    frame_index: active.frame_index,
                    frame_rate: active.frame_rate,
                },
                path: Some(active.path.clone()),
                frames_dropped: active.frames_dropped(),
                elapsed: Some(active.started.elapsed()),
                last_artifact,
            },
            Phase::Finishing(closing) => RecordingStatus {
                state: RecordingState::Finishing,
                path: Some(closing.path.clone()),
                frames_dropped: closing.dropped + closing.signals.dropped(),
                elapsed: Some(closing.started.elapsed()),
                last_artifact,
            },
        }
    }

    /// Cumulative counters, including frames the active writer has skipped.
    pub fn stats(&self) -> PipelineStats {
        let recorder = lock(&self.shared.recorder);
        let mut stats = self.shared.counters.snapshot();
        stats.writer_dropped += match &recorder.phase {
            Phase::Recording(active) => active.signals.dropped(),
            Phase::Finishing(closing) => closing.signals.dropped(),
            Phase::Idle | Phase::Starting { .. } => 0,
        };
        stats
    }

    /// Stop accepting frames, finish any active recording, and join the workers.
    ///
    /// Returns the outcome of the final recording. Later calls return the last
    /// artifact without doing anything else.
    ///
    /// Blocks until the writer has closed its file, so call it from a plain
    /// thread rather than from async code.
    pub fn shutdown(&self) -> FinishResult {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return Ok(lock(&self.shared.recorder).last_artifact.clone());
        }
        info!("shutting down pipeline");

        let result = self.end_recording().wait();

        lock(&self.inference_tx).take();
        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!("{name} thread panicked");
            }
        }
        let writer = lock(&self.shared.recorder).writer_thread.take();
        if let Some(handle) = writer {
            if handle.join().is_err() {
                error!("frame-writer thread panicked");
            }
        }

        let stats = self.stats();
        info!(
            "pipeline stopped: {} frames, {} inferences ({} skipped, {} failed), {} recorder drops",
            stats.frames_seen,
            stats.inferences_run,
            stats.inference_dropped,
            stats.inference_failures,
            stats.writer_dropped
        );
        result
    }
}

impl PipelineCoordinator {
    /// Stop without blocking: the recording is closed and the workers exit on
    /// their own threads, and nothing waits for them.
    fn shutdown_detached(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        warn!("pipeline dropped on an async runtime thread; finishing in the background");
        drop(self.end_recording());
        lock(&self.inference_tx).take();
        lock(&self.workers).clear();
    }
}

impl Drop for PipelineCoordinator {
    fn drop(&mut self) {
        // Blocking waits panic inside a runtime.
        if tokio::runtime::Handle::try_current().is_ok() {
            self.shutdown_detached();
            return;
        }
        if let Err(err) = self.shutdown() {
            warn!("final recording failed during shutdown: {err}");
        }
    }
}
