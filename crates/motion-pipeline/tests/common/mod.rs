#![allow(dead_code, clippy::unwrap_used)]

use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use motion_pipeline::{
    PipelineConfig, PresentationTime, RecordError, VideoWriter, WriterFactory, WriterSettings,
};
use pose_core::{InferenceError, KeyPoint, Person, Point, PoseEstimator};
use video_ingest::{Frame, FrameFormat, FrameSize};

pub const OUTPUT: FrameSize = FrameSize::new(8, 4);

pub fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        output_size: OUTPUT,
        output_dir: dir.to_path_buf(),
        writer_queue_depth: 16,
        ..PipelineConfig::default()
    }
}

pub fn frame(size: FrameSize, timestamp_ms: i64) -> Frame {
    Frame {
        data: vec![0; size.byte_len(FrameFormat::Bgr8)],
        width: size.width,
        height: size.height,
        timestamp_ms,
        format: FrameFormat::Bgr8,
    }
}

pub fn person(score: f32) -> Person {
    Person::from_fn(score, |part| {
        KeyPoint::new(part, Point::new(part.index() as f32, 1.0), 0.9)
    })
}

/// Estimator driven by a closure.
pub struct FnEstimator<F>(pub F);

impl<F> PoseEstimator for FnEstimator<F>
where
    F: FnMut(&Frame) -> Result<Person, InferenceError> + Send,
{
    fn estimate(&mut self, frame: &Frame) -> Result<Person, InferenceError> {
        (self.0)(frame)
    }
}

/// Box a closure as an estimator.
pub fn estimator<F>(f: F) -> Box<dyn PoseEstimator>
where
    F: FnMut(&Frame) -> Result<Person, InferenceError> + Send + 'static,
{
    Box::new(FnEstimator(f))
}

pub type Published = (Vec<KeyPoint>, FrameSize);

/// Consumer forwarding every delivery to a channel.
pub fn channel_consumer() -> (
    impl FnMut(&[KeyPoint], FrameSize) + Send + 'static,
    Receiver<Published>,
) {
    let (tx, rx) = unbounded();
    let consumer = move |keypoints: &[KeyPoint], size: FrameSize| {
        let _ = tx.send((keypoints.to_vec(), size));
    };
    (consumer, rx)
}

#[derive(Default)]
pub struct WriterLog {
    pub opened: Vec<WriterSettings>,
    pub appended: Vec<PresentationTime>,
    pub finished: Vec<PathBuf>,
}

/// Append faults injected into every writer a factory opens.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriterFaults {
    /// Fail the append of this index with an I/O error.
    pub fail_at: Option<u64>,
    /// Panic while appending this index.
    pub panic_at: Option<u64>,
}

/// In-memory writers; optionally each append blocks until released.
#[derive(Clone, Default)]
pub struct MemoryFactory {
    pub log: Arc<Mutex<WriterLog>>,
    pub fail_open: Arc<AtomicBool>,
    /// Writers report not ready while set.
    pub stalled: Arc<AtomicBool>,
    pub faults: WriterFaults,
    hold: Option<(Sender<u64>, Receiver<()>)>,
    open_hold: Option<(Sender<u64>, Receiver<()>)>,
}

/// Test-side controls for a held writer.
pub struct Hold {
    pub entered: Receiver<u64>,
    pub release: Sender<()>,
}

impl MemoryFactory {
    pub fn held() -> (Self, Hold) {
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let factory = Self {
            hold: Some((entered_tx, release_rx)),
            ..Self::default()
        };
        (
            factory,
            Hold {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    /// Factory whose `open` blocks until released.
    pub fn slow_open() -> (Self, Hold) {
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let factory = Self {
            open_hold: Some((entered_tx, release_rx)),
            ..Self::default()
        };
        (
            factory,
            Hold {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    pub fn with_faults(faults: WriterFaults) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }

    pub fn indices(&self) -> Vec<u64> {
        self.log
            .lock()
            .unwrap()
            .appended
            .iter()
            .map(|pts| pts.index)
            .collect()
    }
}

impl WriterFactory for MemoryFactory {
    fn open(&self, settings: &WriterSettings) -> Result<Box<dyn VideoWriter>, RecordError> {
        if let Some((entered, release)) = &self.open_hold {
            entered.send(0).unwrap();
            release.recv().unwrap();
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(RecordError::WriterExited("encoder unavailable".into()));
        }
        self.log.lock().unwrap().opened.push(settings.clone());
        Ok(Box::new(MemoryWriter {
            log: self.log.clone(),
            path: settings.path.clone(),
            hold: self.hold.clone(),
            stalled: self.stalled.clone(),
            faults: self.faults,
        }))
    }
}

struct MemoryWriter {
    log: Arc<Mutex<WriterLog>>,
    path: PathBuf,
    hold: Option<(Sender<u64>, Receiver<()>)>,
    stalled: Arc<AtomicBool>,
    faults: WriterFaults,
}

impl VideoWriter for MemoryWriter {
    fn is_ready(&mut self) -> bool {
        !self.stalled.load(Ordering::SeqCst)
    }

    fn append(&mut self, _frame: &Frame, pts: PresentationTime) -> Result<(), RecordError> {
        if let Some((entered, release)) = &self.hold {
            entered.send(pts.index).unwrap();
            release.recv().unwrap();
        }
        if self.faults.panic_at == Some(pts.index) {
            panic!("encoder crashed at frame {}", pts.index);
        }
        if self.faults.fail_at == Some(pts.index) {
            return Err(io::Error::other("disk full").into());
        }
        self.log.lock().unwrap().appended.push(pts);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), RecordError> {
        self.log.lock().unwrap().finished.push(self.path.clone());
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
