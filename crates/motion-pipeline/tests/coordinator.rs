#![allow(clippy::unwrap_used)]

mod common;

use std::{
    collections::VecDeque,
    future::Future,
    pin::pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll, Waker},
    thread,
    time::Duration,
};

use approx::assert_relative_eq;
use common::{
    MemoryFactory, OUTPUT, WriterFaults, channel_consumer, config, estimator, eventually, frame,
    person,
};
use motion_pipeline::{
    PipelineConfig, PipelineCoordinator, PipelineError, RecordError, RecordingState, SourceInfo,
};
use pose_core::{BodyPart, InferenceError, KeyPoint, Person, Point, PoseEstimator};
use video_ingest::{CameraFacing, FrameSize};

const TIMEOUT: Duration = Duration::from_secs(2);

fn confident() -> Box<dyn PoseEstimator> {
    estimator(|_| Ok(person(0.9)))
}

fn coordinator_with(factory: MemoryFactory, dir: &std::path::Path) -> PipelineCoordinator {
    coordinator_configured(factory, config(dir))
}

fn coordinator_configured(factory: MemoryFactory, config: PipelineConfig) -> PipelineCoordinator {
    let (consumer, _rx) = channel_consumer();
    PipelineCoordinator::new(
        config,
        SourceInfo::default(),
        confident(),
        consumer,
        Arc::new(factory),
    )
    .unwrap()
}

#[test]
fn ten_frames_at_thirty_fps_are_timestamped_by_index() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let coordinator = coordinator_with(factory.clone(), dir.path());

    coordinator.start_recording().unwrap();
    for k in 0..10 {
        coordinator.on_frame(frame(OUTPUT, k * 7));
    }
    let artifact = coordinator.end_recording().wait().unwrap().unwrap();

    assert_eq!(artifact.frame_count, 10);
    let log = factory.log.lock().unwrap();
    assert_eq!(log.appended.len(), 10);
    for (k, pts) in log.appended.iter().enumerate() {
        assert_eq!(pts.index, k as u64);
        assert_relative_eq!(pts.as_secs_f64(), k as f64 / 30.0);
    }
    assert_eq!(log.finished, vec![artifact.path.clone()]);
}

#[test]
fn recording_uses_the_current_source_rate() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let coordinator = coordinator_with(factory.clone(), dir.path());

    coordinator.update_source(SourceInfo {
        frame_rate: 60.0,
        facing: CameraFacing::Back,
    });
    coordinator.start_recording().unwrap();
    for k in 0..3 {
        coordinator.on_frame(frame(OUTPUT, k));
    }
    let artifact = coordinator.end_recording().wait().unwrap().unwrap();

    assert_eq!(artifact.frame_rate, 60.0);
    let log = factory.log.lock().unwrap();
    assert_eq!(log.opened[0].frame_rate, 60.0);
    assert_relative_eq!(log.appended[2].as_secs_f64(), 2.0 / 60.0);
}

#[test]
fn at_most_one_inference_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let counting = {
        let in_flight = in_flight.clone();
        let max_in_flight = max_in_flight.clone();
        estimator(move |_| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(person(0.9))
        })
    };
    let (consumer, _rx) = channel_consumer();
    let coordinator = PipelineCoordinator::new(
        config(dir.path()),
        SourceInfo::default(),
        counting,
        consumer,
        Arc::new(MemoryFactory::default()),
    )
    .unwrap();

    for k in 0..30 {
        coordinator.on_frame(frame(OUTPUT, k));
        thread::sleep(Duration::from_millis(1));
    }
    coordinator.shutdown().unwrap();

    let stats = coordinator.stats();
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(stats.frames_seen, 30);
    assert!(stats.inference_dropped > 0);
    assert_eq!(stats.inferences_run + stats.inference_dropped, 30);
}

#[test]
fn threshold_boundary_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let scores = Arc::new(Mutex::new(VecDeque::from([0.2_f32, 0.200_000_1])));
    let scripted = {
        let scores = scores.clone();
        estimator(move |_| match scores.lock().unwrap().pop_front() {
            Some(score) => Ok(person(score)),
            None => Err(InferenceError::NoPerson),
        })
    };
    let (consumer, published) = channel_consumer();
    let coordinator = PipelineCoordinator::new(
        config(dir.path()),
        SourceInfo::default(),
        scripted,
        consumer,
        Arc::new(MemoryFactory::default()),
    )
    .unwrap();

    coordinator.on_frame(frame(OUTPUT, 0));
    let (keypoints, size) = published.recv_timeout(TIMEOUT).unwrap();
    assert!(keypoints.is_empty());
    assert_eq!(size, OUTPUT);
    assert!(coordinator.latest_pose().is_none());

    assert!(eventually(|| {
        coordinator.on_frame(frame(OUTPUT, 1));
        !published.is_empty()
    }));
    let (keypoints, _) = published.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(keypoints.len(), BodyPart::COUNT);
    assert_relative_eq!(coordinator.latest_pose().unwrap().score(), 0.200_000_1);
    assert_eq!(coordinator.stats().poses_cleared, 1);
}

#[test]
fn front_camera_poses_are_mirrored_before_publication() {
    let dir = tempfile::tempdir().unwrap();
    let lopsided = estimator(|_| {
        Ok(Person::from_fn(0.9, |part| {
            let x = if part == BodyPart::RightWrist { 10.0 } else { 30.0 };
            KeyPoint::new(part, Point::new(x, 5.0), 0.8)
        }))
    });
    let (consumer, published) = channel_consumer();
    let coordinator = PipelineCoordinator::new(
        config(dir.path()),
        SourceInfo {
            frame_rate: 30.0,
            facing: CameraFacing::Front,
        },
        lopsided,
        consumer,
        Arc::new(MemoryFactory::default()),
    )
    .unwrap();

    let wide = FrameSize::new(64, 32);
    coordinator.on_frame(frame(wide, 0));
    let (keypoints, size) = published.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(size, wide);
    let left_wrist = keypoints[BodyPart::LeftWrist.index()];
    assert_eq!(left_wrist.body_part, BodyPart::LeftWrist);
    assert_eq!(left_wrist.coordinate.x, 54.0);
    assert_eq!(keypoints[BodyPart::RightWrist.index()].coordinate.x, 34.0);
}

#[test]
fn gate_is_released_after_failures_and_panics() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let flaky = {
        let calls = calls.clone();
        estimator(move |_| {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(person(0.9)),
                1 => panic!("model crashed"),
                2 => Err(InferenceError::Backend("cuda error".into())),
                _ => Err(InferenceError::NoPerson),
            }
        })
    };
    let (consumer, published) = channel_consumer();
    let coordinator = PipelineCoordinator::new(
        config(dir.path()),
        SourceInfo::default(),
        flaky,
        consumer,
        Arc::new(MemoryFactory::default()),
    )
    .unwrap();

    coordinator.on_frame(frame(OUTPUT, 0));
    published.recv_timeout(TIMEOUT).unwrap();
    assert!(eventually(|| {
        coordinator.on_frame(frame(OUTPUT, 1));
        calls.load(Ordering::SeqCst) >= 4
    }));
    assert!(eventually(|| coordinator.stats().inference_failures >= 3));

    // Failures neither publish nor clear the last pose.
    assert!(published.try_recv().is_err());
    assert!(coordinator.latest_pose().is_some());
}

#[test]
fn start_then_end_without_frames_yields_empty_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let coordinator = coordinator_with(factory.clone(), dir.path());

    coordinator.start_recording().unwrap();
    let artifact = coordinator.end_recording().wait().unwrap().unwrap();

    assert_eq!(artifact.frame_count, 0);
    assert_eq!(artifact.duration, Duration::ZERO);
    assert_eq!(factory.log.lock().unwrap().finished.len(), 1);
    assert_eq!(coordinator.recording_state(), RecordingState::Idle);
}

#[test]
fn writer_not_ready_drops_never_advance_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, hold) = MemoryFactory::held();
    let (consumer, _rx) = channel_consumer();
    let coordinator = PipelineCoordinator::new(
        motion_pipeline::PipelineConfig {
            writer_queue_depth: 1,
            ..config(dir.path())
        },
        SourceInfo::default(),
        confident(),
        consumer,
        Arc::new(factory.clone()),
    )
    .unwrap();

    coordinator.start_recording().unwrap();
    coordinator.on_frame(frame(OUTPUT, 0));
    assert_eq!(hold.entered.recv_timeout(TIMEOUT).unwrap(), 0);

    // Writer busy with frame 0: one slot of queue, then drops.
    coordinator.on_frame(frame(OUTPUT, 1));
    coordinator.on_frame(frame(OUTPUT, 2));
    coordinator.on_frame(frame(OUTPUT, 3));
    let status = coordinator.recording_status();
    assert_eq!(status.frames_dropped, 2);
    assert!(matches!(
        status.state,
        RecordingState::Recording { frame_index: 2, .. }
    ));

    hold.release.send(()).unwrap();
    assert_eq!(hold.entered.recv_timeout(TIMEOUT).unwrap(), 1);
    coordinator.on_frame(frame(OUTPUT, 4));
    for _ in 0..2 {
        hold.release.send(()).unwrap();
    }

    let artifact = coordinator.end_recording().wait().unwrap().unwrap();
    assert_eq!(factory.indices(), vec![0, 1, 2]);
    assert_eq!(artifact.frame_count, 3);
    assert_eq!(coordinator.stats().writer_dropped, 2);
}

#[test]
fn mismatched_frames_are_kept_out_of_the_recording() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let coordinator = coordinator_with(factory.clone(), dir.path());

    coordinator.start_recording().unwrap();
    coordinator.on_frame(frame(OUTPUT, 0));
    coordinator.on_frame(frame(FrameSize::new(16, 16), 1));
    coordinator.on_frame(frame(OUTPUT, 2));
    let artifact = coordinator.end_recording().wait().unwrap().unwrap();

    assert_eq!(artifact.frame_count, 2);
    assert_eq!(factory.indices(), vec![0, 1]);
    assert_eq!(coordinator.stats().writer_dropped, 1);
}

#[test]
fn writer_init_failure_leaves_coordinator_idle_and_inferring() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    factory.fail_open.store(true, Ordering::SeqCst);
    let (consumer, published) = channel_consumer();
    let coordinator = PipelineCoordinator::new(
        config(dir.path()),
        SourceInfo::default(),
        confident(),
        consumer,
        Arc::new(factory.clone()),
    )
    .unwrap();

    assert!(matches!(
        coordinator.start_recording(),
        Err(PipelineError::WriterInitFailed(_))
    ));
    assert_eq!(coordinator.recording_state(), RecordingState::Idle);

    coordinator.on_frame(frame(OUTPUT, 0));
    let (keypoints, _) = published.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(keypoints.len(), BodyPart::COUNT);

    factory.fail_open.store(false, Ordering::SeqCst);
    coordinator.start_recording().unwrap();
    assert_eq!(coordinator.recording_state().label(), "recording");
}

#[test]
fn start_is_idempotent_and_busy_while_finishing() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, hold) = MemoryFactory::held();
    let coordinator = coordinator_with(factory.clone(), dir.path());

    coordinator.start_recording().unwrap();
    coordinator.start_recording().unwrap();
    assert_eq!(factory.log.lock().unwrap().opened.len(), 1);

    coordinator.on_frame(frame(OUTPUT, 0));
    assert_eq!(hold.entered.recv_timeout(TIMEOUT).unwrap(), 0);
    let finishing = coordinator.end_recording();
    assert_eq!(coordinator.recording_state(), RecordingState::Finishing);
    assert!(matches!(
        coordinator.start_recording(),
        Err(PipelineError::RecordingBusy)
    ));

    hold.release.send(()).unwrap();
    let artifact = finishing.wait().unwrap().unwrap();
    assert_eq!(artifact.frame_count, 1);
    assert_eq!(coordinator.recording_state(), RecordingState::Idle);
}

#[test]
fn ending_while_idle_returns_the_previous_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let coordinator = coordinator_with(factory, dir.path());

    assert_eq!(coordinator.end_recording().wait().unwrap(), None);

    coordinator.start_recording().unwrap();
    coordinator.on_frame(frame(OUTPUT, 0));
    let artifact = coordinator.end_recording().wait().unwrap();
    assert!(artifact.is_some());
    assert_eq!(coordinator.end_recording().wait().unwrap(), artifact);
}

#[test]
fn each_session_gets_a_fresh_path() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let coordinator = coordinator_with(factory.clone(), dir.path());

    for _ in 0..3 {
        coordinator.start_recording().unwrap();
        coordinator.end_recording().wait().unwrap();
    }

    let log = factory.log.lock().unwrap();
    let paths: Vec<_> = log.opened.iter().map(|s| s.path.clone()).collect();
    assert_eq!(paths.len(), 3);
    assert_ne!(paths[0], paths[1]);
    assert_ne!(paths[1], paths[2]);
    for path in &paths {
        assert_eq!(path.parent().unwrap(), dir.path());
        assert_eq!(path.extension().unwrap(), "mov");
    }
}

#[test]
fn finish_handle_can_be_polled() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator_with(MemoryFactory::default(), dir.path());
    coordinator.start_recording().unwrap();
    coordinator.on_frame(frame(OUTPUT, 0));

    let mut handle = pin!(coordinator.end_recording());
    let mut cx = Context::from_waker(Waker::noop());
    let mut result = None;
    assert!(eventually(|| match handle.as_mut().poll(&mut cx) {
        Poll::Ready(outcome) => {
            result = Some(outcome);
            true
        }
        Poll::Pending => false,
    }));
    let artifact = result.unwrap().unwrap().unwrap();
    assert_eq!(artifact.frame_count, 1);
}

#[test]
fn shutdown_finishes_the_active_recording() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let coordinator = coordinator_with(factory.clone(), dir.path());

    coordinator.start_recording().unwrap();
    for k in 0..3 {
        coordinator.on_frame(frame(OUTPUT, k));
    }
    let artifact = coordinator.shutdown().unwrap().unwrap();
    assert_eq!(artifact.frame_count, 3);
    assert_eq!(factory.log.lock().unwrap().finished.len(), 1);

    assert!(matches!(
        coordinator.start_recording(),
        Err(PipelineError::WorkerUnavailable(_))
    ));
    coordinator.on_frame(frame(OUTPUT, 9));
    assert_eq!(factory.indices().len(), 3);
}

#[test]
fn writer_stall_past_timeout_drops_one_frame_and_keeps_recording() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let coordinator = coordinator_configured(
        factory.clone(),
        PipelineConfig {
            writer_ready_timeout_ms: 50,
            ..config(dir.path())
        },
    );

    factory.stalled.store(true, Ordering::SeqCst);
    coordinator.start_recording().unwrap();
    coordinator.on_frame(frame(OUTPUT, 0));
    assert!(eventually(|| coordinator.stats().writer_dropped == 1));
    let status = coordinator.recording_status();
    assert_eq!(status.state.label(), "recording");
    assert_eq!(status.frames_dropped, 1);

    factory.stalled.store(false, Ordering::SeqCst);
    for k in 1..=4 {
        coordinator.on_frame(frame(OUTPUT, k));
    }
    let artifact = coordinator.end_recording().wait().unwrap().unwrap();

    assert_eq!(artifact.frame_count, 4);
    assert_eq!(factory.indices(), vec![0, 1, 2, 3]);
    assert_eq!(coordinator.stats().writer_dropped, 1);
}

#[test]
fn append_error_fails_the_session_and_drops_later_frames() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::with_faults(WriterFaults {
        fail_at: Some(1),
        ..WriterFaults::default()
    });
    let coordinator = coordinator_with(factory.clone(), dir.path());

    coordinator.start_recording().unwrap();
    coordinator.on_frame(frame(OUTPUT, 0));
    coordinator.on_frame(frame(OUTPUT, 1));
    // Once the writer has failed, frames are refused before they are queued.
    assert!(eventually(|| {
        coordinator.on_frame(frame(OUTPUT, 2));
        coordinator.stats().writer_dropped > 0
    }));
    assert_eq!(coordinator.recording_state().label(), "recording");

    let outcome = coordinator.end_recording().wait();
    assert!(matches!(
        outcome,
        Err(PipelineError::WriterFailed(RecordError::Io(_)))
    ));
    assert_eq!(factory.indices(), vec![0]);
    assert_eq!(factory.log.lock().unwrap().finished.len(), 1);
    assert_eq!(coordinator.end_recording().wait().unwrap(), None);
}

#[test]
fn writer_panic_is_reported_by_the_next_end_recording() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::with_faults(WriterFaults {
        panic_at: Some(1),
        ..WriterFaults::default()
    });
    let coordinator = coordinator_with(factory.clone(), dir.path());

    coordinator.start_recording().unwrap();
    for k in 0..3 {
        coordinator.on_frame(frame(OUTPUT, k));
    }
    assert!(eventually(|| coordinator.recording_state() == RecordingState::Idle));
    coordinator.on_frame(frame(OUTPUT, 3));
    assert_eq!(factory.indices(), vec![0]);

    assert!(matches!(
        coordinator.end_recording().wait(),
        Err(PipelineError::WriterFailed(RecordError::WriterExited(_)))
    ));
    assert_eq!(coordinator.end_recording().wait().unwrap(), None);

    coordinator.start_recording().unwrap();
    coordinator.on_frame(frame(OUTPUT, 4));
    let artifact = coordinator.end_recording().wait().unwrap().unwrap();
    assert_eq!(artifact.frame_count, 1);
}

#[test]
fn slow_writer_open_does_not_block_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, hold) = MemoryFactory::slow_open();
    let (consumer, published) = channel_consumer();
    let coordinator = PipelineCoordinator::new(
        config(dir.path()),
        SourceInfo::default(),
        confident(),
        consumer,
        Arc::new(factory.clone()),
    )
    .unwrap();

    thread::scope(|scope| {
        let starter = scope.spawn(|| coordinator.start_recording());
        hold.entered.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(coordinator.recording_state(), RecordingState::Starting);

        coordinator.on_frame(frame(OUTPUT, 0));
        published.recv_timeout(TIMEOUT).unwrap();
        coordinator.start_recording().unwrap();

        // Ending before the writer is open closes it as soon as it is.
        let ending = coordinator.end_recording();
        hold.release.send(()).unwrap();
        starter.join().unwrap().unwrap();

        let artifact = ending.wait().unwrap().unwrap();
        assert_eq!(artifact.frame_count, 0);
    });
    assert_eq!(factory.log.lock().unwrap().opened.len(), 1);
    assert_eq!(coordinator.recording_state(), RecordingState::Idle);
}

#[test]
fn dropping_inside_a_runtime_finishes_in_the_background() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    runtime.block_on(async {
        let coordinator = coordinator_with(factory.clone(), dir.path());
        coordinator.start_recording().unwrap();
        coordinator.on_frame(frame(OUTPUT, 0));
        coordinator.on_frame(frame(OUTPUT, 1));
        let artifact = coordinator.end_recording().await.unwrap().unwrap();
        assert_eq!(artifact.frame_count, 2);

        coordinator.start_recording().unwrap();
        coordinator.on_frame(frame(OUTPUT, 2));
        drop(coordinator);
    });

    assert!(eventually(|| factory.log.lock().unwrap().finished.len() == 2));
    assert_eq!(factory.indices(), vec![0, 1, 0]);
}

#[test]
fn poses_reaching_the_frame_edge_are_counted() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let drifting = {
        let calls = calls.clone();
        estimator(move |_| {
            let edge_x = match calls.fetch_add(1, Ordering::SeqCst) {
                0 => 50.0,
                1 => 5.0,
                _ => return Err(InferenceError::NoPerson),
            };
            Ok(Person::from_fn(0.9, |part| {
                let x = if part == BodyPart::Nose { edge_x } else { 50.0 };
                KeyPoint::new(part, Point::new(x, 50.0), 0.8)
            }))
        })
    };
    let (consumer, published) = channel_consumer();
    let coordinator = PipelineCoordinator::new(
        config(dir.path()),
        SourceInfo::default(),
        drifting,
        consumer,
        Arc::new(MemoryFactory::default()),
    )
    .unwrap();

    let square = FrameSize::new(100, 100);
    coordinator.on_frame(frame(square, 0));
    published.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(coordinator.stats().poses_out_of_frame, 0);

    assert!(eventually(|| {
        coordinator.on_frame(frame(square, 1));
        !published.is_empty()
    }));
    // Still published, only counted.
    let (keypoints, _) = published.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(keypoints[BodyPart::Nose.index()].coordinate.x, 5.0);
    assert_eq!(coordinator.stats().poses_out_of_frame, 1);
}
