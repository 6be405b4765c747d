//! Wires a live frame source to the pipeline coordinator.
//!
//! The main thread pulls decoded frames and feeds `on_frame`; an optional
//! `record-control` thread starts and ends a timed recording. Ctrl+C stops the
//! loop, after which the coordinator finishes any active recording.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use crossbeam_channel::RecvTimeoutError;
use motion_pipeline::{FfmpegWriterFactory, PipelineCoordinator, SourceInfo, telemetry};
use pose_core::{BodyPart, KeyPoint, build_estimator};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use video_ingest::{
    CaptureError, CaptureMode, FrameSize, SourceKind, query_device_formats, select_capture_mode,
    spawn_source_reader,
};

use crate::cli::{FormatsArgs, RunConfig};

/// Frame rate assumed when the source cannot report one.
const FALLBACK_FRAME_RATE: f64 = 30.0;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run the pipeline until the source ends or Ctrl+C is pressed.
pub fn run(config: RunConfig) -> Result<()> {
    let _telemetry_guard = telemetry::enter_runtime(&config.pipeline.telemetry);
    let prometheus = telemetry::init_metrics_recorder();
    let run_span = tracing::info_span!(
        "motion_camera.run",
        source = %config.source_uri,
        output = %config.pipeline.output_size,
        facing = ?config.facing,
        model = config.pipeline.model.model_type.label()
    );
    let _run_span_guard = run_span.enter();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(err) = ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst)) {
            warn!("failed to install Ctrl+C handler: {err}");
        }
    }

    let mode = negotiate_mode(&config.source_uri, config.capture_size)?;
    info!(
        "capturing {} at {}x{} @ {} fps{}",
        config.source_uri,
        mode.width,
        mode.height,
        mode.frame_rate,
        mode.fourcc
            .as_deref()
            .map(|fourcc| format!(" ({fourcc})"))
            .unwrap_or_default()
    );
    let frames = spawn_source_reader(&config.source_uri, &mode, config.pipeline.output_size)
        .with_context(|| format!("failed to open source {}", config.source_uri))?;

    let estimator =
        build_estimator(&config.pipeline.model).context("failed to load the pose model")?;
    info!("pose estimator ready: {}", estimator.name());

    let factory = Arc::new(FfmpegWriterFactory::new(&config.pipeline));
    let coordinator = Arc::new(PipelineCoordinator::new(
        config.pipeline.clone(),
        SourceInfo {
            frame_rate: mode.frame_rate,
            facing: config.facing,
        },
        estimator,
        pose_logger(config.emit_json),
        factory,
    )?);

    let record_control = match config.record_after {
        Some(after) => Some(
            telemetry::spawn_thread("record-control", {
                let coordinator = coordinator.clone();
                let shutdown = shutdown.clone();
                let record_for = config.record_for;
                move || control_recording(&coordinator, &shutdown, after, record_for)
            })
            .context("failed to spawn record-control thread")?,
        ),
        None => None,
    };

    while !shutdown.load(Ordering::SeqCst) {
        match frames.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(frame)) => coordinator.on_frame(frame),
            Ok(Err(err)) => {
                metrics::counter!("capture_errors_total").increment(1);
                warn!("capture error: {err}");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("source {} ended", config.source_uri);
                break;
            }
        }
    }
    shutdown.store(true, Ordering::SeqCst);

    if let Some(handle) = record_control {
        if handle.join().is_err() {
            error!("record-control thread panicked");
        }
    }

    match coordinator.shutdown() {
        Ok(Some(artifact)) => info!(
            "last recording: {} ({} frames)",
            artifact.path.display(),
            artifact.frame_count
        ),
        Ok(None) => {}
        Err(err) => error!("final recording failed: {err}"),
    }
    let stats = coordinator.stats();
    info!(
        "{} frames, {} poses published ({} near the frame edge), {} cleared",
        stats.frames_seen, stats.poses_published, stats.poses_out_of_frame, stats.poses_cleared
    );
    debug!("metrics snapshot:\n{}", prometheus.render());
    Ok(())
}

/// Print the formats a device advertises, optionally with the negotiated mode.
pub fn list_formats(args: FormatsArgs) -> Result<()> {
    let formats = query_device_formats(&args.device)
        .with_context(|| format!("failed to query {}", args.device))?;
    let selected = args
        .select
        .and_then(|size| select_capture_mode(&formats, (size.width, size.height)));

    if args.json {
        #[derive(Serialize)]
        struct Listing<'a> {
            device: &'a str,
            formats: &'a [video_ingest::CaptureFormat],
            selected: Option<&'a CaptureMode>,
        }
        let listing = Listing {
            device: &args.device,
            formats: &formats,
            selected: selected.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("{}:", args.device);
    for format in &formats {
        let rates: Vec<String> = format.frame_rates.iter().map(|r| format!("{r}")).collect();
        println!(
            "  {} {}x{} @ {} fps",
            format.fourcc,
            format.width,
            format.height,
            rates.join(", ")
        );
    }
    match (args.select, selected) {
        (Some(_), Some(mode)) => println!(
            "selected: {} {}x{} @ {} fps",
            mode.fourcc.as_deref().unwrap_or("?"),
            mode.width,
            mode.height,
            mode.frame_rate
        ),
        (Some(size), None) => println!("selected: no format offers {size}"),
        (None, _) => {}
    }
    Ok(())
}

/// Pick the capture mode for `uri`.
///
/// Devices are queried and must offer `desired`; when querying itself is not
/// possible, and for streams and files, the source is opened as-is at the
/// fallback rate.
fn negotiate_mode(uri: &str, desired: FrameSize) -> Result<CaptureMode> {
    let fallback = CaptureMode {
        fourcc: None,
        width: desired.width,
        height: desired.height,
        frame_rate: FALLBACK_FRAME_RATE,
    };
    if SourceKind::from_uri(uri) != SourceKind::Device {
        return Ok(fallback);
    }

    let formats = match query_device_formats(uri) {
        Ok(formats) => formats,
        Err(err) => {
            warn!("could not query {uri} ({err}), using {desired} @ {FALLBACK_FRAME_RATE} fps");
            return Ok(fallback);
        }
    };
    match select_capture_mode(&formats, (desired.width, desired.height)) {
        Some(mode) => Ok(mode),
        None => bail!(CaptureError::NoMatchingFormat {
            width: desired.width,
            height: desired.height,
        }),
    }
}

fn control_recording(
    coordinator: &PipelineCoordinator,
    shutdown: &AtomicBool,
    after: Duration,
    record_for: Option<Duration>,
) {
    if !sleep_unless_shutdown(shutdown, after) {
        return;
    }
    if let Err(err) = coordinator.start_recording() {
        error!("failed to start recording: {err}");
        return;
    }
    let Some(record_for) = record_for else {
        return;
    };
    // Shutdown finishes the recording itself.
    if !sleep_unless_shutdown(shutdown, record_for) {
        return;
    }
    match coordinator.end_recording().wait() {
        Ok(Some(artifact)) => info!(
            "recorded {} ({} frames, {:.2}s)",
            artifact.path.display(),
            artifact.frame_count,
            artifact.duration.as_secs_f64()
        ),
        Ok(None) => {}
        Err(err) => error!("recording failed: {err}"),
    }
}

/// Sleep for `duration`, returning `false` early if shutdown is requested.
fn sleep_unless_shutdown(shutdown: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

#[derive(Serialize)]
struct PoseLine<'a> {
    frame: FrameSize,
    keypoints: &'a [KeyPoint],
}

fn pose_logger(emit_json: bool) -> impl FnMut(&[KeyPoint], FrameSize) + Send + 'static {
    move |keypoints: &[KeyPoint], frame: FrameSize| {
        if emit_json {
            match serde_json::to_string(&PoseLine { frame, keypoints }) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!("failed to serialise pose: {err}"),
            }
        } else if let Some(nose) = keypoints.get(BodyPart::Nose.index()) {
            debug!(
                "pose: nose at ({:.1}, {:.1}) score {:.2}",
                nose.coordinate.x, nose.coordinate.y, nose.score
            );
        } else {
            debug!("pose cleared");
        }
    }
}
