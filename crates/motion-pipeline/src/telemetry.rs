//! Tracing subscriber setup, the Prometheus recorder for pipeline metrics, and
//! a thread spawner that carries the subscriber into worker threads.

use std::{
    io,
    path::{Path, PathBuf},
    sync::OnceLock,
    thread,
    time::Duration,
};

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    layer::SubscriberExt,
    prelude::*,
};

use crate::config::TelemetryOptions;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static PROM_UPKEEP_THREAD: OnceLock<Option<thread::JoinHandle<()>>> = OnceLock::new();

/// Keeps the subscriber installed for the current thread and flushes the
/// Chrome trace, if any, when dropped.
pub struct TelemetryGuard {
    _default_guard: tracing::subscriber::DefaultGuard,
    chrome_guard: Option<tracing_chrome::FlushGuard>,
    chrome_trace_path: Option<PathBuf>,
}

/// Ensure the global metrics recorder is installed and return the Prometheus handle.
pub fn init_metrics_recorder() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        if let Err(err) = metrics::set_global_recorder(recorder) {
            warn!("metrics recorder already installed, Prometheus snapshot will be empty: {err}");
        }
        describe_metrics();

        let upkeep_handle = handle.clone();
        PROM_UPKEEP_THREAD.get_or_init(|| {
            match spawn_thread("prometheus-upkeep", move || {
                loop {
                    thread::sleep(Duration::from_secs(5));
                    upkeep_handle.run_upkeep();
                }
            }) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!("failed to spawn prometheus upkeep thread: {err}");
                    None
                }
            }
        });

        handle
    })
}

fn describe_metrics() {
    describe_counter!("pipeline_frames_total", Unit::Count, "Frames delivered to the coordinator");
    describe_counter!(
        "pipeline_inference_dropped_total",
        Unit::Count,
        "Frames skipped because an inference was in flight"
    );
    describe_counter!(
        "pipeline_pose_updates_replaced_total",
        Unit::Count,
        "Pose updates superseded before the consumer saw them"
    );
    describe_counter!(
        "pose_inference_failures_total",
        Unit::Count,
        "Estimator errors and panics by kind"
    );
    describe_histogram!("pose_inference_seconds", Unit::Seconds, "Estimator latency");
    describe_counter!(
        "pose_out_of_frame_total",
        Unit::Count,
        "Published poses reaching into the frame margin"
    );
    describe_gauge!("recording_active", "1 while a recording session accepts frames");
    describe_counter!(
        "recording_frames_written_total",
        Unit::Count,
        "Frames appended to the video writer"
    );
    describe_counter!(
        "recording_frames_dropped_total",
        Unit::Count,
        "Frames kept out of the recording by reason"
    );
    describe_counter!("recording_failures_total", Unit::Count, "Writer append failures");
    describe_counter!(
        "recording_sessions_total",
        Unit::Count,
        "Recording sessions by outcome"
    );
    describe_histogram!(
        "recording_finish_seconds",
        Unit::Seconds,
        "Time spent closing the output file"
    );
    describe_gauge!("pipeline_queue_depth", "Frames waiting for the video writer");
}

/// Access the Prometheus handle when already initialised.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

/// Install the tracing subscriber for the calling thread.
///
/// Threads started through [`spawn_thread`] inherit it. The filter comes from
/// `RUST_LOG`, then `opts.log_filter`, then `info`.
pub fn enter_runtime(opts: &TelemetryOptions) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(opts.log_filter.as_deref().unwrap_or("info"))
    });

    let (chrome_layer, chrome_guard) = match opts.chrome_trace_path.as_ref() {
        Some(path) => match build_chrome_layer(path) {
            Ok((layer, guard)) => (Some(layer), Some(guard)),
            Err(err) => {
                eprintln!(
                    "failed to initialise chrome trace writer at {}: {err}",
                    path.display()
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let span_only_filter = filter_fn(|metadata| metadata.is_span());

    let default_guard = tracing::subscriber::set_default(
        tracing_subscriber::registry()
            .with(chrome_layer.map(|layer| layer.with_filter(span_only_filter)))
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_names(true)
                    .with_timer(fmt::time::uptime())
                    .with_filter(env_filter),
            )
            .with(tracing_error::ErrorLayer::default()),
    );

    TelemetryGuard {
        _default_guard: default_guard,
        chrome_guard,
        chrome_trace_path: opts.chrome_trace_path.clone(),
    }
}

/// Spawn a thread that inherits the current tracing dispatcher.
pub fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn build_chrome_layer(
    path: &Path,
) -> Result<
    (
        tracing_chrome::ChromeLayer<tracing_subscriber::Registry>,
        tracing_chrome::FlushGuard,
    ),
    std::io::Error,
> {
    let file = std::fs::File::create(path)?;
    let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(tracing_chrome::TraceStyle::Threaded)
        .build();
    Ok((layer, guard))
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.chrome_guard.take() {
            guard.flush();
            if let Some(path) = self.chrome_trace_path.as_ref() {
                tracing::info!("chrome trace written to {}", path.display());
            }
        }
    }
}
