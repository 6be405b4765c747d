use std::{
    io::Read,
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::{Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, warn};

use crate::{
    SourceKind, camera_device_path,
    formats::CaptureMode,
    types::{CaptureError, Frame, FrameFormat, FrameSize},
};

/// Depth of the reader → consumer queue. Kept small so a slow consumer
/// backpressures ffmpeg instead of buffering stale frames.
const READER_QUEUE: usize = 2;

/// Spawn an ffmpeg process decoding `uri` into `output`-sized BGR8 frames.
///
/// Devices are opened through video4linux2 with the negotiated `mode`; files
/// are paced at their native rate (`-re`) so they behave like a live camera.
pub fn spawn_source_reader(
    uri: &str,
    mode: &CaptureMode,
    output: FrameSize,
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let scale_arg = format!("scale={}:{}", output.width, output.height);
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner").arg("-loglevel").arg("error");

    match SourceKind::from_uri(uri) {
        SourceKind::Device => {
            let device = camera_device_path(uri).ok_or_else(|| CaptureError::Open {
                uri: uri.to_string(),
            })?;
            cmd.arg("-f").arg("video4linux2");
            if let Some(input_format) = mode.ffmpeg_input_format() {
                cmd.arg("-input_format").arg(input_format);
            }
            cmd.arg("-video_size")
                .arg(format!("{}x{}", mode.width, mode.height))
                .arg("-framerate")
                .arg(format!("{}", mode.frame_rate))
                .arg("-i")
                .arg(device);
        }
        SourceKind::Rtsp => {
            cmd.arg("-rtsp_transport")
                .arg("tcp")
                .arg("-fflags")
                .arg("nobuffer")
                .arg("-flags")
                .arg("low_delay")
                .arg("-i")
                .arg(uri);
        }
        SourceKind::File => {
            cmd.arg("-re").arg("-i").arg(uri);
        }
    }

    cmd.arg("-an")
        .arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg(FrameFormat::Bgr8.ffmpeg_pix_fmt())
        .arg("-f")
        .arg("rawvideo")
        .arg("-");

    debug!("starting ffmpeg reader for {uri} at {output}");
    spawn_ffmpeg_reader(cmd, output, READER_QUEUE)
}

fn spawn_ffmpeg_reader(
    mut cmd: Command,
    output: FrameSize,
    queue_size: usize,
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let (tx, rx) = bounded(queue_size);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|err| CaptureError::Other(err.into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

    thread::Builder::new()
        .name("frame-source".into())
        .spawn(move || {
            if let Err(err) = ffmpeg_loop(stdout, child, output, tx.clone()) {
                let _ = tx.send(Err(err));
            }
        })?;

    Ok(rx)
}

fn ffmpeg_loop(
    mut stdout: impl Read,
    mut child: Child,
    output: FrameSize,
    tx: Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let format = FrameFormat::Bgr8;
    let mut buffer = vec![0u8; output.byte_len(format)];
    let mut result = Ok(());

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                let timestamp_ms = Utc::now().timestamp_millis();
                if tx
                    .send(Ok(Frame {
                        data: buffer.clone(),
                        width: output.width,
                        height: output.height,
                        timestamp_ms,
                        format,
                    }))
                    .is_err()
                {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("frame source reached end of stream");
                break;
            }
            Err(err) => {
                result = Err(CaptureError::Other(err.into()));
                break;
            }
        }
    }

    if let Err(err) = child.kill() {
        warn!("failed to stop ffmpeg reader: {err}");
    }
    let _ = child.wait();
    result
}
