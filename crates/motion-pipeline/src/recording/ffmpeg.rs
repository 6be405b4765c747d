use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use tracing::{debug, warn};
use video_ingest::Frame;

use super::{PresentationTime, VideoWriter, WriterFactory, WriterSettings};
use crate::{config::PipelineConfig, error::RecordError};

/// Spawns an ffmpeg encoder per session.
#[derive(Clone, Debug)]
pub struct FfmpegWriterFactory {
    program: PathBuf,
    codec: String,
}

impl FfmpegWriterFactory {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            codec: config.codec.clone(),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn open(&self, settings: &WriterSettings) -> Result<Box<dyn VideoWriter>, RecordError> {
        Ok(Box::new(FfmpegWriter::spawn(&self.program, &self.codec, settings)?))
    }
}

/// Encodes raw frames fed over stdin.
///
/// The input rate is pinned to the session rate and frames are written in
/// index order, so the container timestamps come out as `index / rate`.
pub struct FfmpegWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    frames: u64,
}

impl FfmpegWriter {
    pub fn spawn(
        program: &Path,
        codec: &str,
        settings: &WriterSettings,
    ) -> Result<Self, RecordError> {
        let mut cmd = Command::new(program);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg(settings.input_format.ffmpeg_pix_fmt())
            .arg("-video_size")
            .arg(settings.frame_size.to_string())
            .arg("-framerate")
            .arg(format!("{}", settings.frame_rate))
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg(codec)
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg(&settings.path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        debug!(
            "starting ffmpeg writer {} at {} {} fps",
            settings.path.display(),
            settings.frame_size,
            settings.frame_rate
        );
        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecordError::WriterExited("ffmpeg stdin unavailable".into()))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            path: settings.path.clone(),
            frames: 0,
        })
    }
}

impl VideoWriter for FfmpegWriter {
    fn is_ready(&mut self) -> bool {
        self.stdin.is_some() && matches!(self.child.try_wait(), Ok(None))
    }

    fn append(&mut self, frame: &Frame, pts: PresentationTime) -> Result<(), RecordError> {
        if pts.index != self.frames {
            return Err(RecordError::NonMonotonic {
                expected: self.frames,
                got: pts.index,
            });
        }
        let stdin = self.stdin.as_mut().ok_or(RecordError::NotReady)?;
        match stdin.write_all(&frame.data) {
            Ok(()) => {
                self.frames += 1;
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(RecordError::WriterExited("ffmpeg closed its input".into()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecordError> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(err) = stdin.flush() {
                warn!("failed to flush ffmpeg input: {err}");
            }
        }
        let status = self.child.wait()?;
        if status.success() {
            debug!("{} closed after {} frame(s)", self.path.display(), self.frames);
            Ok(())
        } else {
            Err(RecordError::WriterExited(format!("ffmpeg exited with {status}")))
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
