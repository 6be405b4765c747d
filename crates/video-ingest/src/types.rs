use anyhow::Error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// True when the buffer holds exactly `width * height` pixels of `format`.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.size().byte_len(self.format)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    Bgr8,
    Bgra8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Bgr8 => 3,
            FrameFormat::Bgra8 => 4,
        }
    }

    /// Pixel format name understood by ffmpeg's rawvideo muxer/demuxer.
    pub fn ffmpeg_pix_fmt(self) -> &'static str {
        match self {
            FrameFormat::Bgr8 => "bgr24",
            FrameFormat::Bgra8 => "bgra",
        }
    }
}

/// Width and height of a frame in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn byte_len(self, format: FrameFormat) -> usize {
        (self.width as usize) * (self.height as usize) * format.bytes_per_pixel()
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which way the active camera points relative to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    /// Scene-facing camera; the image is not mirrored.
    #[default]
    Back,
    /// User-facing (selfie) camera; the sensor image is mirrored.
    Front,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("no capture format matches {width}x{height}")]
    NoMatchingFormat { width: u32, height: u32 },
    #[error(transparent)]
    Other(#[from] Error),
}
