//! Frame sources for the motion pipeline.
//!
//! Frames are decoded by an ffmpeg subprocess and delivered over a bounded
//! [`crossbeam_channel::Receiver`]. Device capture modes are negotiated from
//! the formats a V4L2 device advertises.

mod ffmpeg;
mod formats;
mod types;

pub use ffmpeg::spawn_source_reader;
pub use formats::{
    CaptureFormat, CaptureMode, parse_v4l2_formats, query_device_formats, select_capture_mode,
};
pub use types::{CameraFacing, CaptureError, Frame, FrameFormat, FrameSize};

/// Transport used to source frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Local V4L2 camera, addressed by index or `/dev/videoN`.
    Device,
    /// RTSP feed.
    Rtsp,
    /// Pre-recorded file replayed at its native rate.
    File,
}

impl SourceKind {
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if camera_device_path(uri).is_some() {
            SourceKind::Device
        } else {
            SourceKind::File
        }
    }
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<u32> {
    if let Ok(index) = uri.parse::<u32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<u32>().ok();
        }
    }
    None
}

/// Device node for an index or `/dev/videoN` URI.
pub(crate) fn camera_device_path(uri: &str) -> Option<String> {
    parse_device_index(uri).map(|index| format!("/dev/video{index}"))
}
