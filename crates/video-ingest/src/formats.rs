//! Capture-format discovery and negotiation.
//!
//! A device advertises a list of pixel formats, each with a set of frame sizes
//! and the frame intervals supported at that size. The negotiated mode is the
//! one matching the desired resolution with the highest frame rate.

use std::process::Command;

use anyhow::anyhow;
use serde::Serialize;
use tracing::debug;

use crate::{camera_device_path, types::CaptureError};

/// One advertised frame size of a device pixel format.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureFormat {
    /// FourCC as reported by the driver, e.g. `MJPG` or `YUYV`.
    pub fourcc: String,
    pub width: u32,
    pub height: u32,
    /// Supported frame rates in frames per second.
    pub frame_rates: Vec<f64>,
}

impl CaptureFormat {
    pub fn max_frame_rate(&self) -> Option<f64> {
        self.frame_rates.iter().copied().reduce(f64::max)
    }
}

/// Negotiated capture settings handed to the reader.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureMode {
    pub fourcc: Option<String>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl CaptureMode {
    /// ffmpeg `-input_format` name for the fourcc, when ffmpeg knows it.
    pub fn ffmpeg_input_format(&self) -> Option<&'static str> {
        match self.fourcc.as_deref()? {
            "MJPG" => Some("mjpeg"),
            "YUYV" => Some("yuyv422"),
            "H264" => Some("h264"),
            "NV12" => Some("nv12"),
            _ => None,
        }
    }
}

/// Choose the format at `desired` resolution offering the highest frame rate.
///
/// Formats are scanned in order and a later format only wins with a strictly
/// higher rate, so ties keep the first advertised format.
pub fn select_capture_mode(formats: &[CaptureFormat], desired: (u32, u32)) -> Option<CaptureMode> {
    let mut best: Option<(&CaptureFormat, f64)> = None;
    for format in formats
        .iter()
        .filter(|f| (f.width, f.height) == desired)
    {
        let Some(rate) = format.max_frame_rate() else {
            continue;
        };
        match best {
            Some((_, best_rate)) if rate <= best_rate => {}
            _ => best = Some((format, rate)),
        }
    }

    best.map(|(format, frame_rate)| CaptureMode {
        fourcc: Some(format.fourcc.clone()),
        width: format.width,
        height: format.height,
        frame_rate,
    })
}

/// Query a V4L2 device for its formats using `v4l2-ctl --list-formats-ext`.
pub fn query_device_formats(uri: &str) -> Result<Vec<CaptureFormat>, CaptureError> {
    let device = camera_device_path(uri).ok_or_else(|| CaptureError::Open {
        uri: uri.to_string(),
    })?;

    let output = Command::new("v4l2-ctl")
        .arg("--device")
        .arg(&device)
        .arg("--list-formats-ext")
        .output()
        .map_err(|err| CaptureError::Other(anyhow!("failed to run v4l2-ctl: {err}")))?;

    if !output.status.success() {
        return Err(CaptureError::Open { uri: device });
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let formats = parse_v4l2_formats(&text);
    debug!("{device}: {} capture format(s) advertised", formats.len());
    Ok(formats)
}

/// Parse the listing printed by `v4l2-ctl --list-formats-ext`.
///
/// Only discrete sizes and intervals are understood; stepwise ranges are
/// skipped.
pub fn parse_v4l2_formats(listing: &str) -> Vec<CaptureFormat> {
    let mut formats = Vec::new();
    let mut fourcc: Option<String> = None;

    for line in listing.lines().map(str::trim) {
        if line.starts_with('[') {
            fourcc = line
                .split('\'')
                .nth(1)
                .map(|code| code.trim().to_string());
            continue;
        }

        if let Some(size) = line.strip_prefix("Size: Discrete ") {
            let Some(code) = fourcc.clone() else {
                continue;
            };
            if let Some((w, h)) = size.trim().split_once('x') {
                if let (Ok(width), Ok(height)) = (w.parse::<u32>(), h.parse::<u32>()) {
                    formats.push(CaptureFormat {
                        fourcc: code,
                        width,
                        height,
                        frame_rates: Vec::new(),
                    });
                }
            }
            continue;
        }

        if line.starts_with("Interval: Discrete") {
            let rate = line
                .split_once('(')
                .and_then(|(_, rest)| rest.split_once(" fps"))
                .and_then(|(value, _)| value.trim().parse::<f64>().ok());
            if let (Some(rate), Some(current)) = (rate, formats.last_mut()) {
                current.frame_rates.push(rate);
            }
        }
    }

    formats
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "ioctl: VIDIOC_ENUM_FMT
\tType: Video Capture

\t[0]: 'MJPG' (Motion-JPEG, compressed)
\t\tSize: Discrete 1280x720
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\t\tInterval: Discrete 0.017s (60.000 fps)
\t\tSize: Discrete 640x480
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t[1]: 'YUYV' (YUYV 4:2:2)
\t\tSize: Discrete 1280x720
\t\t\tInterval: Discrete 0.100s (10.000 fps)
\t\tSize: Stepwise 16x16 - 1920x1080 with step 1/1
";

    #[test]
    fn parses_discrete_sizes_and_intervals() {
        let formats = parse_v4l2_formats(LISTING);
        assert_eq!(formats.len(), 3);
        assert_eq!(formats[0].fourcc, "MJPG");
        assert_eq!((formats[0].width, formats[0].height), (1280, 720));
        assert_eq!(formats[0].frame_rates, vec![30.0, 60.0]);
        assert_eq!(formats[2].fourcc, "YUYV");
        assert_eq!(formats[2].frame_rates, vec![10.0]);
    }

    #[test]
    fn selects_highest_rate_at_desired_resolution() {
        let formats = parse_v4l2_formats(LISTING);
        let mode = select_capture_mode(&formats, (1280, 720)).unwrap();
        assert_eq!(mode.fourcc.as_deref(), Some("MJPG"));
        assert_eq!(mode.frame_rate, 60.0);
        assert_eq!(mode.ffmpeg_input_format(), Some("mjpeg"));
    }

    #[test]
    fn ties_keep_first_advertised_format() {
        let formats = vec![
            CaptureFormat {
                fourcc: "YUYV".into(),
                width: 640,
                height: 480,
                frame_rates: vec![30.0],
            },
            CaptureFormat {
                fourcc: "MJPG".into(),
                width: 640,
                height: 480,
                frame_rates: vec![15.0, 30.0],
            },
        ];
        let mode = select_capture_mode(&formats, (640, 480)).unwrap();
        assert_eq!(mode.fourcc.as_deref(), Some("YUYV"));
    }

    #[test]
    fn no_mode_without_matching_resolution() {
        let formats = parse_v4l2_formats(LISTING);
        assert!(select_capture_mode(&formats, (1920, 1080)).is_none());
    }

    #[test]
    fn formats_without_rates_are_skipped() {
        let formats = vec![CaptureFormat {
            fourcc: "MJPG".into(),
            width: 640,
            height: 480,
            frame_rates: Vec::new(),
        }];
        assert!(select_capture_mode(&formats, (640, 480)).is_none());
    }
}
