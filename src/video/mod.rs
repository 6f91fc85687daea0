use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::VideoConfig;
use crate::error::Error;
use crate::types::Frame;

/// Containers accepted for upload.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Reject bad uploads before any session mutation.
pub fn validate_upload(filename: &str, payload: &[u8]) -> Result<(), Error> {
    if payload.is_empty() {
        return Err(Error::validation("empty video payload"));
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension {
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(Error::validation(format!(
            "unsupported video format: {filename}"
        ))),
    }
}

/// Produces an ordered sequence of sampled frames for a video, capped at
/// the configured frame count and never reading past the duration cap.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Vec<Frame>, Error>;
}

/// Sampling instants for a video, evenly spaced from zero, capped at
/// `max_frames` and never past `max_duration_secs`.
pub fn sample_timestamps(duration: f64, max_frames: u32, max_duration_secs: f64) -> Vec<f64> {
    let duration = duration.min(max_duration_secs);
    if duration <= 0.0 || max_frames == 0 {
        return Vec::new();
    }
    let interval = duration / f64::from(max_frames);
    (0..max_frames).map(|i| f64::from(i) * interval).collect()
}

/// Frame source backed by the `ffmpeg`/`ffprobe` binaries. The codec and
/// container work stays in the external tool; this only orchestrates
/// sampling and encodes stills to base64 JPEG.
pub struct FfmpegFrameSource {
    max_frames: u32,
    max_duration_secs: f64,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl FfmpegFrameSource {
    pub fn new(config: &VideoConfig) -> Self {
        Self {
            max_frames: config.max_frames,
            max_duration_secs: f64::from(config.max_duration_secs),
        }
    }

    /// Read duration and dimensions via ffprobe.
    async fn probe(&self, path: &Path) -> Result<(f64, u32, u32), Error> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-show_entries",
                "format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| Error::upstream(format!("ffprobe failed to start: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::validation(format!("cannot open video: {stderr}")));
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::upstream(format!("unreadable ffprobe output: {e}")))?;

        let duration = probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);
        let (width, height) = probe
            .streams
            .first()
            .map(|s| (s.width.unwrap_or(0), s.height.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok((duration, width, height))
    }

    /// Grab one JPEG still at the given instant.
    async fn grab_still(&self, path: &Path, timestamp: f64) -> Result<Vec<u8>, Error> {
        let seek = format!("{timestamp:.3}");
        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", seek.as_str(), "-i"])
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2", "-q:v", "4", "pipe:1"])
            .output()
            .await
            .map_err(|e| Error::upstream(format!("ffmpeg failed to start: {e}")))?;

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::upstream(format!(
                "frame grab at {timestamp:.1}s failed: {stderr}"
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn extract(&self, path: &Path) -> Result<Vec<Frame>, Error> {
        let (duration, width, height) = self.probe(path).await?;

        if duration <= 0.0 {
            return Err(Error::validation("video has no frames"));
        }
        if duration > self.max_duration_secs {
            warn!(
                duration,
                cap = self.max_duration_secs,
                "video exceeds duration cap, sampling truncated"
            );
        }

        let timestamps = sample_timestamps(duration, self.max_frames, self.max_duration_secs);
        let mut frames = Vec::with_capacity(timestamps.len());

        for (index, timestamp) in timestamps.iter().enumerate() {
            match self.grab_still(path, *timestamp).await {
                Ok(jpeg) => frames.push(Frame {
                    frame_number: index as u64,
                    timestamp: *timestamp,
                    image: BASE64.encode(&jpeg),
                    width,
                    height,
                }),
                // Seeks near the end of short videos can come back empty;
                // keep what we have, but a first-frame failure is fatal.
                Err(e) if frames.is_empty() => return Err(e),
                Err(e) => {
                    warn!("skipping frame: {e}");
                    break;
                }
            }
        }

        info!(count = frames.len(), duration, "extracted frames from video");
        Ok(frames)
    }
}
