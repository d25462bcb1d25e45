use anyhow::{Context, Result};
use image::GrayImage;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// Frame source. Both modes shell out for the grab, which keeps the Rust
/// dependency set small: `libcamera-jpeg` uses the Pi camera stack,
/// `v4l2-mjpeg` pulls one MJPEG frame through ffmpeg.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub mode: String,
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: "v4l2-mjpeg".into(),
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
        }
    }
}

/// Grab one frame and hand it back grayscale, the format the detector wants.
pub async fn capture_gray(cfg: &CameraConfig) -> Result<GrayImage> {
    let jpeg = match cfg.mode.as_str() {
        "libcamera-jpeg" => capture_libcamera(cfg).await?,
        "v4l2-mjpeg" => capture_v4l2_ffmpeg(cfg).await?,
        other => anyhow::bail!("unknown camera.mode: {}", other),
    };
    let frame = image::load_from_memory(&jpeg).context("decode frame")?;
    Ok(frame.to_luma8())
}

async fn capture_libcamera(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("libcamera-still");
    cmd.args([
        "-n",
        "-t",
        "1",
        "--width",
        &cfg.width.to_string(),
        "--height",
        &cfg.height.to_string(),
        "-o",
        "-",
    ]);

    debug!("capture: libcamera-still");
    let out = cmd.output().await.context("run libcamera-still")?;
    anyhow::ensure!(out.status.success(), "libcamera-still failed");
    Ok(out.stdout)
}

async fn capture_v4l2_ffmpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "video4linux2",
        "-input_format",
        "mjpeg",
        "-video_size",
        &format!("{}x{}", cfg.width, cfg.height),
        "-i",
        &cfg.device,
        "-vframes",
        "1",
        "-f",
        "image2pipe",
        "-vcodec",
        "mjpeg",
        "-",
    ]);

    debug!("capture: ffmpeg v4l2");
    let out = cmd.output().await.context("run ffmpeg capture")?;
    anyhow::ensure!(out.status.success(), "ffmpeg capture failed");
    Ok(out.stdout)
}
