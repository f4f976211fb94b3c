//! Local cameras captured through an ffmpeg subprocess.
//!
//! ffmpeg re-encodes the device feed as a JPEG sequence on stdout, which is
//! split and decoded with the MJPEG reader.

use super::mjpeg::JpegStreamReader;
use super::FrameSource;
use crate::config::CaptureBackend;
use crate::error::SourceError;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::debug;

pub struct WebcamSource {
    device: PathBuf,
    child: Child,
    reader: JpegStreamReader<ChildStdout>,
}

impl WebcamSource {
    /// Start capturing from `/dev/video{device_id}`; `-1` picks the first device present
    pub fn open(device_id: i32, backend: CaptureBackend) -> Result<Self, SourceError> {
        let name = format!("webcam {} ({})", device_id, backend.as_str());
        let device = resolve_device(device_id, Path::new("/dev"))
            .ok_or_else(|| SourceError::open(&name, "no such video device"))?;

        let args = ffmpeg_args(&device, backend);
        debug!(device = %device.display(), args = ?args, "spawning ffmpeg for camera capture");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SourceError::open(&name, format!("failed to spawn ffmpeg: {}", e)))?;

        let Some(stdout) = child.stdout.take() else {
            child.kill().ok();
            child.wait().ok();
            return Err(SourceError::open(&name, "ffmpeg stdout not captured"));
        };

        Ok(Self {
            device,
            child,
            reader: JpegStreamReader::new(stdout),
        })
    }
}

impl FrameSource for WebcamSource {
    fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
        self.reader.read_frame()
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        debug!(device = %self.device.display(), "stopping camera capture");
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

fn ffmpeg_args(device: &Path, backend: CaptureBackend) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    if backend == CaptureBackend::V4l2 {
        args.push("-f".to_string());
        args.push("v4l2".to_string());
    }
    args.extend([
        "-i".to_string(),
        device.display().to_string(),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-vcodec".to_string(),
        "mjpeg".to_string(),
        "-q:v".to_string(),
        "3".to_string(),
        "pipe:1".to_string(),
    ]);
    args
}

/// Map a device id to a `videoN` node under `dev_dir`
fn resolve_device(device_id: i32, dev_dir: &Path) -> Option<PathBuf> {
    if device_id >= 0 {
        let path = dev_dir.join(format!("video{}", device_id));
        return path.exists().then_some(path);
    }

    let mut devices: Vec<(u32, PathBuf)> = std::fs::read_dir(dev_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let index = name.to_str()?.strip_prefix("video")?.parse::<u32>().ok()?;
            Some((index, entry.path()))
        })
        .collect();
    devices.sort_by_key(|(index, _)| *index);
    devices.into_iter().next().map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_args_by_backend() {
        let device = Path::new("/dev/video1");

        let v4l2 = ffmpeg_args(device, CaptureBackend::V4l2);
        assert!(v4l2.windows(2).any(|w| w == ["-f", "v4l2"]));
        assert!(v4l2.windows(2).any(|w| w == ["-i", "/dev/video1"]));
        assert_eq!(v4l2.last().map(String::as_str), Some("pipe:1"));

        let auto = ffmpeg_args(device, CaptureBackend::Auto);
        assert!(!auto.iter().any(|a| a == "v4l2"));
    }

    #[test]
    fn test_resolve_device() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["video2", "video10", "videoX", "audio0"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        assert_eq!(resolve_device(2, dir.path()), Some(dir.path().join("video2")));
        assert_eq!(resolve_device(0, dir.path()), None);
        assert_eq!(resolve_device(-1, dir.path()), Some(dir.path().join("video2")));
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        let err = WebcamSource::open(4096, CaptureBackend::V4l2).err().unwrap();
        assert!(err.to_string().contains("webcam 4096 (v4l2)"));
    }
}
