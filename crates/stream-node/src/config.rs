use anyhow::{Context, Result};
use plate_engine::config::parse_list;
use std::env;
use std::time::Duration;

/// Capture API used to open a local camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    /// Video4Linux2 device input
    V4l2,
    /// Let the capture tool probe the device format
    Auto,
}

impl CaptureBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureBackend::V4l2 => "v4l2",
            CaptureBackend::Auto => "auto",
        }
    }
}

impl std::str::FromStr for CaptureBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "v4l2" => Ok(Self::V4l2),
            "auto" | "any" => Ok(Self::Auto),
            other => anyhow::bail!("unknown capture backend '{}'", other),
        }
    }
}

/// Tuning for stream sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Fixed delay after every delivered frame
    pub frame_delay: Duration,

    /// Frames wider than this are downscaled, keeping the aspect ratio
    pub max_frame_width: u32,

    /// Run detection on every Nth frame
    pub detection_interval: u32,

    /// Minimum time between two detection attempts
    pub min_detection_interval: Duration,

    /// Pause after a failed detection pass
    pub detection_backoff: Duration,

    /// How long `stop` waits for the worker thread
    pub stop_join_timeout: Duration,

    /// JPEG quality of delivered frames (1 to 100)
    pub jpeg_quality: u8,

    /// Device ids tried after the requested one
    pub webcam_fallback_ids: Vec<i32>,

    pub capture_backends: Vec<CaptureBackend>,

    /// Stream used when a client starts MJPEG without a URL
    pub default_mjpeg_url: String,

    /// TrueType font for overlay labels; the bundled font is used without one
    pub overlay_font_path: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            frame_delay: Duration::from_millis(66),
            max_frame_width: 640,
            detection_interval: 5,
            min_detection_interval: Duration::from_secs(2),
            detection_backoff: Duration::from_millis(200),
            stop_join_timeout: Duration::from_secs(2),
            jpeg_quality: 80,
            webcam_fallback_ids: vec![0, 1, 2, -1],
            capture_backends: vec![CaptureBackend::V4l2, CaptureBackend::Auto],
            default_mjpeg_url: "http://127.0.0.1:8081/video.mjpg".to_string(),
            overlay_font_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,

    /// Capacity of the per-connection delivery channel
    pub delivery_buffer: usize,

    pub session: SessionSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = lookup("STREAM_NODE_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let delivery_buffer = match lookup("DELIVERY_BUFFER") {
            Some(v) => v.parse::<usize>().context("Invalid DELIVERY_BUFFER")?.max(1),
            None => 4,
        };

        let mut session = SessionSettings::default();

        if let Some(v) = lookup("FRAME_DELAY_MS") {
            session.frame_delay = Duration::from_millis(v.parse().context("Invalid FRAME_DELAY_MS")?);
        }
        if let Some(v) = lookup("MAX_FRAME_WIDTH") {
            session.max_frame_width = v.parse().context("Invalid MAX_FRAME_WIDTH")?;
        }
        if let Some(v) = lookup("DETECTION_INTERVAL") {
            session.detection_interval = v.parse::<u32>().context("Invalid DETECTION_INTERVAL")?.max(1);
        }
        if let Some(v) = lookup("MIN_DETECTION_INTERVAL_SECS") {
            let secs: f64 = v.parse().context("Invalid MIN_DETECTION_INTERVAL_SECS")?;
            session.min_detection_interval = Duration::try_from_secs_f64(secs)
                .context("MIN_DETECTION_INTERVAL_SECS must be non-negative")?;
        }
        if let Some(v) = lookup("DETECTION_BACKOFF_MS") {
            session.detection_backoff = Duration::from_millis(v.parse().context("Invalid DETECTION_BACKOFF_MS")?);
        }
        if let Some(v) = lookup("STOP_JOIN_TIMEOUT_MS") {
            session.stop_join_timeout = Duration::from_millis(v.parse().context("Invalid STOP_JOIN_TIMEOUT_MS")?);
        }
        if let Some(v) = lookup("JPEG_QUALITY") {
            session.jpeg_quality = v.parse::<u8>().context("Invalid JPEG_QUALITY")?.clamp(1, 100);
        }
        if let Some(v) = lookup("WEBCAM_FALLBACK_IDS") {
            session.webcam_fallback_ids = parse_list(&v).context("Invalid WEBCAM_FALLBACK_IDS")?;
        }
        if let Some(v) = lookup("CAPTURE_BACKENDS") {
            let backends: Vec<CaptureBackend> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect::<Result<_>>()
                .context("Invalid CAPTURE_BACKENDS")?;
            if !backends.is_empty() {
                session.capture_backends = backends;
            }
        }
        if let Some(v) = lookup("DEFAULT_MJPEG_URL") {
            session.default_mjpeg_url = v;
        }
        session.overlay_font_path = lookup("OVERLAY_FONT_PATH").filter(|p| !p.is_empty());

        Ok(Config {
            bind_addr,
            delivery_buffer,
            session,
        })
    }
}
