//! Video sources and the open/fallback procedure used when a session starts.

pub mod mjpeg;
pub mod webcam;

use crate::config::{CaptureBackend, SessionSettings};
use crate::error::SourceError;
use image::RgbImage;
use std::fmt;
use telemetry::metrics::STREAM_SOURCE_OPEN_ATTEMPTS;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A blocking producer of decoded frames
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<RgbImage, SourceError>;
}

/// What the client asked to stream from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    Webcam { device_id: i32 },
    Mjpeg { url: String },
}

impl SourceDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceDescriptor::Webcam { .. } => "webcam",
            SourceDescriptor::Mjpeg { .. } => "mjpeg",
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Webcam { device_id } => write!(f, "webcam {}", device_id),
            SourceDescriptor::Mjpeg { url } => write!(f, "MJPEG stream {}", url),
        }
    }
}

/// One concrete way of opening a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenAttempt {
    Webcam {
        device_id: i32,
        backend: CaptureBackend,
    },
    Mjpeg {
        url: String,
    },
}

impl fmt::Display for OpenAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenAttempt::Webcam { device_id, backend } => {
                write!(f, "webcam {} ({})", device_id, backend.as_str())
            }
            OpenAttempt::Mjpeg { url } => write!(f, "MJPEG stream {}", url),
        }
    }
}

/// Turns an [`OpenAttempt`] into a live source
pub trait SourceOpener: Send + Sync {
    fn open(&self, attempt: &OpenAttempt) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Opens real devices and network streams
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSourceOpener;

impl SourceOpener for SystemSourceOpener {
    fn open(&self, attempt: &OpenAttempt) -> Result<Box<dyn FrameSource>, SourceError> {
        match attempt {
            OpenAttempt::Webcam { device_id, backend } => {
                Ok(Box::new(webcam::WebcamSource::open(*device_id, *backend)?))
            }
            OpenAttempt::Mjpeg { url } => Ok(Box::new(mjpeg::HttpMjpegSource::open(url)?)),
        }
    }
}

/// Requested device first, then the fallbacks, without repeats
pub fn webcam_candidates(requested: i32, fallbacks: &[i32]) -> Vec<i32> {
    let mut candidates = Vec::with_capacity(fallbacks.len() + 1);
    for id in std::iter::once(requested).chain(fallbacks.iter().copied()) {
        if !candidates.contains(&id) {
            candidates.push(id);
        }
    }
    candidates
}

/// Every attempt to make for `descriptor`, in order
pub fn open_attempts(descriptor: &SourceDescriptor, settings: &SessionSettings) -> Vec<OpenAttempt> {
    match descriptor {
        SourceDescriptor::Webcam { device_id } => webcam_candidates(*device_id, &settings.webcam_fallback_ids)
            .into_iter()
            .flat_map(|id| {
                settings.capture_backends.iter().map(move |&backend| OpenAttempt::Webcam {
                    device_id: id,
                    backend,
                })
            })
            .collect(),
        SourceDescriptor::Mjpeg { url } => vec![OpenAttempt::Mjpeg { url: url.clone() }],
    }
}

/// A source that opened and produced its first frame
pub struct OpenedSource {
    pub source: Box<dyn FrameSource>,
    pub first_frame: RgbImage,
    pub attempt: OpenAttempt,
}

impl fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedSource")
            .field("attempt", &self.attempt)
            .field("first_frame", &self.first_frame.dimensions())
            .finish()
    }
}

/// Try each attempt until one opens and yields a frame
pub fn open_source(
    opener: &dyn SourceOpener,
    descriptor: &SourceDescriptor,
    settings: &SessionSettings,
    cancel: &CancellationToken,
) -> Result<OpenedSource, SourceError> {
    let attempts = open_attempts(descriptor, settings);
    let kind = descriptor.kind();
    let mut last_error = None;

    for attempt in attempts {
        if cancel.is_cancelled() {
            return Err(SourceError::open(descriptor.to_string(), "cancelled while opening"));
        }

        debug!(attempt = %attempt, "opening video source");
        let result = opener
            .open(&attempt)
            .and_then(|mut source| source.read_frame().map(|frame| (source, frame)));

        match result {
            Ok((source, first_frame)) => {
                STREAM_SOURCE_OPEN_ATTEMPTS.with_label_values(&[kind, "success"]).inc();
                info!(
                    attempt = %attempt,
                    width = first_frame.width(),
                    height = first_frame.height(),
                    "video source opened"
                );
                return Ok(OpenedSource {
                    source,
                    first_frame,
                    attempt,
                });
            }
            Err(e) => {
                STREAM_SOURCE_OPEN_ATTEMPTS.with_label_values(&[kind, "failure"]).inc();
                warn!(attempt = %attempt, error = %e, "video source attempt failed");
                last_error = Some(e);
            }
        }
    }

    let reason = match last_error {
        Some(e) => format!("all candidates failed, last error: {}", e),
        None => "no candidates to try".to_string(),
    };
    Err(SourceError::open(descriptor.to_string(), reason))
}
