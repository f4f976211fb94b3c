use super::{write_phase, DetectionThrottle, SessionControls, SessionPhase, SessionResources};
use crate::error::{SessionError, SinkError};
use crate::sink::{FramePacket, FrameSink, SessionEvent};
use crate::source::{open_source, FrameSource, SourceDescriptor};
use common::plates::{FormatKind, PlateDetection};
use common::validation::safe_unix_millis;
use image::{codecs::jpeg::JpegEncoder, imageops, RgbImage};
use plate_engine::analyzer::plate_detection;
use plate_engine::{CacheProbe, DetectionCache, MatchPurpose, OcrMode};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use telemetry::metrics::{
    DETECTION_FAILURES, DETECTION_PASSES, DETECTION_PASS_TIME, DUPLICATES_SUPPRESSED, PLATES_REPORTED,
    STREAM_FRAMES_DROPPED, STREAM_SESSIONS_ACTIVE,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(super) struct Worker {
    pub session_id: String,
    pub source: SourceDescriptor,
    pub resources: SessionResources,
    pub sink: Arc<dyn FrameSink>,
    pub controls: Arc<SessionControls>,
    pub phase: Arc<Mutex<SessionPhase>>,
    pub cancel: CancellationToken,
}

/// Why the streaming loop ended
enum Exit {
    Cancelled,
    SourceLost(SessionError),
    ConsumerGone,
}

/// Marks the session as streaming; returns it to idle when dropped, unwinding included
struct ActiveStream<'a> {
    phase: &'a Mutex<SessionPhase>,
}

impl<'a> ActiveStream<'a> {
    fn enter(phase: &'a Mutex<SessionPhase>) -> Self {
        write_phase(phase, SessionPhase::Streaming);
        STREAM_SESSIONS_ACTIVE.inc();
        Self { phase }
    }
}

impl Drop for ActiveStream<'_> {
    fn drop(&mut self) {
        STREAM_SESSIONS_ACTIVE.dec();
        write_phase(self.phase, SessionPhase::Idle);
    }
}

impl Worker {
    pub fn run(self) {
        let settings = &self.resources.settings;

        let opened = match open_source(self.resources.opener.as_ref(), &self.source, settings, &self.cancel) {
            Ok(opened) => opened,
            Err(e) => {
                if !self.cancel.is_cancelled() {
                    let err = SessionError::from(e);
                    warn!(session_id = %self.session_id, error = %err, "could not open video source");
                    self.notify(SessionEvent::Error {
                        message: err.to_string(),
                    })
                    .ok();
                }
                write_phase(&self.phase, SessionPhase::Idle);
                return;
            }
        };

        if self
            .notify(SessionEvent::Started {
                source: opened.attempt.to_string(),
            })
            .is_err()
        {
            write_phase(&self.phase, SessionPhase::Idle);
            return;
        }

        let active = ActiveStream::enter(&self.phase);

        let mut throttle = DetectionThrottle::new(settings.min_detection_interval);
        let exit = self.stream(opened.source, opened.first_frame, &mut throttle);

        write_phase(&self.phase, SessionPhase::Stopping);

        match exit {
            Exit::SourceLost(err) => {
                warn!(session_id = %self.session_id, error = %err, "video source lost");
                self.notify(SessionEvent::Error {
                    message: format!("connection lost: {}", err),
                })
                .ok();
            }
            Exit::ConsumerGone => {
                info!(session_id = %self.session_id, "consumer disconnected, stopping stream");
            }
            Exit::Cancelled => {}
        }

        drop(active);
        info!(
            session_id = %self.session_id,
            source = %self.source,
            frames = throttle.frame_count(),
            "stream worker finished"
        );
    }

    fn stream(&self, mut source: Box<dyn FrameSource>, first_frame: RgbImage, throttle: &mut DetectionThrottle) -> Exit {
        let settings = &self.resources.settings;
        let mut pending = Some(first_frame);
        let mut cache: Option<DetectionCache> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Exit::Cancelled;
            }

            let frame = match pending.take() {
                Some(frame) => frame,
                None => match source.read_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        if self.cancel.is_cancelled() {
                            return Exit::Cancelled;
                        }
                        return Exit::SourceLost(e.into());
                    }
                },
            };

            let mut frame = resize_to_width(frame, settings.max_frame_width);
            let cache = cache.get_or_insert_with(|| self.resources.engine.new_cache(frame.width()));
            cache.set_frame_width(frame.width());

            let detect = throttle.on_frame(
                self.controls.detection_enabled(),
                self.controls.detection_interval(),
                Instant::now(),
            );
            let frame_count = throttle.frame_count();

            let mut failed = false;
            let plates = if detect {
                match self.guarded_detect(&frame, cache) {
                    Ok(plates) => plates,
                    Err(e) => {
                        DETECTION_FAILURES.inc();
                        warn!(session_id = %self.session_id, frame_count, error = %e, "detection failed");
                        failed = true;
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };

            self.resources.overlay.draw(&mut frame, &plates);

            match encode_jpeg(&frame, settings.jpeg_quality) {
                Ok(jpeg) => {
                    let packet = FramePacket {
                        jpeg,
                        plates,
                        frame_count,
                        timestamp: safe_unix_millis() as f64 / 1000.0,
                    };
                    if let Err(SinkError::Closed) = self.sink.deliver_frame(packet) {
                        return Exit::ConsumerGone;
                    }
                }
                Err(e) => {
                    STREAM_FRAMES_DROPPED.with_label_values(&["encode"]).inc();
                    debug!(session_id = %self.session_id, frame_count, error = %e, "dropping frame");
                }
            }

            std::thread::sleep(settings.frame_delay);
            if failed {
                std::thread::sleep(settings.detection_backoff);
            }
        }
    }

    /// Detection pass with backend panics turned into inference errors
    fn guarded_detect(&self, frame: &RgbImage, cache: &mut DetectionCache) -> Result<Vec<PlateDetection>, SessionError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.detect_plates(frame, cache))).unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SessionError::Inference(format!("detection backend panicked: {}", reason)))
        })
    }

    /// Detect, read, deduplicate and match the plates on one frame
    fn detect_plates(&self, frame: &RgbImage, cache: &mut DetectionCache) -> Result<Vec<PlateDetection>, SessionError> {
        let engine = &self.resources.engine;
        DETECTION_PASSES.inc();
        let _timer = DETECTION_PASS_TIME.start_timer();

        let candidates = engine
            .detect_candidates(frame)
            .map_err(|e| SessionError::Inference(e.to_string()))?;

        let mut plates: Vec<PlateDetection> = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let reading = engine.read_candidate(candidate, OcrMode::Fast);
            let text = reading.text();

            if !text.is_empty() {
                let probe = CacheProbe {
                    text,
                    formatted_text: &reading.validated.formatted_text,
                    bbox: candidate.bbox,
                };
                if cache.is_duplicate(&probe) {
                    DUPLICATES_SUPPRESSED.inc();
                    debug!(session_id = %self.session_id, text = %text, "suppressed duplicate plate");
                    continue;
                }
            }

            let matched = engine.match_plate(text, MatchPurpose::Stream);
            plates.push(plate_detection(plates.len() + 1, candidate, &reading, matched));
        }

        cache.record(plates.iter().filter(|p| !p.text.is_empty()).map(|p| CacheProbe {
            text: &p.text,
            formatted_text: &p.formatted_text,
            bbox: p.bounding_box,
        }));

        for plate in &plates {
            PLATES_REPORTED
                .with_label_values(&[format_label(plate.format_kind), if plate.is_known() { "true" } else { "false" }])
                .inc();
        }

        if !plates.is_empty() {
            debug!(
                session_id = %self.session_id,
                candidates = candidates.len(),
                reported = plates.len(),
                "detection pass complete"
            );
        }

        Ok(plates)
    }

    fn notify(&self, event: SessionEvent) -> Result<(), SinkError> {
        self.sink.notify(event).map_err(|e| {
            debug!(session_id = %self.session_id, error = %e, "event not delivered");
            e
        })
    }
}

fn format_label(kind: FormatKind) -> &'static str {
    match kind {
        FormatKind::Legacy => "legacy",
        FormatKind::Mercosul => "mercosul",
        FormatKind::Unknown => "unknown",
    }
}

/// Downscale frames wider than `max_width`, keeping the aspect ratio
pub fn resize_to_width(frame: RgbImage, max_width: u32) -> RgbImage {
    if max_width == 0 || frame.width() <= max_width {
        return frame;
    }
    let height = ((frame.height() as u64 * max_width as u64) / frame.width() as u64).max(1) as u32;
    imageops::resize(&frame, max_width, height, imageops::FilterType::Triangle)
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, SessionError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(frame)
        .map_err(|e| SessionError::Encoding(e.to_string()))?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_keeps_aspect_ratio() {
        let resized = resize_to_width(RgbImage::new(1280, 720), 640);
        assert_eq!(resized.dimensions(), (640, 360));
    }

    #[test]
    fn test_narrow_frames_untouched() {
        let resized = resize_to_width(RgbImage::new(320, 240), 640);
        assert_eq!(resized.dimensions(), (320, 240));
    }

    #[test]
    fn test_encode_jpeg_roundtrips_dimensions() {
        let jpeg = encode_jpeg(&RgbImage::new(64, 32), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }

    #[test]
    fn test_encode_empty_frame_fails() {
        assert!(matches!(encode_jpeg(&RgbImage::new(0, 0), 80), Err(SessionError::Encoding(_))));
    }
}
