//! Motion JPEG framing over any byte stream.

use super::FrameSource;
use crate::error::SourceError;
use image::RgbImage;
use std::io::Read;
use std::time::Duration;
use telemetry::metrics::STREAM_FRAMES_DROPPED;
use tracing::debug;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on buffered bytes without a complete frame
const MAX_BUFFERED_BYTES: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Undecodable frames skipped in a row before the stream counts as broken
const MAX_CORRUPT_FRAMES: usize = 5;

/// Extracts complete JPEG images from concatenated stream data
///
/// Multipart boundaries and headers between images are skipped.
#[derive(Debug, Default)]
pub struct JpegFrameSplitter {
    buffer: Vec<u8>,
    /// The buffer starts with SOI of a frame still missing its EOI
    in_frame: bool,
    /// Offset the EOI search resumes from
    scanned: usize,
}

impl JpegFrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if !self.in_frame {
            let Some(start) = find(&self.buffer, &SOI, 0) else {
                // Keep a trailing 0xFF, it may begin the next marker
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                self.buffer.drain(..self.buffer.len() - keep);
                return None;
            };
            self.buffer.drain(..start);
            self.in_frame = true;
            self.scanned = SOI.len();
        }

        match find(&self.buffer, &EOI, self.scanned) {
            Some(pos) => {
                let frame: Vec<u8> = self.buffer.drain(..pos + EOI.len()).collect();
                self.in_frame = false;
                self.scanned = 0;
                Some(frame)
            }
            None => {
                // Rescan the last byte, EOI may straddle two chunks
                self.scanned = (self.buffer.len() + 1).saturating_sub(EOI.len()).max(SOI.len());
                None
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Decodes JPEG frames from a blocking reader
pub struct JpegStreamReader<R> {
    reader: R,
    splitter: JpegFrameSplitter,
    chunk: Vec<u8>,
}

impl<R: Read + Send> JpegStreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            splitter: JpegFrameSplitter::new(),
            chunk: vec![0; READ_CHUNK],
        }
    }

    /// Next complete JPEG payload
    pub fn next_jpeg(&mut self) -> Result<Vec<u8>, SourceError> {
        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return Ok(frame);
            }
            if self.splitter.buffered() > MAX_BUFFERED_BYTES {
                return Err(SourceError::read("no JPEG frame boundary found in stream data"));
            }

            let n = self.reader.read(&mut self.chunk).map_err(SourceError::read)?;
            if n == 0 {
                return Err(SourceError::EndOfStream);
            }
            self.splitter.push(&self.chunk[..n]);
        }
    }
}

impl<R: Read + Send> FrameSource for JpegStreamReader<R> {
    /// Skips up to `MAX_CORRUPT_FRAMES` undecodable frames in a row
    fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
        let mut corrupt = 0;
        loop {
            let jpeg = self.next_jpeg()?;
            match image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg) {
                Ok(image) => return Ok(image.to_rgb8()),
                Err(e) => {
                    corrupt += 1;
                    STREAM_FRAMES_DROPPED.with_label_values(&["decode"]).inc();
                    if corrupt >= MAX_CORRUPT_FRAMES {
                        return Err(SourceError::read(e));
                    }
                    debug!(bytes = jpeg.len(), error = %e, "skipping undecodable frame");
                }
            }
        }
    }
}

/// MJPEG over HTTP (`multipart/x-mixed-replace`)
pub struct HttpMjpegSource {
    inner: JpegStreamReader<reqwest::blocking::Response>,
}

impl HttpMjpegSource {
    pub fn open(url: &str) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| SourceError::open(url, e))?;

        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::open(url, e))?;

        tracing::debug!(
            url = %url,
            content_type = ?response.headers().get(reqwest::header::CONTENT_TYPE),
            "MJPEG stream connected"
        );

        Ok(Self {
            inner: JpegStreamReader::new(response),
        })
    }
}

impl FrameSource for HttpMjpegSource {
    fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
        self.inner.read_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{codecs::jpeg::JpegEncoder, Rgb};
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([40, 120, 200]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90).encode_image(&image).unwrap();
        out
    }

    #[test]
    fn test_splitter_skips_multipart_headers() {
        let mut splitter = JpegFrameSplitter::new();
        splitter.push(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        splitter.push(&[0xFF, 0xD8, 1, 2, 3]);
        assert!(splitter.next_frame().is_none());

        splitter.push(&[4, 0xFF, 0xD9, b'\r', b'\n']);
        assert_eq!(
            splitter.next_frame().unwrap(),
            vec![0xFF, 0xD8, 1, 2, 3, 4, 0xFF, 0xD9]
        );
        assert!(splitter.next_frame().is_none());
    }

    #[test]
    fn test_splitter_marker_split_across_chunks() {
        let mut splitter = JpegFrameSplitter::new();
        splitter.push(b"junk\xFF");
        assert!(splitter.next_frame().is_none());
        splitter.push(&[0xD8, 9, 0xFF]);
        assert!(splitter.next_frame().is_none());
        splitter.push(&[0xD9]);
        assert_eq!(splitter.next_frame().unwrap(), vec![0xFF, 0xD8, 9, 0xFF, 0xD9]);
    }

    #[test]
    fn test_splitter_resumes_eoi_search() {
        let mut splitter = JpegFrameSplitter::new();
        splitter.push(&[0xFF, 0xD8]);
        for _ in 0..100 {
            splitter.push(&[7; 64]);
            assert!(splitter.next_frame().is_none());
        }
        assert_eq!(splitter.scanned, splitter.buffered() - 1);

        splitter.push(&[0xFF]);
        assert!(splitter.next_frame().is_none());
        splitter.push(&[0xD9, 0xFF, 0xD8]);

        let frame = splitter.next_frame().unwrap();
        assert_eq!(frame.len(), 2 + 6400 + 2);
        assert_eq!(&frame[frame.len() - 2..], &EOI);
        assert!(splitter.next_frame().is_none());
        assert_eq!(splitter.buffered(), 2);
    }

    fn corrupt_frame() -> Vec<u8> {
        vec![0xFF, 0xD8, 0x00, 0x11, 0x22, 0xFF, 0xD9]
    }

    #[test]
    fn test_reader_skips_corrupt_frames() {
        let mut data = Vec::new();
        data.extend_from_slice(&corrupt_frame());
        data.extend_from_slice(&corrupt_frame());
        data.extend_from_slice(&jpeg(40, 20));

        let mut reader = JpegStreamReader::new(Cursor::new(data));
        assert_eq!(reader.read_frame().unwrap().dimensions(), (40, 20));
    }

    #[test]
    fn test_reader_gives_up_after_corrupt_run() {
        let mut data = Vec::new();
        for _ in 0..MAX_CORRUPT_FRAMES {
            data.extend_from_slice(&corrupt_frame());
        }
        data.extend_from_slice(&jpeg(40, 20));

        let mut reader = JpegStreamReader::new(Cursor::new(data));
        assert!(matches!(reader.read_frame(), Err(SourceError::Read(_))));
    }

    #[test]
    fn test_reader_decodes_consecutive_frames() {
        let mut data = Vec::new();
        for size in [(32, 16), (48, 24)] {
            data.extend_from_slice(b"--boundary\r\nContent-Type: image/jpeg\r\n\r\n");
            data.extend_from_slice(&jpeg(size.0, size.1));
            data.extend_from_slice(b"\r\n");
        }

        let mut reader = JpegStreamReader::new(Cursor::new(data));
        assert_eq!(reader.read_frame().unwrap().dimensions(), (32, 16));
        assert_eq!(reader.read_frame().unwrap().dimensions(), (48, 24));
        assert!(matches!(reader.read_frame(), Err(SourceError::EndOfStream)));
    }
}
