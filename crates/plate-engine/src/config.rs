use crate::cache::CacheSettings;
use crate::ocr::OcrSettings;
use crate::plugin::onnx::OnnxConfig;
use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which detector/recognizer pair to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorBackend {
    Onnx,
    Mock,
}

impl FromStr for DetectorBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "mock" => Ok(Self::Mock),
            other => bail!("unknown detector backend '{}' (expected onnx or mock)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: DetectorBackend,

    /// ONNX model settings, used when `backend` is `Onnx`
    pub onnx: OnnxConfig,

    pub ocr: OcrSettings,

    pub cache: CacheSettings,

    /// Minimum similarity for live stream matches (0 to 100)
    pub stream_match_threshold: f32,

    /// Minimum similarity for uploaded image matches (0 to 100)
    pub upload_match_threshold: f32,

    /// Pixels added around detected plates before OCR
    pub crop_padding: u32,

    /// JSON file with the known plate registry
    pub known_plates_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: DetectorBackend::Onnx,
            onnx: OnnxConfig::default(),
            ocr: OcrSettings::default(),
            cache: CacheSettings::default(),
            stream_match_threshold: 60.0,
            upload_match_threshold: 50.0,
            crop_padding: 5,
            known_plates_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(backend) = lookup("DETECTOR_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Some(thresholds) = lookup("OCR_THRESHOLDS") {
            config.ocr.thresholds = parse_list::<f32>(&thresholds).context("Invalid OCR_THRESHOLDS")?;
            if config.ocr.thresholds.is_empty() {
                bail!("OCR_THRESHOLDS must list at least one threshold");
            }
        }
        if let Some(value) = lookup("OCR_FAST_MIN_CONFIDENCE") {
            config.ocr.fast_min_confidence = value.parse().context("Invalid OCR_FAST_MIN_CONFIDENCE")?;
        }

        if let Some(value) = lookup("STREAM_MATCH_THRESHOLD") {
            config.stream_match_threshold = value.parse().context("Invalid STREAM_MATCH_THRESHOLD")?;
        }
        if let Some(value) = lookup("UPLOAD_MATCH_THRESHOLD") {
            config.upload_match_threshold = value.parse().context("Invalid UPLOAD_MATCH_THRESHOLD")?;
        }

        if let Some(value) = lookup("DETECTION_CACHE_SECS") {
            let secs: f64 = value.parse().context("Invalid DETECTION_CACHE_SECS")?;
            config.cache.window =
                Duration::try_from_secs_f64(secs).context("DETECTION_CACHE_SECS must be non-negative")?;
        }
        if let Some(value) = lookup("DUPLICATE_DISTANCE_PX") {
            config.cache.distance_threshold = value.parse().context("Invalid DUPLICATE_DISTANCE_PX")?;
        }

        if let Some(value) = lookup("CROP_PADDING_PX") {
            config.crop_padding = value.parse().context("Invalid CROP_PADDING_PX")?;
            config.onnx.crop_padding = config.crop_padding;
        }

        if let Some(path) = lookup("LPR_DETECTION_MODEL") {
            config.onnx.detection_model_path = path;
        }
        if let Some(path) = lookup("LPR_OCR_MODEL") {
            config.onnx.ocr_model_path = path;
        }
        if let Some(provider) = lookup("LPR_EXECUTION_PROVIDER") {
            config.onnx.execution_provider = provider;
        }
        if let Some(value) = lookup("LPR_DEVICE_ID") {
            config.onnx.device_id = value.parse().context("Invalid LPR_DEVICE_ID")?;
        }

        config.known_plates_path = lookup("KNOWN_PLATES_PATH").filter(|p| !p.is_empty());

        Ok(config)
    }
}

/// Parse a comma separated list, ignoring blank items
pub fn parse_list<T: FromStr>(raw: &str) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<T>().with_context(|| format!("invalid list item '{}'", item)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, DetectorBackend::Onnx);
        assert_eq!(config.ocr.thresholds, vec![0.3, 0.5, 0.7]);
        assert_eq!(config.stream_match_threshold, 60.0);
        assert_eq!(config.upload_match_threshold, 50.0);
        assert_eq!(config.cache.window, Duration::from_secs(5));
        assert_eq!(config.cache.distance_threshold, 50.0);
        assert_eq!(config.crop_padding, 5);
        assert!(config.known_plates_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DETECTOR_BACKEND", "MOCK"),
            ("OCR_THRESHOLDS", "0.4, 0.8"),
            ("STREAM_MATCH_THRESHOLD", "70"),
            ("DETECTION_CACHE_SECS", "2.5"),
            ("CROP_PADDING_PX", "8"),
            ("LPR_EXECUTION_PROVIDER", "CPU"),
            ("KNOWN_PLATES_PATH", "plates.json"),
        ]))
        .unwrap();

        assert_eq!(config.backend, DetectorBackend::Mock);
        assert_eq!(config.ocr.thresholds, vec![0.4, 0.8]);
        assert_eq!(config.stream_match_threshold, 70.0);
        assert_eq!(config.cache.window, Duration::from_millis(2500));
        assert_eq!(config.onnx.crop_padding, 8);
        assert_eq!(config.onnx.execution_provider, "CPU");
        assert_eq!(config.known_plates_path.as_deref(), Some("plates.json"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_lookup(lookup(&[("DETECTOR_BACKEND", "tflite")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("OCR_THRESHOLDS", "0.3,high")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("OCR_THRESHOLDS", " , ")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("DETECTION_CACHE_SECS", "-1")])).is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list::<i32>("0, 1,2,,-1").unwrap(), vec![0, 1, 2, -1]);
        assert!(parse_list::<i32>("").unwrap().is_empty());
    }
}
