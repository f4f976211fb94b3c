//! Plate recognition engine: detection backends, multi-variant OCR,
//! duplicate suppression and known plate matching.

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod matcher;
pub mod ocr;
pub mod plugin;
pub mod preprocess;

pub use analyzer::{MatchPurpose, PlateEngine, PlateReading};
pub use cache::{CacheProbe, DetectionCache};
pub use config::EngineConfig;
pub use matcher::{InMemoryRegistry, KnownPlateMatcher, KnownPlateRegistry};
pub use ocr::{OcrAggregator, OcrMode};
