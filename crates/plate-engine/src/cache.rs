//! Short-lived memory of reported plates used to suppress duplicates.

use common::plates::BoundingBox;
use std::time::{Duration, Instant};

/// Frame width the default distance threshold is expressed against
pub const REFERENCE_FRAME_WIDTH: u32 = 640;

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// How long a recorded plate suppresses repeats
    pub window: Duration,

    /// Maximum center distance, in pixels at [`REFERENCE_FRAME_WIDTH`]
    pub distance_threshold: f32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            distance_threshold: 50.0,
        }
    }
}

/// A plate seen recently
#[derive(Debug, Clone)]
pub struct CachedDetection {
    pub text: String,
    pub formatted_text: String,
    pub bbox: BoundingBox,
    pub timestamp: Instant,
}

/// Lookup key for a duplicate check
#[derive(Debug, Clone, Copy)]
pub struct CacheProbe<'a> {
    pub text: &'a str,
    pub formatted_text: &'a str,
    pub bbox: BoundingBox,
}

pub struct DetectionCache {
    settings: CacheSettings,
    distance_threshold: f32,
    entries: Vec<CachedDetection>,
}

impl DetectionCache {
    pub fn new(settings: CacheSettings) -> Self {
        let distance_threshold = settings.distance_threshold;
        Self {
            settings,
            distance_threshold,
            entries: Vec::new(),
        }
    }

    /// Cache whose distance threshold is scaled to `frame_width`
    pub fn for_frame_width(settings: CacheSettings, frame_width: u32) -> Self {
        let mut cache = Self::new(settings);
        cache.distance_threshold = cache.distance_threshold_for(frame_width);
        cache
    }

    /// Distance threshold scaled from the reference width to `frame_width`
    pub fn distance_threshold_for(&self, frame_width: u32) -> f32 {
        if frame_width == 0 {
            return self.settings.distance_threshold;
        }
        self.settings.distance_threshold * frame_width as f32 / REFERENCE_FRAME_WIDTH as f32
    }

    /// Threshold currently applied by [`DetectionCache::is_duplicate`]
    pub fn distance_threshold(&self) -> f32 {
        self.distance_threshold
    }

    pub fn set_frame_width(&mut self, frame_width: u32) {
        self.distance_threshold = self.distance_threshold_for(frame_width);
    }

    pub fn is_duplicate(&mut self, probe: &CacheProbe<'_>) -> bool {
        self.is_duplicate_at(probe, Instant::now())
    }

    pub fn is_duplicate_at(&mut self, probe: &CacheProbe<'_>, now: Instant) -> bool {
        self.prune(now);

        self.entries.iter().any(|cached| {
            let same_text = cached.text == probe.text || cached.formatted_text == probe.formatted_text;
            same_text && cached.bbox.center_distance(&probe.bbox) < self.distance_threshold
        })
    }

    /// Record plates reported on one frame, all stamped with the current time
    pub fn record<'a>(&mut self, probes: impl IntoIterator<Item = CacheProbe<'a>>) {
        self.record_at(probes, Instant::now());
    }

    pub fn record_at<'a>(&mut self, probes: impl IntoIterator<Item = CacheProbe<'a>>, now: Instant) {
        self.prune(now);

        self.entries.extend(probes.into_iter().map(|probe| CachedDetection {
            text: probe.text.to_string(),
            formatted_text: probe.formatted_text.to_string(),
            bbox: probe.bbox,
            timestamp: now,
        }));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        let window = self.settings.window;
        self.entries
            .retain(|cached| now.saturating_duration_since(cached.timestamp) <= window);
    }
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}
