//! Fuzzy association of recognized text with the known plate registry.

use anyhow::{Context, Result};
use common::plates::{KnownPlateRecord, MatchResult};
use common::validation::normalize_plate_text;
use std::path::Path;

/// Read-only source of known plates
pub trait KnownPlateRegistry: Send + Sync {
    fn records(&self) -> &[KnownPlateRecord];
}

/// Registry held in memory, usually loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    records: Vec<KnownPlateRecord>,
}

impl InMemoryRegistry {
    pub fn new(records: Vec<KnownPlateRecord>) -> Self {
        Self { records }
    }

    /// Load a JSON array of `{plate_number, is_regularized}` objects
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read known plates from {}", path.display()))?;
        let records: Vec<KnownPlateRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid known plates file {}", path.display()))?;

        tracing::info!(path = %path.display(), count = records.len(), "loaded known plate registry");
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl KnownPlateRegistry for InMemoryRegistry {
    fn records(&self) -> &[KnownPlateRecord] {
        &self.records
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KnownPlateMatcher {
    /// Minimum similarity (0 to 100) accepted as a match
    threshold: f32,
}

impl KnownPlateMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Best registry entry for `query`, if similar enough
    ///
    /// When several records share the best score the first one wins.
    pub fn match_plate(&self, query: &str, registry: &dyn KnownPlateRegistry) -> MatchResult {
        let query = normalize_plate_text(query);
        let mut best: Option<&KnownPlateRecord> = None;
        let mut best_score = 0.0f32;

        for record in registry.records() {
            let score = similarity(&query, &normalize_plate_text(&record.plate_number));
            if score > best_score {
                best_score = score;
                best = Some(record);
            }
        }

        match best {
            Some(record) if best_score >= self.threshold => MatchResult {
                matched: Some(record.clone()),
                similarity: best_score,
            },
            _ => MatchResult::no_match(best_score),
        }
    }
}

/// Normalized Levenshtein similarity scaled to 0..=100
pub fn similarity(a: &str, b: &str) -> f32 {
    (strsim::normalized_levenshtein(a, b) * 100.0) as f32
}
