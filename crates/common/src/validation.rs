//! Validation of recognized plate text and of client-supplied inputs
//!
//! This module provides:
//! - Plate format classification (legacy and Mercosul numbering)
//! - Safe checks for stream URLs and numeric settings received from clients
//! - Panic-free wall clock helpers for frame timestamps

use crate::plates::{FormatKind, ValidatedPlate};
use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// CONSTANTS: Input Size Limits
// ============================================================================

/// Maximum length for stream URLs
pub const MAX_URL_LENGTH: usize = 4096;

/// Maximum length of recognized text considered for validation
pub const MAX_PLATE_TEXT_LENGTH: usize = 64;

// ============================================================================
// Plate Format Validation
// ============================================================================

static LEGACY_PLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{3}[0-9]{4}$").unwrap_or_else(|_| unreachable!()));

static MERCOSUL_PLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{3}[0-9][A-Z][0-9]{2}$").unwrap_or_else(|_| unreachable!()));

/// Upper-case the text and keep only `[A-Z0-9]`
pub fn normalize_plate_text(text: &str) -> String {
    text.chars()
        .flat_map(char::to_uppercase)
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .take(MAX_PLATE_TEXT_LENGTH)
        .collect()
}

/// Classifies recognized text against the supported plate numbering formats
///
/// Matching is exact: the cleaned text must match one grammar completely.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlateFormatValidator;

impl PlateFormatValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, text: &str) -> ValidatedPlate {
        let cleaned = normalize_plate_text(text);

        let (is_valid, formatted_text, format_kind) = if LEGACY_PLATE.is_match(&cleaned) {
            (
                true,
                format!("{}-{}", &cleaned[..3], &cleaned[3..]),
                FormatKind::Legacy,
            )
        } else if MERCOSUL_PLATE.is_match(&cleaned) {
            (true, cleaned.clone(), FormatKind::Mercosul)
        } else {
            (false, cleaned.clone(), FormatKind::Unknown)
        };

        ValidatedPlate {
            raw_text: text.to_string(),
            is_valid,
            formatted_text,
            format_kind,
        }
    }
}

// ============================================================================
// Source Validation
// ============================================================================

/// Validate non-empty string
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Validate an MJPEG stream URL before connecting to it
pub fn validate_stream_url(url: &str, field_name: &str) -> Result<()> {
    validate_non_empty(url, field_name)?;

    if url.len() > MAX_URL_LENGTH {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            MAX_URL_LENGTH,
            url.len()
        ));
    }

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(anyhow!("{} must be an http(s) URL", field_name));
    }

    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(anyhow!("{} contains whitespace or control characters", field_name));
    }

    Ok(())
}

/// Validate value is within range
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {}, got {}",
            field_name,
            min,
            max,
            value
        ));
    }
    Ok(())
}

// ============================================================================
// Safe Time Operations
// ============================================================================

/// Current Unix timestamp in milliseconds, 0 if the clock is before the epoch
pub fn safe_unix_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as u64,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "System clock is before UNIX epoch (1970-01-01), using timestamp 0"
            );
            0
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
