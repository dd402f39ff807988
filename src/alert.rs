//! Sighting alert domain types shared across the toolkit.

use serde::{Deserialize, Serialize};

/// A sighting alert as returned by the remote service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Server-assigned identifier
    pub id: String,
    /// Short human-readable headline
    pub title: String,
    /// Optional longer description
    pub description: Option<String>,
    /// Sighting category (e.g. "wildlife", "hazard")
    pub category: String,
    /// Severity level, 0 (informational) through 5 (critical)
    pub level: u8,
    /// Sighting latitude in decimal degrees
    pub latitude: f64,
    /// Sighting longitude in decimal degrees
    pub longitude: f64,
    /// Unix epoch milliseconds when the sighting was reported
    pub reported_at_ms: u64,
}

/// A geographic query for nearby alerts.
///
/// Two queries that differ only in sub-meter coordinate noise are the same
/// query for caching purposes; see [`crate::key::QueryKeyBuilder`] for the
/// normalization rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertQuery {
    /// Center latitude in decimal degrees
    pub latitude: f64,
    /// Center longitude in decimal degrees
    pub longitude: f64,
    /// Search radius in kilometers
    pub radius_km: u32,
    /// Restrict to one category; `None` means all
    pub category: Option<String>,
    /// Minimum severity level; `None` means all
    pub min_level: Option<u8>,
}

impl AlertQuery {
    /// Query for all alerts within `radius_km` of a point.
    pub fn near(latitude: f64, longitude: f64, radius_km: u32) -> Self {
        AlertQuery {
            latitude,
            longitude,
            radius_km,
            category: None,
            min_level: None,
        }
    }

    /// Restrict to a category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Restrict to alerts at or above a severity level.
    pub fn with_min_level(mut self, level: u8) -> Self {
        self.min_level = Some(level);
        self
    }
}

/// A locally-authored alert not yet accepted by the remote service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub level: u8,
    pub latitude: f64,
    pub longitude: f64,
}
