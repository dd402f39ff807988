//! Cache key management utilities.
//!
//! Keys must be deterministic: two logically-equal queries share a cache
//! slot, so coordinates are rounded to a fixed precision before the key is
//! built (4 decimal places, roughly 11 m at the equator — well below any
//! sighting radius).

use crate::alert::AlertQuery;

/// Decimal places kept when normalizing coordinates into keys.
const COORD_PRECISION: u32 = 4;

/// Builder for cache keys.
pub struct QueryKeyBuilder;

impl QueryKeyBuilder {
    /// Build the cache key for an alerts-list query.
    ///
    /// Format: `alerts:{lat}:{lon}:{radius}:{category}:{min_level}` with
    /// coordinates rounded to [`COORD_PRECISION`] places.
    ///
    /// # Example
    ///
    /// ```
    /// use offline_kit::alert::AlertQuery;
    /// use offline_kit::key::QueryKeyBuilder;
    ///
    /// let a = QueryKeyBuilder::list_key(&AlertQuery::near(40.00001, -74.0, 50));
    /// let b = QueryKeyBuilder::list_key(&AlertQuery::near(40.00004, -74.0, 50));
    /// assert_eq!(a, b);
    /// ```
    pub fn list_key(query: &AlertQuery) -> String {
        format!(
            "alerts:{}:{}:{}:{}:{}",
            Self::normalize_coord(query.latitude),
            Self::normalize_coord(query.longitude),
            query.radius_km,
            query.category.as_deref().unwrap_or("all"),
            query.min_level.map_or("any".to_string(), |l| l.to_string()),
        )
    }

    /// Build the cache key for a single alert.
    pub fn alert_key(id: &str) -> String {
        format!("alert:{}", id)
    }

    /// Build the cache key for an opaque API response.
    pub fn response_key(endpoint: &str) -> String {
        format!("response:{}", endpoint)
    }

    /// Build the cache key for a pending submission.
    ///
    /// The zero-padded sequence number keeps lexicographic key order equal
    /// to enqueue order, so FIFO survives a restart.
    pub fn submission_key(sequence: u64, id: &str) -> String {
        format!("submission:{:016}:{}", sequence, id)
    }

    /// Parse a composite key into parts.
    pub fn parse(key: &str) -> Vec<&str> {
        key.split(':').collect()
    }

    /// Round a coordinate to the fixed cache precision.
    fn normalize_coord(value: f64) -> String {
        let factor = 10f64.powi(COORD_PRECISION as i32);
        format!(
            "{:.prec$}",
            (value * factor).round() / factor,
            prec = COORD_PRECISION as usize
        )
    }
}
