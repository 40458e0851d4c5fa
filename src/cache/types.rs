//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type - opaque, namespaced by the owning key spec's prefix
pub type CacheKey = String;

/// Cache value type - any serializable projection, stored as JSON
pub type CacheValue = serde_json::Value;

/// Statistics for cache store monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of key lookups that found a live entry
    pub hits: u64,

    /// Total number of key lookups that found nothing
    pub misses: u64,

    /// Number of entries currently held
    pub entries: usize,

    /// Number of entries written
    pub writes: u64,

    /// Number of entries dropped because their TTL elapsed
    pub expirations: u64,

    /// Number of explicit deletions that removed a live entry
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, writes: {}, expirations: {}, invalidations: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.writes,
            self.expirations,
            self.invalidations
        )
    }
}

/// Whether a loaded value counts as "nothing yet" and must not be cached.
///
/// Null, `false`, zero, the empty string and empty collections are falsy.
pub fn is_falsy(value: &CacheValue) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Bool(b) => !b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::Object(map) => map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.miss_rate(), 20.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 100.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 100,
            misses: 50,
            entries: 75,
            writes: 80,
            expirations: 5,
            invalidations: 3,
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("misses: 50"));
    }

    #[test]
    fn test_is_falsy() {
        assert!(is_falsy(&json!(null)));
        assert!(is_falsy(&json!(false)));
        assert!(is_falsy(&json!(0)));
        assert!(is_falsy(&json!("")));
        assert!(is_falsy(&json!([])));
        assert!(is_falsy(&json!({})));

        assert!(!is_falsy(&json!(true)));
        assert!(!is_falsy(&json!(3)));
        assert!(!is_falsy(&json!("x")));
        assert!(!is_falsy(&json!([0])));
        assert!(!is_falsy(&json!({"1": {"name": "Alice"}})));
    }
}
