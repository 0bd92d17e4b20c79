//! Engine and per-query configuration.

use serde::{Deserialize, Serialize};

/// Default fuel budget per query.
pub const DEFAULT_MAX_FUEL: u64 = 1_000_000;
/// Default capacity of the shared merged-leaf cache.
pub const DEFAULT_NODE_CACHE_CAPACITY: usize = 1024;
/// Default bounded parallelism at fan-out points (pipeline width, node
/// read-ahead).
pub const DEFAULT_PARALLELISM: usize = 2;

/// Engine-wide configuration, fixed at db construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub node_cache_capacity: usize,
    pub parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            node_cache_capacity: DEFAULT_NODE_CACHE_CAPACITY,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

/// Per-query options, carried in the parsed query's `opts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOpts {
    /// Fuel budget; 0 disables the budget.
    pub max_fuel: u64,
    /// Whether display-time IRI compaction may be memoized per query.
    pub cache: bool,
    /// Bounded parallelism hint for this query's scans.
    pub parallelism: usize,
    /// Hard cap on flakes returned by a single range scan; 0 disables it.
    pub flake_limit: usize,
}

impl Default for QueryOpts {
    fn default() -> Self {
        QueryOpts {
            max_fuel: DEFAULT_MAX_FUEL,
            cache: true,
            parallelism: DEFAULT_PARALLELISM,
            flake_limit: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opts_default_roundtrip() {
        let opts: QueryOpts = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.max_fuel, DEFAULT_MAX_FUEL);
        assert!(opts.cache);
        let json = serde_json::to_string(&opts).unwrap();
        let back: QueryOpts = serde_json::from_str(&json).unwrap();
        assert_eq!(back.parallelism, opts.parallelism);
    }

    #[test]
    fn test_opts_partial_override() {
        let opts: QueryOpts = serde_json::from_str(r#"{"max_fuel": 50}"#).unwrap();
        assert_eq!(opts.max_fuel, 50);
        assert_eq!(opts.flake_limit, 0);
    }
}
