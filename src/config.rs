//! Configuration types for the cache and its replacement policies.

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of page slots per hash cell.
pub const DEFAULT_CELL_SIZE: usize = 8;

/// In-cell replacement policy.
///
/// Exactly one policy is active per cache. Only the frequency-biased
/// policy participates in table expansion; under `Lru` and `Fifo` the
/// table stays at its initial size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionStrategy {
    /// Evict the unpinned page with the fewest hits since admission.
    /// Marks the cell as overflowing when it has to evict a warm page,
    /// which feeds the expansion heuristic.
    #[default]
    Frequency,

    /// Evict in least-recently-used order, busy-waiting for the head
    /// slot to become unpinned.
    Lru,

    /// Evict with a cursor advancing over the slots, skipping pinned
    /// pages.
    Fifo,
}

/// Shadow-history configuration for a cache's cells.
///
/// A shadow cell remembers the hit count of recently evicted pages so a
/// returning offset can be re-admitted warm instead of cold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowMode {
    /// No shadow history.
    #[default]
    Off,

    /// Clock replacement over the shadow entries: a cursor skips (and
    /// clears) recently referenced entries, so a full revolution always
    /// finds a victim.
    Clock {
        /// Number of shadow entries retained per cell.
        capacity: usize,
    },

    /// LRU replacement over the shadow entries: lookups move the match
    /// to the tail, insertion into a full queue drops the head.
    Lru {
        /// Number of shadow entries retained per cell.
        capacity: usize,
    },
}

/// Cache configuration.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Size of each page buffer in bytes. Must match the memory
    /// manager's buffer size.
    pub page_size: usize,

    /// Number of page slots per hash cell.
    pub cell_size: usize,

    /// In-cell replacement policy.
    pub strategy: EvictionStrategy,

    /// Per-cell shadow history.
    pub shadow: ShadowMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cell_size: DEFAULT_CELL_SIZE,
            strategy: EvictionStrategy::default(),
            shadow: ShadowMode::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page size in bytes.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the number of page slots per cell.
    pub fn with_cell_size(mut self, cell_size: usize) -> Self {
        self.cell_size = cell_size;
        self
    }

    /// Set the replacement policy.
    pub fn with_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the shadow-history mode.
    pub fn with_shadow(mut self, shadow: ShadowMode) -> Self {
        self.shadow = shadow;
        self
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::new();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.cell_size, DEFAULT_CELL_SIZE);
        assert_eq!(config.strategy, EvictionStrategy::Frequency);
        assert_eq!(config.shadow, ShadowMode::Off);
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_page_size(8192)
            .with_cell_size(16)
            .with_strategy(EvictionStrategy::Lru)
            .with_shadow(ShadowMode::Clock { capacity: 32 });

        assert_eq!(config.page_size, 8192);
        assert_eq!(config.cell_size, 16);
        assert_eq!(config.strategy, EvictionStrategy::Lru);
        assert_eq!(config.shadow, ShadowMode::Clock { capacity: 32 });
    }
}
