//! The associative cache: a linear-hash directory of cells.
//!
//! The directory is a fixed-length vector of chunk slots, each chunk an
//! immutable `Arc<[HashCell]>` of `init_ncells` cells. Growth publishes
//! new chunks into empty slots under the write lock; the vector itself
//! never reallocates, so routing snapshots stay valid across growth.
//!
//! Two integers define the linear-hash state: `level` and `split`. An
//! offset's page index hashes with `hash0 = p % (2^level * init_ncells)`;
//! if that lands below the split pointer the cell has already been
//! divided this round and `hash1 = p % (2^(level+1) * init_ncells)`
//! routes instead.
//!
//! Expansion is single-writer, gated by a test-and-set flag: the winning
//! thread splits cells one at a time from the split pointer forward
//! while lookups continue under the read lock.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cell::HashCell;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::manager::MemoryManager;
use crate::metrics;
use crate::page::PageRef;
use crate::sync::{AtomicBool, AtomicUsize, Ordering};

type Chunk = Arc<[HashCell]>;

/// Directory state guarded by the table's reader/writer lock. Readers
/// route lookups; the single expander publishes chunks and advances the
/// split pointer.
struct Directory {
    chunks: Vec<Option<Chunk>>,
    level: u32,
    split: u64,
}

/// A routed cell: the chunk keeps the cell (and its pages) alive while
/// the reference is out, independent of directory growth.
pub(crate) struct CellRef {
    chunk: Chunk,
    index: usize,
}

impl CellRef {
    pub(crate) fn cell(&self) -> &HashCell {
        &self.chunk[self.index]
    }

    fn into_parts(self) -> (Chunk, usize) {
        (self.chunk, self.index)
    }
}

/// A concurrent set-associative page cache with linear-hash growth.
pub struct AssociativeCache {
    manager: Arc<dyn MemoryManager>,
    config: CacheConfig,
    init_ncells: u64,
    directory: RwLock<Directory>,
    nchunks: AtomicUsize,
    max_nchunks: usize,
    expanding: AtomicBool,
}

impl AssociativeCache {
    /// Create a cache with the default configuration.
    ///
    /// `init_cache_size` is the initial memory footprint in bytes; it
    /// must cover at least one full cell of pages.
    pub fn new(manager: Arc<dyn MemoryManager>, init_cache_size: usize) -> CacheResult<Self> {
        Self::with_config(manager, init_cache_size, CacheConfig::default())
    }

    /// Create a cache with an explicit configuration.
    pub fn with_config(
        manager: Arc<dyn MemoryManager>,
        init_cache_size: usize,
        config: CacheConfig,
    ) -> CacheResult<Self> {
        assert!(
            init_cache_size >= config.cell_size * config.page_size,
            "initial cache size must cover at least one cell"
        );
        assert_eq!(
            manager.page_size(),
            config.page_size,
            "manager and cache page sizes must agree"
        );

        manager.register_cache();

        let npages = init_cache_size / config.page_size;
        let init_ncells = (npages / config.cell_size) as u64;
        let chunk = Self::build_chunk(0, init_ncells, &config, manager.as_ref())?;

        let max_npages = manager.max_size() / config.page_size;
        let max_ncells = (max_npages / config.cell_size) as u64;
        let max_nchunks = (max_ncells / init_ncells).max(1) as usize;

        let mut chunks: Vec<Option<Chunk>> = vec![None; max_nchunks];
        chunks[0] = Some(chunk);

        Ok(Self {
            manager,
            config,
            init_ncells,
            directory: RwLock::new(Directory {
                chunks,
                level: 0,
                split: 0,
            }),
            nchunks: AtomicUsize::new(1),
            max_nchunks,
            expanding: AtomicBool::new(false),
        })
    }

    /// Look up `offset`, admitting it on miss.
    ///
    /// Returns a lease on the resident page plus the offset the
    /// admission displaced, if any. A page returned with
    /// `data_ready == false` obligates the caller to drive the read (or
    /// wait on a holder that already claimed it via `io_pending`).
    ///
    /// The retry loop absorbs table growth: a cell that expanded the
    /// table mid-lookup may no longer be responsible for the offset, so
    /// routing restarts from the updated split state.
    pub fn search(&self, offset: u64) -> (PageRef, Option<u64>) {
        debug_assert_eq!(offset % self.config.page_size as u64, 0);
        loop {
            let routed = self.cell_for_offset(offset);
            match routed.cell().search(offset, self) {
                Ok(found) => {
                    let (chunk, index) = routed.into_parts();
                    return (PageRef::new(chunk, index, found.slot), found.evicted);
                }
                Err(_expand) => continue,
            }
        }
    }

    /// Current number of logical cells: `2^level * init_ncells + split`.
    pub fn size(&self) -> u64 {
        let dir = self.directory.read();
        (1u64 << dir.level) * self.init_ncells + dir.split
    }

    pub(crate) fn manager(&self) -> &dyn MemoryManager {
        self.manager.as_ref()
    }

    /// Route an offset to its responsible cell under the current split
    /// state. The snapshot is taken under one read-lock acquisition so
    /// the split pointer and the chunk it routes into are consistent.
    fn cell_for_offset(&self, offset: u64) -> CellRef {
        let dir = self.directory.read();
        let page_idx = offset / self.config.page_size as u64;
        let size = (1u64 << dir.level) * self.init_ncells;
        let mut index = page_idx % size;
        if index < dir.split {
            index = page_idx % (size * 2);
        }
        self.cell_ref_locked(&dir, index)
    }

    /// Fetch the cell at a global logical index.
    pub(crate) fn get_cell(&self, index: u64) -> CellRef {
        let dir = self.directory.read();
        self.cell_ref_locked(&dir, index)
    }

    fn cell_ref_locked(&self, dir: &Directory, index: u64) -> CellRef {
        let chunk_idx = (index / self.init_ncells) as usize;
        let offset = (index % self.init_ncells) as usize;
        let chunk = dir.chunks[chunk_idx]
            .as_ref()
            .expect("routed cell in unpublished chunk")
            .clone();
        CellRef {
            chunk,
            index: offset,
        }
    }

    /// Grow the table by splitting cells from the split pointer forward
    /// until the pointer has passed `origin` and origin's overflow has
    /// cleared, or the level rolls over.
    ///
    /// Single-writer: returns `false` immediately when another thread
    /// holds the expansion flag, and on allocation failure (chunks that
    /// did allocate stay published; routing continues under the
    /// pre-expansion split state).
    pub(crate) fn expand(&self, origin: &HashCell) -> bool {
        if self.expanding.swap(true, Ordering::AcqRel) {
            return false;
        }

        let origin_index = origin.hash();
        let (mut split, size) = {
            let dir = self.directory.read();
            (dir.split, (1u64 << dir.level) * self.init_ncells)
        };

        while split < origin_index || origin.is_overflow() {
            let chunk_idx = ((split + size) / self.init_ncells) as usize;
            let published = self.nchunks.load(Ordering::Acquire);
            if chunk_idx >= published {
                if chunk_idx >= self.max_nchunks {
                    self.expanding.store(false, Ordering::Release);
                    return false;
                }
                let mut created: Vec<Chunk> = Vec::new();
                let mut out_of_memory = false;
                for idx in published..=chunk_idx {
                    match Self::build_chunk(
                        idx as u64,
                        self.init_ncells,
                        &self.config,
                        self.manager.as_ref(),
                    ) {
                        Ok(chunk) => created.push(chunk),
                        Err(CacheError::OutOfMemory) => {
                            out_of_memory = true;
                            break;
                        }
                    }
                }
                let count = created.len();
                if count > 0 {
                    tracing::debug!(
                        chunks = count,
                        cells_per_chunk = self.init_ncells,
                        "published new cell chunks"
                    );
                    let mut dir = self.directory.write();
                    for (k, chunk) in created.into_iter().enumerate() {
                        dir.chunks[published + k] = Some(chunk);
                    }
                    drop(dir);
                    self.nchunks.fetch_add(count, Ordering::Release);
                }
                if out_of_memory {
                    metrics::EXPAND_OOM.increment();
                    self.expanding.store(false, Ordering::Release);
                    return false;
                }
            }

            let splitting = self.get_cell(split);
            let expanded = self.get_cell(split + size);
            splitting
                .cell()
                .rehash(expanded.cell(), size * 2, self.config.page_size as u64);

            let mut dir = self.directory.write();
            dir.split += 1;
            if dir.split == size {
                dir.level += 1;
                dir.split = 0;
                let level = dir.level;
                drop(dir);
                tracing::debug!(level, "increased hash level");
                break;
            }
            split = dir.split;
        }

        metrics::EXPAND.increment();
        self.expanding.store(false, Ordering::Release);
        true
    }

    fn build_chunk(
        chunk_idx: u64,
        init_ncells: u64,
        config: &CacheConfig,
        manager: &dyn MemoryManager,
    ) -> CacheResult<Chunk> {
        let mut cells = Vec::with_capacity(init_ncells as usize);
        for j in 0..init_ncells {
            cells.push(HashCell::new(
                chunk_idx * init_ncells + j,
                config,
                manager,
            )?);
        }
        Ok(cells.into())
    }

    #[cfg(test)]
    pub(crate) fn split_state(&self) -> (u32, u64) {
        let dir = self.directory.read();
        (dir.level, dir.split)
    }

    #[cfg(test)]
    pub(crate) fn offsets_in_cell(&self, index: u64) -> Vec<u64> {
        self.get_cell(index).cell().resident_offsets()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::manager::PagePool;

    const PAGE: u64 = 4096;

    fn split_cache() -> AssociativeCache {
        // Two 2-slot cells initially, with room to grow to 32 cells.
        let config = CacheConfig::new().with_cell_size(2);
        let pool = Arc::new(PagePool::new(64 * 4096, 4096, 2));
        AssociativeCache::with_config(pool, 4 * 4096, config).unwrap()
    }

    #[test]
    fn test_initial_size() {
        let cache = split_cache();
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.split_state(), (0, 0));
    }

    #[test]
    fn test_split_advances_and_reroutes() {
        let cache = split_cache();
        // Page indices 0 and 2 both land in cell 0 at level 0.
        cache.search(0);
        cache.search(2 * PAGE);
        // A third resident of cell 0 forces an eviction of a warm page,
        // which grows the table instead.
        cache.search(4 * PAGE);

        assert_eq!(cache.size(), 3);
        assert_eq!(cache.split_state(), (0, 1));

        // Page index 2 rehashed into the new cell at index 2.
        assert_eq!(cache.offsets_in_cell(2), vec![2 * PAGE]);

        // Residents hit where routing now points: no evictions.
        let (page, evicted) = cache.search(2 * PAGE);
        assert!(evicted.is_none());
        assert_eq!(page.hits(), 2);
        let (page, evicted) = cache.search(0);
        assert!(evicted.is_none());
        assert_eq!(page.offset(), Some(0));
    }

    #[test]
    fn test_level_rolls_over() {
        let cache = split_cache();
        // Keep forcing splits by hammering offsets that collide at the
        // current level.
        for i in 0..32u64 {
            cache.search(i * PAGE);
        }
        let (level, split) = cache.split_state();
        let logical = (1u64 << level) * 2 + split;
        assert_eq!(cache.size(), logical);
        assert!(cache.size() >= 2);
    }

    #[test]
    fn test_expand_capped_by_directory() {
        // Pool allows exactly the initial footprint: no room to grow.
        let config = CacheConfig::new().with_cell_size(2);
        let pool = Arc::new(PagePool::new(4 * 4096, 4096, 2));
        let cache = AssociativeCache::with_config(pool, 4 * 4096, config).unwrap();
        for i in 0..16u64 {
            cache.search(i * PAGE);
        }
        assert_eq!(cache.size(), 2);
    }
}
