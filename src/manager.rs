//! The memory-manager seam and the stock pool implementation.
//!
//! The cache pulls page buffers through the [`MemoryManager`] trait and
//! never frees them individually: batches attach to a cell at its
//! creation and live until the cache drops. The manager's other job is
//! the expansion heuristic: [`MemoryManager::average_cache_size`] is the
//! soft per-cache target a cell compares against before growing the
//! table instead of evicting a warm page.

use std::sync::Arc;

use crate::page::PageBuf;
use crate::sync::{AtomicUsize, Ordering};

/// Shared page allocator with per-cache quotas.
pub trait MemoryManager: Send + Sync {
    /// Record another cache drawing from this manager's budget.
    fn register_cache(&self);

    /// Allocate `count` page buffers, or `None` if the budget cannot
    /// cover the whole batch. Never hands out a partial batch.
    fn get_free_pages(&self, count: usize) -> Option<Vec<PageBuf>>;

    /// Soft size target per registered cache, in cells.
    fn average_cache_size(&self) -> u64;

    /// Total budget in bytes. Bounds each cache's directory length at
    /// construction.
    fn max_size(&self) -> usize;

    /// Size in bytes of the buffers [`Self::get_free_pages`] hands out.
    fn page_size(&self) -> usize;
}

/// Budget bookkeeping shared with the buffers themselves, so a batch
/// dropped before attachment (a failed chunk allocation) returns its
/// pages.
pub(crate) struct PoolLedger {
    max_pages: usize,
    allocated: AtomicUsize,
}

impl PoolLedger {
    fn reserve(&self, count: usize) -> bool {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current + count <= self.max_pages {
                    Some(current + count)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub(crate) fn release(&self, count: usize) {
        self.allocated.fetch_sub(count, Ordering::AcqRel);
    }
}

/// The stock [`MemoryManager`]: a fixed byte budget carved into
/// fixed-size page buffers, shared by every cache registered with it.
pub struct PagePool {
    ledger: Arc<PoolLedger>,
    page_size: usize,
    cell_size: usize,
    caches: AtomicUsize,
}

impl PagePool {
    /// Create a pool with a total budget of `max_size` bytes, handing
    /// out `page_size`-byte buffers to caches with `cell_size`-page
    /// cells.
    pub fn new(max_size: usize, page_size: usize, cell_size: usize) -> Self {
        Self {
            ledger: Arc::new(PoolLedger {
                max_pages: max_size / page_size,
                allocated: AtomicUsize::new(0),
            }),
            page_size,
            cell_size,
            caches: AtomicUsize::new(0),
        }
    }

    /// Pages currently drawn from the budget.
    pub fn pages_in_use(&self) -> usize {
        self.ledger.allocated.load(Ordering::Acquire)
    }
}

impl MemoryManager for PagePool {
    fn register_cache(&self) {
        self.caches.fetch_add(1, Ordering::AcqRel);
    }

    fn get_free_pages(&self, count: usize) -> Option<Vec<PageBuf>> {
        if !self.ledger.reserve(count) {
            return None;
        }
        Some(
            (0..count)
                .map(|_| PageBuf::with_ledger(self.page_size, self.ledger.clone()))
                .collect(),
        )
    }

    fn average_cache_size(&self) -> u64 {
        let caches = self.caches.load(Ordering::Acquire).max(1);
        (self.ledger.max_pages / self.cell_size / caches) as u64
    }

    fn max_size(&self) -> usize {
        self.ledger.max_pages * self.page_size
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
