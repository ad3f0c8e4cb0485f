//! Set-associative hash cells.
//!
//! A [`HashCell`] owns a fixed array of page slots whose identities hash
//! to it under the table's current parameters. All identity mutation
//! happens under the cell lock, which is held briefly and never across
//! I/O. Reference handoff is part of the lookup: a page returned from
//! [`HashCell::search`] already carries the caller's reference, so its
//! identity is pinned from the moment the lock is released.

use parking_lot::{Mutex, MutexGuard};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult, ExpandNeeded};
use crate::manager::MemoryManager;
use crate::metrics;
use crate::page::{Page, UNASSIGNED};
use crate::policy::{self, PolicyState};
use crate::shadow::{ShadowCell, ShadowPage};
use crate::sync::{self, AtomicBool, Ordering};
use crate::table::AssociativeCache;

/// Outcome of a cell lookup: the slot holding the page (with the
/// caller's reference already taken) and the offset the admission
/// displaced, if any.
pub(crate) struct CellSearch {
    pub(crate) slot: usize,
    pub(crate) evicted: Option<u64>,
}

/// Bookkeeping guarded by the cell lock.
struct CellState {
    policy: PolicyState,
    shadow: Option<ShadowCell>,
}

/// A fixed-capacity bucket of pages sharing a hash address.
pub(crate) struct HashCell {
    /// Index of this cell in the logical cell space. Fixed for life.
    hash: u64,
    /// Set when the cell had to evict a warm page; cleared by rehash.
    overflow: AtomicBool,
    pages: Box<[Page]>,
    state: Mutex<CellState>,
}

impl HashCell {
    /// Create a cell at logical index `hash`, pulling a full batch of
    /// page buffers from the manager.
    pub(crate) fn new(
        hash: u64,
        config: &CacheConfig,
        manager: &dyn MemoryManager,
    ) -> CacheResult<Self> {
        let bufs = manager
            .get_free_pages(config.cell_size)
            .ok_or(CacheError::OutOfMemory)?;
        let pages: Box<[Page]> = bufs.into_iter().map(Page::new).collect();
        Ok(Self {
            hash,
            overflow: AtomicBool::new(false),
            pages,
            state: Mutex::new(CellState {
                policy: PolicyState::new(config.strategy, config.cell_size),
                shadow: ShadowCell::from_mode(config.shadow),
            }),
        })
    }

    #[inline]
    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub(crate) fn is_overflow(&self) -> bool {
        self.overflow.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn page(&self, slot: usize) -> &Page {
        &self.pages[slot]
    }

    /// Look up `offset`, admitting it on miss.
    ///
    /// On return the chosen page carries one reference for the caller.
    /// Raises [`ExpandNeeded`] when this call grew the table: the cell
    /// may no longer be responsible for the offset, so the caller must
    /// re-route and retry.
    pub(crate) fn search(
        &self,
        offset: u64,
        table: &AssociativeCache,
    ) -> Result<CellSearch, ExpandNeeded> {
        let mut state = match self.state.try_lock() {
            Some(guard) => guard,
            None => {
                metrics::CELL_CONTENDED.increment();
                self.state.lock()
            }
        };

        let mut evicted = None;
        let slot = match self.pages.iter().position(|p| p.raw_offset() == offset) {
            Some(slot) => {
                state.policy.on_hit(slot);
                metrics::HIT.increment();
                slot
            }
            None => {
                let (guard, slot) = self.get_empty_page(state, table)?;
                state = guard;

                let page = &self.pages[slot];
                let old = page.raw_offset();
                if old != UNASSIGNED {
                    evicted = Some(old);
                }
                // The new identity must be visible the moment the lock
                // is released, even though the data isn't ready yet.
                page.set_offset(offset);

                if let Some(shadow) = state.shadow.as_mut() {
                    if let Some(hits) = shadow.search(offset) {
                        page.set_hits(hits);
                        metrics::SHADOW_SEED.increment();
                    }
                }
                metrics::MISS.increment();
                slot
            }
        };

        let page = &self.pages[slot];
        page.inc_ref();

        if page.hits() == u8::MAX {
            for p in self.pages.iter() {
                p.set_hits(p.hits() / 2);
            }
            if let Some(shadow) = state.shadow.as_mut() {
                shadow.scale_down_hits();
            }
        }
        page.hit();

        if evicted.is_some() {
            metrics::EVICT.increment();
        }
        Ok(CellSearch { slot, evicted })
    }

    /// Select a victim slot for admission. Called with the lock held;
    /// the frequency path may drop and re-acquire it around expansion.
    fn get_empty_page<'a>(
        &'a self,
        state: MutexGuard<'a, CellState>,
        table: &AssociativeCache,
    ) -> Result<(MutexGuard<'a, CellState>, usize), ExpandNeeded> {
        if matches!(state.policy, PolicyState::Frequency) {
            self.evict_frequency(state, table)
        } else {
            Ok(self.evict_ordered(state))
        }
    }

    fn evict_frequency<'a>(
        &'a self,
        mut state: MutexGuard<'a, CellState>,
        table: &AssociativeCache,
    ) -> Result<(MutexGuard<'a, CellState>, usize), ExpandNeeded> {
        let mut attempted_expand = false;
        loop {
            let (victim, min_hits) = loop {
                let scan = policy::scan_min_hits(&self.pages);
                if let Some(victim) = scan.victim {
                    break (victim, scan.min_hits);
                }
                if scan.io_pending == self.pages.len() {
                    metrics::ALL_PINNED.increment();
                    tracing::warn!(cell = self.hash, "all pages pinned with io pending");
                }
                // Every slot is pinned. dec_ref is lock-free, so a
                // holder can release while we spin here.
                sync::spin_loop();
            };

            if min_hits > 0 {
                self.overflow.store(true, Ordering::Release);
                if !attempted_expand && table.size() < table.manager().average_cache_size() {
                    drop(state);
                    if table.expand(self) {
                        return Err(ExpandNeeded);
                    }
                    state = self.state.lock();
                    attempted_expand = true;
                    continue;
                }
            }

            let page = &self.pages[victim];
            if page.hits() > 0 {
                if let Some(shadow) = state.shadow.as_mut() {
                    shadow.add(ShadowPage::new(page.raw_offset(), page.hits()));
                }
            }
            page.reset_hits();
            page.set_data_ready(false);
            return Ok((state, victim));
        }
    }

    fn evict_ordered<'a>(
        &'a self,
        mut state: MutexGuard<'a, CellState>,
    ) -> (MutexGuard<'a, CellState>, usize) {
        let slot = match &mut state.policy {
            PolicyState::Lru { order } => {
                let pos = if order.len() < self.pages.len() {
                    order.len()
                } else {
                    order.remove(0)
                };
                while self.pages[pos].ref_count() > 0 {
                    sync::spin_loop();
                }
                order.push(pos);
                pos
            }
            PolicyState::Fifo { cursor } => loop {
                let pos = *cursor;
                *cursor = (pos + 1) % self.pages.len();
                if self.pages[pos].ref_count() == 0 {
                    break pos;
                }
            },
            PolicyState::Frequency => unreachable!("frequency eviction has its own path"),
        };
        self.pages[slot].set_data_ready(false);
        (state, slot)
    }

    /// Move pages that now hash to `expanded` into it. Called only by
    /// the single expander; takes this cell's lock, then the expanded
    /// cell's.
    ///
    /// A page whose `hash1` matches neither cell was admitted through
    /// stale routing during a concurrent split. It stays where it is
    /// with `hits` forced to 1 so it ages out quickly; the only cost is
    /// a possible extra miss. Pinned pages also stay: they will be
    /// rehashed on a later split or simply age out.
    pub(crate) fn rehash(&self, expanded: &HashCell, hash1_modulus: u64, page_size: u64) {
        let _state = self.state.lock();
        let _expanded_state = expanded.state.lock();

        let mut free_slot = 0;
        for page in self.pages.iter() {
            let offset = page.raw_offset();
            if offset == UNASSIGNED {
                continue;
            }
            let hash1 = (offset / page_size) % hash1_modulus;
            if hash1 != self.hash && hash1 != expanded.hash {
                page.set_hits(1);
                continue;
            }
            if hash1 != expanded.hash {
                continue;
            }
            if page.ref_count() != 0 {
                continue;
            }
            while free_slot < expanded.pages.len() {
                let target = &expanded.pages[free_slot];
                if !target.is_initialized() && target.raw_offset() == UNASSIGNED {
                    break;
                }
                free_slot += 1;
            }
            debug_assert!(free_slot < expanded.pages.len());
            if free_slot == expanded.pages.len() {
                break;
            }
            page.swap_with(&expanded.pages[free_slot]);
            free_slot += 1;
        }

        drop(_expanded_state);
        drop(_state);
        self.overflow.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn resident_offsets(&self) -> Vec<u64> {
        let _state = self.state.lock();
        self.pages
            .iter()
            .filter_map(|p| p.offset())
            .collect()
    }
}
