//! Replacement-policy bookkeeping.
//!
//! Policies are a tagged variant rather than trait objects: the cell
//! owns one [`PolicyState`] and dispatches on it under its lock. The
//! frequency scan is a pure function over the slot array; the LRU and
//! FIFO variants carry the small amount of per-cell state they need.

use crate::config::EvictionStrategy;
use crate::page::Page;

/// Per-cell replacement state.
#[derive(Debug)]
pub(crate) enum PolicyState {
    /// Frequency-biased: victim is the unpinned slot with minimum hits.
    Frequency,

    /// LRU: `order` lists occupied slot positions from LRU head to MRU
    /// tail.
    Lru { order: Vec<usize> },

    /// FIFO: cursor over the slot array.
    Fifo { cursor: usize },
}

impl PolicyState {
    pub(crate) fn new(strategy: EvictionStrategy, cell_size: usize) -> Self {
        match strategy {
            EvictionStrategy::Frequency => Self::Frequency,
            EvictionStrategy::Lru => Self::Lru {
                order: Vec::with_capacity(cell_size),
            },
            EvictionStrategy::Fifo => Self::Fifo { cursor: 0 },
        }
    }

    /// Record an access to `slot`. LRU moves the slot to the MRU tail;
    /// the other policies keep no per-access state.
    pub(crate) fn on_hit(&mut self, slot: usize) {
        if let Self::Lru { order } = self {
            if let Some(idx) = order.iter().position(|&pos| pos == slot) {
                order.remove(idx);
            }
            order.push(slot);
        }
    }
}

/// Result of a frequency victim scan over a cell's slots.
pub(crate) struct FrequencyScan {
    /// Unpinned slot with minimum hits, if any slot was unpinned.
    pub(crate) victim: Option<usize>,
    /// The victim's hit count.
    pub(crate) min_hits: u8,
    /// Pinned slots that also had I/O pending.
    pub(crate) io_pending: usize,
}

/// Scan for the unpinned slot with minimum hits, short-circuiting on a
/// completely cold slot. Must run under the cell lock so that observed
/// zero ref counts stay zero.
pub(crate) fn scan_min_hits(pages: &[Page]) -> FrequencyScan {
    let mut victim = None;
    let mut min_hits = u8::MAX;
    let mut io_pending = 0;

    for (slot, page) in pages.iter().enumerate() {
        if page.ref_count() > 0 {
            if page.is_io_pending() {
                io_pending += 1;
            }
            continue;
        }
        let hits = page.hits();
        if victim.is_none() || hits < min_hits {
            min_hits = hits;
            victim = Some(slot);
            if hits == 0 {
                break;
            }
        }
    }

    FrequencyScan {
        victim,
        min_hits,
        io_pending,
    }
}
