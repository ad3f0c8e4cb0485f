//! Shadow history of evicted pages.
//!
//! When a warm page is evicted, the cell can retain a compact record of
//! its offset and hit count. If the same offset returns before the
//! record is displaced, the new resident starts with its prior hits
//! instead of starting cold.

use std::collections::VecDeque;

use crate::config::ShadowMode;

/// A post-eviction memory of a page: offset, prior hits, and a
/// reference bit for the clock variant.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShadowPage {
    offset: u64,
    hits: u8,
    referenced: bool,
}

impl ShadowPage {
    pub(crate) fn new(offset: u64, hits: u8) -> Self {
        Self {
            offset,
            hits,
            referenced: false,
        }
    }
}

/// Per-cell shadow store, in one of two replacement flavors.
#[derive(Debug)]
pub(crate) enum ShadowCell {
    Clock(ClockShadow),
    Lru(LruShadow),
}

impl ShadowCell {
    /// Build the shadow store for a config mode; `None` when disabled.
    pub(crate) fn from_mode(mode: ShadowMode) -> Option<Self> {
        match mode {
            ShadowMode::Off => None,
            ShadowMode::Clock { capacity } => Some(Self::Clock(ClockShadow::new(capacity))),
            ShadowMode::Lru { capacity } => Some(Self::Lru(LruShadow::new(capacity))),
        }
    }

    pub(crate) fn add(&mut self, page: ShadowPage) {
        match self {
            Self::Clock(s) => s.add(page),
            Self::Lru(s) => s.add(page),
        }
    }

    /// Look up an offset, returning its remembered hits. Lookup doubles
    /// as a recency bump: clock sets the reference bit, LRU moves the
    /// entry to the tail.
    pub(crate) fn search(&mut self, offset: u64) -> Option<u8> {
        match self {
            Self::Clock(s) => s.search(offset),
            Self::Lru(s) => s.search(offset),
        }
    }

    pub(crate) fn scale_down_hits(&mut self) {
        let queue = match self {
            Self::Clock(s) => &mut s.queue,
            Self::Lru(s) => &mut s.queue,
        };
        for entry in queue.iter_mut() {
            entry.hits /= 2;
        }
    }
}

/// Clock-replacement shadow store.
#[derive(Debug)]
pub(crate) struct ClockShadow {
    queue: VecDeque<ShadowPage>,
    capacity: usize,
    hand: usize,
}

impl ClockShadow {
    fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            hand: 0,
        }
    }

    fn add(&mut self, page: ShadowPage) {
        if self.queue.len() < self.capacity {
            self.queue.push_back(page);
            return;
        }
        // A referenced entry gets spared once; a full revolution clears
        // every reference bit, so the second pass always inserts.
        loop {
            for _ in 0..self.queue.len() {
                self.hand = (self.hand + 1) % self.queue.len();
                let entry = &mut self.queue[self.hand];
                if entry.referenced {
                    entry.referenced = false;
                    continue;
                }
                *entry = page;
                return;
            }
        }
    }

    fn search(&mut self, offset: u64) -> Option<u8> {
        for entry in self.queue.iter_mut() {
            if entry.offset == offset {
                entry.referenced = true;
                return Some(entry.hits);
            }
        }
        None
    }
}

/// LRU-replacement shadow store.
#[derive(Debug)]
pub(crate) struct LruShadow {
    queue: VecDeque<ShadowPage>,
    capacity: usize,
}

impl LruShadow {
    fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn add(&mut self, page: ShadowPage) {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back(page);
    }

    fn search(&mut self, offset: u64) -> Option<u8> {
        let idx = self.queue.iter().position(|e| e.offset == offset)?;
        let entry = self.queue.remove(idx)?;
        self.queue.push_back(entry);
        Some(entry.hits)
    }
}
