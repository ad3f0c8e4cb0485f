//! Page buffers and the reference-counted page lease.
//!
//! A [`Page`] pairs a fixed-size buffer with the identity and
//! coordination state the cache tracks for it:
//!
//! - `offset`: the backing-store offset the buffer currently represents
//! - `refs`: count of live leases; a page with `refs > 0` is pinned
//! - `hits`: saturating access counter driving frequency-biased eviction
//! - flags: `data_ready`, `io_pending`, `initialized`
//!
//! Pages are owned by their hash cell for the cache's whole lifetime;
//! only the identity changes. Workers hold a [`PageRef`] lease which
//! releases its reference on drop.
//!
//! # Buffer protocol
//!
//! The cache never touches page contents. A caller that receives a lease
//! with `data_ready == false` drives the read itself: it claims the I/O
//! with [`Page::try_begin_io`], writes the buffer with [`Page::fill`],
//! and publishes it with [`Page::set_data_ready`]. Other holders observe
//! `io_pending` and wait for `data_ready` before calling
//! [`Page::copy_to`].

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::cell::HashCell;
use crate::manager::PoolLedger;
use crate::sync::{AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Sentinel for a page that currently represents no offset.
pub(crate) const UNASSIGNED: u64 = u64::MAX;

const DATA_READY: u8 = 1 << 0;
const IO_PENDING: u8 = 1 << 1;
const INITIALIZED: u8 = 1 << 2;

/// A raw page buffer handed out by a memory manager.
///
/// Buffers are zero-filled at allocation. A buffer allocated from a
/// [`PagePool`](crate::PagePool) returns its budget to the pool when
/// dropped.
pub struct PageBuf {
    data: Box<[u8]>,
    ledger: Option<Arc<PoolLedger>>,
}

impl PageBuf {
    /// Allocate a free-standing zeroed buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![0u8; len].into_boxed_slice(),
            ledger: None,
        }
    }

    pub(crate) fn with_ledger(len: usize, ledger: Arc<PoolLedger>) -> Self {
        Self {
            data: vec![0u8; len].into_boxed_slice(),
            ledger: Some(ledger),
        }
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is zero-sized.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for PageBuf {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            ledger.release(1);
        }
    }
}

/// A fixed-size page slot: identity, coordination flags, and the buffer.
pub struct Page {
    offset: AtomicU64,
    refs: AtomicU32,
    hits: AtomicU8,
    flags: AtomicU8,
    buf: UnsafeCell<PageBuf>,
}

// SAFETY: identity and flags are atomics; the buffer is only written by
// the single lease holder that claimed the I/O (via try_begin_io) before
// data_ready is set, and only read by holders after observing data_ready.
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

impl Page {
    pub(crate) fn new(buf: PageBuf) -> Self {
        Self {
            offset: AtomicU64::new(UNASSIGNED),
            refs: AtomicU32::new(0),
            hits: AtomicU8::new(0),
            flags: AtomicU8::new(0),
            buf: UnsafeCell::new(buf),
        }
    }

    /// The backing-store offset this page currently represents, or
    /// `None` if the slot is unassigned.
    pub fn offset(&self) -> Option<u64> {
        match self.raw_offset() {
            UNASSIGNED => None,
            off => Some(off),
        }
    }

    #[inline]
    pub(crate) fn raw_offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Reassign the page identity. Only called while holding the owning
    /// cell's lock, after the slot was verified unpinned.
    pub(crate) fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::Release);
    }

    /// Number of live leases on this page.
    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Take a reference. Only called under the owning cell's lock; that
    /// is what makes an observed `ref_count() == 0` stable for the
    /// duration of victim selection.
    pub(crate) fn inc_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Release a reference. May be called from any thread without locks.
    pub(crate) fn dec_ref(&self) {
        self.refs.fetch_sub(1, Ordering::Release);
    }

    /// Accesses recorded since this offset became resident.
    pub fn hits(&self) -> u8 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Record an access. Saturating; the owning cell halves all counters
    /// when one reaches the maximum.
    pub(crate) fn hit(&self) {
        let hits = self.hits();
        if hits < u8::MAX {
            self.hits.store(hits + 1, Ordering::Relaxed);
        }
    }

    pub(crate) fn set_hits(&self, hits: u8) {
        self.hits.store(hits, Ordering::Relaxed);
    }

    pub(crate) fn reset_hits(&self) {
        self.hits.store(0, Ordering::Relaxed);
    }

    /// Whether the buffer holds valid contents for the current offset.
    pub fn is_data_ready(&self) -> bool {
        self.flags.load(Ordering::Acquire) & DATA_READY != 0
    }

    /// Publish (or invalidate) the buffer contents. Setting also marks
    /// the page as initialized.
    pub fn set_data_ready(&self, ready: bool) {
        if ready {
            self.flags
                .fetch_or(DATA_READY | INITIALIZED, Ordering::Release);
        } else {
            self.flags.fetch_and(!DATA_READY, Ordering::Release);
        }
    }

    /// Whether a read into this buffer has been issued and not completed.
    pub fn is_io_pending(&self) -> bool {
        self.flags.load(Ordering::Acquire) & IO_PENDING != 0
    }

    /// Set or clear the I/O-pending flag.
    pub fn set_io_pending(&self, pending: bool) {
        if pending {
            self.flags.fetch_or(IO_PENDING, Ordering::Release);
        } else {
            self.flags.fetch_and(!IO_PENDING, Ordering::Release);
        }
    }

    /// Atomically claim responsibility for driving the I/O.
    ///
    /// Returns `true` for exactly one caller per pending read; the rest
    /// should wait for `data_ready`.
    pub fn try_begin_io(&self) -> bool {
        self.flags.fetch_or(IO_PENDING, Ordering::AcqRel) & IO_PENDING == 0
    }

    /// Whether the page has ever held valid data.
    pub fn is_initialized(&self) -> bool {
        self.flags.load(Ordering::Acquire) & INITIALIZED != 0
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        // SAFETY: the length is fixed at allocation and never mutated.
        unsafe { (*self.buf.get()).len() }
    }

    /// Whether the buffer is zero-sized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `src` into the start of the buffer.
    ///
    /// Must only be called by the lease holder that claimed the I/O for
    /// the current offset, before `data_ready` is set.
    pub fn fill(&self, src: &[u8]) {
        // SAFETY: the I/O claim (try_begin_io) serializes writers, and
        // readers do not touch the buffer until data_ready is set.
        let buf = unsafe { &mut *self.buf.get() };
        buf.data[..src.len()].copy_from_slice(src);
    }

    /// Copy the start of the buffer into `dst`.
    ///
    /// Must only be called by a lease holder after observing
    /// `data_ready`.
    pub fn copy_to(&self, dst: &mut [u8]) {
        // SAFETY: data_ready is set with release ordering after the last
        // write, so holders that observed it see complete contents.
        let buf = unsafe { &*self.buf.get() };
        let len = dst.len();
        dst.copy_from_slice(&buf.data[..len]);
    }

    /// Exchange the full page state (identity, hits, flags, buffer) with
    /// `other`. Both owning cells' locks must be held and neither page
    /// may have live leases.
    pub(crate) fn swap_with(&self, other: &Page) {
        debug_assert_eq!(self.ref_count(), 0);
        debug_assert_eq!(other.ref_count(), 0);

        let offset = self.offset.load(Ordering::Relaxed);
        self.offset
            .store(other.offset.load(Ordering::Relaxed), Ordering::Relaxed);
        other.offset.store(offset, Ordering::Relaxed);

        let hits = self.hits.load(Ordering::Relaxed);
        self.hits
            .store(other.hits.load(Ordering::Relaxed), Ordering::Relaxed);
        other.hits.store(hits, Ordering::Relaxed);

        let flags = self.flags.load(Ordering::Relaxed);
        self.flags
            .store(other.flags.load(Ordering::Relaxed), Ordering::Relaxed);
        other.flags.store(flags, Ordering::Relaxed);

        // SAFETY: both cell locks are held and ref counts are zero, so
        // no other thread can access either buffer during the swap.
        unsafe { std::ptr::swap(self.buf.get(), other.buf.get()) };
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("offset", &self.offset())
            .field("refs", &self.ref_count())
            .field("hits", &self.hits())
            .field("data_ready", &self.is_data_ready())
            .field("io_pending", &self.is_io_pending())
            .finish()
    }
}

/// A lease on a resident page.
///
/// Holds one reference taken under the owning cell's lock; while the
/// lease is alive the page's identity cannot change. The reference is
/// released on drop.
pub struct PageRef {
    chunk: Arc<[HashCell]>,
    cell: usize,
    slot: usize,
}

impl PageRef {
    pub(crate) fn new(chunk: Arc<[HashCell]>, cell: usize, slot: usize) -> Self {
        Self { chunk, cell, slot }
    }
}

impl Deref for PageRef {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.chunk[self.cell].page(self.slot)
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        self.chunk[self.cell].page(self.slot).dec_ref();
    }
}

impl fmt::Debug for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PageRef").field(self.deref()).finish()
    }
}
