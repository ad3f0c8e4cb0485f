//! Cache metrics.
//!
//! Static counters registered with metriken for exposition by whatever
//! process embeds the cache. The cache only increments them; it never
//! reads them back.

use metriken::{Counter, metric};

/// Lookups that found the offset resident.
#[metric(name = "pagecache_hit", description = "Lookups served by a resident page")]
pub static HIT: Counter = Counter::new();

/// Lookups that had to admit the offset.
#[metric(name = "pagecache_miss", description = "Lookups that admitted a new offset")]
pub static MISS: Counter = Counter::new();

/// Admissions that displaced a previously assigned offset.
#[metric(name = "pagecache_evict", description = "Admissions that evicted a resident offset")]
pub static EVICT: Counter = Counter::new();

/// Admissions whose hit count was seeded from a shadow entry.
#[metric(name = "pagecache_shadow_seed", description = "Admissions seeded from shadow history")]
pub static SHADOW_SEED: Counter = Counter::new();

/// Completed table expansions.
#[metric(name = "pagecache_expand", description = "Completed table expansions")]
pub static EXPAND: Counter = Counter::new();

/// Expansions aborted because the memory manager ran dry.
#[metric(name = "pagecache_expand_oom", description = "Expansions aborted on allocation failure")]
pub static EXPAND_OOM: Counter = Counter::new();

/// Victim scans that found every slot pinned with I/O pending.
#[metric(name = "pagecache_all_pinned", description = "Victim scans with every slot pinned on I/O")]
pub static ALL_PINNED: Counter = Counter::new();

/// Cell lock acquisitions that had to wait for another thread.
#[metric(name = "pagecache_cell_contended", description = "Contended cell lock acquisitions")]
pub static CELL_CONTENDED: Counter = Counter::new();
