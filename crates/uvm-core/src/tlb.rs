//! TLB invalidation.
//!
//! Thin wrappers over the host HAL plus the pieces every architecture shares: mapping a
//! page-tree depth onto the invalidate `PAGE_TABLE_LEVEL` field, sizing a targeted invalidate,
//! and the membar that has to follow an invalidate. [`TlbBatch`] accumulates ranges from one
//! page-tree update and emits as few invalidates as it can.

use crate::address::GpuPhysAddress;
use crate::error::Result;
use crate::hal::{ArchCaps, Membar, TlbInvalidateTestParams};
use crate::mmu::page_sizes_ascending;
use crate::push::Push;

/// Smallest range a targeted invalidate covers.
pub const MIN_INVALIDATE_SHIFT: u32 = 12;

/// Default number of distinct ranges a batch tracks before giving up on targeted invalidates.
pub const TLB_BATCH_MAX_ENTRIES: usize = 4;

/// `PAGE_TABLE_LEVEL` value invalidating the PDE caches from `depth` down to the PTEs.
///
/// Depth 0 is the root and selects every level, as does any depth on architectures whose
/// invalidate has no level field. Otherwise the level counts up from the PTEs, so the deepest
/// table of the tree maps to `PTE_ONLY`.
pub fn page_table_level(caps: &ArchCaps, depth: u32) -> u32 {
    if depth == 0 || caps.tlb_top_level == 0 {
        0
    } else {
        caps.tlb_top_level.saturating_sub(depth)
    }
}

/// Aligned base and log2 size of the smallest power-of-two window containing
/// `[base, base + size)`.
///
/// Returns `None` when the window would need all 64 address bits (or the range wraps), in which
/// case only a full invalidate is correct.
pub fn targeted_range(base: u64, size: u64) -> Option<(u64, u32)> {
    let end = base.checked_add(size.max(1) - 1)?;
    let log2 = (64 - (end ^ base).leading_zeros()).max(MIN_INVALIDATE_SHIFT);
    if log2 >= 64 {
        return None;
    }
    Some((base & !((1u64 << log2) - 1), log2))
}

/// Emits what has to follow an invalidate for `membar` to hold. A system membar folded into the
/// invalidate needs nothing more; a GPU membar never folds.
pub(crate) fn membar_after_invalidate(push: &mut Push, membar: Membar) {
    let gpu = push.gpu();
    let fold = gpu.caps().tlb_fold_sysmembar;
    let (membar_sys, membar_gpu) = (gpu.host.membar_sys, gpu.host.membar_gpu);
    match membar {
        Membar::None => {}
        Membar::Sys if fold => {}
        Membar::Sys => membar_sys(push),
        Membar::Gpu => membar_gpu(push),
    }
}

/// Invalidates every cached translation under `pdb`, plus the PDE caches from `depth` down.
pub fn invalidate_all(push: &mut Push, pdb: GpuPhysAddress, depth: u32, membar: Membar) {
    let invalidate = push.gpu().host.tlb_invalidate_all;
    invalidate(push, pdb, depth, membar);
}

/// Invalidates `[base, base + size)`, or everything under `pdb` where targeted invalidates are
/// not available.
pub fn invalidate_range(
    push: &mut Push,
    pdb: GpuPhysAddress,
    depth: u32,
    base: u64,
    size: u64,
    page_size: u64,
    membar: Membar,
) {
    let host = push.gpu().host;
    if !push.gpu().caps().tlb_va_invalidate {
        (host.tlb_invalidate_all)(push, pdb, depth, membar);
        return;
    }
    (host.tlb_invalidate_va)(push, pdb, depth, base, size, page_size, membar);
}

/// Invalidate with every knob under the caller's control.
pub fn invalidate_test(push: &mut Push, pdb: GpuPhysAddress, params: &TlbInvalidateTestParams) {
    let invalidate = push.gpu().host.tlb_invalidate_test;
    invalidate(push, pdb, params);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchEntry {
    start: u64,
    size: u64,
    page_sizes: u64,
}

impl BatchEntry {
    fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    /// Absorbs `other` if the two ranges touch and were mapped with the same page sizes.
    fn try_merge(&mut self, other: &BatchEntry) -> bool {
        if self.page_sizes != other.page_sizes || other.start > self.end() || other.end() < self.start {
            return false;
        }
        let end = self.end().max(other.end());
        self.start = self.start.min(other.start);
        self.size = end - self.start;
        true
    }

    fn pages(&self) -> u64 {
        if self.page_sizes == 0 {
            return 0;
        }
        let smallest = 1u64 << self.page_sizes.trailing_zeros();
        self.size.div_ceil(smallest)
    }
}

/// Ranges to invalidate after one page-tree update.
#[derive(Debug, Clone)]
pub struct TlbBatch {
    entries: Vec<BatchEntry>,
    max_entries: usize,
    overflowed: bool,
    membar: Membar,
}

impl Default for TlbBatch {
    fn default() -> Self {
        Self::new(TLB_BATCH_MAX_ENTRIES)
    }
}

impl TlbBatch {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: Vec::with_capacity(max_entries),
            max_entries,
            overflowed: false,
            membar: Membar::None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && !self.overflowed
    }

    /// Number of distinct ranges tracked so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Records `[start, start + size)` as mapped with every page size in the `page_sizes` mask.
    pub fn invalidate(&mut self, start: u64, size: u64, page_sizes: u64, membar: Membar) {
        self.membar = self.membar.max(membar);
        if size == 0 || self.overflowed {
            return;
        }
        let entry = BatchEntry {
            start,
            size,
            page_sizes,
        };
        if let Some(last) = self.entries.last_mut() {
            if last.try_merge(&entry) {
                return;
            }
        }
        if self.entries.len() == self.max_entries {
            self.overflowed = true;
            self.entries.clear();
            return;
        }
        self.entries.push(entry);
    }

    /// Emits the invalidates. The widest membar requested by any range or by `membar` is applied
    /// once, after the last invalidate.
    pub fn end(self, push: &mut Push, pdb: GpuPhysAddress, membar: Membar) -> Result<()> {
        let membar = self.membar.max(membar);
        if self.is_empty() {
            return Ok(());
        }
        let gpu = std::sync::Arc::clone(push.gpu());
        let caps = gpu.caps();
        let total_pages: u64 = self.entries.iter().map(BatchEntry::pages).sum();

        if self.overflowed || !caps.tlb_va_invalidate || total_pages > caps.tlb_batch_max_pages {
            tracing::trace!(
                gpu = %gpu.name(),
                ranges = self.entries.len(),
                total_pages,
                overflowed = self.overflowed,
                "TLB batch falls back to a full invalidate"
            );
            (gpu.host.tlb_invalidate_all)(push, pdb, 0, membar);
            return Ok(());
        }

        let mode = gpu.default_mmu_mode()?;
        let invalidates: Vec<(BatchEntry, u64)> = self
            .entries
            .iter()
            .flat_map(|entry| page_sizes_ascending(entry.page_sizes).map(move |size| (*entry, size)))
            .collect();
        let last = invalidates.len().saturating_sub(1);
        for (i, (entry, page_size)) in invalidates.into_iter().enumerate() {
            let depth = mode.page_table_depth(page_size);
            let this_membar = if i == last { membar } else { Membar::None };
            (gpu.host.tlb_invalidate_va)(
                push,
                pdb,
                depth,
                entry.start,
                entry.size,
                page_size,
                this_membar,
            );
        }
        Ok(())
    }
}
