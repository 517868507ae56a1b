//! GPU page-table formats and the page tree built from them.
//!
//! A [`MmuModeHal`] describes one radix format (levels, entry sizes, index widths) together
//! with the pure encoders producing its entries. Modes are process-wide singletons, one per
//! architecture family and big page size.

mod dir;
pub mod page_tree;

use std::fmt;

use bitflags::bitflags;
use uvm_hwref::field::Field;

use crate::address::{Aperture, GpuPhysAddress};
use crate::config::AtsConfig;
use crate::error::{Result, UvmError};

pub use dir::{DirId, Directory, DirectoryArena};
pub use page_tree::{LinearAllocator, PageTableAllocator, PageTableRange, PageTree, PageTreeKind};

/// Access permitted through a mapping, ordered from least to most permissive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Prot {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
    ReadWriteAtomic,
}

impl fmt::Display for Prot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
            Self::ReadWriteAtomic => "rwa",
        })
    }
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        /// The GPU may cache the mapping in L2.
        const CACHED = 1 << 0;
        /// The device runs with access counters disabled.
        const ACCESS_COUNTERS_DISABLED = 1 << 1;
    }
}

/// Fields recovered from a valid PTE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPte {
    pub aperture: Aperture,
    pub address: u64,
    pub prot: Prot,
    pub flags: PteFlags,
}

/// Where a directory entry sits in the address space, needed by formats whose PDE encoding
/// depends on the covered VA range.
#[derive(Debug, Clone, Copy)]
pub struct PdeContext<'a> {
    /// Depth of the directory the entry is written into.
    pub depth: u32,
    /// First VA covered by the entry.
    pub va_base: u64,
    /// Bytes of VA covered by the entry.
    pub va_size: u64,
    pub ats: &'a AtsConfig,
}

impl PdeContext<'_> {
    /// Does `[va_base, va_base + va_size)` intersect the hole between the canonical lower and
    /// upper halves of the CPU address space? Such entries must never be translated by ATS.
    pub fn overlaps_non_canonical_hole(&self, num_va_bits: u32) -> bool {
        let bits = self.ats.cpu_va_bits;
        if !self.ats.canonical || bits >= num_va_bits || bits == 0 {
            return false;
        }
        let hole_start = 1u64 << (bits - 1);
        let hole_end = (1u64 << num_va_bits) - hole_start;
        let end = self.va_base.saturating_add(self.va_size);
        self.va_base < hole_end && end > hole_start
    }
}

/// Places page number `page` in `field`, refusing pages the field cannot hold.
pub(crate) fn page_field(field: Field, page: u64) -> Result<u64> {
    if page > field.max_value() {
        return Err(UvmError::assertion(format!(
            "page {page:#x} does not fit a {}-bit PTE address field",
            field.width()
        )));
    }
    Ok(field.value(page))
}

/// Encoders and geometry of one page-table format.
///
/// Depth 0 is the root. `page_table_depth(page_size)` is the depth of the table holding PTEs
/// for that page size.
#[derive(Clone, Copy)]
pub struct MmuModeOps {
    /// Fails when the address does not fit the aperture's address field.
    pub make_pte: fn(Aperture, u64, Prot, PteFlags) -> Result<u64>,
    pub make_sked_reflected_pte: fn() -> u64,
    pub make_sparse_pte: fn() -> Result<u64>,
    pub unmapped_pte: fn(u64) -> u64,
    pub poisoned_pte: fn() -> u64,
    /// Fills the `entry_size / 8` words of one directory entry from its
    /// `entries_per_index` children.
    pub make_pde: fn(&mut [u64], &[Option<GpuPhysAddress>], &PdeContext<'_>),
    pub decode_pte: fn(u64) -> Option<DecodedPte>,
    pub entry_size: fn(u32) -> usize,
    pub index_bits: fn(u32, u64) -> u32,
    pub entries_per_index: fn(u32) -> usize,
    /// Child slot within an index used for `page_size`.
    pub entry_offset: fn(u32, u64) -> usize,
    pub num_va_bits: fn() -> u32,
    pub allocation_size: fn(u32, u64) -> usize,
    pub page_table_depth: fn(u64) -> u32,
    /// Mask of page sizes mappable in this mode.
    pub page_sizes: fn() -> u64,
}

pub struct MmuModeHal {
    pub ops: MmuModeOps,
    pub big_page_size: u64,
}

impl fmt::Debug for MmuModeHal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmuModeHal")
            .field("big_page_size", &format_args!("{:#x}", self.big_page_size))
            .field("num_va_bits", &self.num_va_bits())
            .field("page_sizes", &format_args!("{:#x}", self.page_sizes()))
            .finish()
    }
}

impl MmuModeHal {
    pub const fn new(ops: MmuModeOps, big_page_size: u64) -> Self {
        Self { ops, big_page_size }
    }

    #[inline]
    pub fn make_pte(&self, aperture: Aperture, address: u64, prot: Prot, flags: PteFlags) -> Result<u64> {
        (self.ops.make_pte)(aperture, address, prot, flags)
    }

    #[inline]
    pub fn make_sked_reflected_pte(&self) -> u64 {
        (self.ops.make_sked_reflected_pte)()
    }

    #[inline]
    pub fn make_sparse_pte(&self) -> Result<u64> {
        (self.ops.make_sparse_pte)()
    }

    #[inline]
    pub fn unmapped_pte(&self, page_size: u64) -> u64 {
        (self.ops.unmapped_pte)(page_size)
    }

    #[inline]
    pub fn poisoned_pte(&self) -> u64 {
        (self.ops.poisoned_pte)()
    }

    pub fn make_pde(&self, out: &mut [u64], children: &[Option<GpuPhysAddress>], ctx: &PdeContext<'_>) {
        (self.ops.make_pde)(out, children, ctx)
    }

    #[inline]
    pub fn decode_pte(&self, pte: u64) -> Option<DecodedPte> {
        (self.ops.decode_pte)(pte)
    }

    #[inline]
    pub fn entry_size(&self, depth: u32) -> usize {
        (self.ops.entry_size)(depth)
    }

    #[inline]
    pub fn index_bits(&self, depth: u32, page_size: u64) -> u32 {
        (self.ops.index_bits)(depth, page_size)
    }

    #[inline]
    pub fn entries_per_index(&self, depth: u32) -> usize {
        (self.ops.entries_per_index)(depth)
    }

    #[inline]
    pub fn entry_offset(&self, depth: u32, page_size: u64) -> usize {
        (self.ops.entry_offset)(depth, page_size)
    }

    #[inline]
    pub fn num_va_bits(&self) -> u32 {
        (self.ops.num_va_bits)()
    }

    #[inline]
    pub fn allocation_size(&self, depth: u32, page_size: u64) -> usize {
        (self.ops.allocation_size)(depth, page_size)
    }

    #[inline]
    pub fn page_table_depth(&self, page_size: u64) -> u32 {
        (self.ops.page_table_depth)(page_size)
    }

    #[inline]
    pub fn page_sizes(&self) -> u64 {
        (self.ops.page_sizes)()
    }

    pub fn supports_page_size(&self, page_size: u64) -> bool {
        page_size.is_power_of_two() && self.page_sizes() & page_size != 0
    }

    /// Number of entries (indices) in a directory at `depth`.
    pub fn index_count(&self, depth: u32, page_size: u64) -> usize {
        1usize << self.index_bits(depth, page_size)
    }

    /// VA bit position an index at `depth` starts at. Directories above the leaf do not depend
    /// on `page_size`.
    pub fn va_shift(&self, depth: u32, page_size: u64) -> u32 {
        let consumed: u32 = (0..=depth).map(|d| self.index_bits(d, page_size)).sum();
        self.num_va_bits().saturating_sub(consumed)
    }

    /// Index into the directory at `depth` that `va` falls under.
    pub fn index(&self, depth: u32, va: u64, page_size: u64) -> u32 {
        let bits = self.index_bits(depth, page_size);
        ((va >> self.va_shift(depth, page_size)) & ((1u64 << bits) - 1)) as u32
    }

    /// VA range covered by entry `index` of the directory reached through `path` (the index
    /// taken at each ancestor, root first). The directory's depth is `path.len()`.
    pub fn entry_va_range(&self, path: &[u32], index: u32, page_size: u64) -> (u64, u64) {
        let mut base = 0u64;
        for (depth, &i) in path.iter().enumerate() {
            base |= u64::from(i) << self.va_shift(depth as u32, page_size);
        }
        let shift = self.va_shift(path.len() as u32, page_size);
        (base | (u64::from(index) << shift), 1u64 << shift)
    }
}

/// Page size mask helper: every bit of `sizes` as an individual size, ascending.
pub(crate) fn page_sizes_ascending(sizes: u64) -> impl Iterator<Item = u64> {
    let mut rest = sizes;
    std::iter::from_fn(move || {
        if rest == 0 {
            return None;
        }
        let size = 1u64 << rest.trailing_zeros();
        rest &= rest - 1;
        Some(size)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hole_overlap_follows_cpu_va_width() {
        let ats = AtsConfig {
            enabled: true,
            cpu_va_bits: 49,
            canonical: true,
        };
        let ctx = |va_base, va_size| PdeContext {
            depth: 1,
            va_base,
            va_size,
            ats: &ats,
        };
        assert!(!ctx(0, 1 << 47).overlaps_non_canonical_hole(57));
        assert!(ctx(1 << 48, 1 << 47).overlaps_non_canonical_hole(57));
        let hole_end = (1u64 << 57) - (1 << 48);
        assert!(ctx(hole_end - (1 << 47), 1 << 47).overlaps_non_canonical_hole(57));
        assert!(!ctx(hole_end, 1 << 47).overlaps_non_canonical_hole(57));

        let wide = AtsConfig {
            cpu_va_bits: 57,
            ..ats
        };
        let ctx = PdeContext {
            depth: 1,
            va_base: 1 << 48,
            va_size: 1 << 47,
            ats: &wide,
        };
        assert!(!ctx.overlaps_non_canonical_hole(57));
    }

    #[test]
    fn page_sizes_iterate_ascending() {
        let sizes: Vec<u64> = page_sizes_ascending((2 << 20) | (4 << 10) | (64 << 10)).collect();
        assert_eq!(sizes, vec![4 << 10, 64 << 10, 2 << 20]);
    }
}
