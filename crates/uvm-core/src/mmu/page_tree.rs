//! GPU page tree.
//!
//! Directories are allocated on demand by [`PageTree::get_ptes`] and released by
//! [`PageTree::put_ptes`] once their last PTE or child goes away. All writes to GPU-visible
//! memory are emitted as copy-engine operations into the caller's [`Push`], ordered as follows:
//!
//! 1. new directories are initialized;
//! 2. wait-for-idle plus membar;
//! 3. PDEs pointing at the new directories are written, deepest first, so a directory is only
//!    reachable once it is fully initialized;
//! 4. wait-for-idle plus membar;
//! 5. TLB invalidate of the PDE caches from the shallowest modified depth down.

use std::fmt;
use std::sync::Arc;

use uvm_hwref::host::method::COUNT_MAX;
use uvm_hwref::mmu::PAGE_SIZE_4K;

use crate::address::{Aperture, GpuAddress, GpuPhysAddress};
use crate::config::{AtsConfig, PageTableLocation};
use crate::error::{Result, UvmError};
use crate::hal::{downgrade_membar, wfi_membar, GpuHal, Membar};
use crate::push::{Push, PushFlags};

use super::dir::{DirId, Directory, DirectoryArena};
use super::{MmuModeHal, PdeContext};

/// Which address space a tree translates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageTreeKind {
    User,
    Kernel,
}

/// Backing memory for page directories.
pub trait PageTableAllocator: Send {
    /// Allocates `size` bytes, aligned to `size`, in `aperture`. Exhaustion is reported as
    /// [`UvmError::OutOfMemory`].
    fn alloc(&mut self, size: usize, aperture: Aperture) -> Result<GpuPhysAddress>;
    fn free(&mut self, phys: GpuPhysAddress, size: usize);
}

/// Bump allocator over one video-memory and one system-memory window. Freed blocks are reused
/// for allocations of the same size.
#[derive(Debug, Clone)]
pub struct LinearAllocator {
    vid: (u64, u64),
    sys: (u64, u64),
    free: Vec<(GpuPhysAddress, usize)>,
    live: usize,
}

impl LinearAllocator {
    /// `vid` and `sys` are `[start, end)` windows.
    pub fn new(vid: (u64, u64), sys: (u64, u64)) -> Self {
        Self {
            vid,
            sys,
            free: Vec::new(),
            live: 0,
        }
    }

    /// Number of blocks currently handed out.
    pub fn live_allocations(&self) -> usize {
        self.live
    }
}

impl PageTableAllocator for LinearAllocator {
    fn alloc(&mut self, size: usize, aperture: Aperture) -> Result<GpuPhysAddress> {
        if let Some(pos) = self
            .free
            .iter()
            .position(|&(phys, len)| len == size && phys.aperture == aperture)
        {
            self.live += 1;
            return Ok(self.free.swap_remove(pos).0);
        }
        let window = match aperture {
            Aperture::Vid => &mut self.vid,
            Aperture::Sys => &mut self.sys,
            other => {
                return Err(UvmError::unsupported(format!(
                    "page tables cannot live in {other}"
                )))
            }
        };
        let size = size as u64;
        let start = window.0.next_multiple_of(size);
        if start + size > window.1 {
            return Err(UvmError::OutOfMemory);
        }
        window.0 = start + size;
        self.live += 1;
        Ok(GpuPhysAddress::new(aperture, start))
    }

    fn free(&mut self, phys: GpuPhysAddress, size: usize) {
        self.live = self.live.saturating_sub(1);
        self.free.push((phys, size));
    }
}

/// Contiguous run of PTEs within one page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableRange {
    pub table: DirId,
    pub start_index: u32,
    pub entry_count: u32,
    pub page_size: u64,
}

pub struct PageTree {
    gpu: Arc<GpuHal>,
    mode: &'static MmuModeHal,
    kind: PageTreeKind,
    location: PageTableLocation,
    ats: AtsConfig,
    arena: DirectoryArena,
    root: DirId,
    allocator: Box<dyn PageTableAllocator>,
}

impl fmt::Debug for PageTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTree")
            .field("gpu", &self.gpu.name())
            .field("mode", &self.mode)
            .field("kind", &self.kind)
            .field("directories", &self.arena.len())
            .finish_non_exhaustive()
    }
}

impl PageTree {
    /// Allocates and initializes the root directory. The initialization is emitted into `push`.
    pub fn new(
        push: &mut Push,
        big_page_size: u64,
        kind: PageTreeKind,
        location: PageTableLocation,
        ats: AtsConfig,
        allocator: Box<dyn PageTableAllocator>,
    ) -> Result<Self> {
        let gpu = Arc::clone(push.gpu());
        let mode = gpu.mmu_mode(big_page_size)?;
        let mut tree = Self {
            gpu,
            mode,
            kind,
            location,
            ats,
            arena: DirectoryArena::new(),
            root: DirId::default(),
            allocator,
        };
        tree.root = tree.allocate_directory(None, 0, 0, PAGE_SIZE_4K)?;
        tree.phys_mem_init(push, tree.root, PAGE_SIZE_4K)?;
        tracing::debug!(
            gpu = %tree.gpu.name(),
            big_page_size,
            pdb = %tree.pdb()?,
            "page tree created"
        );
        Ok(tree)
    }

    /// Releases the root. Every range must have been put beforehand.
    pub fn deinit(mut self, push: &mut Push) -> Result<()> {
        let root = self.arena.get(self.root)?;
        if root.ref_count != 0 {
            return Err(UvmError::invalid_state(format!(
                "page tree torn down with {} live root entries",
                root.ref_count
            )));
        }
        // With ATS the GPU may have cached translations fetched from the IOMMU for this PDB.
        if self.ats.enabled && self.kind == PageTreeKind::User {
            let pdb = self.pdb()?;
            (self.gpu.host.tlb_invalidate_all)(push, pdb, 0, Membar::None);
        }
        let root = self.arena.remove(self.root)?;
        self.allocator.free(root.phys, root.size);
        Ok(())
    }

    pub fn mode(&self) -> &'static MmuModeHal {
        self.mode
    }

    pub fn kind(&self) -> PageTreeKind {
        self.kind
    }

    /// Page directory base: physical address of the root directory.
    pub fn pdb(&self) -> Result<GpuPhysAddress> {
        Ok(self.arena.get(self.root)?.phys)
    }

    pub fn directory(&self, id: DirId) -> Result<&Directory> {
        self.arena.get(id)
    }

    pub fn directory_count(&self) -> usize {
        self.arena.len()
    }

    /// Physical address of the first PTE of `range`.
    pub fn range_entry_address(&self, range: &PageTableRange, index: u32) -> Result<GpuPhysAddress> {
        let dir = self.arena.get(range.table)?;
        let per_index = self.mode.entries_per_index(dir.depth);
        let pte_size = self.mode.entry_size(dir.depth) / per_index;
        let slot = index as usize * per_index + self.mode.entry_offset(dir.depth, range.page_size);
        Ok(dir.phys.offset((slot * pte_size) as u64))
    }

    /// Returns the PTEs mapping `[start, start + size)` with `page_size` pages, allocating and
    /// linking any missing directories on the way.
    pub fn get_ptes(
        &mut self,
        push: &mut Push,
        page_size: u64,
        start: u64,
        size: u64,
    ) -> Result<PageTableRange> {
        let mode = self.mode;
        if !mode.supports_page_size(page_size) {
            return Err(UvmError::unsupported(format!(
                "page size {page_size:#x} is not offered by this page tree"
            )));
        }
        if size == 0 || start % page_size != 0 || size % page_size != 0 {
            return Err(UvmError::assertion(format!(
                "range {start:#x}+{size:#x} is not aligned to {page_size:#x}"
            )));
        }
        let limit = 1u64 << mode.num_va_bits();
        if start.checked_add(size).map_or(true, |end| end > limit) {
            return Err(UvmError::assertion(format!(
                "range {start:#x}+{size:#x} exceeds the {}-bit VA space",
                mode.num_va_bits()
            )));
        }

        let leaf_depth = mode.page_table_depth(page_size);
        let last = start + size - 1;
        let mut shift = mode.num_va_bits();
        let mut dir = self.root;
        let mut used: Vec<DirId> = Vec::new();
        let mut invalidate_depth = None;

        let range = loop {
            let depth = self.arena.get(dir)?.depth;
            let bits = mode.index_bits(depth, page_size);
            shift -= bits;
            let mask = (1u64 << bits) - 1;
            let start_index = ((start >> shift) & mask) as u32;
            let end_index = ((last >> shift) & mask) as u32;

            if depth == leaf_depth {
                let table = self.arena.get_mut(dir)?;
                let entry_count = end_index - start_index + 1;
                table.ref_count += entry_count;
                break PageTableRange {
                    table: dir,
                    start_index,
                    entry_count,
                    page_size,
                };
            }
            if start_index != end_index {
                self.rollback(&used, page_size);
                return Err(UvmError::assertion(format!(
                    "range {start:#x}+{size:#x} spans directories at depth {depth}"
                )));
            }

            let slot = self.entry_slot(depth, start_index, page_size);
            let child = self.arena.get(dir)?.entries.get(slot).copied().flatten();
            dir = match child {
                Some(child) => child,
                None => match self.allocate_directory(Some(dir), start_index, depth + 1, page_size)
                {
                    Ok(child) => {
                        self.link(dir, slot, child)?;
                        used.push(child);
                        invalidate_depth.get_or_insert(depth);
                        child
                    }
                    Err(err) => {
                        self.rollback(&used, page_size);
                        return Err(err);
                    }
                },
            };
        };

        if let Some(depth) = invalidate_depth {
            self.write_gpu_state(push, page_size, depth, &used)?;
        }
        Ok(range)
    }

    /// Single-PTE variant of [`PageTree::get_ptes`].
    pub fn get_entry(&mut self, push: &mut Push, page_size: u64, va: u64) -> Result<PageTableRange> {
        self.get_ptes(push, page_size, va & !(page_size - 1), page_size)
    }

    /// Drops the references held by `range` and unlinks every directory left empty. The
    /// released directories are returned to the allocator after the invalidate is pushed.
    pub fn put_ptes(&mut self, push: &mut Push, range: &PageTableRange) -> Result<()> {
        let table = self.arena.get_mut(range.table)?;
        if table.ref_count < range.entry_count {
            return Err(UvmError::invalid_state(format!(
                "putting {} PTEs from a table holding {}",
                range.entry_count, table.ref_count
            )));
        }
        table.ref_count -= range.entry_count;

        let mut membar_after_clears = Membar::Gpu;
        let mut membar_after_invalidate = Membar::Gpu;
        let mut invalidate_depth = 0;
        let mut freed = Vec::new();
        let mut dir = range.table;
        loop {
            let current = self.arena.get(dir)?;
            let Some(parent) = current.parent else { break };
            if current.ref_count != 0 {
                break;
            }
            let index = current.index_in_parent;
            let is_vid = current.phys.aperture == Aperture::Vid;

            push.set_flag(PushFlags::CE_NEXT_PIPELINED);
            push.set_flag(PushFlags::NEXT_MEMBAR_NONE);
            self.pde_clear(push, parent, index, range.page_size)?;

            let parent_dir = self.arena.get(parent)?;
            invalidate_depth = parent_dir.depth;
            membar_after_invalidate =
                membar_after_invalidate.max(downgrade_membar(&self.gpu, is_vid));
            if parent_dir.phys.aperture.is_sys() {
                membar_after_clears = Membar::Sys;
            }
            freed.push(dir);
            dir = parent;
        }

        if freed.is_empty() {
            return Ok(());
        }
        wfi_membar(push, membar_after_clears);
        (self.gpu.host.tlb_invalidate_all)(push, self.pdb()?, invalidate_depth, membar_after_invalidate);
        push.set_flag(PushFlags::NEXT_MEMBAR_NONE);

        tracing::trace!(freed = freed.len(), depth = invalidate_depth, "page directories released");
        for id in freed {
            let dir = self.arena.remove(id)?;
            self.allocator.free(dir.phys, dir.size);
        }
        Ok(())
    }

    /// Writes `ptes` (one per entry of `range`) through the copy engine.
    pub fn write_ptes(&self, push: &mut Push, range: &PageTableRange, ptes: &[u64]) -> Result<()> {
        if ptes.len() != range.entry_count as usize {
            return Err(UvmError::assertion(format!(
                "{} PTE values for a range of {}",
                ptes.len(),
                range.entry_count
            )));
        }
        let dir = self.arena.get(range.table)?;
        let contiguous = self.mode.entries_per_index(dir.depth) == 1;
        let memcopy = self.gpu.ce.memcopy;

        if !contiguous {
            for (i, &pte) in ptes.iter().enumerate() {
                let dst = self.range_entry_address(range, range.start_index + i as u32)?;
                let src = push.inline_u64s(&[pte]);
                memcopy(push, GpuAddress::phys(dst), src, 8);
            }
            return Ok(());
        }

        let max_entries = max_inline_entries(8);
        let mut written = 0;
        for chunk in ptes.chunks(max_entries) {
            let dst = self.range_entry_address(range, range.start_index + written as u32)?;
            let src = push.inline_u64s(chunk);
            memcopy(push, GpuAddress::phys(dst), src, (chunk.len() * 8) as u64);
            written += chunk.len();
        }
        Ok(())
    }

    /// Writes the unmapped sentinel for the range's page size into every entry of `range`.
    pub fn clear_ptes(&self, push: &mut Push, range: &PageTableRange) -> Result<()> {
        let pte = self.mode.unmapped_pte(range.page_size);
        self.write_ptes(push, range, &vec![pte; range.entry_count as usize])
    }

    fn entry_slot(&self, depth: u32, index: u32, page_size: u64) -> usize {
        self.mode.entries_per_index(depth) * index as usize + self.mode.entry_offset(depth, page_size)
    }

    fn allocate_directory(
        &mut self,
        parent: Option<DirId>,
        index_in_parent: u32,
        depth: u32,
        page_size: u64,
    ) -> Result<DirId> {
        let mode = self.mode;
        let size = mode.allocation_size(depth, page_size);
        let phys = match self.location {
            PageTableLocation::Vid => self.allocator.alloc(size, Aperture::Vid)?,
            PageTableLocation::Sys => self.allocator.alloc(size, Aperture::Sys)?,
            PageTableLocation::Default => match self.allocator.alloc(size, Aperture::Vid) {
                Err(UvmError::OutOfMemory) => {
                    tracing::debug!(depth, size, "video memory exhausted, page table in sysmem");
                    self.allocator.alloc(size, Aperture::Sys)?
                }
                other => other?,
            },
        };
        let entries = if depth == mode.page_table_depth(PAGE_SIZE_4K) {
            Vec::new()
        } else {
            vec![None; mode.entries_per_index(depth) << mode.index_bits(depth, page_size)]
        };
        tracing::trace!(depth, %phys, size, "page directory allocated");
        Ok(self.arena.insert(Directory {
            depth,
            index_in_parent,
            parent,
            ref_count: 0,
            entries,
            phys,
            size,
        }))
    }

    fn link(&mut self, parent: DirId, slot: usize, child: DirId) -> Result<()> {
        let dir = self.arena.get_mut(parent)?;
        let entry = dir
            .entries
            .get_mut(slot)
            .ok_or_else(|| UvmError::invalid_state(format!("slot {slot} outside directory")))?;
        *entry = Some(child);
        dir.ref_count += 1;
        Ok(())
    }

    /// Undoes the host-side effects of a failed walk.
    fn rollback(&mut self, used: &[DirId], page_size: u64) {
        for &id in used.iter().rev() {
            let Ok(dir) = self.arena.remove(id) else { continue };
            if let Some(parent) = dir.parent.and_then(|p| self.arena.get_mut(p).ok()) {
                let slot = self.mode.entries_per_index(parent.depth) * dir.index_in_parent as usize
                    + self.mode.entry_offset(parent.depth, page_size);
                if let Some(entry) = parent.entries.get_mut(slot) {
                    *entry = None;
                }
                parent.ref_count = parent.ref_count.saturating_sub(1);
            }
            self.allocator.free(dir.phys, dir.size);
        }
    }

    fn write_gpu_state(
        &mut self,
        push: &mut Push,
        page_size: u64,
        invalidate_depth: u32,
        used: &[DirId],
    ) -> Result<()> {
        let mut membar = Membar::Gpu;
        for &id in used {
            push.set_flag(PushFlags::CE_NEXT_PIPELINED);
            push.set_flag(PushFlags::NEXT_MEMBAR_NONE);
            self.phys_mem_init(push, id, page_size)?;
            if self.arena.get(id)?.phys.aperture.is_sys() {
                membar = Membar::Sys;
            }
        }
        wfi_membar(push, membar);

        let mut membar = Membar::Gpu;
        for &id in used.iter().rev() {
            let dir = self.arena.get(id)?;
            let (parent, index) = match dir.parent {
                Some(parent) => (parent, dir.index_in_parent),
                None => return Err(UvmError::invalid_state("new directory without a parent")),
            };
            push.set_flag(PushFlags::CE_NEXT_PIPELINED);
            push.set_flag(PushFlags::NEXT_MEMBAR_NONE);
            self.pde_write(push, parent, index, false)?;
            if self.arena.get(parent)?.phys.aperture.is_sys() {
                membar = Membar::Sys;
            }
        }
        wfi_membar(push, membar);

        // The membar above already orders the PDE writes before the invalidate.
        (self.gpu.host.tlb_invalidate_all)(push, self.pdb()?, invalidate_depth, Membar::None);
        push.set_flag(PushFlags::NEXT_MEMBAR_NONE);
        tracing::trace!(dirs = used.len(), depth = invalidate_depth, "page directories linked");
        Ok(())
    }

    /// Initializes a freshly allocated directory: PTE tables are zeroed, directories get the
    /// empty-PDE pattern.
    fn phys_mem_init(&self, push: &mut Push, id: DirId, page_size: u64) -> Result<()> {
        let mode = self.mode;
        let dir = self.arena.get(id)?;
        let entry_count = mode.index_count(dir.depth, page_size);

        // Without ATS an empty PDE does not depend on where it sits, so a plain memset does.
        if dir.depth + 1 > mode.page_table_depth(PAGE_SIZE_4K)
            || (entry_count > 512 && !self.ats.enabled)
        {
            let clear = if dir.depth == mode.page_table_depth(page_size) {
                0
            } else {
                let mut words = vec![0u64; mode.entry_size(dir.depth) / 8];
                let nulls = vec![None; mode.entries_per_index(dir.depth)];
                let ctx = PdeContext {
                    depth: dir.depth,
                    va_base: 0,
                    va_size: 0,
                    ats: &self.ats,
                };
                mode.make_pde(&mut words, &nulls, &ctx);
                words[0]
            };
            (self.gpu.ce.memset_8)(push, GpuAddress::phys(dir.phys), clear, dir.size as u64);
            return Ok(());
        }
        self.pde_fill(push, id, 0, entry_count, true)
    }

    fn pde_clear(&mut self, push: &mut Push, id: DirId, index: u32, page_size: u64) -> Result<()> {
        let slot = self.entry_slot(self.arena.get(id)?.depth, index, page_size);
        let dir = self.arena.get_mut(id)?;
        if let Some(entry) = dir.entries.get_mut(slot) {
            *entry = None;
        }
        dir.ref_count = dir.ref_count.saturating_sub(1);
        self.pde_write(push, id, index, false)
    }

    fn pde_write(&self, push: &mut Push, id: DirId, index: u32, force_clear: bool) -> Result<()> {
        self.pde_fill(push, id, index as usize, 1, force_clear)
    }

    /// Writes `count` PDEs starting at `start`. With `force_clear` every child is treated as
    /// absent.
    fn pde_fill(
        &self,
        push: &mut Push,
        id: DirId,
        start: usize,
        count: usize,
        force_clear: bool,
    ) -> Result<()> {
        let mode = self.mode;
        let dir = self.arena.get(id)?;
        let entry_size = mode.entry_size(dir.depth);
        let per_index = mode.entries_per_index(dir.depth);
        let words_per_entry = entry_size / 8;
        let path = self.arena.index_path(id)?;
        let max_entries = max_inline_entries(entry_size);

        let final_membar = if push.get_and_reset_flag(PushFlags::NEXT_MEMBAR_NONE) {
            Some(PushFlags::NEXT_MEMBAR_NONE)
        } else if push.get_and_reset_flag(PushFlags::NEXT_MEMBAR_GPU) {
            Some(PushFlags::NEXT_MEMBAR_GPU)
        } else {
            None
        };

        let mut done = 0;
        while done < count {
            let chunk = max_entries.min(count - done);
            let mut words = vec![0u64; chunk * words_per_entry];
            for i in 0..chunk {
                let index = start + done + i;
                let children: Vec<Option<GpuPhysAddress>> = (0..per_index)
                    .map(|c| {
                        if force_clear {
                            return Ok(None);
                        }
                        match dir.entries.get(index * per_index + c).copied().flatten() {
                            Some(child) => Ok(Some(self.arena.get(child)?.phys)),
                            None => Ok(None),
                        }
                    })
                    .collect::<Result<_>>()?;
                let (va_base, va_size) = mode.entry_va_range(&path, index as u32, PAGE_SIZE_4K);
                let ctx = PdeContext {
                    depth: dir.depth,
                    va_base,
                    va_size,
                    ats: &self.ats,
                };
                mode.make_pde(
                    &mut words[i * words_per_entry..(i + 1) * words_per_entry],
                    &children,
                    &ctx,
                );
            }

            if done != 0 {
                push.set_flag(PushFlags::CE_NEXT_PIPELINED);
            }
            if done + chunk < count {
                push.set_flag(PushFlags::NEXT_MEMBAR_NONE);
            } else if let Some(flag) = final_membar {
                push.set_flag(flag);
            }

            let src = push.inline_u64s(&words);
            let dst = dir.phys.offset(((start + done) * entry_size) as u64);
            (self.gpu.ce.memcopy)(push, GpuAddress::phys(dst), src, (chunk * entry_size) as u64);
            done += chunk;
        }
        Ok(())
    }
}

/// Entries of `entry_size` bytes that fit in one inline-data method.
fn max_inline_entries(entry_size: usize) -> usize {
    (COUNT_MAX as usize * 4) / entry_size
}

#[cfg(test)]
mod tests;
