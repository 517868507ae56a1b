//! Five-level page tables over a 49-bit VA.
//!
//! Depths 0 to 2 hold one 8-byte PDE per entry. Depth 3 (PDE0) holds 16-byte dual entries
//! pointing at a big-page and a small-page table, and doubles as the PTE table for 2M pages.
//! Depth 4 holds 4K or 64K PTEs.
//!
//! Volta and Ampere reuse this format and replace individual encoders.

use uvm_hwref::mmu::{ver2, ADDRESS_SHIFT, PAGE_SIZE_2M, PAGE_SIZE_4K, PAGE_SIZE_64K};

use crate::address::{Aperture, GpuPhysAddress};
use crate::error::Result;
use crate::mmu::{page_field, DecodedPte, MmuModeHal, MmuModeOps, PdeContext, Prot, PteFlags};

pub(crate) static MODE: MmuModeHal = MmuModeHal::new(ops(), PAGE_SIZE_64K);

pub(crate) fn mode(big_page_size: u64) -> Option<&'static MmuModeHal> {
    (big_page_size == PAGE_SIZE_64K).then_some(&MODE)
}

pub(crate) const fn ops() -> MmuModeOps {
    MmuModeOps {
        make_pte,
        make_sked_reflected_pte,
        make_sparse_pte,
        unmapped_pte,
        poisoned_pte,
        make_pde,
        decode_pte,
        entry_size,
        index_bits,
        entries_per_index,
        entry_offset,
        num_va_bits,
        allocation_size,
        page_table_depth,
        page_sizes,
    }
}

/// Depth of the dual PDE0 directory.
pub(crate) const DUAL_DEPTH: u32 = 3;

fn entry_size(depth: u32) -> usize {
    if depth == DUAL_DEPTH {
        16
    } else {
        8
    }
}

fn index_bits(depth: u32, page_size: u64) -> u32 {
    match depth {
        0 => 2,
        1 | 2 => 9,
        3 => 8,
        _ if page_size == PAGE_SIZE_64K => 5,
        _ => 9,
    }
}

fn entries_per_index(depth: u32) -> usize {
    if depth == DUAL_DEPTH {
        2
    } else {
        1
    }
}

fn entry_offset(depth: u32, page_size: u64) -> usize {
    usize::from(depth == DUAL_DEPTH && page_size == PAGE_SIZE_4K)
}

fn num_va_bits() -> u32 {
    ver2::VA_BITS
}

/// 64K page tables are 256 bytes; everything else is allocated a full 4K page.
pub(crate) fn allocation_size(depth: u32, page_size: u64) -> usize {
    if depth == 4 && page_size == PAGE_SIZE_64K {
        256
    } else {
        4096
    }
}

fn page_table_depth(page_size: u64) -> u32 {
    if page_size == PAGE_SIZE_2M {
        DUAL_DEPTH
    } else {
        4
    }
}

fn page_sizes() -> u64 {
    PAGE_SIZE_4K | PAGE_SIZE_64K | PAGE_SIZE_2M
}

/// Aperture, volatility and permission bits shared by every ver2 PTE encoder.
pub(crate) fn pte_common(aperture: Aperture, prot: Prot, flags: PteFlags) -> u64 {
    let mut pte = ver2::PTE_VALID.value(1)
        | ver2::PTE_APERTURE.value(match aperture {
            Aperture::Vid | Aperture::Default => ver2::PTE_APERTURE_VIDEO_MEMORY,
            Aperture::Peer(_) => ver2::PTE_APERTURE_PEER_MEMORY,
            Aperture::Sys => ver2::PTE_APERTURE_SYSTEM_COHERENT_MEMORY,
            Aperture::SysNonCoherent => ver2::PTE_APERTURE_SYSTEM_NON_COHERENT_MEMORY,
        });
    if let Aperture::Peer(id) = aperture {
        pte |= ver2::PTE_ADDRESS_VID_PEER.value(u64::from(id));
    }
    if !flags.contains(PteFlags::CACHED) {
        pte |= ver2::PTE_VOL.value(1);
    }
    if prot == Prot::ReadOnly {
        pte |= ver2::PTE_READ_ONLY.value(1);
    }
    if prot != Prot::ReadWriteAtomic {
        pte |= ver2::PTE_ATOMIC_DISABLE.value(1);
    }
    pte
}

fn make_pte(aperture: Aperture, address: u64, prot: Prot, flags: PteFlags) -> Result<u64> {
    if prot == Prot::None {
        return Ok(0);
    }
    let page = address >> ADDRESS_SHIFT;
    let address_bits = if aperture.is_sys() {
        page_field(ver2::PTE_ADDRESS_SYS, page)?
    } else {
        page_field(ver2::PTE_ADDRESS_VID, page)?
    };
    Ok(pte_common(aperture, prot, flags) | address_bits)
}

/// Everything but the address.
pub(crate) fn decode_common(pte: u64) -> Option<(Aperture, Prot, PteFlags)> {
    if !ver2::PTE_VALID.is_set(pte) {
        return None;
    }
    let aperture = match ver2::PTE_APERTURE.get(pte) {
        ver2::PTE_APERTURE_VIDEO_MEMORY => Aperture::Vid,
        ver2::PTE_APERTURE_PEER_MEMORY => Aperture::Peer(ver2::PTE_ADDRESS_VID_PEER.get(pte) as u8),
        ver2::PTE_APERTURE_SYSTEM_COHERENT_MEMORY => Aperture::Sys,
        _ => Aperture::SysNonCoherent,
    };
    let prot = if ver2::PTE_READ_ONLY.is_set(pte) {
        Prot::ReadOnly
    } else if ver2::PTE_ATOMIC_DISABLE.is_set(pte) {
        Prot::ReadWrite
    } else {
        Prot::ReadWriteAtomic
    };
    let flags = if ver2::PTE_VOL.is_set(pte) {
        PteFlags::empty()
    } else {
        PteFlags::CACHED
    };
    Some((aperture, prot, flags))
}

fn decode_pte(pte: u64) -> Option<DecodedPte> {
    let (aperture, prot, flags) = decode_common(pte)?;
    let page = if aperture.is_sys() {
        ver2::PTE_ADDRESS_SYS.get(pte)
    } else {
        ver2::PTE_ADDRESS_VID.get(pte)
    };
    Some(DecodedPte {
        aperture,
        address: page << ADDRESS_SHIFT,
        prot,
        flags,
    })
}

pub(crate) fn make_sked_reflected_pte() -> u64 {
    ver2::PTE_VALID.value(1) | ver2::PTE_KIND.value(ver2::PTE_KIND_SMSKED_MESSAGE)
}

/// Invalid but volatile: the MMU reports sparse accesses as reads of zero instead of faults.
pub(crate) fn make_sparse_pte() -> Result<u64> {
    Ok(ver2::PTE_VOL.value(1))
}

/// A zero big PTE with the privilege bit set sends lookups on to the 4K table.
pub(crate) fn unmapped_pte(page_size: u64) -> u64 {
    if page_size == PAGE_SIZE_4K {
        0
    } else {
        ver2::PTE_PRIVILEGE.value(1)
    }
}

/// Valid, privileged and read-only, pointing at the top of the video memory address range.
pub(crate) fn poisoned_pte() -> u64 {
    pte_common(Aperture::Vid, Prot::ReadOnly, PteFlags::empty())
        | ver2::PTE_PRIVILEGE.value(1)
        | ver2::PTE_ADDRESS_VID.value(ver2::PTE_ADDRESS_VID.max_value())
}

/// Aperture, volatility and address of one PDE pointing at `child`, `None` encoding an invalid
/// entry.
pub(crate) fn pde_bits(child: Option<GpuPhysAddress>) -> u64 {
    let Some(child) = child else {
        return ver2::PDE_APERTURE.value(ver2::PDE_APERTURE_INVALID);
    };
    let page = child.address >> ADDRESS_SHIFT;
    match child.aperture {
        Aperture::Sys | Aperture::SysNonCoherent => {
            let aperture = if child.aperture == Aperture::Sys {
                ver2::PDE_APERTURE_SYSTEM_COHERENT_MEMORY
            } else {
                ver2::PDE_APERTURE_SYSTEM_NON_COHERENT_MEMORY
            };
            ver2::PDE_APERTURE.value(aperture) | ver2::PDE_VOL.value(1) | ver2::PDE_ADDRESS_SYS.value(page)
        }
        Aperture::Vid | Aperture::Peer(_) | Aperture::Default => {
            ver2::PDE_APERTURE.value(ver2::PDE_APERTURE_VIDEO_MEMORY)
                | ver2::PDE_ADDRESS_VID.value(page)
        }
    }
}

/// Big-page half of a dual PDE. The big table is only 256-byte aligned, so its address keeps
/// four more bits.
pub(crate) fn dual_big_bits(child: Option<GpuPhysAddress>) -> u64 {
    let Some(child) = child else {
        return 0;
    };
    let without_address = pde_bits(Some(GpuPhysAddress::new(child.aperture, 0)));
    without_address | ver2::DUAL_PDE_ADDRESS_BIG.value(child.address >> ver2::DUAL_PDE_ADDRESS_BIG_SHIFT)
}

/// Fills a single PDE, or both words of the dual PDE0 from `[big, small]`.
pub(crate) fn make_pde(out: &mut [u64], children: &[Option<GpuPhysAddress>], ctx: &PdeContext<'_>) {
    let child = |i: usize| children.get(i).copied().flatten();
    if ctx.depth == DUAL_DEPTH {
        if let [big, small, ..] = out {
            *big = dual_big_bits(child(0));
            *small = pde_bits(child(1));
        }
    } else if let Some(word) = out.first_mut() {
        *word = pde_bits(child(0));
    }
}
