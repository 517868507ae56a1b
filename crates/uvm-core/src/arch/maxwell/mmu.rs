//! Two-level Maxwell page tables.
//!
//! The root holds one 8-byte entry per big-page span, pointing at both a big-page and a
//! small-page table. The span depends on the big page size chosen for the address space, so
//! there is one mode per big page size.

use uvm_hwref::mmu::{ver1, ADDRESS_SHIFT, PAGE_SIZE_128K, PAGE_SIZE_4K, PAGE_SIZE_64K};

use crate::address::{Aperture, GpuPhysAddress};
use crate::error::{Result, UvmError};
use crate::mmu::{page_field, DecodedPte, MmuModeHal, MmuModeOps, PdeContext, Prot, PteFlags};

pub(crate) static MODE_64K: MmuModeHal = MmuModeHal::new(ops::<PAGE_SIZE_64K>(), PAGE_SIZE_64K);
pub(crate) static MODE_128K: MmuModeHal = MmuModeHal::new(ops::<PAGE_SIZE_128K>(), PAGE_SIZE_128K);

pub(crate) fn mode(big_page_size: u64) -> Option<&'static MmuModeHal> {
    match big_page_size {
        PAGE_SIZE_64K => Some(&MODE_64K),
        PAGE_SIZE_128K => Some(&MODE_128K),
        _ => None,
    }
}

const fn ops<const BIG: u64>() -> MmuModeOps {
    MmuModeOps {
        make_pte,
        make_sked_reflected_pte,
        make_sparse_pte,
        unmapped_pte,
        poisoned_pte,
        make_pde,
        decode_pte,
        entry_size,
        index_bits: index_bits::<BIG>,
        entries_per_index,
        entry_offset,
        num_va_bits,
        allocation_size: allocation_size::<BIG>,
        page_table_depth,
        page_sizes: page_sizes::<BIG>,
    }
}

/// log2 of the VA covered by one root entry.
const fn pde_shift(big_page_size: u64) -> u32 {
    big_page_size.trailing_zeros() + ver1::PDE_BIG_PAGES.trailing_zeros()
}

fn entry_size(_depth: u32) -> usize {
    8
}

fn index_bits<const BIG: u64>(depth: u32, page_size: u64) -> u32 {
    let shift = pde_shift(BIG);
    match depth {
        0 => ver1::VA_BITS - shift,
        _ if page_size == PAGE_SIZE_4K => shift - PAGE_SIZE_4K.trailing_zeros(),
        _ => shift - BIG.trailing_zeros(),
    }
}

fn entries_per_index(depth: u32) -> usize {
    if depth == 0 {
        2
    } else {
        1
    }
}

fn entry_offset(depth: u32, page_size: u64) -> usize {
    usize::from(depth == 0 && page_size == PAGE_SIZE_4K)
}

fn num_va_bits() -> u32 {
    ver1::VA_BITS
}

fn allocation_size<const BIG: u64>(depth: u32, page_size: u64) -> usize {
    entry_size(depth) << index_bits::<BIG>(depth, page_size)
}

fn page_table_depth(_page_size: u64) -> u32 {
    1
}

fn page_sizes<const BIG: u64>() -> u64 {
    PAGE_SIZE_4K | BIG
}

fn make_pte(aperture: Aperture, address: u64, prot: Prot, flags: PteFlags) -> Result<u64> {
    if prot == Prot::None {
        return Ok(0);
    }
    let page = address >> ADDRESS_SHIFT;
    let mut pte = ver1::PTE_VALID.value(1);
    pte |= match aperture {
        Aperture::Vid | Aperture::Default => {
            ver1::PTE_APERTURE.value(ver1::PTE_APERTURE_VIDEO_MEMORY)
                | page_field(ver1::PTE_ADDRESS_VID, page)?
        }
        Aperture::Peer(id) => {
            ver1::PTE_APERTURE.value(ver1::PTE_APERTURE_PEER_MEMORY)
                | page_field(ver1::PTE_ADDRESS_VID, page)?
                | ver1::PTE_ADDRESS_VID_PEER.value(u64::from(id))
        }
        Aperture::Sys => {
            ver1::PTE_APERTURE.value(ver1::PTE_APERTURE_SYSTEM_COHERENT_MEMORY)
                | page_field(ver1::PTE_ADDRESS_SYS, page)?
        }
        Aperture::SysNonCoherent => {
            ver1::PTE_APERTURE.value(ver1::PTE_APERTURE_SYSTEM_NON_COHERENT_MEMORY)
                | page_field(ver1::PTE_ADDRESS_SYS, page)?
        }
    };
    if !flags.contains(PteFlags::CACHED) {
        pte |= ver1::PTE_VOL.value(1);
    }
    // No atomic-capable mappings: read-write-atomic is plain read-write.
    if prot == Prot::ReadOnly {
        pte |= ver1::PTE_READ_ONLY.value(1);
    }
    Ok(pte)
}

fn decode_pte(pte: u64) -> Option<DecodedPte> {
    if !ver1::PTE_VALID.is_set(pte) {
        return None;
    }
    let (aperture, address) = match ver1::PTE_APERTURE.get(pte) {
        ver1::PTE_APERTURE_VIDEO_MEMORY => (Aperture::Vid, ver1::PTE_ADDRESS_VID.get(pte)),
        ver1::PTE_APERTURE_PEER_MEMORY => (
            Aperture::Peer(ver1::PTE_ADDRESS_VID_PEER.get(pte) as u8),
            ver1::PTE_ADDRESS_VID.get(pte),
        ),
        ver1::PTE_APERTURE_SYSTEM_COHERENT_MEMORY => (Aperture::Sys, ver1::PTE_ADDRESS_SYS.get(pte)),
        _ => (Aperture::SysNonCoherent, ver1::PTE_ADDRESS_SYS.get(pte)),
    };
    let prot = if ver1::PTE_READ_ONLY.is_set(pte) {
        Prot::ReadOnly
    } else {
        Prot::ReadWrite
    };
    let flags = if ver1::PTE_VOL.is_set(pte) {
        PteFlags::empty()
    } else {
        PteFlags::CACHED
    };
    Some(DecodedPte {
        aperture,
        address: address << ADDRESS_SHIFT,
        prot,
        flags,
    })
}

fn make_sked_reflected_pte() -> u64 {
    ver1::PTE_VALID.value(1) | ver1::PTE_KIND.value(ver1::PTE_KIND_SMSKED_MESSAGE)
}

fn make_sparse_pte() -> Result<u64> {
    Err(UvmError::unsupported("sparse mappings need Pascal or later"))
}

fn unmapped_pte(page_size: u64) -> u64 {
    if page_size == PAGE_SIZE_4K {
        0
    } else {
        ver1::PTE_UNMAPPED_BIG
    }
}

/// Privileged, read-only, and pointing past the end of any video memory.
fn poisoned_pte() -> u64 {
    ver1::PTE_VALID.value(1)
        | ver1::PTE_PRIVILEGE.value(1)
        | ver1::PTE_READ_ONLY.value(1)
        | ver1::PTE_VOL.value(1)
        | ver1::PTE_ADDRESS_VID.value(ver1::PTE_ADDRESS_VID.max_value())
}

fn pde_aperture(phys: &GpuPhysAddress) -> u64 {
    match phys.aperture {
        Aperture::Sys => ver1::PDE_APERTURE_SYSTEM_COHERENT_MEMORY,
        Aperture::SysNonCoherent => ver1::PDE_APERTURE_SYSTEM_NON_COHERENT_MEMORY,
        Aperture::Vid | Aperture::Peer(_) | Aperture::Default => ver1::PDE_APERTURE_VIDEO_MEMORY,
    }
}

/// `children` is `[big, small]`.
fn make_pde(out: &mut [u64], children: &[Option<GpuPhysAddress>], _ctx: &PdeContext<'_>) {
    let mut pde = 0;
    if let Some(big) = children.first().copied().flatten() {
        pde |= ver1::PDE_APERTURE_BIG.value(pde_aperture(&big))
            | ver1::PDE_ADDRESS_BIG.value(big.address >> ADDRESS_SHIFT);
        if big.aperture.is_sys() {
            pde |= ver1::PDE_VOL_BIG.value(1);
        }
    }
    if let Some(small) = children.get(1).copied().flatten() {
        pde |= ver1::PDE_APERTURE_SMALL.value(pde_aperture(&small))
            | ver1::PDE_ADDRESS_SMALL.value(small.address >> ADDRESS_SHIFT);
        if small.aperture.is_sys() {
            pde |= ver1::PDE_VOL_SMALL.value(1);
        }
    }
    if let Some(word) = out.first_mut() {
        *word = pde;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtsConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn geometry_follows_the_big_page_size() {
        for (mode, root_bits, small_bits) in [(&MODE_128K, 13, 15), (&MODE_64K, 14, 14)] {
            assert_eq!(mode.index_bits(0, PAGE_SIZE_4K), root_bits);
            assert_eq!(mode.index_bits(1, PAGE_SIZE_4K), small_bits);
            assert_eq!(mode.index_bits(1, mode.big_page_size), 10);
            assert_eq!(mode.allocation_size(0, PAGE_SIZE_4K), 8 << root_bits);
            assert_eq!(mode.allocation_size(1, mode.big_page_size), 8 << 10);
            assert_eq!(mode.page_table_depth(PAGE_SIZE_4K), 1);
            assert_eq!(mode.page_table_depth(mode.big_page_size), 1);
            // Each page size's index bits account for the whole VA.
            assert_eq!(root_bits + small_bits + 12, 40);
        }
        assert!(mode(PAGE_SIZE_4K).is_none());
        assert!(!MODE_64K.supports_page_size(PAGE_SIZE_128K));
    }

    #[test]
    fn pte_golden_vectors() {
        assert_eq!(
            MODE_128K.make_pte(Aperture::Vid, 0x1234_5000, Prot::ReadWrite, PteFlags::CACHED).unwrap(),
            0x0000_0000_0012_3451
        );
        assert_eq!(
            MODE_128K.make_pte(Aperture::Sys, 0x8000_0000, Prot::ReadOnly, PteFlags::empty()).unwrap(),
            0x0000_0005_0080_0005
        );
        assert_eq!(
            MODE_128K.make_pte(Aperture::Peer(3), 0x1000, Prot::ReadWrite, PteFlags::CACHED).unwrap(),
            0x0000_0002_6000_0011
        );
        assert_eq!(
            MODE_128K.make_pte(Aperture::Vid, 0x1000, Prot::ReadWriteAtomic, PteFlags::CACHED).unwrap(),
            MODE_128K.make_pte(Aperture::Vid, 0x1000, Prot::ReadWrite, PteFlags::CACHED).unwrap()
        );
        assert_eq!(MODE_128K.make_pte(Aperture::Vid, 0x1000, Prot::None, PteFlags::CACHED).unwrap(), 0);
    }

    #[test]
    fn sentinels() {
        assert_eq!(MODE_64K.unmapped_pte(PAGE_SIZE_4K), 0);
        assert_eq!(MODE_64K.unmapped_pte(PAGE_SIZE_64K), 0x2);
        assert!(MODE_64K.make_sparse_pte().is_err());
        assert_eq!(MODE_64K.make_sked_reflected_pte(), 0x0000_0CA0_0000_0001);

        let poisoned = MODE_64K.decode_pte(MODE_64K.poisoned_pte()).unwrap();
        assert_eq!(poisoned.prot, Prot::ReadOnly);
        assert_eq!(poisoned.address, ((1u64 << 25) - 1) << 12);
    }

    #[test]
    fn pde_packs_both_halves() {
        let ats = AtsConfig::default();
        let ctx = PdeContext {
            depth: 0,
            va_base: 0,
            va_size: 1 << 27,
            ats: &ats,
        };
        let mut out = [0u64; 1];
        MODE_128K.make_pde(
            &mut out,
            &[Some(GpuPhysAddress::vid(0x10000)), Some(GpuPhysAddress::sys(0x20000))],
            &ctx,
        );
        assert_eq!(out[0], 0x0000_0206_0000_0101);

        MODE_128K.make_pde(&mut out, &[None, Some(GpuPhysAddress::vid(0x3000))], &ctx);
        assert_eq!(out[0], 0x0000_0031_0000_0000);

        MODE_128K.make_pde(&mut out, &[None, None], &ctx);
        assert_eq!(out[0], 0);
    }
}
