//! Six-level page tables over a 57-bit VA.
//!
//! Permissions, caching and access-counter participation are folded into a single PTE "PCF"
//! field, and PDEs carry the ATS decision in their own PCF instead of a separate bit. Depth 4
//! (PDE0) holds the dual big/small entries; 512M pages are mapped from depth 3.

use uvm_hwref::mmu::{ver3, ADDRESS_SHIFT, PAGE_SIZE_2M, PAGE_SIZE_4K, PAGE_SIZE_512M, PAGE_SIZE_64K};

use crate::address::{Aperture, GpuPhysAddress};
use crate::error::Result;
use crate::mmu::{page_field, DecodedPte, MmuModeHal, MmuModeOps, PdeContext, Prot, PteFlags};

pub(crate) static MODE: MmuModeHal = MmuModeHal::new(ops(), PAGE_SIZE_64K);

pub(crate) fn mode(big_page_size: u64) -> Option<&'static MmuModeHal> {
    (big_page_size == PAGE_SIZE_64K).then_some(&MODE)
}

const fn ops() -> MmuModeOps {
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

const DUAL_DEPTH: u32 = 4;
const LEAF_DEPTH: u32 = 5;
/// Entries at this depth cover 512M and decide whether ATS may translate the range.
const ATS_DEPTH: u32 = 3;

fn entry_size(depth: u32) -> usize {
    if depth == DUAL_DEPTH {
        16
    } else {
        8
    }
}

fn index_bits(depth: u32, page_size: u64) -> u32 {
    match depth {
        0 => 1,
        1..=3 => 9,
        DUAL_DEPTH => 8,
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
    ver3::VA_BITS
}

fn allocation_size(depth: u32, page_size: u64) -> usize {
    if depth == LEAF_DEPTH && page_size == PAGE_SIZE_64K {
        256
    } else {
        4096
    }
}

fn page_table_depth(page_size: u64) -> u32 {
    match page_size {
        PAGE_SIZE_512M => ATS_DEPTH,
        PAGE_SIZE_2M => DUAL_DEPTH,
        _ => LEAF_DEPTH,
    }
}

fn page_sizes() -> u64 {
    PAGE_SIZE_4K | PAGE_SIZE_64K | PAGE_SIZE_2M | PAGE_SIZE_512M
}

fn pte_pcf(prot: Prot, flags: PteFlags) -> u64 {
    let cached = flags.contains(PteFlags::CACHED);
    let pcf = match (prot, cached) {
        (Prot::ReadWriteAtomic, true) => ver3::PTE_PCF_VALID_RW_ATOMIC_CACHED_ACE,
        (Prot::ReadWriteAtomic, false) => ver3::PTE_PCF_VALID_RW_ATOMIC_UNCACHED_ACE,
        (Prot::ReadWrite, true) => ver3::PTE_PCF_VALID_RW_NO_ATOMIC_CACHED_ACE,
        (Prot::ReadWrite, false) => ver3::PTE_PCF_VALID_RW_NO_ATOMIC_UNCACHED_ACE,
        (_, true) => ver3::PTE_PCF_VALID_RO_NO_ATOMIC_CACHED_ACE,
        (_, false) => ver3::PTE_PCF_VALID_RO_NO_ATOMIC_UNCACHED_ACE,
    };
    if flags.contains(PteFlags::ACCESS_COUNTERS_DISABLED) {
        pcf + ver3::PTE_PCF_ACD_OFFSET
    } else {
        pcf
    }
}

fn pte_aperture(aperture: Aperture) -> u64 {
    match aperture {
        Aperture::Vid | Aperture::Default => ver3::PTE_APERTURE_VIDEO_MEMORY,
        Aperture::Peer(_) => ver3::PTE_APERTURE_PEER_MEMORY,
        Aperture::Sys => ver3::PTE_APERTURE_SYSTEM_COHERENT_MEMORY,
        Aperture::SysNonCoherent => ver3::PTE_APERTURE_SYSTEM_NON_COHERENT_MEMORY,
    }
}

fn make_pte(aperture: Aperture, address: u64, prot: Prot, flags: PteFlags) -> Result<u64> {
    if prot == Prot::None {
        return Ok(0);
    }
    let mut pte = ver3::PTE_VALID.value(1)
        | ver3::PTE_APERTURE.value(pte_aperture(aperture))
        | ver3::PTE_PCF.value(pte_pcf(prot, flags))
        | page_field(ver3::PTE_ADDRESS, address >> ADDRESS_SHIFT)?;
    if let Aperture::Peer(id) = aperture {
        pte |= ver3::PTE_PEER_ID.value(u64::from(id));
    }
    Ok(pte)
}

fn decode_pte(pte: u64) -> Option<DecodedPte> {
    if !ver3::PTE_VALID.is_set(pte) {
        return None;
    }
    let aperture = match ver3::PTE_APERTURE.get(pte) {
        ver3::PTE_APERTURE_VIDEO_MEMORY => Aperture::Vid,
        ver3::PTE_APERTURE_PEER_MEMORY => Aperture::Peer(ver3::PTE_PEER_ID.get(pte) as u8),
        ver3::PTE_APERTURE_SYSTEM_COHERENT_MEMORY => Aperture::Sys,
        _ => Aperture::SysNonCoherent,
    };
    let mut pcf = ver3::PTE_PCF.get(pte);
    let mut flags = PteFlags::empty();
    if pcf >= ver3::PTE_PCF_ACD_OFFSET {
        pcf -= ver3::PTE_PCF_ACD_OFFSET;
        flags |= PteFlags::ACCESS_COUNTERS_DISABLED;
    }
    // Bit 0 of every valid PCF selects the uncached variant.
    if pcf & 1 == 0 {
        flags |= PteFlags::CACHED;
    }
    let prot = match pcf & !1 {
        ver3::PTE_PCF_VALID_RW_ATOMIC_CACHED_ACE | ver3::PTE_PCF_PRIVILEGE_RW_ATOMIC_CACHED_ACE => {
            Prot::ReadWriteAtomic
        }
        ver3::PTE_PCF_VALID_RW_NO_ATOMIC_CACHED_ACE => Prot::ReadWrite,
        ver3::PTE_PCF_VALID_RO_NO_ATOMIC_CACHED_ACE | ver3::PTE_PCF_PRIVILEGE_RO_NO_ATOMIC_CACHED_ACE => {
            Prot::ReadOnly
        }
        _ => return None,
    };
    Some(DecodedPte {
        aperture,
        address: ver3::PTE_ADDRESS.get(pte) << ADDRESS_SHIFT,
        prot,
        flags,
    })
}

fn make_sked_reflected_pte() -> u64 {
    ver3::PTE_VALID.value(1)
        | ver3::PTE_PCF.value(ver3::PTE_PCF_VALID_RW_NO_ATOMIC_UNCACHED_ACE + ver3::PTE_PCF_ACD_OFFSET)
        | ver3::PTE_KIND.value(ver3::PTE_KIND_SMSKED_MESSAGE)
}

fn make_sparse_pte() -> Result<u64> {
    Ok(ver3::PTE_PCF.value(ver3::PTE_PCF_SPARSE))
}

/// Big PTEs that are not mapped send lookups on to the 4K table.
fn unmapped_pte(page_size: u64) -> u64 {
    if page_size == PAGE_SIZE_4K {
        0
    } else {
        ver3::PTE_PCF.value(ver3::PTE_PCF_NO_VALID_4KB_PAGE)
    }
}

fn poisoned_pte() -> u64 {
    ver3::PTE_VALID.value(1)
        | ver3::PTE_APERTURE.value(ver3::PTE_APERTURE_VIDEO_MEMORY)
        | ver3::PTE_PCF.value(ver3::PTE_PCF_PRIVILEGE_RO_NO_ATOMIC_UNCACHED_ACE)
        | ver3::PTE_ADDRESS.value(ver3::PTE_ADDRESS.max_value())
}

fn ats_allowed(ctx: &PdeContext<'_>) -> bool {
    if ctx.depth != ATS_DEPTH {
        return true;
    }
    ctx.ats.enabled && !ctx.overlaps_non_canonical_hole(ver3::VA_BITS)
}

fn pde_aperture_and_pcf(child: Option<GpuPhysAddress>, ats: bool) -> u64 {
    let (aperture, valid_pcf) = match child.map(|c| c.aperture) {
        None => {
            let pcf = if ats {
                ver3::PDE_PCF_INVALID_ATS_ALLOWED
            } else {
                ver3::PDE_PCF_INVALID_ATS_NOT_ALLOWED
            };
            return ver3::PDE_PCF.value(pcf);
        }
        Some(Aperture::Sys) => (ver3::PDE_APERTURE_SYSTEM_COHERENT_MEMORY, uncached_pcf(ats)),
        Some(Aperture::SysNonCoherent) => {
            (ver3::PDE_APERTURE_SYSTEM_NON_COHERENT_MEMORY, uncached_pcf(ats))
        }
        Some(_) => {
            let pcf = if ats {
                ver3::PDE_PCF_VALID_CACHED_ATS_ALLOWED
            } else {
                ver3::PDE_PCF_VALID_CACHED_ATS_NOT_ALLOWED
            };
            (ver3::PDE_APERTURE_VIDEO_MEMORY, pcf)
        }
    };
    ver3::PDE_APERTURE.value(aperture) | ver3::PDE_PCF.value(valid_pcf)
}

fn uncached_pcf(ats: bool) -> u64 {
    if ats {
        ver3::PDE_PCF_VALID_UNCACHED_ATS_ALLOWED
    } else {
        ver3::PDE_PCF_VALID_UNCACHED_ATS_NOT_ALLOWED
    }
}

fn pde_bits(child: Option<GpuPhysAddress>, ats: bool) -> u64 {
    let address = child.map_or(0, |c| ver3::PDE_ADDRESS.value(c.address >> ADDRESS_SHIFT));
    pde_aperture_and_pcf(child, ats) | address
}

fn dual_big_bits(child: Option<GpuPhysAddress>) -> u64 {
    let address = child.map_or(0, |c| {
        ver3::DUAL_PDE_ADDRESS_BIG.value(c.address >> ver3::DUAL_PDE_ADDRESS_BIG_SHIFT)
    });
    pde_aperture_and_pcf(child, true) | address
}

/// Fills a single PDE, or both words of the dual PDE0 from `[big, small]`.
fn make_pde(out: &mut [u64], children: &[Option<GpuPhysAddress>], ctx: &PdeContext<'_>) {
    let child = |i: usize| children.get(i).copied().flatten();
    if ctx.depth == DUAL_DEPTH {
        if let [big, small, ..] = out {
            *big = dual_big_bits(child(0));
            *small = pde_bits(child(1), true);
        }
    } else if let Some(word) = out.first_mut() {
        *word = pde_bits(child(0), ats_allowed(ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtsConfig;
    use pretty_assertions::assert_eq;

    fn ctx(depth: u32, va_base: u64, ats: &AtsConfig) -> PdeContext<'_> {
        PdeContext {
            depth,
            va_base,
            va_size: 512 << 20,
            ats,
        }
    }

    #[test]
    fn geometry_covers_57_bits() {
        assert_eq!(MODE.va_shift(LEAF_DEPTH, PAGE_SIZE_4K), 12);
        assert_eq!(MODE.va_shift(LEAF_DEPTH, PAGE_SIZE_64K), 16);
        assert_eq!(MODE.va_shift(DUAL_DEPTH, PAGE_SIZE_2M), 21);
        assert_eq!(MODE.va_shift(ATS_DEPTH, PAGE_SIZE_512M), 29);
        assert_eq!(MODE.va_shift(0, PAGE_SIZE_4K), 56);
        assert_eq!(MODE.page_table_depth(PAGE_SIZE_4K), 5);
        assert_eq!(MODE.allocation_size(5, PAGE_SIZE_64K), 256);
        assert_eq!(MODE.entry_size(DUAL_DEPTH), 16);
        assert!(mode(128 << 10).is_none());
    }

    #[test]
    fn pte_golden_vectors() {
        assert_eq!(
            MODE.make_pte(Aperture::Vid, 0x1234_5000, Prot::ReadWrite, PteFlags::CACHED).unwrap(),
            0x1234_5041
        );
        assert_eq!(
            MODE.make_pte(Aperture::Sys, 0x8000_0000, Prot::ReadOnly, PteFlags::empty()).unwrap(),
            0x8000_006D
        );
        assert_eq!(
            MODE.make_pte(Aperture::Peer(3), 0x1000, Prot::ReadWriteAtomic, PteFlags::CACHED).unwrap(),
            0x6000_0000_0000_1003
        );
        assert_eq!(
            MODE.make_pte(
                Aperture::Vid,
                0x1234_5000,
                Prot::ReadWrite,
                PteFlags::CACHED | PteFlags::ACCESS_COUNTERS_DISABLED
            ).unwrap(),
            0x1234_50C1
        );
        assert_eq!(MODE.make_pte(Aperture::Vid, 0x1000, Prot::None, PteFlags::CACHED).unwrap(), 0);
    }

    #[test]
    fn pcf_survives_decoding() {
        for prot in [Prot::ReadOnly, Prot::ReadWrite, Prot::ReadWriteAtomic] {
            for flags in [
                PteFlags::empty(),
                PteFlags::CACHED,
                PteFlags::ACCESS_COUNTERS_DISABLED,
                PteFlags::all(),
            ] {
                let pte = MODE.make_pte(Aperture::SysNonCoherent, 0x1_ABCD_E000, prot, flags).unwrap();
                let decoded = MODE.decode_pte(pte).unwrap();
                assert_eq!((decoded.prot, decoded.flags), (prot, flags));
                assert_eq!(decoded.address, 0x1_ABCD_E000);
            }
        }
    }

    #[test]
    fn sentinels() {
        assert_eq!(MODE.make_sparse_pte().unwrap(), 0x8);
        assert!(MODE.decode_pte(0x8).is_none());
        assert_eq!(MODE.unmapped_pte(PAGE_SIZE_4K), 0);
        assert_eq!(MODE.unmapped_pte(PAGE_SIZE_64K), 0x18);
        assert_eq!(MODE.make_sked_reflected_pte(), 0xFC9);
        let poisoned = MODE.decode_pte(MODE.poisoned_pte()).unwrap();
        assert_eq!(poisoned.prot, Prot::ReadOnly);
        assert!(!poisoned.flags.contains(PteFlags::CACHED));
    }

    #[test]
    fn pde_golden_vectors() {
        let disabled = AtsConfig::default();
        let mut single = [0u64; 1];
        MODE.make_pde(&mut single, &[Some(GpuPhysAddress::vid(0x40_0000))], &ctx(0, 0, &disabled));
        assert_eq!(single[0], 0x40_0002);
        MODE.make_pde(&mut single, &[Some(GpuPhysAddress::sys(0x8000_0000))], &ctx(1, 0, &disabled));
        assert_eq!(single[0], 0x8000_000C);

        // Entries covering 512M carry the ATS decision.
        MODE.make_pde(&mut single, &[Some(GpuPhysAddress::vid(0x40_0000))], &ctx(3, 0, &disabled));
        assert_eq!(single[0], 0x40_0012);
        MODE.make_pde(&mut single, &[None], &ctx(3, 0, &disabled));
        assert_eq!(single[0], 0x10);

        let enabled = AtsConfig {
            enabled: true,
            ..AtsConfig::default()
        };
        MODE.make_pde(&mut single, &[Some(GpuPhysAddress::vid(0x40_0000))], &ctx(3, 0, &enabled));
        assert_eq!(single[0], 0x40_0002);
        MODE.make_pde(&mut single, &[Some(GpuPhysAddress::vid(0x40_0000))], &ctx(3, 1 << 47, &enabled));
        assert_eq!(single[0], 0x40_0012);

        let mut dual = [0u64; 2];
        MODE.make_pde(
            &mut dual,
            &[Some(GpuPhysAddress::vid(0x1_0100)), Some(GpuPhysAddress::sys(0x2000))],
            &ctx(DUAL_DEPTH, 0, &disabled),
        );
        assert_eq!(dual, [0x1_0102, 0x200C]);
        MODE.make_pde(&mut dual, &[None, Some(GpuPhysAddress::vid(0x3000))], &ctx(DUAL_DEPTH, 0, &disabled));
        assert_eq!(dual, [0, 0x3002]);
    }
}
