//! Volta page tables: the Pascal format with a wider video-memory address and ATS control on
//! the PDE1 level.

use uvm_hwref::mmu::{ver2, ADDRESS_SHIFT, PAGE_SIZE_64K};

use crate::address::{Aperture, GpuPhysAddress};
use crate::arch::pascal::mmu as pascal;
use crate::error::{Result, UvmError};
use crate::mmu::{page_field, DecodedPte, MmuModeHal, MmuModeOps, PdeContext, Prot, PteFlags};

pub(crate) static MODE: MmuModeHal = MmuModeHal::new(ops(), PAGE_SIZE_64K);

pub(crate) fn mode(big_page_size: u64) -> Option<&'static MmuModeHal> {
    (big_page_size == PAGE_SIZE_64K).then_some(&MODE)
}

pub(crate) const fn ops() -> MmuModeOps {
    MmuModeOps {
        make_pte,
        decode_pte,
        make_pde,
        ..pascal::ops()
    }
}

/// Directory whose entries each cover 512M, the granularity ATS is enabled at.
pub(crate) const ATS_DEPTH: u32 = 2;

/// Bits of a video-memory page number held by `PTE_ADDRESS_VID`; the rest go in
/// `PTE_ADDRESS_VID_HI`.
const VID_LO_BITS: u32 = ver2::PTE_ADDRESS_VID.width();

pub(crate) fn vid_address_bits(page: u64) -> Result<u64> {
    let hi = page_field(ver2::PTE_ADDRESS_VID_HI, page >> VID_LO_BITS).map_err(|_| {
        UvmError::assertion(format!(
            "vidmem page {page:#x} does not fit {} address bits",
            VID_LO_BITS + ver2::PTE_ADDRESS_VID_HI.width()
        ))
    })?;
    Ok(ver2::PTE_ADDRESS_VID.value(page & ver2::PTE_ADDRESS_VID.max_value()) | hi)
}

fn make_pte(aperture: Aperture, address: u64, prot: Prot, flags: PteFlags) -> Result<u64> {
    if prot == Prot::None {
        return Ok(0);
    }
    let page = address >> ADDRESS_SHIFT;
    let address_bits = if aperture.is_sys() {
        page_field(ver2::PTE_ADDRESS_SYS, page)?
    } else {
        vid_address_bits(page)?
    };
    Ok(pascal::pte_common(aperture, prot, flags) | address_bits)
}

fn decode_pte(pte: u64) -> Option<DecodedPte> {
    let (aperture, prot, flags) = pascal::decode_common(pte)?;
    let page = if aperture.is_sys() {
        ver2::PTE_ADDRESS_SYS.get(pte)
    } else {
        ver2::PTE_ADDRESS_VID.get(pte) | (ver2::PTE_ADDRESS_VID_HI.get(pte) << VID_LO_BITS)
    };
    Some(DecodedPte {
        aperture,
        address: page << ADDRESS_SHIFT,
        prot,
        flags,
    })
}

/// ATS may only translate a PDE1 range when it is enabled and the range lies entirely in the
/// canonical part of the CPU address space.
pub(crate) fn ats_allowed(ctx: &PdeContext<'_>) -> bool {
    ctx.ats.enabled && !ctx.overlaps_non_canonical_hole(ver2::VA_BITS)
}

fn make_pde(out: &mut [u64], children: &[Option<GpuPhysAddress>], ctx: &PdeContext<'_>) {
    pascal::make_pde(out, children, ctx);
    if ctx.depth == ATS_DEPTH && !ats_allowed(ctx) {
        if let Some(word) = out.first_mut() {
            *word |= ver2::PDE_NO_ATS.value(1);
        }
    }
}
