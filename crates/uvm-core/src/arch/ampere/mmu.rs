//! Ampere page tables: the Volta format, plus 512M pages mapped directly from PDE1.

use uvm_hwref::mmu::{PAGE_SIZE_2M, PAGE_SIZE_4K, PAGE_SIZE_512M, PAGE_SIZE_64K};

use crate::arch::pascal::mmu::DUAL_DEPTH;
use crate::arch::volta::mmu as volta;
use crate::mmu::{MmuModeHal, MmuModeOps};

pub(crate) static MODE: MmuModeHal = MmuModeHal::new(ops(), PAGE_SIZE_64K);

pub(crate) fn mode(big_page_size: u64) -> Option<&'static MmuModeHal> {
    (big_page_size == PAGE_SIZE_64K).then_some(&MODE)
}

const fn ops() -> MmuModeOps {
    MmuModeOps {
        page_table_depth,
        page_sizes,
        ..volta::ops()
    }
}

fn page_table_depth(page_size: u64) -> u32 {
    match page_size {
        PAGE_SIZE_512M => volta::ATS_DEPTH,
        PAGE_SIZE_2M => DUAL_DEPTH,
        _ => 4,
    }
}

fn page_sizes() -> u64 {
    PAGE_SIZE_4K | PAGE_SIZE_64K | PAGE_SIZE_2M | PAGE_SIZE_512M
}
