//! Maxwell: the base of every table. No fault buffers, no access counters, no targeted
//! invalidates and a two-level page tree.

pub(crate) mod ce;
pub(crate) mod host;
pub(crate) mod mmu;

use uvm_hwref::class::{ARCH_GM000, ARCH_GM200, KEPLER_CHANNEL_GPFIFO_B, MAXWELL_DMA_COPY_A};
use uvm_hwref::mmu::{PAGE_SIZE_128K, PAGE_SIZE_64K};

use crate::hal::{stub, ArchCaps, ArchHal, HalDescriptor, MmuEngineType};

use super::inherit;

pub(crate) const DESCRIPTORS: &[HalDescriptor] = &[
    HalDescriptor::host_base(KEPLER_CHANNEL_GPFIFO_B, host::host),
    HalDescriptor::ce_base(MAXWELL_DMA_COPY_A, ce::ce),
    HalDescriptor::arch_base(ARCH_GM000, arch),
    HalDescriptor::arch(ARCH_GM200, ARCH_GM000, gm200),
    HalDescriptor::fault_base(ARCH_GM000, stub::fault_buffer),
    HalDescriptor::fault(ARCH_GM200, ARCH_GM000, inherit),
    HalDescriptor::access_counter_base(ARCH_GM000, stub::access_counter_buffer),
    HalDescriptor::access_counter(ARCH_GM200, ARCH_GM000, inherit),
];

/// Every MMU engine is graphics as far as fault servicing is concerned.
fn mmu_engine_type(_engine_id: u16) -> MmuEngineType {
    MmuEngineType::Graphics
}

fn no_utlb(_client_id: u16) -> Option<u32> {
    None
}

fn arch() -> ArchHal {
    ArchHal {
        name: "gm000",
        mmu_mode_hal: mmu::mode,
        mmu_engine_type,
        client_id_to_utlb: no_utlb,
        caps: ArchCaps {
            has_clear_faulted_channel_method: false,
            has_clear_faulted_channel_register: false,
            has_clear_faulted_channel_sw_method: false,
            tlb_va_invalidate: false,
            tlb_fold_sysmembar: false,
            replayable_faults: false,
            non_replayable_faults: false,
            access_counters: false,
            fault_cancel_va: false,
            atomic_mappings: false,
            utlbs_per_gpc: 0,
            max_gpcs: 0,
            big_page_sizes: PAGE_SIZE_64K | PAGE_SIZE_128K,
            tlb_top_level: 0,
            tlb_batch_max_pages: 0,
        },
    }
}

fn gm200(parent: ArchHal) -> ArchHal {
    ArchHal {
        name: "gm200",
        ..parent
    }
}
