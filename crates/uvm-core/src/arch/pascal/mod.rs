//! Pascal: replayable faults, targeted invalidates and the five-level page tree.

pub(crate) mod host;
pub(crate) mod mmu;

use uvm_hwref::class::{
    ARCH_GM000, ARCH_GP100, KEPLER_CHANNEL_GPFIFO_B, MAXWELL_DMA_COPY_A, PASCAL_CHANNEL_GPFIFO_A,
    PASCAL_DMA_COPY_A, PASCAL_DMA_COPY_B,
};
use uvm_hwref::fault::{b069, gpc_client};
use uvm_hwref::mmu::PAGE_SIZE_64K;

use crate::fault::parse;
use crate::hal::{ArchCaps, ArchHal, FaultBufferHal, HalDescriptor};

use super::inherit;

pub(crate) const DESCRIPTORS: &[HalDescriptor] = &[
    HalDescriptor::host(PASCAL_CHANNEL_GPFIFO_A, KEPLER_CHANNEL_GPFIFO_B, host::host),
    HalDescriptor::ce(PASCAL_DMA_COPY_A, MAXWELL_DMA_COPY_A, inherit),
    HalDescriptor::ce(PASCAL_DMA_COPY_B, PASCAL_DMA_COPY_A, inherit),
    HalDescriptor::arch(ARCH_GP100, ARCH_GM000, arch),
    HalDescriptor::fault(ARCH_GP100, ARCH_GM000, fault),
    HalDescriptor::access_counter(ARCH_GP100, ARCH_GM000, inherit),
];

/// uTLB of a GPC client. The GPC-level units share uTLB 0; each pair of texture units shares
/// the next uTLB with its PE and TPC context switcher.
pub(crate) fn client_id_to_utlb(client_id: u16) -> Option<u32> {
    let utlb = match client_id {
        gpc_client::RAST | gpc_client::GCC | gpc_client::GPCCS => 0,
        gpc_client::T1_0..=gpc_client::T1_7 => 1 + u32::from(client_id - gpc_client::T1_0) / 2,
        gpc_client::PE_0..=gpc_client::PE_3 => 1 + u32::from(client_id - gpc_client::PE_0),
        gpc_client::TPCCS_0..=gpc_client::TPCCS_3 => 1 + u32::from(client_id - gpc_client::TPCCS_0),
        _ => return None,
    };
    Some(utlb)
}

fn arch(parent: ArchHal) -> ArchHal {
    ArchHal {
        name: "gp100",
        mmu_mode_hal: mmu::mode,
        client_id_to_utlb,
        caps: ArchCaps {
            tlb_va_invalidate: true,
            replayable_faults: true,
            atomic_mappings: true,
            utlbs_per_gpc: 5,
            max_gpcs: 6,
            big_page_sizes: PAGE_SIZE_64K,
            tlb_top_level: 5,
            tlb_batch_max_pages: 16,
            ..parent.caps
        },
        ..parent
    }
}

fn fault(parent: FaultBufferHal) -> FaultBufferHal {
    FaultBufferHal {
        entry_size: b069::ENTRY_SIZE,
        entry_is_valid: parse::b069_is_valid,
        entry_clear_valid: parse::b069_clear_valid,
        parse_replayable_entry: parse::parse_b069,
        ..parent
    }
}
