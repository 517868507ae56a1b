//! Volta: non-replayable faults, access counters, subcontexts and VA-targeted cancels.

pub(crate) mod ce;
pub(crate) mod host;
pub(crate) mod mmu;

use uvm_hwref::access_counter as hw_counter;
use uvm_hwref::class::{
    ARCH_GP100, ARCH_GV100, PASCAL_CHANNEL_GPFIFO_A, PASCAL_DMA_COPY_B, VOLTA_CHANNEL_GPFIFO_A,
    VOLTA_DMA_COPY_A,
};
use uvm_hwref::fault::{c369, engine_id};

use crate::access_counter::{self, AccessCounterEntry};
use crate::error::Result;
use crate::fault::{parse, FaultBufferEntry};
use crate::hal::{AccessCounterBufferHal, ArchCaps, ArchHal, FaultBufferHal, HalDescriptor, MmuEngineType};

pub(crate) const DESCRIPTORS: &[HalDescriptor] = &[
    HalDescriptor::host(VOLTA_CHANNEL_GPFIFO_A, PASCAL_CHANNEL_GPFIFO_A, host::host),
    HalDescriptor::ce(VOLTA_DMA_COPY_A, PASCAL_DMA_COPY_B, ce::ce),
    HalDescriptor::arch(ARCH_GV100, ARCH_GP100, arch),
    HalDescriptor::fault(ARCH_GV100, ARCH_GP100, fault),
    HalDescriptor::access_counter(ARCH_GV100, ARCH_GP100, access_counters),
];

pub(crate) fn mmu_engine_type(engine_id: u16) -> MmuEngineType {
    match engine_id {
        engine_id::VOLTA_CE0..=engine_id::VOLTA_CE8 => MmuEngineType::Ce,
        engine_id::VOLTA_HOST0..=engine_id::VOLTA_HOST13 => MmuEngineType::Host,
        _ => MmuEngineType::Graphics,
    }
}

fn arch(parent: ArchHal) -> ArchHal {
    ArchHal {
        name: "gv100",
        mmu_mode_hal: mmu::mode,
        mmu_engine_type,
        caps: ArchCaps {
            has_clear_faulted_channel_method: true,
            tlb_fold_sysmembar: true,
            non_replayable_faults: true,
            access_counters: true,
            fault_cancel_va: true,
            tlb_batch_max_pages: 512,
            ..parent.caps
        },
        ..parent
    }
}

fn parse_replayable(arch: &ArchHal, words: &[u32]) -> Result<FaultBufferEntry> {
    parse::parse_c369(arch, words, engine_id::VOLTA_GRAPHICS, true)
}

fn parse_non_replayable(arch: &ArchHal, words: &[u32]) -> Result<FaultBufferEntry> {
    parse::parse_c369(arch, words, engine_id::VOLTA_GRAPHICS, false)
}

fn fault(_parent: FaultBufferHal) -> FaultBufferHal {
    FaultBufferHal {
        entry_size: c369::ENTRY_SIZE,
        entry_is_valid: parse::c369_is_valid,
        entry_clear_valid: parse::c369_clear_valid,
        parse_replayable_entry: parse_replayable,
        parse_non_replayable_entry: parse_non_replayable,
    }
}

fn parse_notification(arch: &ArchHal, words: &[u32]) -> Result<AccessCounterEntry> {
    access_counter::parse_entry_with(arch, words, engine_id::VOLTA_GRAPHICS)
}

fn access_counters(_parent: AccessCounterBufferHal) -> AccessCounterBufferHal {
    AccessCounterBufferHal {
        entry_size: hw_counter::ENTRY_SIZE,
        entry_is_valid: access_counter::entry_is_valid,
        entry_clear_valid: access_counter::entry_clear_valid,
        parse_entry: parse_notification,
        config_value: access_counter::config_register_value,
    }
}
