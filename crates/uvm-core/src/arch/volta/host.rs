//! `VOLTA_CHANNEL_GPFIFO_A`: ranged invalidates, VA-targeted cancels, channel-id based faulted
//! channel clears and access-counter clears.

use uvm_hwref::host::c06f;

use crate::access_counter::{AccessCounterEntry, AccessCounterType};
use crate::address::GpuPhysAddress;
use crate::arch::pascal::host::{invalidate_targeted, mem_op, pdb_bits, tlb_invalidate_all};
use crate::channel::UserChannel;
use crate::fault::{CancelVaMode, FaultBufferEntry};
use crate::hal::{HostHal, Membar, MmuEngineType};
use crate::push::Push;
use crate::tlb::{self, MIN_INVALIDATE_SHIFT};

pub(crate) fn host(parent: HostHal) -> HostHal {
    HostHal {
        tlb_invalidate_va,
        cancel_faults_va,
        clear_faulted_channel_method,
        access_counter_clear_all,
        access_counter_clear_type,
        access_counter_clear_targeted,
        ..parent
    }
}

/// One invalidate covering the smallest aligned power-of-two window around the range.
fn tlb_invalidate_va(
    push: &mut Push,
    pdb: GpuPhysAddress,
    depth: u32,
    base: u64,
    size: u64,
    _page_size: u64,
    membar: Membar,
) {
    if size == 0 {
        return;
    }
    let Some((aligned, log2)) = tlb::targeted_range(base, size) else {
        tlb_invalidate_all(push, pdb, depth, membar);
        return;
    };
    let size_bits = c06f::MEM_OP_A_TLB_INVALIDATE_INVALIDATION_SIZE.value32(log2 - MIN_INVALIDATE_SHIFT);
    invalidate_targeted(push, pdb, depth, aligned, size_bits, membar);
    tlb::membar_after_invalidate(push, membar);
}

fn cancel_faults_va(push: &mut Push, pdb: GpuPhysAddress, fault: &FaultBufferEntry, mode: CancelVaMode) {
    let (c, d) = pdb_bits(push, pdb);
    let access_type = match mode {
        CancelVaMode::All => c06f::MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE_VIRT_ALL,
        CancelVaMode::WriteAndAtomic => c06f::MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE_VIRT_WRITE_AND_ATOMIC,
    };
    let va = fault.fault_address;
    let a = c06f::MEM_OP_A_TLB_INVALIDATE_CANCEL_MMU_ENGINE_ID.value32(u32::from(fault.source.mmu_engine_id))
        | c06f::MEM_OP_A_TLB_INVALIDATE_TARGET_ADDR_LO.value32((va >> 12) as u32);
    let b = c06f::MEM_OP_B_TLB_INVALIDATE_TARGET_ADDR_HI.value32((va >> 32) as u32);
    let c = c
        | c06f::MEM_OP_C_TLB_INVALIDATE_GPC.value32(c06f::MEM_OP_C_TLB_INVALIDATE_GPC_ENABLE)
        | c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY.value32(c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY_CANCEL_VA_GLOBAL)
        | c06f::MEM_OP_C_TLB_INVALIDATE_ACK_TYPE.value32(c06f::MEM_OP_C_TLB_INVALIDATE_ACK_TYPE_NONE)
        | c06f::MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE.value32(access_type);
    let d = d
        | c06f::MEM_OP_D_OPERATION.value32(c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE_TARGETED);
    mem_op(push, a, b, c, d);
}

/// Faults raised by the channel's own PBDMA latch the PBDMA bit; everything else the engine bit.
pub(crate) fn faulted_is_pbdma(fault: &FaultBufferEntry) -> bool {
    fault.source.mmu_engine_type == MmuEngineType::Host
}

fn clear_faulted_channel_method(push: &mut Push, channel: &UserChannel, fault: &FaultBufferEntry) {
    let clear_type = if faulted_is_pbdma(fault) {
        c06f::CLEAR_FAULTED_TYPE_PBDMA_FAULTED
    } else {
        c06f::CLEAR_FAULTED_TYPE_ENG_FAULTED
    };
    push.host(
        c06f::CLEAR_FAULTED,
        &[c06f::CLEAR_FAULTED_CHID.value32(channel.hw_channel_id)
            | c06f::CLEAR_FAULTED_TYPE.value32(clear_type)],
    );
}

fn access_counter_clear(push: &mut Push, c: u32, d: u32) {
    mem_op(
        push,
        0,
        0,
        c,
        d | c06f::MEM_OP_D_OPERATION.value32(c06f::MEM_OP_D_OPERATION_ACCESS_COUNTER_CLR),
    );
}

fn access_counter_clear_all(push: &mut Push) {
    access_counter_clear(
        push,
        0,
        c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TYPE.value32(c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_ALL),
    );
}

fn access_counter_clear_type(push: &mut Push, counter_type: AccessCounterType) {
    let clear_type = match counter_type {
        AccessCounterType::Mimc => c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_MIMC,
        AccessCounterType::Momc => c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_MOMC,
    };
    access_counter_clear(push, 0, c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TYPE.value32(clear_type));
}

fn access_counter_clear_targeted(push: &mut Push, entry: &AccessCounterEntry) {
    let targeted_type = match entry.counter_type {
        AccessCounterType::Mimc => c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_MIMC,
        AccessCounterType::Momc => c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_MOMC,
    };
    access_counter_clear(
        push,
        c06f::MEM_OP_C_ACCESS_COUNTER_CLR_TARGETED_NOTIFY_TAG.value32(entry.tag),
        c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TYPE.value32(c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_TARGETED)
            | c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TARGETED_TYPE.value32(targeted_type)
            | c06f::MEM_OP_D_ACCESS_COUNTER_CLR_TARGETED_BANK.value32(entry.bank),
    );
}
