//! `AMPERE_CHANNEL_GPFIFO_A`.
//!
//! Semaphores move to the `SEM_*` methods, faulted channels are cleared through CHRAM (or a
//! software method under SR-IOV heavy), and the GPFIFO privilege bit is gone: user channels are
//! restricted by method validation instead.

use uvm_hwref::chram;
use uvm_hwref::host::c06f;
use uvm_hwref::sw;

use crate::arch::host_aperture;
use crate::arch::volta::host::faulted_is_pbdma;
use crate::channel::UserChannel;
use crate::error::Result;
use crate::fault::FaultBufferEntry;
use crate::hal::{GpfifoSync, HostHal, MethodContext};
use crate::mem::RegisterIo;
use crate::push::{GpfifoEntry, Push};
use crate::spin::SpinPolicy;

pub(crate) fn host(parent: HostHal) -> HostHal {
    HostHal {
        method_is_valid,
        sw_method_is_valid,
        semaphore_release,
        semaphore_acquire,
        semaphore_timestamp,
        set_gpfifo_entry,
        clear_faulted_channel_register,
        clear_faulted_channel_sw_method,
        ..parent
    }
}

/// Host methods a user channel may push.
pub(crate) fn method_is_valid(ctx: &MethodContext, address: u32, value: u32) -> bool {
    if ctx.privileged {
        return true;
    }
    match address {
        c06f::SET_OBJECT
        | c06f::NOP
        | c06f::NON_STALL_INTERRUPT
        | c06f::MEM_OP_A
        | c06f::MEM_OP_B
        | c06f::MEM_OP_C
        | c06f::SEM_ADDR_LO
        | c06f::SEM_ADDR_HI
        | c06f::SEM_PAYLOAD_LO
        | c06f::SEM_PAYLOAD_HI
        | c06f::SEM_EXECUTE
        | c06f::WFI => true,
        c06f::MEM_OP_D => c06f::MEM_OP_D_OPERATION.get32(value) == c06f::MEM_OP_D_OPERATION_MEMBAR,
        _ => false,
    }
}

/// Only the faulted-channel clear is decoded on the software object.
fn sw_method_is_valid(_ctx: &MethodContext, address: u32, _value: u32) -> bool {
    matches!(address, sw::CLEAR_FAULTED_A | sw::CLEAR_FAULTED_B)
}

fn semaphore(push: &mut Push, va: u64, payload: u32, execute: u32) {
    push.host(
        c06f::SEM_ADDR_LO,
        &[
            c06f::SEM_ADDR_LO_OFFSET.value32((va as u32) >> 2),
            c06f::SEM_ADDR_HI_OFFSET.value32((va >> 32) as u32),
            payload,
            0,
            execute,
        ],
    );
}

fn semaphore_release(push: &mut Push, va: u64, payload: u32) {
    semaphore(
        push,
        va,
        payload,
        c06f::SEM_EXECUTE_OPERATION.value32(c06f::SEM_EXECUTE_OPERATION_RELEASE)
            | c06f::SEM_EXECUTE_PAYLOAD_SIZE.value32(c06f::SEM_EXECUTE_PAYLOAD_SIZE_32BIT),
    );
}

fn semaphore_acquire(push: &mut Push, va: u64, payload: u32) {
    semaphore(
        push,
        va,
        payload,
        c06f::SEM_EXECUTE_OPERATION.value32(c06f::SEM_EXECUTE_OPERATION_ACQ_CIRC_GEQ)
            | c06f::SEM_EXECUTE_ACQUIRE_SWITCH_TSG.value32(1)
            | c06f::SEM_EXECUTE_PAYLOAD_SIZE.value32(c06f::SEM_EXECUTE_PAYLOAD_SIZE_32BIT),
    );
}

fn semaphore_timestamp(push: &mut Push, va: u64) {
    semaphore(
        push,
        va,
        0xdead_beef,
        c06f::SEM_EXECUTE_OPERATION.value32(c06f::SEM_EXECUTE_OPERATION_RELEASE)
            | c06f::SEM_EXECUTE_RELEASE_TIMESTAMP.value32(1)
            | c06f::SEM_EXECUTE_PAYLOAD_SIZE.value32(c06f::SEM_EXECUTE_PAYLOAD_SIZE_32BIT),
    );
}

fn set_gpfifo_entry(va: u64, length_words: u32, sync: GpfifoSync) -> GpfifoEntry {
    GpfifoEntry::new(va, length_words, sync, false)
}

/// The fault record can overtake the CHRAM faulted latch, so wait for the latch before
/// resetting it, then ring the runlist doorbell to reschedule the channel.
fn clear_faulted_channel_register(
    regs: &mut dyn RegisterIo,
    channel: &UserChannel,
    fault: &FaultBufferEntry,
    spin: &SpinPolicy,
) -> Result<()> {
    let (faulted, reset) = if faulted_is_pbdma(fault) {
        (chram::CHANNEL_PBDMA_FAULTED, chram::CHANNEL_RESET_PBDMA_FAULTED)
    } else {
        (chram::CHANNEL_ENG_FAULTED, chram::CHANNEL_RESET_ENG_FAULTED)
    };
    let chram_offset = channel.chram_offset;
    spin.spin_until("CHRAM faulted latch", || {
        faulted.get32(regs.read32(chram_offset)) != 0
    })?;
    regs.write32(chram_offset, reset);
    regs.wmb();
    regs.write32(
        channel.doorbell_offset,
        chram::doorbell::VECTOR.value32(channel.clear_faulted_token)
            | chram::doorbell::RUNLIST_ID.value32(channel.hw_runlist_id),
    );
    Ok(())
}

fn clear_faulted_channel_sw_method(push: &mut Push, channel: &UserChannel, fault: &FaultBufferEntry) {
    let clear_type = if faulted_is_pbdma(fault) {
        sw::CLEAR_FAULTED_A_TYPE_PBDMA_FAULTED
    } else {
        sw::CLEAR_FAULTED_A_TYPE_ENG_FAULTED
    };
    let inst = channel.instance_ptr;
    let aperture = host_aperture(push, inst.aperture);
    push.sw(
        sw::CLEAR_FAULTED_A,
        &[
            sw::CLEAR_FAULTED_A_TYPE.value32(clear_type)
                | sw::CLEAR_FAULTED_A_INST_APERTURE.value32(aperture)
                | sw::CLEAR_FAULTED_A_INST_LOW.value32((inst.address >> 12) as u32),
            (inst.address >> 32) as u32,
        ],
    );
}
