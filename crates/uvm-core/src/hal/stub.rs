//! Null-object entries for operations an architecture does not offer.
//!
//! Callers check capabilities before dispatching, so reaching one of these is a programming
//! error: push-building stubs poison the push, everything else returns
//! [`UvmError::AssertionViolation`].

use crate::access_counter::{AccessCounterConfig, AccessCounterEntry, AccessCounterType};
use crate::address::GpuPhysAddress;
use crate::channel::UserChannel;
use crate::error::{Result, UvmError};
use crate::fault::{CancelVaMode, FaultBufferEntry};
use crate::mem::RegisterIo;
use crate::push::Push;
use crate::spin::SpinPolicy;

use super::tables::{AccessCounterBufferHal, ArchHal, FaultBufferHal, Sec2Hal};
use super::types::{Membar, MethodContext, ReplayType, TlbInvalidateTestParams};

fn unsupported(push: &mut Push, what: &str) {
    let gpu = push.gpu().name().to_owned();
    push.fail(UvmError::assertion(format!("{what} is not supported on {gpu}")));
}

pub fn method_is_valid(_: &MethodContext, _: u32, _: u32) -> bool {
    true
}

pub fn is_privileged_method(_: u32, _: u32) -> bool {
    false
}

pub fn init(_: &mut Push) {}

pub fn tlb_invalidate_va(
    push: &mut Push,
    _: GpuPhysAddress,
    _: u32,
    _: u64,
    _: u64,
    _: u64,
    _: Membar,
) {
    unsupported(push, "targeted TLB invalidate");
}

pub fn tlb_invalidate_test(push: &mut Push, _: GpuPhysAddress, _: &TlbInvalidateTestParams) {
    unsupported(push, "test TLB invalidate");
}

pub fn replay_faults(push: &mut Push, _: ReplayType) {
    unsupported(push, "fault replay");
}

pub fn cancel_faults_global(push: &mut Push, _: GpuPhysAddress) {
    unsupported(push, "global fault cancel");
}

pub fn cancel_faults_targeted(push: &mut Push, _: GpuPhysAddress, _: u32, _: u32) {
    unsupported(push, "targeted fault cancel");
}

pub fn cancel_faults_va(push: &mut Push, _: GpuPhysAddress, _: &FaultBufferEntry, _: CancelVaMode) {
    unsupported(push, "VA fault cancel");
}

pub fn clear_faulted_channel_method(push: &mut Push, _: &UserChannel, _: &FaultBufferEntry) {
    unsupported(push, "method-based faulted-channel clear");
}

pub fn clear_faulted_channel_sw_method(push: &mut Push, _: &UserChannel, _: &FaultBufferEntry) {
    unsupported(push, "software-method faulted-channel clear");
}

pub fn clear_faulted_channel_register(
    _: &mut dyn RegisterIo,
    channel: &UserChannel,
    _: &FaultBufferEntry,
    _: &SpinPolicy,
) -> Result<()> {
    Err(UvmError::assertion(format!(
        "register-based faulted-channel clear is not supported (channel {})",
        channel.hw_channel_id
    )))
}

pub fn access_counter_clear_all(push: &mut Push) {
    unsupported(push, "access counter clear");
}

pub fn access_counter_clear_type(push: &mut Push, _: AccessCounterType) {
    unsupported(push, "access counter clear");
}

pub fn access_counter_clear_targeted(push: &mut Push, _: &AccessCounterEntry) {
    unsupported(push, "access counter clear");
}

fn no_entries(_: &[u32]) -> bool {
    false
}

fn clear_nothing(_: &mut [u32]) {}

fn parse_fault(arch: &ArchHal, _: &[u32]) -> Result<FaultBufferEntry> {
    Err(UvmError::assertion(format!("{} has no fault buffer", arch.name)))
}

fn parse_access_counter(arch: &ArchHal, _: &[u32]) -> Result<AccessCounterEntry> {
    Err(UvmError::assertion(format!("{} has no access counters", arch.name)))
}

fn access_counter_config(_: &AccessCounterConfig) -> u32 {
    0
}

fn sec2_semaphore_release(push: &mut Push, _: u64, _: u32) {
    unsupported(push, "SEC2 semaphore release");
}

fn sec2_decrypt(push: &mut Push, _: u64, _: u64, _: u32, _: u64) {
    unsupported(push, "SEC2 decrypt");
}

pub fn fault_buffer() -> FaultBufferHal {
    FaultBufferHal {
        entry_size: 0,
        entry_is_valid: no_entries,
        entry_clear_valid: clear_nothing,
        parse_replayable_entry: parse_fault,
        parse_non_replayable_entry: parse_fault,
    }
}

pub fn access_counter_buffer() -> AccessCounterBufferHal {
    AccessCounterBufferHal {
        entry_size: 0,
        entry_is_valid: no_entries,
        entry_clear_valid: clear_nothing,
        parse_entry: parse_access_counter,
        config_value: access_counter_config,
    }
}

pub fn sec2() -> Sec2Hal {
    Sec2Hal {
        init,
        method_is_valid,
        semaphore_release: sec2_semaphore_release,
        decrypt: sec2_decrypt,
    }
}
