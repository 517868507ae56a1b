//! `KEPLER_CHANNEL_GPFIFO_B` host methods, the base every later host class derives from.

use uvm_hwref::class::SUBCHANNEL_HOST;
use uvm_hwref::host::{a16f, method};

use crate::address::GpuPhysAddress;
use crate::arch::host_aperture;
use crate::error::UvmError;
use crate::hal::{stub, GpfifoSync, HostHal, Membar, TlbInvalidateTestParams};
use crate::push::{GpfifoEntry, Push};
use crate::tlb;

pub(crate) fn host() -> HostHal {
    HostHal {
        init: stub::init,
        nop_method: a16f::NOP,
        method_is_valid: stub::method_is_valid,
        sw_method_is_valid: stub::method_is_valid,
        is_privileged_method,
        wait_for_idle,
        membar_sys,
        membar_gpu,
        noop,
        interrupt,
        semaphore_release,
        semaphore_acquire,
        semaphore_timestamp,
        set_gpfifo_entry,
        set_gpfifo_noop: GpfifoEntry::noop,
        tlb_invalidate_all,
        tlb_invalidate_va,
        tlb_invalidate_test,
        replay_faults: stub::replay_faults,
        cancel_faults_global: stub::cancel_faults_global,
        cancel_faults_targeted: stub::cancel_faults_targeted,
        cancel_faults_va: stub::cancel_faults_va,
        clear_faulted_channel_method: stub::clear_faulted_channel_method,
        clear_faulted_channel_register: stub::clear_faulted_channel_register,
        clear_faulted_channel_sw_method: stub::clear_faulted_channel_sw_method,
        access_counter_clear_all: stub::access_counter_clear_all,
        access_counter_clear_type: stub::access_counter_clear_type,
        access_counter_clear_targeted: stub::access_counter_clear_targeted,
    }
}

fn is_privileged_method(address: u32, value: u32) -> bool {
    address == a16f::MEM_OP_B
        && a16f::MEM_OP_B_OPERATION.get32(value) == a16f::MEM_OP_B_OPERATION_MMU_TLB_INVALIDATE
}

fn wait_for_idle(push: &mut Push) {
    push.host(a16f::WFI, &[a16f::WFI_SCOPE.value32(a16f::WFI_SCOPE_ALL)]);
}

fn membar_sys(push: &mut Push) {
    push.host(
        a16f::MEM_OP_B,
        &[a16f::MEM_OP_B_OPERATION.value32(a16f::MEM_OP_B_OPERATION_SYSMEMBAR_FLUSH)],
    );
}

fn membar_gpu(push: &mut Push) {
    push.host(
        a16f::MEM_OP_B,
        &[a16f::MEM_OP_B_OPERATION.value32(a16f::MEM_OP_B_OPERATION_SOFT_FLUSH)],
    );
}

/// Pads with non-incrementing `NOP` methods; each header swallows up to `COUNT_MAX` words.
pub(crate) fn noop(push: &mut Push, bytes: u32) {
    if bytes % 4 != 0 {
        push.fail(UvmError::assertion(format!("noop of {bytes} bytes is not word sized")));
        return;
    }
    let nop = push.gpu().host.nop_method;
    let mut words = bytes / 4;
    while words > 0 {
        let payload = (words - 1).min(method::COUNT_MAX);
        push.method_non_incr(SUBCHANNEL_HOST, nop, &vec![0; payload as usize]);
        words -= payload + 1;
    }
}

fn interrupt(push: &mut Push) {
    push.host(a16f::NON_STALL_INTERRUPT, &[0]);
}

fn semaphore(push: &mut Push, va: u64, payload: u32, operation: u32) {
    push.host(
        a16f::SEMAPHOREA,
        &[
            a16f::SEMAPHOREA_OFFSET_UPPER.value32((va >> 32) as u32),
            a16f::SEMAPHOREB_OFFSET_LOWER.value32((va as u32) >> 2),
            payload,
            operation,
        ],
    );
}

fn semaphore_release(push: &mut Push, va: u64, payload: u32) {
    semaphore(
        push,
        va,
        payload,
        a16f::SEMAPHORED_OPERATION.value32(a16f::SEMAPHORED_OPERATION_RELEASE)
            | a16f::SEMAPHORED_RELEASE_SIZE.value32(a16f::SEMAPHORED_RELEASE_SIZE_4BYTE)
            | a16f::SEMAPHORED_RELEASE_WFI.value32(a16f::SEMAPHORED_RELEASE_WFI_DIS),
    );
}

fn semaphore_acquire(push: &mut Push, va: u64, payload: u32) {
    semaphore(
        push,
        va,
        payload,
        a16f::SEMAPHORED_OPERATION.value32(a16f::SEMAPHORED_OPERATION_ACQ_GEQ)
            | a16f::SEMAPHORED_ACQUIRE_SWITCH.value32(1),
    );
}

/// Four-word release: the front-end writes the payload followed by a 64-bit timestamp.
fn semaphore_timestamp(push: &mut Push, va: u64) {
    semaphore(
        push,
        va,
        0xdead_beef,
        a16f::SEMAPHORED_OPERATION.value32(a16f::SEMAPHORED_OPERATION_RELEASE)
            | a16f::SEMAPHORED_RELEASE_SIZE.value32(a16f::SEMAPHORED_RELEASE_SIZE_16BYTE)
            | a16f::SEMAPHORED_RELEASE_WFI.value32(a16f::SEMAPHORED_RELEASE_WFI_DIS),
    );
}

fn set_gpfifo_entry(va: u64, length_words: u32, sync: GpfifoSync) -> GpfifoEntry {
    GpfifoEntry::new(va, length_words, sync, true)
}

fn invalidate(push: &mut Push, pdb: GpuPhysAddress, disable_gpc: bool) {
    let target = host_aperture(push, pdb.aperture);
    push.host(
        a16f::MEM_OP_A,
        &[
            a16f::MEM_OP_A_TLB_INVALIDATE_TARGET.value32(target)
                | a16f::MEM_OP_A_TLB_INVALIDATE_ADDR.value32((pdb.address >> 12) as u32),
            a16f::MEM_OP_B_MMU_TLB_INVALIDATE_PDB.value32(a16f::MEM_OP_B_MMU_TLB_INVALIDATE_PDB_ONE)
                | a16f::MEM_OP_B_MMU_TLB_INVALIDATE_GPC.value32(if disable_gpc {
                    a16f::MEM_OP_B_MMU_TLB_INVALIDATE_GPC_DISABLE
                } else {
                    a16f::MEM_OP_B_MMU_TLB_INVALIDATE_GPC_ENABLE
                })
                | a16f::MEM_OP_B_OPERATION.value32(a16f::MEM_OP_B_OPERATION_MMU_TLB_INVALIDATE),
        ],
    );
}

/// Maxwell has no level selection: every invalidate drops all cached translations under `pdb`.
fn tlb_invalidate_all(push: &mut Push, pdb: GpuPhysAddress, _depth: u32, membar: Membar) {
    invalidate(push, pdb, false);
    tlb::membar_after_invalidate(push, membar);
}

fn tlb_invalidate_va(
    push: &mut Push,
    pdb: GpuPhysAddress,
    depth: u32,
    _base: u64,
    _size: u64,
    _page_size: u64,
    membar: Membar,
) {
    tlb_invalidate_all(push, pdb, depth, membar);
}

fn tlb_invalidate_test(push: &mut Push, pdb: GpuPhysAddress, params: &TlbInvalidateTestParams) {
    invalidate(push, pdb, params.disable_gpc_invalidate);
    tlb::membar_after_invalidate(push, params.membar);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;
    use crate::push::{ChannelConfig, MethodOpcode};
    use pretty_assertions::assert_eq;
    use uvm_hwref::class::ARCH_GM200;

    fn push() -> Push {
        Push::begin(arch::test_gpu(ARCH_GM200), &ChannelConfig::kernel("maxwell", 0x4000))
    }

    #[test]
    fn noop_covers_exactly_the_requested_bytes() {
        for bytes in [4, 8, 64, 4 * (method::COUNT_MAX + 1), 4 * (method::COUNT_MAX + 3)] {
            let mut push = push();
            noop(&mut push, bytes);
            assert_eq!(push.words().len() as u32 * 4, bytes);
            let methods = push.end().unwrap().methods().unwrap();
            assert!(methods
                .iter()
                .all(|m| m.opcode == MethodOpcode::NonInc && m.address == a16f::NOP));
        }
    }

    #[test]
    fn misaligned_noop_fails_the_push() {
        let mut push = push();
        noop(&mut push, 6);
        assert!(push.end().is_err());
    }

    #[test]
    fn tlb_invalidate_needs_a_privileged_channel() {
        let gpu = arch::test_gpu(ARCH_GM200);
        let mut user = Push::begin(gpu, &ChannelConfig::user("user", 0x4000));
        tlb_invalidate_all(&mut user, GpuPhysAddress::vid(0x1000), 0, Membar::None);
        assert!(user.end().is_err());

        let mut kernel = push();
        tlb_invalidate_all(&mut kernel, GpuPhysAddress::sys(0x2000), 0, Membar::None);
        let methods = kernel.end().unwrap().methods().unwrap();
        assert_eq!(methods.len(), 1);
        let a = methods[0].data[0];
        assert_eq!(a16f::MEM_OP_A_TLB_INVALIDATE_TARGET.get32(a), 2);
        assert_eq!(a16f::MEM_OP_A_TLB_INVALIDATE_ADDR.get32(a), 2);
    }

    #[test]
    fn semaphore_release_is_four_word_incr() {
        let mut push = push();
        semaphore_release(&mut push, 0x12_3456_7890, 7);
        let methods = push.end().unwrap().methods().unwrap();
        assert_eq!(methods[0].address, a16f::SEMAPHOREA);
        assert_eq!(&methods[0].data[..3], &[0x12, 0x3456_7890, 7]);
    }
}
