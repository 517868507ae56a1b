//! `PASCAL_CHANNEL_GPFIFO_A`: memory operations move to the four-word `MEM_OP_A..D` form, which
//! every later host class keeps.

use uvm_hwref::host::c06f;

use crate::address::GpuPhysAddress;
use crate::arch::host_aperture;
use crate::hal::{HostHal, Membar, ReplayType, TlbInvalidateTestParams, TlbTargetVa};
use crate::push::Push;
use crate::tlb;

pub(crate) fn host(parent: HostHal) -> HostHal {
    HostHal {
        nop_method: c06f::NOP,
        is_privileged_method,
        membar_sys,
        membar_gpu,
        tlb_invalidate_all,
        tlb_invalidate_va,
        tlb_invalidate_test,
        replay_faults,
        cancel_faults_global,
        cancel_faults_targeted,
        ..parent
    }
}

pub(crate) fn is_privileged_method(address: u32, value: u32) -> bool {
    if address != c06f::MEM_OP_D {
        return false;
    }
    matches!(
        c06f::MEM_OP_D_OPERATION.get32(value),
        c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE
            | c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE_TARGETED
            | c06f::MEM_OP_D_OPERATION_ACCESS_COUNTER_CLR
    )
}

/// One `MEM_OP_A..D` burst.
pub(crate) fn mem_op(push: &mut Push, a: u32, b: u32, c: u32, d: u32) {
    push.host(c06f::MEM_OP_A, &[a, b, c, d]);
}

fn membar(push: &mut Push, membar_type: u32) {
    mem_op(
        push,
        0,
        0,
        c06f::MEM_OP_C_MEMBAR_TYPE.value32(membar_type),
        c06f::MEM_OP_D_OPERATION.value32(c06f::MEM_OP_D_OPERATION_MEMBAR),
    );
}

fn membar_sys(push: &mut Push) {
    membar(push, c06f::MEM_OP_C_MEMBAR_TYPE_SYS_MEMBAR);
}

fn membar_gpu(push: &mut Push) {
    membar(push, c06f::MEM_OP_C_MEMBAR_TYPE_MEMBAR);
}

/// `MEM_OP_C` and `MEM_OP_D` bits selecting one page directory base.
pub(crate) fn pdb_bits(push: &mut Push, pdb: GpuPhysAddress) -> (u32, u32) {
    let aperture = host_aperture(push, pdb.aperture);
    let c = c06f::MEM_OP_C_TLB_INVALIDATE_PDB.value32(c06f::MEM_OP_C_TLB_INVALIDATE_PDB_ONE)
        | c06f::MEM_OP_C_TLB_INVALIDATE_PDB_APERTURE.value32(aperture)
        | c06f::MEM_OP_C_TLB_INVALIDATE_PDB_ADDR_LO.value32((pdb.address >> 12) as u32);
    let d = c06f::MEM_OP_D_TLB_INVALIDATE_PDB_ADDR_HI.value32((pdb.address >> 32) as u32);
    (c, d)
}

/// `MEM_OP_A` sysmembar bit: set only when the architecture folds a system membar into the
/// invalidate and one was asked for.
pub(crate) fn sysmembar_bit(push: &Push, membar: Membar) -> u32 {
    let fold = push.gpu().caps().tlb_fold_sysmembar && membar == Membar::Sys;
    c06f::MEM_OP_A_TLB_INVALIDATE_SYSMEMBAR.value32(if fold {
        c06f::MEM_OP_A_TLB_INVALIDATE_SYSMEMBAR_EN
    } else {
        c06f::MEM_OP_A_TLB_INVALIDATE_SYSMEMBAR_DIS
    })
}

/// Any membar needs every uTLB to acknowledge the invalidate first.
pub(crate) fn ack_bits(membar: Membar) -> u32 {
    c06f::MEM_OP_C_TLB_INVALIDATE_ACK_TYPE.value32(if membar == Membar::None {
        c06f::MEM_OP_C_TLB_INVALIDATE_ACK_TYPE_NONE
    } else {
        c06f::MEM_OP_C_TLB_INVALIDATE_ACK_TYPE_GLOBALLY
    })
}

fn level_bits(push: &Push, depth: u32) -> u32 {
    let level = tlb::page_table_level(push.gpu().caps(), depth);
    c06f::MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL.value32(level)
}

pub(crate) fn tlb_invalidate_all(push: &mut Push, pdb: GpuPhysAddress, depth: u32, membar: Membar) {
    let (c, d) = pdb_bits(push, pdb);
    let a = sysmembar_bit(push, membar);
    let c = c
        | level_bits(push, depth)
        | ack_bits(membar)
        | c06f::MEM_OP_C_TLB_INVALIDATE_GPC.value32(c06f::MEM_OP_C_TLB_INVALIDATE_GPC_ENABLE);
    let d = d | c06f::MEM_OP_D_OPERATION.value32(c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE);
    mem_op(push, a, 0, c, d);
    tlb::membar_after_invalidate(push, membar);
}

/// Targeted invalidate of the translation for `va`. `size_bits` is the
/// `INVALIDATION_SIZE` field, 0 everywhere before Volta.
pub(crate) fn invalidate_targeted(
    push: &mut Push,
    pdb: GpuPhysAddress,
    depth: u32,
    va: u64,
    size_bits: u32,
    membar: Membar,
) {
    let (c, d) = pdb_bits(push, pdb);
    let a = sysmembar_bit(push, membar)
        | size_bits
        | c06f::MEM_OP_A_TLB_INVALIDATE_TARGET_ADDR_LO.value32((va >> 12) as u32);
    let b = c06f::MEM_OP_B_TLB_INVALIDATE_TARGET_ADDR_HI.value32((va >> 32) as u32);
    let c = c
        | level_bits(push, depth)
        | ack_bits(membar)
        | c06f::MEM_OP_C_TLB_INVALIDATE_GPC.value32(c06f::MEM_OP_C_TLB_INVALIDATE_GPC_ENABLE);
    let d = d
        | c06f::MEM_OP_D_OPERATION.value32(c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE_TARGETED);
    mem_op(push, a, b, c, d);
}

/// Pascal can only target one page per invalidate. Ranges covering more pages than a batch
/// allows, or wrapping past the top of the VA space, invalidate everything instead.
fn tlb_invalidate_va(
    push: &mut Push,
    pdb: GpuPhysAddress,
    depth: u32,
    base: u64,
    size: u64,
    page_size: u64,
    membar: Membar,
) {
    if size == 0 {
        return;
    }
    let pages = size.div_ceil(page_size.max(1));
    let last_page = (pages - 1).checked_mul(page_size).and_then(|span| base.checked_add(span));
    if pages > push.gpu().caps().tlb_batch_max_pages || last_page.is_none() {
        tlb_invalidate_all(push, pdb, depth, membar);
        return;
    }
    for i in 0..pages {
        let this_membar = if i + 1 == pages { membar } else { Membar::None };
        invalidate_targeted(push, pdb, depth, base + i * page_size, 0, this_membar);
    }
    tlb::membar_after_invalidate(push, membar);
}

pub(crate) fn tlb_invalidate_test(
    push: &mut Push,
    pdb: GpuPhysAddress,
    params: &TlbInvalidateTestParams,
) {
    let (c, d) = pdb_bits(push, pdb);
    let gpc = if params.disable_gpc_invalidate {
        c06f::MEM_OP_C_TLB_INVALIDATE_GPC_DISABLE
    } else {
        c06f::MEM_OP_C_TLB_INVALIDATE_GPC_ENABLE
    };
    let c = c
        | c06f::MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL.value32(params.page_table_level)
        | ack_bits(params.membar)
        | c06f::MEM_OP_C_TLB_INVALIDATE_GPC.value32(gpc);
    let mut a = sysmembar_bit(push, params.membar);
    let (b, operation) = match params.target {
        TlbTargetVa::All => (0, c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE),
        TlbTargetVa::Targeted(va) => {
            a |= c06f::MEM_OP_A_TLB_INVALIDATE_TARGET_ADDR_LO.value32((va >> 12) as u32);
            (
                c06f::MEM_OP_B_TLB_INVALIDATE_TARGET_ADDR_HI.value32((va >> 32) as u32),
                c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE_TARGETED,
            )
        }
    };
    mem_op(push, a, b, c, d | c06f::MEM_OP_D_OPERATION.value32(operation));
    tlb::membar_after_invalidate(push, params.membar);
}

fn replay_faults(push: &mut Push, replay_type: ReplayType) {
    let replay = match replay_type {
        ReplayType::Start => c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY_START,
        ReplayType::StartAckAll => c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY_START_ACK_ALL,
    };
    mem_op(
        push,
        0,
        0,
        c06f::MEM_OP_C_TLB_INVALIDATE_PDB.value32(c06f::MEM_OP_C_TLB_INVALIDATE_PDB_ALL)
            | c06f::MEM_OP_C_TLB_INVALIDATE_GPC.value32(c06f::MEM_OP_C_TLB_INVALIDATE_GPC_ENABLE)
            | c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY.value32(replay),
        c06f::MEM_OP_D_OPERATION.value32(c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE),
    );
}

fn cancel(push: &mut Push, instance_ptr: GpuPhysAddress, a: u32, replay: u32) {
    let (c, d) = pdb_bits(push, instance_ptr);
    mem_op(
        push,
        a,
        0,
        c | c06f::MEM_OP_C_TLB_INVALIDATE_GPC.value32(c06f::MEM_OP_C_TLB_INVALIDATE_GPC_ENABLE)
            | c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY.value32(replay),
        d | c06f::MEM_OP_D_OPERATION.value32(c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE),
    );
}

/// Cancels every pending fault raised through `instance_ptr`.
fn cancel_faults_global(push: &mut Push, instance_ptr: GpuPhysAddress) {
    cancel(push, instance_ptr, 0, c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY_CANCEL_GLOBAL);
}

/// Cancels the pending faults of one client in one GPC.
fn cancel_faults_targeted(push: &mut Push, instance_ptr: GpuPhysAddress, gpc_id: u32, client_id: u32) {
    let a = c06f::MEM_OP_A_TLB_INVALIDATE_CANCEL_TARGET_CLIENT_UNIT_ID.value32(client_id)
        | c06f::MEM_OP_A_TLB_INVALIDATE_CANCEL_TARGET_GPC_ID.value32(gpc_id);
    cancel(push, instance_ptr, a, c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY_CANCEL_TARGETED);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;
    use crate::push::ChannelConfig;
    use pretty_assertions::assert_eq;
    use uvm_hwref::class::ARCH_GP100;
    use uvm_hwref::mmu::PAGE_SIZE_4K;

    const PDB: GpuPhysAddress = GpuPhysAddress::vid(0x1_2340_0000);

    fn push() -> Push {
        Push::begin(arch::test_gpu(ARCH_GP100), &ChannelConfig::kernel("pascal", 0x4000))
    }

    fn bursts(push: Push) -> Vec<[u32; 4]> {
        push.end()
            .unwrap()
            .methods()
            .unwrap()
            .iter()
            .map(|m| {
                assert_eq!(m.address, c06f::MEM_OP_A);
                [m.data[0], m.data[1], m.data[2], m.data[3]]
            })
            .collect()
    }

    #[test]
    fn pdb_spans_both_words() {
        let mut push = push();
        tlb_invalidate_all(&mut push, PDB, 0, Membar::None);
        let [_, _, c, d] = bursts(push)[0];
        assert_eq!(c06f::MEM_OP_C_TLB_INVALIDATE_PDB_ADDR_LO.get32(c), 0x23400);
        assert_eq!(c06f::MEM_OP_D_TLB_INVALIDATE_PDB_ADDR_HI.get32(d), 1);
        assert_eq!(c06f::MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL.get32(c), 0);
    }

    #[test]
    fn range_is_one_targeted_invalidate_per_page() {
        let mut push = push();
        tlb_invalidate_va(&mut push, PDB, 4, 0x7000_0000, 3 * PAGE_SIZE_4K, PAGE_SIZE_4K, Membar::Gpu);
        let bursts = bursts(push);
        assert_eq!(bursts.len(), 4);
        let targets: Vec<u32> = bursts[..3]
            .iter()
            .map(|[a, ..]| c06f::MEM_OP_A_TLB_INVALIDATE_TARGET_ADDR_LO.get32(*a))
            .collect();
        assert_eq!(targets, vec![0x70000, 0x70001, 0x70002]);
        let acks: Vec<u32> = bursts[..3]
            .iter()
            .map(|[_, _, c, _]| c06f::MEM_OP_C_TLB_INVALIDATE_ACK_TYPE.get32(*c))
            .collect();
        assert_eq!(acks, vec![0, 0, c06f::MEM_OP_C_TLB_INVALIDATE_ACK_TYPE_GLOBALLY]);
        assert_eq!(
            c06f::MEM_OP_D_OPERATION.get32(bursts[3][3]),
            c06f::MEM_OP_D_OPERATION_MEMBAR
        );
    }

    #[test]
    fn range_ending_at_the_top_of_the_va_space_is_targeted() {
        let mut push = push();
        let base = 0u64.wrapping_sub(2 * PAGE_SIZE_4K);
        tlb_invalidate_va(&mut push, PDB, 4, base, 2 * PAGE_SIZE_4K, PAGE_SIZE_4K, Membar::None);
        let targets: Vec<u32> = bursts(push)
            .iter()
            .map(|[a, ..]| c06f::MEM_OP_A_TLB_INVALIDATE_TARGET_ADDR_LO.get32(*a))
            .collect();
        assert_eq!(targets, vec![0xf_fffe, 0xf_ffff]);
    }

    #[test]
    fn range_wrapping_past_the_top_invalidates_everything() {
        let mut push = push();
        let base = 0u64.wrapping_sub(PAGE_SIZE_4K);
        tlb_invalidate_va(&mut push, PDB, 4, base, 2 * PAGE_SIZE_4K, PAGE_SIZE_4K, Membar::Gpu);
        let bursts = bursts(push);
        assert_eq!(
            c06f::MEM_OP_D_OPERATION.get32(bursts[0][3]),
            c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE
        );
        assert!(bursts.iter().all(|[.., d]| {
            c06f::MEM_OP_D_OPERATION.get32(*d) != c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE_TARGETED
        }));
    }

    #[test]
    fn large_range_invalidates_everything() {
        let mut push = push();
        tlb_invalidate_va(&mut push, PDB, 4, 0, 64 * PAGE_SIZE_4K, PAGE_SIZE_4K, Membar::None);
        let bursts = bursts(push);
        assert_eq!(bursts.len(), 1);
        assert_eq!(
            c06f::MEM_OP_D_OPERATION.get32(bursts[0][3]),
            c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE
        );
    }

    #[test]
    fn replay_and_cancel_encodings() {
        let mut push = push();
        replay_faults(&mut push, ReplayType::StartAckAll);
        cancel_faults_targeted(&mut push, GpuPhysAddress::sys(0x5000), 3, 0x11);
        let bursts = bursts(push);

        let [_, _, c, _] = bursts[0];
        assert_eq!(c06f::MEM_OP_C_TLB_INVALIDATE_PDB.get32(c), c06f::MEM_OP_C_TLB_INVALIDATE_PDB_ALL);
        assert_eq!(
            c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY.get32(c),
            c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY_START_ACK_ALL
        );

        let [a, _, c, _] = bursts[1];
        assert_eq!(c06f::MEM_OP_A_TLB_INVALIDATE_CANCEL_TARGET_GPC_ID.get32(a), 3);
        assert_eq!(c06f::MEM_OP_A_TLB_INVALIDATE_CANCEL_TARGET_CLIENT_UNIT_ID.get32(a), 0x11);
        assert_eq!(c06f::MEM_OP_C_TLB_INVALIDATE_PDB_APERTURE.get32(c), 2);
        assert_eq!(c06f::MEM_OP_C_TLB_INVALIDATE_PDB_ADDR_LO.get32(c), 5);
    }

    #[test]
    fn only_invalidates_and_counter_clears_are_privileged() {
        let op = |operation| c06f::MEM_OP_D_OPERATION.value32(operation);
        assert!(is_privileged_method(c06f::MEM_OP_D, op(c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE)));
        assert!(is_privileged_method(c06f::MEM_OP_D, op(c06f::MEM_OP_D_OPERATION_ACCESS_COUNTER_CLR)));
        assert!(!is_privileged_method(c06f::MEM_OP_D, op(c06f::MEM_OP_D_OPERATION_MEMBAR)));
        assert!(!is_privileged_method(c06f::MEM_OP_C, op(c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE)));
    }

    #[test]
    fn user_channel_cannot_replay() {
        let mut push = Push::begin(arch::test_gpu(ARCH_GP100), &ChannelConfig::user("user", 0x4000));
        replay_faults(&mut push, ReplayType::Start);
        assert!(push.end().is_err());

        let mut push = Push::begin(arch::test_gpu(ARCH_GP100), &ChannelConfig::user("user", 0x4000));
        membar_sys(&mut push);
        assert!(push.end().is_ok());
    }
}
