//! `MAXWELL_DMA_COPY_A` copy-engine methods.
//!
//! Later copy classes keep this method layout. Hopper only widened the upper address fields,
//! so the helpers that write an address take the upper field as a parameter.

use uvm_hwref::ce;
use uvm_hwref::field::Field;

use crate::address::{Aperture, GpuAddress};
use crate::error::UvmError;
use crate::hal::{stub, CeHal};
use crate::push::{Push, PushFlags};

pub(crate) fn ce() -> CeHal {
    CeHal {
        init,
        method_is_valid: stub::method_is_valid,
        semaphore_release,
        semaphore_reduction_inc,
        semaphore_timestamp,
        flush_value,
        offset_out,
        offset_in_out,
        phys_mode,
        memset_4,
        memset_8,
        memcopy,
    }
}

fn init(push: &mut Push) {
    let class = push.gpu().info.ce_class;
    push.ce(ce::SET_OBJECT, &[class]);
}

/// Flush bits for the next `LAUNCH_DMA`.
pub(crate) fn flush_value(push: &mut Push) -> u32 {
    let none = push.get_and_reset_flag(PushFlags::NEXT_MEMBAR_NONE);
    // GPU scope still needs the sysmem flush on classes without a flush type.
    push.get_and_reset_flag(PushFlags::NEXT_MEMBAR_GPU);
    if none {
        0
    } else {
        ce::LAUNCH_DMA_FLUSH_ENABLE.value32(1)
    }
}

fn split(va: u64, upper: Field) -> (u32, u32) {
    (upper.value32((va >> 32) as u32), va as u32)
}

pub(crate) fn offset_out_with(push: &mut Push, upper: Field, dst: u64) {
    let (hi, lo) = split(dst, upper);
    push.ce(ce::OFFSET_OUT_UPPER, &[hi, lo]);
}

pub(crate) fn offset_in_out_with(push: &mut Push, upper: Field, src: u64, dst: u64) {
    let (src_hi, src_lo) = split(src, upper);
    let (dst_hi, dst_lo) = split(dst, upper);
    push.ce(ce::OFFSET_IN_UPPER, &[src_hi, src_lo, dst_hi, dst_lo]);
}

fn offset_out(push: &mut Push, dst: u64) {
    offset_out_with(push, ce::OFFSET_UPPER, dst);
}

fn offset_in_out(push: &mut Push, src: u64, dst: u64) {
    offset_in_out_with(push, ce::OFFSET_UPPER, src, dst);
}

/// Programs the semaphore address and payload, then launches with `launch` plus the pending
/// flush bits. Nothing is copied.
pub(crate) fn semaphore_with(push: &mut Push, upper: Field, va: u64, payload: u32, launch: u32) {
    let (hi, lo) = split(va, upper);
    push.ce(ce::SET_SEMAPHORE_A, &[hi, lo, payload]);
    let flush_value = push.gpu().ce.flush_value;
    let flush = flush_value(push);
    push.ce(
        ce::LAUNCH_DMA,
        &[flush
            | launch
            | ce::LAUNCH_DMA_DATA_TRANSFER_TYPE.value32(ce::LAUNCH_DMA_DATA_TRANSFER_TYPE_NONE)],
    );
}

pub(crate) fn release_one_word() -> u32 {
    ce::LAUNCH_DMA_SEMAPHORE_TYPE.value32(ce::LAUNCH_DMA_SEMAPHORE_TYPE_RELEASE_ONE_WORD_SEMAPHORE)
}

pub(crate) fn reduction_inc() -> u32 {
    release_one_word()
        | ce::LAUNCH_DMA_SEMAPHORE_REDUCTION.value32(ce::LAUNCH_DMA_SEMAPHORE_REDUCTION_INC)
        | ce::LAUNCH_DMA_SEMAPHORE_REDUCTION_ENABLE.value32(1)
}

pub(crate) fn release_four_word() -> u32 {
    ce::LAUNCH_DMA_SEMAPHORE_TYPE.value32(ce::LAUNCH_DMA_SEMAPHORE_TYPE_RELEASE_FOUR_WORD_SEMAPHORE)
}

fn semaphore_release(push: &mut Push, va: u64, payload: u32) {
    semaphore_with(push, ce::SET_SEMAPHORE_A_UPPER, va, payload, release_one_word());
}

fn semaphore_reduction_inc(push: &mut Push, va: u64, payload: u32) {
    semaphore_with(push, ce::SET_SEMAPHORE_A_UPPER, va, payload, reduction_inc());
}

fn semaphore_timestamp(push: &mut Push, va: u64) {
    semaphore_with(push, ce::SET_SEMAPHORE_A_UPPER, va, 0, release_four_word());
}

fn phys_target(push: &mut Push, aperture: Aperture) -> u32 {
    match aperture {
        Aperture::Vid | Aperture::Default => ce::PHYS_MODE_TARGET.value32(ce::PHYS_MODE_TARGET_LOCAL_FB),
        Aperture::Sys => ce::PHYS_MODE_TARGET.value32(ce::PHYS_MODE_TARGET_COHERENT_SYSMEM),
        Aperture::SysNonCoherent => {
            ce::PHYS_MODE_TARGET.value32(ce::PHYS_MODE_TARGET_NONCOHERENT_SYSMEM)
        }
        Aperture::Peer(id) if id < Aperture::MAX_PEERS => {
            ce::PHYS_MODE_TARGET.value32(ce::PHYS_MODE_TARGET_PEERMEM)
                | ce::PHYS_MODE_PEER_ID.value32(u32::from(id))
        }
        Aperture::Peer(id) => {
            push.fail(UvmError::assertion(format!("peer id {id} out of range")));
            0
        }
    }
}

/// Programs the physical-mode target of every physical side and returns the matching
/// `LAUNCH_DMA` address-type bits.
pub(crate) fn phys_mode(push: &mut Push, dst: GpuAddress, src: GpuAddress) -> u32 {
    let mut launch = 0;
    if !src.is_virtual {
        let target = phys_target(push, src.aperture);
        push.ce(ce::SET_SRC_PHYS_MODE, &[target]);
        launch |= ce::LAUNCH_DMA_SRC_TYPE.value32(ce::LAUNCH_DMA_TYPE_PHYSICAL);
    }
    if !dst.is_virtual {
        let target = phys_target(push, dst.aperture);
        push.ce(ce::SET_DST_PHYS_MODE, &[target]);
        launch |= ce::LAUNCH_DMA_DST_TYPE.value32(ce::LAUNCH_DMA_TYPE_PHYSICAL);
    }
    launch
}

/// `DATA_TRANSFER_TYPE` of the next copy, consuming `CE_NEXT_PIPELINED`.
pub(crate) fn transfer_type(push: &mut Push) -> u32 {
    let pipelined = push.get_and_reset_flag(PushFlags::CE_NEXT_PIPELINED);
    ce::LAUNCH_DMA_DATA_TRANSFER_TYPE.value32(if pipelined {
        ce::LAUNCH_DMA_DATA_TRANSFER_TYPE_PIPELINED
    } else {
        ce::LAUNCH_DMA_DATA_TRANSFER_TYPE_NON_PIPELINED
    })
}

const PITCH: u32 = ce::LAUNCH_DMA_SRC_MEMORY_LAYOUT.value32(ce::LAUNCH_DMA_MEMORY_LAYOUT_PITCH)
    | ce::LAUNCH_DMA_DST_MEMORY_LAYOUT.value32(ce::LAUNCH_DMA_MEMORY_LAYOUT_PITCH);

/// Largest single `LINE_LENGTH_IN`.
const MAX_LINE: u64 = u32::MAX as u64;

/// Splits `bytes` into launches of at most [`MAX_LINE`] elements of `element` bytes each,
/// calling `launch(offset, elements)` for every chunk. The pending flush only goes on the last.
fn chunked(
    push: &mut Push,
    bytes: u64,
    element: u64,
    mut launch: impl FnMut(&mut Push, u64, u32, bool),
) {
    let mut done = 0;
    while done < bytes {
        let elements = ((bytes - done) / element).min(MAX_LINE);
        let last = done + elements * element == bytes;
        launch(push, done, elements as u32, last);
        done += elements * element;
    }
}

fn memcopy(push: &mut Push, dst: GpuAddress, src: GpuAddress, bytes: u64) {
    let gpu = std::sync::Arc::clone(push.gpu());
    let launch_base = (gpu.ce.phys_mode)(push, dst, src) | transfer_type(push) | PITCH;
    let flush = (gpu.ce.flush_value)(push);
    chunked(push, bytes, 1, |push, offset, len, last| {
        (gpu.ce.offset_in_out)(push, src.address + offset, dst.address + offset);
        push.ce(ce::LINE_LENGTH_IN, &[len]);
        let flush = if last { flush } else { 0 };
        push.ce(ce::LAUNCH_DMA, &[launch_base | flush]);
    });
}

fn memset(push: &mut Push, dst: GpuAddress, bytes: u64, element: u64, remap: u32) {
    if bytes % element != 0 || dst.address % element != 0 {
        push.fail(UvmError::assertion(format!(
            "memset of {bytes:#x} bytes at {:#x} is not {element}-byte aligned",
            dst.address
        )));
        return;
    }
    let gpu = std::sync::Arc::clone(push.gpu());
    let launch_base = (gpu.ce.phys_mode)(push, dst, GpuAddress::virt(0))
        | transfer_type(push)
        | PITCH
        | ce::LAUNCH_DMA_REMAP_ENABLE.value32(1);
    let flush = (gpu.ce.flush_value)(push);
    push.ce(ce::SET_REMAP_COMPONENTS, &[remap]);
    chunked(push, bytes, element, |push, offset, len, last| {
        (gpu.ce.offset_out)(push, dst.address + offset);
        push.ce(ce::LINE_LENGTH_IN, &[len]);
        let flush = if last { flush } else { 0 };
        push.ce(ce::LAUNCH_DMA, &[launch_base | flush]);
    });
}

fn memset_4(push: &mut Push, dst: GpuAddress, value: u32, bytes: u64) {
    push.ce(ce::SET_REMAP_CONST_B, &[value]);
    memset(
        push,
        dst,
        bytes,
        4,
        ce::REMAP_DST_X.value32(ce::REMAP_CONST_B)
            | ce::REMAP_COMPONENT_SIZE.value32(ce::REMAP_COMPONENT_SIZE_FOUR)
            | ce::REMAP_NUM_DST_COMPONENTS.value32(ce::REMAP_NUM_DST_COMPONENTS_ONE),
    );
}

fn memset_8(push: &mut Push, dst: GpuAddress, value: u64, bytes: u64) {
    push.ce(ce::SET_REMAP_CONST_A, &[value as u32, (value >> 32) as u32]);
    memset(
        push,
        dst,
        bytes,
        8,
        ce::REMAP_DST_X.value32(ce::REMAP_CONST_A)
            | ce::REMAP_DST_Y.value32(ce::REMAP_CONST_B)
            | ce::REMAP_COMPONENT_SIZE.value32(ce::REMAP_COMPONENT_SIZE_FOUR)
            | ce::REMAP_NUM_DST_COMPONENTS.value32(ce::REMAP_NUM_DST_COMPONENTS_TWO),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::GpuPhysAddress;
    use crate::arch;
    use crate::push::{ChannelConfig, Method};
    use pretty_assertions::assert_eq;
    use uvm_hwref::class::{ARCH_GM200, SUBCHANNEL_CE};

    fn push() -> Push {
        Push::begin(arch::test_gpu(ARCH_GM200), &ChannelConfig::kernel("ce", 0x8000))
    }

    fn ce_writes(push: Push) -> Vec<(u32, u32)> {
        push.end()
            .unwrap()
            .methods()
            .unwrap()
            .iter()
            .filter(|m| m.subchannel == SUBCHANNEL_CE)
            .flat_map(|m: &Method| m.writes().collect::<Vec<_>>())
            .collect()
    }

    fn launches(writes: &[(u32, u32)]) -> Vec<u32> {
        writes
            .iter()
            .filter(|(a, _)| *a == ce::LAUNCH_DMA)
            .map(|(_, v)| *v)
            .collect()
    }

    #[test]
    fn virtual_copy_launches_once_with_flush() {
        let mut push = push();
        memcopy(&mut push, GpuAddress::virt(0x2000), GpuAddress::virt(0x1_0000_1000), 0x800);
        let writes = ce_writes(push);
        assert_eq!(
            &writes[..4],
            &[
                (ce::OFFSET_IN_UPPER, 1),
                (ce::OFFSET_IN_LOWER, 0x1000),
                (ce::OFFSET_OUT_UPPER, 0),
                (ce::OFFSET_OUT_LOWER, 0x2000),
            ]
        );
        let launch = launches(&writes);
        assert_eq!(launch.len(), 1);
        assert_eq!(ce::LAUNCH_DMA_FLUSH_ENABLE.get32(launch[0]), 1);
        assert_eq!(ce::LAUNCH_DMA_SRC_TYPE.get32(launch[0]), ce::LAUNCH_DMA_TYPE_VIRTUAL);
        assert_eq!(
            ce::LAUNCH_DMA_DATA_TRANSFER_TYPE.get32(launch[0]),
            ce::LAUNCH_DMA_DATA_TRANSFER_TYPE_NON_PIPELINED
        );
    }

    #[test]
    fn pipelined_unflushed_copy_consumes_the_flags() {
        let mut push = push();
        push.set_flag(PushFlags::CE_NEXT_PIPELINED | PushFlags::NEXT_MEMBAR_NONE);
        memcopy(&mut push, GpuAddress::virt(0), GpuAddress::virt(0x1000), 0x1000);
        assert!(!push.get_flag(PushFlags::CE_NEXT_PIPELINED));
        memcopy(&mut push, GpuAddress::virt(0), GpuAddress::virt(0x1000), 0x1000);

        let launch = launches(&ce_writes(push));
        assert_eq!(ce::LAUNCH_DMA_FLUSH_ENABLE.get32(launch[0]), 0);
        assert_eq!(
            ce::LAUNCH_DMA_DATA_TRANSFER_TYPE.get32(launch[0]),
            ce::LAUNCH_DMA_DATA_TRANSFER_TYPE_PIPELINED
        );
        assert_eq!(ce::LAUNCH_DMA_FLUSH_ENABLE.get32(launch[1]), 1);
    }

    #[test]
    fn physical_sides_program_their_targets() {
        let mut push = push();
        memcopy(
            &mut push,
            GpuPhysAddress::sys(0x4000).into(),
            GpuAddress::phys(GpuPhysAddress::new(Aperture::Peer(2), 0x8000)),
            0x1000,
        );
        let writes = ce_writes(push);
        let src = writes.iter().find(|(a, _)| *a == ce::SET_SRC_PHYS_MODE).unwrap().1;
        assert_eq!(ce::PHYS_MODE_TARGET.get32(src), ce::PHYS_MODE_TARGET_PEERMEM);
        assert_eq!(ce::PHYS_MODE_PEER_ID.get32(src), 2);
        let dst = writes.iter().find(|(a, _)| *a == ce::SET_DST_PHYS_MODE).unwrap().1;
        assert_eq!(ce::PHYS_MODE_TARGET.get32(dst), ce::PHYS_MODE_TARGET_COHERENT_SYSMEM);
        let launch = launches(&writes)[0];
        assert_eq!(ce::LAUNCH_DMA_SRC_TYPE.get32(launch), ce::LAUNCH_DMA_TYPE_PHYSICAL);
        assert_eq!(ce::LAUNCH_DMA_DST_TYPE.get32(launch), ce::LAUNCH_DMA_TYPE_PHYSICAL);
    }

    #[test]
    fn memset_8_writes_both_halves_per_element() {
        let mut push = push();
        memset_8(&mut push, GpuPhysAddress::vid(0x10_0000).into(), 0x1122_3344_5566_7788, 0x1000);
        let writes = ce_writes(push);
        assert!(writes.contains(&(ce::SET_REMAP_CONST_A, 0x5566_7788)));
        assert!(writes.contains(&(ce::SET_REMAP_CONST_B, 0x1122_3344)));
        assert!(writes.contains(&(ce::LINE_LENGTH_IN, 0x200)));
        let launch = launches(&writes)[0];
        assert_eq!(ce::LAUNCH_DMA_REMAP_ENABLE.get32(launch), 1);
        assert_eq!(ce::LAUNCH_DMA_DST_TYPE.get32(launch), ce::LAUNCH_DMA_TYPE_PHYSICAL);
        assert_eq!(ce::LAUNCH_DMA_SRC_TYPE.get32(launch), ce::LAUNCH_DMA_TYPE_VIRTUAL);
    }

    #[test]
    fn misaligned_memset_fails_the_push() {
        let mut push = push();
        memset_4(&mut push, GpuAddress::virt(0x1002), 0, 0x100);
        assert!(push.end().is_err());
    }

    #[test]
    fn semaphore_release_launches_without_a_copy() {
        let mut push = push();
        semaphore_reduction_inc(&mut push, 0x3_0000_0040, 5);
        let writes = ce_writes(push);
        assert_eq!(
            &writes[..3],
            &[(ce::SET_SEMAPHORE_A, 3), (ce::SET_SEMAPHORE_B, 0x40), (ce::SET_SEMAPHORE_PAYLOAD, 5)]
        );
        let launch = launches(&writes)[0];
        assert_eq!(
            ce::LAUNCH_DMA_DATA_TRANSFER_TYPE.get32(launch),
            ce::LAUNCH_DMA_DATA_TRANSFER_TYPE_NONE
        );
        assert_eq!(ce::LAUNCH_DMA_SEMAPHORE_REDUCTION_ENABLE.get32(launch), 1);
    }
}
