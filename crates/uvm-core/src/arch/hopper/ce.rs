//! `HOPPER_DMA_COPY_A`: the upper halves of every address grew to 25 bits.

use uvm_hwref::ce;

use crate::arch::maxwell::ce as base;
use crate::hal::CeHal;
use crate::push::Push;

pub(crate) fn ce(parent: CeHal) -> CeHal {
    CeHal {
        semaphore_release,
        semaphore_reduction_inc,
        semaphore_timestamp,
        offset_out,
        offset_in_out,
        ..parent
    }
}

fn offset_out(push: &mut Push, dst: u64) {
    base::offset_out_with(push, ce::OFFSET_UPPER_HOPPER, dst);
}

fn offset_in_out(push: &mut Push, src: u64, dst: u64) {
    base::offset_in_out_with(push, ce::OFFSET_UPPER_HOPPER, src, dst);
}

fn semaphore_release(push: &mut Push, va: u64, payload: u32) {
    base::semaphore_with(push, ce::SET_SEMAPHORE_A_UPPER_HOPPER, va, payload, base::release_one_word());
}

fn semaphore_reduction_inc(push: &mut Push, va: u64, payload: u32) {
    base::semaphore_with(push, ce::SET_SEMAPHORE_A_UPPER_HOPPER, va, payload, base::reduction_inc());
}

fn semaphore_timestamp(push: &mut Push, va: u64) {
    base::semaphore_with(push, ce::SET_SEMAPHORE_A_UPPER_HOPPER, va, 0, base::release_four_word());
}

#[cfg(test)]
mod tests {
    use crate::address::GpuAddress;
    use crate::arch;
    use crate::push::ChannelConfig;
    use crate::push::Push;
    use pretty_assertions::assert_eq;
    use uvm_hwref::ce;
    use uvm_hwref::class::{ARCH_GA100, ARCH_GH100};

    fn first_writes(arch_id: u32, build: impl Fn(&mut Push)) -> Vec<(u32, u32)> {
        let gpu = arch::test_gpu(arch_id);
        let mut push = Push::begin(gpu, &ChannelConfig::kernel("ce", 0x8000));
        build(&mut push);
        push.end()
            .unwrap()
            .methods()
            .unwrap()
            .iter()
            .flat_map(|m| m.writes().collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn high_virtual_addresses_keep_their_upper_bits() {
        // Bit 52 only fits the widened field.
        let va = 0x10_0000_0000_1000;
        let writes = first_writes(ARCH_GH100, |push| {
            let memcopy = push.gpu().ce.memcopy;
            memcopy(push, GpuAddress::virt(va), GpuAddress::virt(va + 0x1000), 0x1000);
        });
        assert!(writes.contains(&(ce::OFFSET_IN_UPPER, 0x10_0000)));
        assert!(writes.contains(&(ce::OFFSET_OUT_UPPER, 0x10_0000)));

        let writes = first_writes(ARCH_GA100, |push| {
            let memcopy = push.gpu().ce.memcopy;
            memcopy(push, GpuAddress::virt(va), GpuAddress::virt(va + 0x1000), 0x1000);
        });
        assert!(writes.contains(&(ce::OFFSET_IN_UPPER, 0)));
    }

    #[test]
    fn semaphores_use_the_wide_upper_field() {
        let writes = first_writes(ARCH_GH100, |push| {
            let release = push.gpu().ce.semaphore_release;
            release(push, 0x1_2345_0000_0040, 9);
        });
        assert_eq!(
            &writes[..3],
            &[(ce::SET_SEMAPHORE_A, 0x1_2345), (ce::SET_SEMAPHORE_B, 0x40), (ce::SET_SEMAPHORE_PAYLOAD, 9)]
        );
    }
}
