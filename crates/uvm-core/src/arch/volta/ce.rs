//! `VOLTA_DMA_COPY_A`: GPU-scope flushes and physical-mode restrictions for user channels.

use uvm_hwref::ce;

use crate::hal::{CeHal, MethodContext};
use crate::push::{Push, PushFlags};

pub(crate) fn ce(parent: CeHal) -> CeHal {
    CeHal {
        method_is_valid,
        flush_value,
        ..parent
    }
}

/// A GPU-scope membar only flushes to L2.
pub(crate) fn flush_value(push: &mut Push) -> u32 {
    let none = push.get_and_reset_flag(PushFlags::NEXT_MEMBAR_NONE);
    let gpu = push.get_and_reset_flag(PushFlags::NEXT_MEMBAR_GPU);
    if none {
        return 0;
    }
    let flush_type = if gpu {
        ce::LAUNCH_DMA_FLUSH_TYPE_GL
    } else {
        ce::LAUNCH_DMA_FLUSH_TYPE_SYS
    };
    ce::LAUNCH_DMA_FLUSH_ENABLE.value32(1) | ce::LAUNCH_DMA_FLUSH_TYPE.value32(flush_type)
}

/// User channels may only copy between virtual addresses.
pub(crate) fn method_is_valid(ctx: &MethodContext, address: u32, value: u32) -> bool {
    if ctx.privileged {
        return true;
    }
    match address {
        ce::SET_SRC_PHYS_MODE | ce::SET_DST_PHYS_MODE => false,
        ce::LAUNCH_DMA => {
            ce::LAUNCH_DMA_SRC_TYPE.get32(value) == ce::LAUNCH_DMA_TYPE_VIRTUAL
                && ce::LAUNCH_DMA_DST_TYPE.get32(value) == ce::LAUNCH_DMA_TYPE_VIRTUAL
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{GpuAddress, GpuPhysAddress};
    use crate::arch;
    use crate::push::ChannelConfig;
    use pretty_assertions::assert_eq;
    use uvm_hwref::class::ARCH_GV100;

    fn launch(push: Push) -> u32 {
        let methods = push.end().unwrap().methods().unwrap();
        methods
            .iter()
            .rev()
            .find(|m| m.address == ce::LAUNCH_DMA)
            .map(|m| m.data[0])
            .unwrap()
    }

    #[test]
    fn gpu_membar_flushes_to_l2_only() {
        let gpu = arch::test_gpu(ARCH_GV100);
        let channel = ChannelConfig::kernel("ce", 0x4000);

        let mut push = Push::begin(gpu.clone(), &channel);
        push.set_flag(PushFlags::NEXT_MEMBAR_GPU);
        (gpu.ce.memcopy)(&mut push, GpuAddress::virt(0x1000), GpuAddress::virt(0x2000), 0x1000);
        let value = launch(push);
        assert_eq!(ce::LAUNCH_DMA_FLUSH_ENABLE.get32(value), 1);
        assert_eq!(ce::LAUNCH_DMA_FLUSH_TYPE.get32(value), ce::LAUNCH_DMA_FLUSH_TYPE_GL);

        let mut push = Push::begin(gpu.clone(), &channel);
        (gpu.ce.semaphore_release)(&mut push, 0x10_0000, 1);
        let value = launch(push);
        assert_eq!(ce::LAUNCH_DMA_FLUSH_TYPE.get32(value), ce::LAUNCH_DMA_FLUSH_TYPE_SYS);

        let mut push = Push::begin(gpu.clone(), &channel);
        push.set_flag(PushFlags::NEXT_MEMBAR_NONE);
        push.set_flag(PushFlags::NEXT_MEMBAR_GPU);
        (gpu.ce.semaphore_release)(&mut push, 0x10_0000, 1);
        assert_eq!(ce::LAUNCH_DMA_FLUSH_ENABLE.get32(launch(push)), 0);
    }

    #[test]
    fn user_channels_cannot_copy_physical_memory() {
        let gpu = arch::test_gpu(ARCH_GV100);
        let user = ChannelConfig::user("user", 0x4000);

        let mut push = Push::begin(gpu.clone(), &user);
        (gpu.ce.memcopy)(&mut push, GpuAddress::virt(0x1000), GpuAddress::virt(0x2000), 0x1000);
        assert!(push.end().is_ok());

        let mut push = Push::begin(gpu.clone(), &user);
        let src = GpuAddress::from(GpuPhysAddress::sys(0x8000));
        (gpu.ce.memcopy)(&mut push, GpuAddress::virt(0x1000), src, 0x1000);
        assert!(push.end().is_err());

        let mut push = Push::begin(gpu.clone(), &ChannelConfig::kernel("kernel", 0x4000));
        (gpu.ce.memcopy)(&mut push, GpuAddress::virt(0x1000), src, 0x1000);
        assert!(push.end().is_ok());
    }
}
