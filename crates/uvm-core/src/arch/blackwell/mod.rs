//! Blackwell: new class ids over Hopper's encodings.

use uvm_hwref::class::{
    ARCH_GB100, ARCH_GH100, BLACKWELL_CHANNEL_GPFIFO_A, BLACKWELL_DMA_COPY_A, HOPPER_CHANNEL_GPFIFO_A,
    HOPPER_DMA_COPY_A,
};

use crate::hal::{ArchHal, HalDescriptor};

use super::inherit;

pub(crate) const DESCRIPTORS: &[HalDescriptor] = &[
    HalDescriptor::host(BLACKWELL_CHANNEL_GPFIFO_A, HOPPER_CHANNEL_GPFIFO_A, inherit),
    HalDescriptor::ce(BLACKWELL_DMA_COPY_A, HOPPER_DMA_COPY_A, inherit),
    HalDescriptor::arch(ARCH_GB100, ARCH_GH100, arch),
    HalDescriptor::fault(ARCH_GB100, ARCH_GH100, inherit),
    HalDescriptor::access_counter(ARCH_GB100, ARCH_GH100, inherit),
];

fn arch(parent: ArchHal) -> ArchHal {
    ArchHal {
        name: "gb100",
        ..parent
    }
}
