//! Turing: faulted channels are named by instance block instead of channel id.

use uvm_hwref::class::{
    ARCH_GV100, ARCH_TU100, TURING_CHANNEL_GPFIFO_A, TURING_DMA_COPY_A, VOLTA_CHANNEL_GPFIFO_A,
    VOLTA_DMA_COPY_A,
};
use uvm_hwref::host::c06f;

use crate::arch::host_aperture;
use crate::arch::volta::host::faulted_is_pbdma;
use crate::channel::UserChannel;
use crate::fault::FaultBufferEntry;
use crate::hal::{ArchHal, HalDescriptor, HostHal};
use crate::push::Push;

use super::inherit;

pub(crate) const DESCRIPTORS: &[HalDescriptor] = &[
    HalDescriptor::host(TURING_CHANNEL_GPFIFO_A, VOLTA_CHANNEL_GPFIFO_A, host),
    HalDescriptor::ce(TURING_DMA_COPY_A, VOLTA_DMA_COPY_A, inherit),
    HalDescriptor::arch(ARCH_TU100, ARCH_GV100, arch),
    HalDescriptor::fault(ARCH_TU100, ARCH_GV100, inherit),
    HalDescriptor::access_counter(ARCH_TU100, ARCH_GV100, inherit),
];

fn host(parent: HostHal) -> HostHal {
    HostHal {
        clear_faulted_channel_method,
        ..parent
    }
}

fn clear_faulted_channel_method(push: &mut Push, channel: &UserChannel, fault: &FaultBufferEntry) {
    let clear_type = if faulted_is_pbdma(fault) {
        c06f::CLEAR_FAULTED_TYPE_PBDMA_FAULTED
    } else {
        c06f::CLEAR_FAULTED_TYPE_ENG_FAULTED
    };
    let inst = channel.instance_ptr;
    let aperture = host_aperture(push, inst.aperture);
    push.host(
        c06f::CLEAR_FAULTED_A,
        &[
            c06f::CLEAR_FAULTED_A_TYPE.value32(clear_type)
                | c06f::CLEAR_FAULTED_A_INST_APERTURE.value32(aperture)
                | c06f::CLEAR_FAULTED_A_INST_LOW.value32((inst.address >> 12) as u32),
            c06f::CLEAR_FAULTED_B_INST_HI.value32((inst.address >> 32) as u32),
        ],
    );
}

fn arch(parent: ArchHal) -> ArchHal {
    ArchHal {
        name: "tu100",
        ..parent
    }
}
