//! Per-generation HAL tables.
//!
//! Each generation module contributes the descriptors for the classes and architecture ids it
//! introduces. Later generations derive from earlier ones and only replace what changed, so
//! most modules are short lists of overrides.

mod ada;
mod ampere;
mod blackwell;
mod hopper;
mod maxwell;
mod pascal;
mod turing;
mod volta;

use uvm_hwref::class::*;
use uvm_hwref::host::{APERTURE_SYS_MEM_COHERENT, APERTURE_SYS_MEM_NONCOHERENT, APERTURE_VID_MEM};

use crate::address::Aperture;
use crate::error::UvmError;
use crate::hal::{DeviceInfo, HalDescriptor};
use crate::push::Push;

/// Every descriptor the driver ships, in no particular order.
pub fn descriptors() -> Vec<HalDescriptor> {
    [
        maxwell::DESCRIPTORS,
        pascal::DESCRIPTORS,
        volta::DESCRIPTORS,
        turing::DESCRIPTORS,
        ampere::DESCRIPTORS,
        ada::DESCRIPTORS,
        hopper::DESCRIPTORS,
        blackwell::DESCRIPTORS,
    ]
    .concat()
}

struct Defaults {
    arch_id: u32,
    name: &'static str,
    host_class: u32,
    ce_class: u32,
    sec2_class: Option<u32>,
}

const DEFAULTS: &[Defaults] = &[
    Defaults {
        arch_id: ARCH_GM000,
        name: "GM000",
        host_class: KEPLER_CHANNEL_GPFIFO_B,
        ce_class: MAXWELL_DMA_COPY_A,
        sec2_class: None,
    },
    Defaults {
        arch_id: ARCH_GM200,
        name: "GM200",
        host_class: KEPLER_CHANNEL_GPFIFO_B,
        ce_class: MAXWELL_DMA_COPY_A,
        sec2_class: None,
    },
    Defaults {
        arch_id: ARCH_GP100,
        name: "GP100",
        host_class: PASCAL_CHANNEL_GPFIFO_A,
        ce_class: PASCAL_DMA_COPY_A,
        sec2_class: None,
    },
    Defaults {
        arch_id: ARCH_GV100,
        name: "GV100",
        host_class: VOLTA_CHANNEL_GPFIFO_A,
        ce_class: VOLTA_DMA_COPY_A,
        sec2_class: None,
    },
    Defaults {
        arch_id: ARCH_TU100,
        name: "TU100",
        host_class: TURING_CHANNEL_GPFIFO_A,
        ce_class: TURING_DMA_COPY_A,
        sec2_class: None,
    },
    Defaults {
        arch_id: ARCH_GA100,
        name: "GA100",
        host_class: AMPERE_CHANNEL_GPFIFO_A,
        ce_class: AMPERE_DMA_COPY_A,
        sec2_class: None,
    },
    Defaults {
        arch_id: ARCH_AD100,
        name: "AD100",
        host_class: AMPERE_CHANNEL_GPFIFO_A,
        ce_class: AMPERE_DMA_COPY_B,
        sec2_class: None,
    },
    Defaults {
        arch_id: ARCH_GH100,
        name: "GH100",
        host_class: HOPPER_CHANNEL_GPFIFO_A,
        ce_class: HOPPER_DMA_COPY_A,
        sec2_class: Some(HOPPER_SEC2_WORK_LAUNCH_A),
    },
    Defaults {
        arch_id: ARCH_GB100,
        name: "GB100",
        host_class: BLACKWELL_CHANNEL_GPFIFO_A,
        ce_class: BLACKWELL_DMA_COPY_A,
        sec2_class: None,
    },
];

/// Architecture ids with a full set of tables.
pub fn supported_arch_ids() -> impl Iterator<Item = u32> {
    DEFAULTS.iter().map(|d| d.arch_id)
}

/// The classes the resource manager allocates by default on `arch_id`.
pub fn device_info(arch_id: u32) -> Option<DeviceInfo> {
    let defaults = DEFAULTS.iter().find(|d| d.arch_id == arch_id)?;
    let mut info = DeviceInfo::new(
        defaults.name,
        defaults.arch_id,
        defaults.host_class,
        defaults.ce_class,
    );
    info.sec2_class = defaults.sec2_class;
    Some(info)
}

/// Override for descriptors that only exist so a newer id resolves to its parent's table.
pub(crate) fn inherit<T>(parent: T) -> T {
    parent
}

/// Host `*_APERTURE` encoding of a page-directory base or instance block. Only local video and
/// system memory can hold either; anything else poisons the push.
pub(crate) fn host_aperture(push: &mut Push, aperture: Aperture) -> u32 {
    match aperture {
        Aperture::Vid => APERTURE_VID_MEM,
        Aperture::Sys => APERTURE_SYS_MEM_COHERENT,
        Aperture::SysNonCoherent => APERTURE_SYS_MEM_NONCOHERENT,
        Aperture::Peer(_) | Aperture::Default => {
            push.fail(UvmError::assertion(format!(
                "{aperture} cannot hold a page directory or instance block"
            )));
            APERTURE_VID_MEM
        }
    }
}

#[cfg(test)]
pub(crate) fn test_gpu(arch_id: u32) -> std::sync::Arc<crate::hal::GpuHal> {
    let registry = crate::hal::HalRegistry::global().unwrap();
    crate::hal::GpuHal::attach(registry, device_info(arch_id).unwrap()).unwrap()
}
