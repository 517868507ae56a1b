//! Ada: Ampere's fault-servicing model unchanged, with the second copy-engine class.

use uvm_hwref::class::{ARCH_AD100, ARCH_GA100};

use crate::hal::{ArchHal, HalDescriptor};

use super::inherit;

pub(crate) const DESCRIPTORS: &[HalDescriptor] = &[
    HalDescriptor::arch(ARCH_AD100, ARCH_GA100, arch),
    HalDescriptor::fault(ARCH_AD100, ARCH_GA100, inherit),
    HalDescriptor::access_counter(ARCH_AD100, ARCH_GA100, inherit),
];

fn arch(parent: ArchHal) -> ArchHal {
    ArchHal {
        name: "ad100",
        ..parent
    }
}
