//! Hardware abstraction layer.
//!
//! A [`GpuHal`] bundles the six role tables selected for one device at attach time. Everything
//! above this module calls through it instead of branching on the hardware generation.

mod registry;
pub mod stub;
mod tables;
mod types;

use std::fmt;
use std::sync::Arc;

use uvm_hwref::mmu::PAGE_SIZE_4K;

use crate::error::{Result, UvmError};
use crate::mmu::MmuModeHal;
use crate::push::Push;

pub use registry::{Derive, HalDescriptor, HalOps, HalRegistry};
pub use tables::{
    AccessCounterBufferHal, ArchCaps, ArchHal, CeHal, FaultBufferHal, HostHal, MethodValidator,
    Sec2Hal,
};
pub use types::{
    GpfifoSync, Membar, MethodContext, MmuEngineType, ReplayType, TlbInvalidateTestParams,
    TlbTargetVa,
};

/// What the resource manager reports about a device when it is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub arch_id: u32,
    pub host_class: u32,
    pub ce_class: u32,
    pub sec2_class: Option<u32>,
    pub confidential_computing: bool,
    /// SR-IOV heavy mode: the guest driver has no direct access to privileged state.
    pub sriov_heavy: bool,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, arch_id: u32, host_class: u32, ce_class: u32) -> Self {
        Self {
            name: name.into(),
            arch_id,
            host_class,
            ce_class,
            sec2_class: None,
            confidential_computing: false,
            sriov_heavy: false,
        }
    }
}

/// Per-device HAL: one resolved table per role.
pub struct GpuHal {
    pub info: DeviceInfo,
    pub host: HostHal,
    pub ce: CeHal,
    pub arch: ArchHal,
    pub fault: FaultBufferHal,
    pub access_counter: AccessCounterBufferHal,
    pub sec2: Sec2Hal,
}

impl fmt::Debug for GpuHal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuHal")
            .field("info", &self.info)
            .field("arch", &self.arch.name)
            .field("caps", &self.arch.caps)
            .finish_non_exhaustive()
    }
}

impl GpuHal {
    /// Selects the tables for `info` and checks them against each other.
    pub fn attach(registry: &HalRegistry, info: DeviceInfo) -> Result<Arc<Self>> {
        let missing = |role: &str, id: u32| {
            UvmError::unsupported(format!("{}: no {role} HAL for {id:#x}", info.name))
        };
        let host = *registry
            .host(info.host_class)
            .ok_or_else(|| missing("host", info.host_class))?;
        let ce = *registry
            .ce(info.ce_class)
            .ok_or_else(|| missing("ce", info.ce_class))?;
        let arch = *registry
            .arch(info.arch_id)
            .ok_or_else(|| missing("arch", info.arch_id))?;
        let fault = *registry
            .fault(info.arch_id)
            .ok_or_else(|| missing("fault", info.arch_id))?;
        let access_counter = *registry
            .access_counter(info.arch_id)
            .ok_or_else(|| missing("access_counter", info.arch_id))?;
        let sec2 = match info.sec2_class {
            Some(class) => *registry.sec2(class).ok_or_else(|| missing("sec2", class))?,
            None => stub::sec2(),
        };

        let hal = Self {
            info,
            host,
            ce,
            arch,
            fault,
            access_counter,
            sec2,
        };
        hal.check_consistency()?;
        tracing::debug!(gpu = %hal.info.name, arch = hal.arch.name, "HAL attached");
        Ok(Arc::new(hal))
    }

    /// Every advertised big page size must have a page-tree mode, and the invalidate level
    /// selecting the root must sit one above the 4K leaf depth.
    fn check_consistency(&self) -> Result<()> {
        let caps = &self.arch.caps;
        if caps.big_page_sizes == 0 {
            return Err(UvmError::invalid_state(format!(
                "{} advertises no big page size",
                self.arch.name
            )));
        }
        let mut sizes = caps.big_page_sizes;
        while sizes != 0 {
            let big_page_size = 1u64 << sizes.trailing_zeros();
            sizes &= sizes - 1;
            let mode = (self.arch.mmu_mode_hal)(big_page_size).ok_or_else(|| {
                UvmError::invalid_state(format!(
                    "{} advertises big pages of {big_page_size:#x} without a page-tree mode",
                    self.arch.name
                ))
            })?;
            if caps.tlb_top_level != 0 && caps.tlb_top_level != mode.page_table_depth(PAGE_SIZE_4K) + 1
            {
                return Err(UvmError::invalid_state(format!(
                    "{}: invalidate top level {} does not match a {}-level page tree",
                    self.arch.name,
                    caps.tlb_top_level,
                    mode.page_table_depth(PAGE_SIZE_4K) + 1
                )));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    #[inline]
    pub fn caps(&self) -> &ArchCaps {
        &self.arch.caps
    }

    /// Page-tree mode for `big_page_size`.
    pub fn mmu_mode(&self, big_page_size: u64) -> Result<&'static MmuModeHal> {
        (self.arch.mmu_mode_hal)(big_page_size).ok_or_else(|| {
            UvmError::unsupported(format!(
                "{} does not support big pages of {big_page_size:#x}",
                self.arch.name
            ))
        })
    }

    /// Mode for the smallest supported big page size.
    pub fn default_mmu_mode(&self) -> Result<&'static MmuModeHal> {
        let caps = &self.arch.caps;
        self.mmu_mode(1u64 << caps.big_page_sizes.trailing_zeros())
    }
}

/// Wait for idle followed by a membar of the requested scope.
pub fn wfi_membar(push: &mut Push, membar: Membar) {
    let host = &push.gpu().host;
    let (wait_for_idle, membar_sys, membar_gpu) = (host.wait_for_idle, host.membar_sys, host.membar_gpu);
    wait_for_idle(push);
    match membar {
        Membar::Sys => membar_sys(push),
        Membar::Gpu => membar_gpu(push),
        Membar::None => {}
    }
}

/// Narrowest membar that orders accesses to memory that is or is not local video memory.
pub fn downgrade_membar(_gpu: &GpuHal, is_local_vidmem: bool) -> Membar {
    if is_local_vidmem {
        Membar::Gpu
    } else {
        Membar::Sys
    }
}
