//! Role-specific operation tables.
//!
//! Each table is a plain struct of function pointers. Later generations start from the table of
//! the generation they derive from and replace only the entries whose encoding changed, so a
//! resolved table is always complete.

use crate::access_counter::{AccessCounterConfig, AccessCounterEntry, AccessCounterType};
use crate::address::{GpuAddress, GpuPhysAddress};
use crate::channel::UserChannel;
use crate::error::Result;
use crate::fault::{CancelVaMode, FaultBufferEntry};
use crate::mem::RegisterIo;
use crate::mmu::MmuModeHal;
use crate::push::{GpfifoEntry, Push};
use crate::spin::SpinPolicy;

use super::types::{
    GpfifoSync, Membar, MethodContext, MmuEngineType, ReplayType, TlbInvalidateTestParams,
};

pub type MethodValidator = fn(&MethodContext, u32, u32) -> bool;

/// Channel front-end operations, keyed by host class.
#[derive(Clone, Copy)]
pub struct HostHal {
    pub init: fn(&mut Push),
    /// Method offset inline data is hidden behind.
    pub nop_method: u32,
    pub method_is_valid: MethodValidator,
    pub sw_method_is_valid: MethodValidator,
    /// Methods only a privileged channel may push.
    pub is_privileged_method: fn(u32, u32) -> bool,

    pub wait_for_idle: fn(&mut Push),
    pub membar_sys: fn(&mut Push),
    pub membar_gpu: fn(&mut Push),
    /// Pads the pushbuffer with `bytes` bytes the front-end skips.
    pub noop: fn(&mut Push, u32),
    pub interrupt: fn(&mut Push),
    pub semaphore_release: fn(&mut Push, u64, u32),
    pub semaphore_acquire: fn(&mut Push, u64, u32),
    pub semaphore_timestamp: fn(&mut Push, u64),
    pub set_gpfifo_entry: fn(u64, u32, GpfifoSync) -> GpfifoEntry,
    pub set_gpfifo_noop: fn() -> GpfifoEntry,

    /// `(pdb, depth, membar)`
    pub tlb_invalidate_all: fn(&mut Push, GpuPhysAddress, u32, Membar),
    /// `(pdb, depth, base, size, page_size, membar)`
    pub tlb_invalidate_va: fn(&mut Push, GpuPhysAddress, u32, u64, u64, u64, Membar),
    pub tlb_invalidate_test: fn(&mut Push, GpuPhysAddress, &TlbInvalidateTestParams),

    pub replay_faults: fn(&mut Push, ReplayType),
    pub cancel_faults_global: fn(&mut Push, GpuPhysAddress),
    /// `(instance_ptr, gpc_id, client_id)`
    pub cancel_faults_targeted: fn(&mut Push, GpuPhysAddress, u32, u32),
    /// `(pdb, fault, mode)`
    pub cancel_faults_va: fn(&mut Push, GpuPhysAddress, &FaultBufferEntry, CancelVaMode),

    pub clear_faulted_channel_method: fn(&mut Push, &UserChannel, &FaultBufferEntry),
    pub clear_faulted_channel_register:
        fn(&mut dyn RegisterIo, &UserChannel, &FaultBufferEntry, &SpinPolicy) -> Result<()>,
    pub clear_faulted_channel_sw_method: fn(&mut Push, &UserChannel, &FaultBufferEntry),

    pub access_counter_clear_all: fn(&mut Push),
    pub access_counter_clear_type: fn(&mut Push, AccessCounterType),
    pub access_counter_clear_targeted: fn(&mut Push, &AccessCounterEntry),
}

/// Copy-engine operations, keyed by CE class.
///
/// Operations that end in a copy honour the push's `CE_NEXT_PIPELINED` and `NEXT_MEMBAR_*`
/// flags and consume them.
#[derive(Clone, Copy)]
pub struct CeHal {
    pub init: fn(&mut Push),
    pub method_is_valid: MethodValidator,
    pub semaphore_release: fn(&mut Push, u64, u32),
    pub semaphore_reduction_inc: fn(&mut Push, u64, u32),
    pub semaphore_timestamp: fn(&mut Push, u64),
    /// `LAUNCH_DMA` flush bits for the push's pending membar flags, consuming them.
    pub flush_value: fn(&mut Push) -> u32,
    pub offset_out: fn(&mut Push, u64),
    pub offset_in_out: fn(&mut Push, u64, u64),
    /// Programs physical-mode targets for `(dst, src)` and returns the `LAUNCH_DMA` bits.
    pub phys_mode: fn(&mut Push, GpuAddress, GpuAddress) -> u32,
    /// `(dst, value, bytes)`
    pub memset_4: fn(&mut Push, GpuAddress, u32, u64),
    pub memset_8: fn(&mut Push, GpuAddress, u64, u64),
    /// `(dst, src, bytes)`
    pub memcopy: fn(&mut Push, GpuAddress, GpuAddress, u64),
}

/// Secure-copy engine operations, only present in confidential-computing capable parts.
#[derive(Clone, Copy)]
pub struct Sec2Hal {
    pub init: fn(&mut Push),
    pub method_is_valid: MethodValidator,
    pub semaphore_release: fn(&mut Push, u64, u32),
    /// `(dst, src, size, auth_tag_va)`
    pub decrypt: fn(&mut Push, u64, u64, u32, u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchCaps {
    pub has_clear_faulted_channel_method: bool,
    pub has_clear_faulted_channel_register: bool,
    pub has_clear_faulted_channel_sw_method: bool,
    /// Targeted VA invalidates are available.
    pub tlb_va_invalidate: bool,
    /// A system-scope membar can be folded into the invalidate itself.
    pub tlb_fold_sysmembar: bool,
    pub replayable_faults: bool,
    pub non_replayable_faults: bool,
    pub access_counters: bool,
    pub fault_cancel_va: bool,
    /// Read-write and read-write-atomic mappings are distinct.
    pub atomic_mappings: bool,
    pub utlbs_per_gpc: u32,
    /// GPCs accounted for in uTLB numbering; the hub uTLB follows the last GPC's.
    pub max_gpcs: u32,
    /// Mask of supported big page sizes.
    pub big_page_sizes: u64,
    /// Value of the invalidate `PAGE_TABLE_LEVEL` field selecting the root, 0 if the invalidate
    /// has no level field.
    pub tlb_top_level: u32,
    /// Largest number of pages a batched invalidate covers before falling back to a full one.
    pub tlb_batch_max_pages: u64,
}

impl ArchCaps {
    /// Number of distinct uTLB ids a fault can report, hub included.
    pub fn utlb_count(&self) -> u32 {
        self.utlbs_per_gpc * self.max_gpcs + 1
    }

    /// uTLB id of faults raised by hub clients.
    pub fn hub_utlb(&self) -> u32 {
        self.utlbs_per_gpc * self.max_gpcs
    }
}

/// Architecture-level description, keyed by architecture id.
#[derive(Clone, Copy)]
pub struct ArchHal {
    pub name: &'static str,
    pub mmu_mode_hal: fn(u64) -> Option<&'static MmuModeHal>,
    pub mmu_engine_type: fn(u16) -> MmuEngineType,
    /// Maps a GPC client id to its uTLB index within the GPC.
    pub client_id_to_utlb: fn(u16) -> Option<u32>,
    pub caps: ArchCaps,
}

/// Replayable and non-replayable fault-buffer record parsing, keyed by architecture id.
#[derive(Clone, Copy)]
pub struct FaultBufferHal {
    pub entry_size: usize,
    pub entry_is_valid: fn(&[u32]) -> bool,
    pub entry_clear_valid: fn(&mut [u32]),
    pub parse_replayable_entry: fn(&ArchHal, &[u32]) -> Result<FaultBufferEntry>,
    pub parse_non_replayable_entry: fn(&ArchHal, &[u32]) -> Result<FaultBufferEntry>,
}

/// Access-counter notification parsing, keyed by architecture id.
#[derive(Clone, Copy)]
pub struct AccessCounterBufferHal {
    pub entry_size: usize,
    pub entry_is_valid: fn(&[u32]) -> bool,
    pub entry_clear_valid: fn(&mut [u32]),
    pub parse_entry: fn(&ArchHal, &[u32]) -> Result<AccessCounterEntry>,
    /// Value programmed into `ACCESS_CNTR_CONFIG`.
    pub config_value: fn(&AccessCounterConfig) -> u32,
}
