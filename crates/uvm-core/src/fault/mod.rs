//! MMU fault records and the replayable / non-replayable fault services.
//!
//! Raw fault-buffer records are parsed by the architecture's [`crate::hal::FaultBufferHal`] into
//! [`FaultBufferEntry`] values, triaged by [`classify`], merged by [`coalesce`] and finally
//! serviced, replayed or cancelled by [`service`] and [`non_replayable`] through the
//! [`recovery::RecoveryCoordinator`].

pub mod buffer;
pub mod classify;
pub mod coalesce;
pub mod non_replayable;
pub(crate) mod parse;
pub mod recovery;
pub mod service;

use std::fmt;

use bitflags::bitflags;
use uvm_hwref::fault::{access_type as hw_access, fault_type as hw_fault};

use crate::address::GpuPhysAddress;
use crate::hal::MmuEngineType;

pub use buffer::{FaultBufferLayout, FetchMode, FlushMode, NonReplayableFaultBuffer, ReplayableFaultBuffer};
pub use classify::{check_access_permissions, triage};
pub use coalesce::coalesce;
pub use non_replayable::NonReplayableFaultService;
pub use recovery::{ClearFaultedPath, RecoveryCoordinator};
pub use service::{FatalFaultEvent, FaultResolver, ReplayableFaultService, ServiceStats};

/// Why the MMU refused an access.
///
/// The first five kinds can be fixed by the driver (mapping or upgrading the page) and are
/// retried; every other kind is fatal to the faulting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FaultType {
    InvalidPde,
    InvalidPte,
    /// Atomic access to a page mapped without atomic permission.
    Atomic,
    /// Write to a read-only page.
    Write,
    /// Read of a write-only page.
    Read,

    PdeSize,
    VaLimitViolation,
    UnboundInstBlock,
    PrivViolation,
    PitchMaskViolation,
    WorkCreation,
    UnsupportedAperture,
    CompressionFailure,
    UnsupportedKind,
    RegionViolation,
    Poisoned,
    CcViolation,
    /// Encoding not known to this driver.
    Unrecognized,
}

impl FaultType {
    pub fn from_hw(raw: u32) -> Option<Self> {
        Some(match raw {
            hw_fault::PDE => Self::InvalidPde,
            hw_fault::PDE_SIZE => Self::PdeSize,
            hw_fault::PTE => Self::InvalidPte,
            hw_fault::VA_LIMIT_VIOLATION => Self::VaLimitViolation,
            hw_fault::UNBOUND_INST_BLOCK => Self::UnboundInstBlock,
            hw_fault::PRIV_VIOLATION => Self::PrivViolation,
            hw_fault::RO_VIOLATION => Self::Write,
            hw_fault::WO_VIOLATION => Self::Read,
            hw_fault::PITCH_MASK_VIOLATION => Self::PitchMaskViolation,
            hw_fault::WORK_CREATION => Self::WorkCreation,
            hw_fault::UNSUPPORTED_APERTURE => Self::UnsupportedAperture,
            hw_fault::COMPRESSION_FAILURE => Self::CompressionFailure,
            hw_fault::UNSUPPORTED_KIND => Self::UnsupportedKind,
            hw_fault::REGION_VIOLATION => Self::RegionViolation,
            hw_fault::POISONED => Self::Poisoned,
            hw_fault::ATOMIC_VIOLATION => Self::Atomic,
            hw_fault::CC_VIOLATION => Self::CcViolation,
            _ => return None,
        })
    }

    #[inline]
    pub fn is_fatal(self) -> bool {
        self > Self::Read
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidPde => "invalid_pde",
            Self::InvalidPte => "invalid_pte",
            Self::Atomic => "atomic",
            Self::Write => "write",
            Self::Read => "read",
            Self::PdeSize => "pde_size",
            Self::VaLimitViolation => "va_limit_violation",
            Self::UnboundInstBlock => "unbound_inst_block",
            Self::PrivViolation => "priv_violation",
            Self::PitchMaskViolation => "pitch_mask_violation",
            Self::WorkCreation => "work_creation",
            Self::UnsupportedAperture => "unsupported_aperture",
            Self::CompressionFailure => "compression_failure",
            Self::UnsupportedKind => "unsupported_kind",
            Self::RegionViolation => "region_violation",
            Self::Poisoned => "poisoned",
            Self::CcViolation => "cc_violation",
            Self::Unrecognized => "unrecognized",
        })
    }
}

/// Kind of access that faulted, ordered from least to most intrusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessType {
    Prefetch,
    Read,
    Write,
    AtomicWeak,
    AtomicStrong,
}

impl AccessType {
    pub const ALL: [Self; 5] = [
        Self::Prefetch,
        Self::Read,
        Self::Write,
        Self::AtomicWeak,
        Self::AtomicStrong,
    ];

    /// Decodes a raw access type into the access and whether it used a virtual address.
    pub fn from_hw(raw: u32) -> Option<(Self, bool)> {
        Some(match raw {
            hw_access::VIRT_READ => (Self::Read, true),
            hw_access::VIRT_WRITE => (Self::Write, true),
            hw_access::VIRT_ATOMIC_STRONG => (Self::AtomicStrong, true),
            hw_access::VIRT_PREFETCH => (Self::Prefetch, true),
            hw_access::VIRT_ATOMIC_WEAK => (Self::AtomicWeak, true),
            hw_access::PHYS_READ => (Self::Read, false),
            hw_access::PHYS_WRITE => (Self::Write, false),
            hw_access::PHYS_ATOMIC => (Self::AtomicStrong, false),
            hw_access::PHYS_PREFETCH => (Self::Prefetch, false),
            _ => return None,
        })
    }

    #[inline]
    pub fn mask(self) -> AccessTypeMask {
        match self {
            Self::Prefetch => AccessTypeMask::PREFETCH,
            Self::Read => AccessTypeMask::READ,
            Self::Write => AccessTypeMask::WRITE,
            Self::AtomicWeak => AccessTypeMask::ATOMIC_WEAK,
            Self::AtomicStrong => AccessTypeMask::ATOMIC_STRONG,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prefetch => "prefetch",
            Self::Read => "read",
            Self::Write => "write",
            Self::AtomicWeak => "atomic_weak",
            Self::AtomicStrong => "atomic_strong",
        })
    }
}

bitflags! {
    /// Set of access types seen for one faulting page.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessTypeMask: u8 {
        const PREFETCH = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const ATOMIC_WEAK = 1 << 3;
        const ATOMIC_STRONG = 1 << 4;
    }
}

impl AccessTypeMask {
    /// Most intrusive access in the set.
    pub fn highest(self) -> Option<AccessType> {
        AccessType::ALL.into_iter().rev().find(|a| self.contains(a.mask()))
    }
}

/// Why a fault could not be serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalReason {
    InvalidAddress,
    InvalidPermissions,
    InvalidFaultType,
    OutOfMemory,
    InternalError,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidAddress => "invalid address",
            Self::InvalidPermissions => "invalid permissions",
            Self::InvalidFaultType => "invalid fault type",
            Self::OutOfMemory => "out of memory",
            Self::InternalError => "internal error",
        })
    }
}

/// Which accesses a VA-targeted cancel drops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelVaMode {
    #[default]
    All,
    /// Reads to the page are serviced; only writes and atomics are cancelled.
    WriteAndAtomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientType {
    Gpc,
    Hub,
}

/// Translation unit the fault was reported through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FaultUnit {
    /// Replayable faults identify the uTLB holding the faulted access.
    Utlb(u32),
    /// Non-replayable faults identify the channel that stalled.
    Channel(u32),
}

/// Who raised a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultSource {
    pub client_type: ClientType,
    pub client_id: u16,
    pub gpc_id: u16,
    pub mmu_engine_id: u16,
    pub mmu_engine_type: MmuEngineType,
    /// Subcontext of the faulting graphics engine, 0 for other engines.
    pub ve_id: u8,
    pub unit: FaultUnit,
}

impl FaultSource {
    pub fn utlb_id(&self) -> Option<u32> {
        match self.unit {
            FaultUnit::Utlb(id) => Some(id),
            FaultUnit::Channel(_) => None,
        }
    }
}

/// Buffer-specific part of a fault record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Replayable { cancel_va_mode: CancelVaMode },
    /// `buffer_index` is the record's position in the shadow buffer it was copied from.
    NonReplayable { buffer_index: u32 },
}

/// Part of a raw record this driver did not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unrecognized {
    FaultType(u32),
    AccessType(u32),
    Client(u16),
    InstanceAperture(u32),
    /// Graphics engine id too far past the first graphics engine to name a subcontext.
    Subcontext(u16),
}

impl fmt::Display for Unrecognized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FaultType(raw) => write!(f, "fault type {raw:#x}"),
            Self::AccessType(raw) => write!(f, "access type {raw:#x}"),
            Self::Client(raw) => write!(f, "client {raw:#x}"),
            Self::InstanceAperture(raw) => write!(f, "instance aperture {raw:#x}"),
            Self::Subcontext(engine_id) => write!(f, "graphics engine {engine_id:#x}"),
        }
    }
}

/// One parsed fault-buffer record plus the triage state accumulated while servicing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultBufferEntry {
    /// Page-aligned faulting address.
    pub fault_address: u64,
    pub timestamp: u64,
    pub instance_ptr: GpuPhysAddress,
    pub source: FaultSource,
    pub fault_type: FaultType,
    pub access_type: AccessType,
    /// The access used a virtual address.
    pub is_virtual: bool,
    pub kind: FaultKind,
    pub unrecognized: Option<Unrecognized>,

    pub is_fatal: bool,
    pub fatal_reason: Option<FatalReason>,
    pub is_throttled: bool,
    pub is_invalid_prefetch: bool,
    /// Cancelling the faulting context needs a global cancel (no VA space to target).
    pub needs_global_cancel: bool,
    /// Union of the access types of this entry and every entry merged into it.
    pub access_type_mask: AccessTypeMask,
    /// This entry plus its merged duplicates.
    pub num_instances: u32,
    pub merged: Vec<FaultBufferEntry>,
}

impl FaultBufferEntry {
    pub fn new(
        fault_address: u64,
        instance_ptr: GpuPhysAddress,
        source: FaultSource,
        fault_type: FaultType,
        access_type: AccessType,
        kind: FaultKind,
    ) -> Self {
        Self {
            fault_address,
            timestamp: 0,
            instance_ptr,
            source,
            fault_type,
            access_type,
            is_virtual: true,
            kind,
            unrecognized: None,
            is_fatal: false,
            fatal_reason: None,
            is_throttled: false,
            is_invalid_prefetch: false,
            needs_global_cancel: false,
            access_type_mask: access_type.mask(),
            num_instances: 1,
            merged: Vec::new(),
        }
    }

    #[inline]
    pub fn is_replayable(&self) -> bool {
        matches!(self.kind, FaultKind::Replayable { .. })
    }

    pub fn cancel_va_mode(&self) -> Option<CancelVaMode> {
        match self.kind {
            FaultKind::Replayable { cancel_va_mode } => Some(cancel_va_mode),
            FaultKind::NonReplayable { .. } => None,
        }
    }

    /// No-op for non-replayable entries.
    pub fn set_cancel_va_mode(&mut self, mode: CancelVaMode) {
        if let FaultKind::Replayable { cancel_va_mode } = &mut self.kind {
            *cancel_va_mode = mode;
        }
    }

    /// Marks the entry fatal. The first reason recorded wins.
    pub fn mark_fatal(&mut self, reason: FatalReason) {
        self.is_fatal = true;
        self.fatal_reason.get_or_insert(reason);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_five_fault_types_are_serviceable() {
        let serviceable: Vec<_> = (0..=0x10)
            .filter_map(FaultType::from_hw)
            .filter(|t| !t.is_fatal())
            .collect();
        assert_eq!(
            serviceable,
            vec![
                FaultType::InvalidPde,
                FaultType::InvalidPte,
                FaultType::Write,
                FaultType::Read,
                FaultType::Atomic
            ]
        );
        assert_eq!(FaultType::from_hw(0x1F), None);
        assert!(FaultType::Unrecognized.is_fatal());
    }

    #[test]
    fn access_types_decode_virtual_and_physical() {
        assert_eq!(AccessType::from_hw(0x4), Some((AccessType::AtomicWeak, true)));
        assert_eq!(AccessType::from_hw(0xA), Some((AccessType::AtomicStrong, false)));
        assert_eq!(AccessType::from_hw(0x5), None);
        assert!(AccessType::Prefetch < AccessType::Read);
        assert!(AccessType::AtomicWeak < AccessType::AtomicStrong);
    }

    #[test]
    fn mask_reports_highest_access() {
        let mask = AccessTypeMask::READ | AccessTypeMask::ATOMIC_WEAK | AccessTypeMask::PREFETCH;
        assert_eq!(mask.highest(), Some(AccessType::AtomicWeak));
        assert_eq!(AccessTypeMask::empty().highest(), None);
    }

    #[test]
    fn cancel_mode_is_only_tracked_for_replayable_entries() {
        let mut entry = test_util::replayable(0x1000, FaultType::InvalidPte, AccessType::Write);
        entry.set_cancel_va_mode(CancelVaMode::WriteAndAtomic);
        assert_eq!(entry.cancel_va_mode(), Some(CancelVaMode::WriteAndAtomic));

        entry.kind = FaultKind::NonReplayable { buffer_index: 3 };
        entry.set_cancel_va_mode(CancelVaMode::All);
        assert_eq!(entry.cancel_va_mode(), None);
        assert!(!entry.is_replayable());
    }

    #[test]
    fn first_fatal_reason_wins() {
        let mut entry = test_util::replayable(0x1000, FaultType::InvalidPte, AccessType::Read);
        entry.mark_fatal(FatalReason::InvalidAddress);
        entry.mark_fatal(FatalReason::InternalError);
        assert!(entry.is_fatal);
        assert_eq!(entry.fatal_reason, Some(FatalReason::InvalidAddress));
    }
}
