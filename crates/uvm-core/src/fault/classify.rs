//! Fault triage.
//!
//! [`triage`] runs right after parsing and decides from the record alone whether a fault can be
//! serviced. [`check_access_permissions`] runs once the owning VA space is known and narrows the
//! access that will actually be serviced.

use crate::error::{Result, UvmError};
use crate::hal::ArchCaps;

use super::{AccessType, CancelVaMode, FatalReason, FaultBufferEntry, FaultType};

/// Marks faults that no amount of servicing can fix.
///
/// With `strict` set an unrecognized encoding is an [`UvmError::AssertionViolation`]; otherwise
/// the fault is made fatal and flagged for a global cancel, since nothing about its target can
/// be trusted.
pub fn triage(entry: &mut FaultBufferEntry, caps: &ArchCaps, strict: bool) -> Result<()> {
    if let Some(what) = entry.unrecognized {
        if strict {
            return Err(UvmError::assertion(format!(
                "fault at {:#x} has unrecognized {what}",
                entry.fault_address
            )));
        }
        tracing::warn!(
            address = format_args!("{:#x}", entry.fault_address),
            instance = %entry.instance_ptr,
            "unrecognized {what}, cancelling"
        );
        entry.mark_fatal(FatalReason::InvalidFaultType);
        entry.needs_global_cancel = true;
        return Ok(());
    }

    if entry.fault_type.is_fatal() {
        entry.mark_fatal(FatalReason::InvalidFaultType);
    } else if entry.fault_type == FaultType::Atomic && !caps.atomic_mappings {
        // Without distinct atomic mappings a read-write page already grants every atomic the
        // hardware can perform.
        entry.mark_fatal(FatalReason::InvalidPermissions);
    }
    Ok(())
}

/// Checks the entry's access against the VA space's logical permissions.
///
/// Returns the access type to service the page with, or `None` when nothing should be
/// serviced. On a denied access the entry is updated in place:
///
/// - a denied prefetch is dropped as an invalid prefetch, never fatal;
/// - a denied write or atomic cancels only writes and atomics when reads to the page were also
///   seen and are allowed, in which case the page is serviced for reading;
/// - anything else cancels every access to the page.
pub fn check_access_permissions(
    entry: &mut FaultBufferEntry,
    mut check: impl FnMut(AccessType) -> std::result::Result<(), FatalReason>,
) -> Option<AccessType> {
    let access = entry.access_type;
    let reason = match check(access) {
        Ok(()) => return Some(access),
        Err(reason) => reason,
    };

    if access == AccessType::Prefetch {
        entry.is_invalid_prefetch = true;
        return None;
    }

    entry.mark_fatal(reason);
    if access > AccessType::Read {
        entry.set_cancel_va_mode(CancelVaMode::WriteAndAtomic);
        if entry.access_type_mask.contains(AccessType::Read.mask()) {
            if check(AccessType::Read).is_ok() {
                return Some(AccessType::Read);
            }
            entry.set_cancel_va_mode(CancelVaMode::All);
        }
    } else {
        entry.set_cancel_va_mode(CancelVaMode::All);
    }
    None
}
