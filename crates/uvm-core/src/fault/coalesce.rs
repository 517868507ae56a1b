//! Duplicate-fault merging.
//!
//! Several accesses to the same page from the same uTLB show up as separate records. They are
//! merged into one representative so the page is serviced once, at the most intrusive access
//! seen; the representative keeps the others in [`FaultBufferEntry::merged`].

use std::collections::HashMap;

use crate::address::GpuPhysAddress;

use super::{FaultBufferEntry, FaultType, FaultUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    instance_ptr: GpuPhysAddress,
    ve_id: u8,
    unit: FaultUnit,
    address: u64,
    fault_type: FaultType,
}

impl Key {
    fn of(entry: &FaultBufferEntry) -> Self {
        Self {
            instance_ptr: entry.instance_ptr,
            ve_id: entry.source.ve_id,
            unit: entry.source.unit,
            address: entry.fault_address,
            fault_type: entry.fault_type,
        }
    }
}

/// Merges duplicates in `entries`, keeping first-seen order of the representatives.
///
/// Fatal entries are never merged: each one is cancelled and reported on its own. With
/// `enabled` unset the input is returned as is.
pub fn coalesce(entries: Vec<FaultBufferEntry>, enabled: bool) -> Vec<FaultBufferEntry> {
    if !enabled {
        return entries;
    }

    let mut out: Vec<FaultBufferEntry> = Vec::with_capacity(entries.len());
    let mut by_key: HashMap<Key, usize> = HashMap::with_capacity(entries.len());
    for mut entry in entries {
        if entry.is_fatal {
            out.push(entry);
            continue;
        }
        let key = Key::of(&entry);
        let Some(&slot) = by_key.get(&key) else {
            by_key.insert(key, out.len());
            out.push(entry);
            continue;
        };

        let rep = &mut out[slot];
        if entry.access_type > rep.access_type {
            // The newcomer becomes the representative and inherits the merge state.
            entry.access_type_mask |= rep.access_type_mask;
            entry.num_instances += rep.num_instances;
            entry.merged = std::mem::take(&mut rep.merged);
            entry.is_throttled |= rep.is_throttled;
            let old = std::mem::replace(rep, entry);
            rep.merged.push(reset_merge_state(old));
        } else {
            rep.access_type_mask |= entry.access_type_mask;
            rep.num_instances += entry.num_instances;
            rep.merged.push(reset_merge_state(entry));
        }
    }
    out
}

fn reset_merge_state(mut entry: FaultBufferEntry) -> FaultBufferEntry {
    entry.access_type_mask = entry.access_type.mask();
    entry.num_instances = 1;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::test_util::{gpc_source, replayable};
    use crate::fault::{AccessType, AccessTypeMask};

    #[test]
    fn duplicates_merge_into_most_intrusive_access() {
        let entries = vec![
            replayable(0x1000, FaultType::InvalidPte, AccessType::Read),
            replayable(0x1000, FaultType::InvalidPte, AccessType::AtomicStrong),
            replayable(0x1000, FaultType::InvalidPte, AccessType::Write),
        ];
        let out = coalesce(entries, true);
        assert_eq!(out.len(), 1);
        let rep = &out[0];
        assert_eq!(rep.access_type, AccessType::AtomicStrong);
        assert_eq!(rep.num_instances, 3);
        assert_eq!(rep.merged.len(), 2);
        assert_eq!(
            rep.access_type_mask,
            AccessTypeMask::READ | AccessTypeMask::WRITE | AccessTypeMask::ATOMIC_STRONG
        );
        assert!(rep.merged.iter().all(|m| m.merged.is_empty() && m.num_instances == 1));
    }

    #[test]
    fn different_pages_types_or_utlbs_stay_apart() {
        let mut other_utlb = replayable(0x1000, FaultType::InvalidPte, AccessType::Read);
        other_utlb.source = gpc_source(1, 0, 5);
        let entries = vec![
            replayable(0x1000, FaultType::InvalidPte, AccessType::Read),
            replayable(0x2000, FaultType::InvalidPte, AccessType::Read),
            replayable(0x1000, FaultType::Write, AccessType::Write),
            other_utlb,
        ];
        assert_eq!(coalesce(entries, true).len(), 4);
    }

    #[test]
    fn fatal_entries_are_never_merged() {
        let mut fatal = replayable(0x1000, FaultType::InvalidPte, AccessType::Write);
        fatal.is_fatal = true;
        let entries = vec![
            replayable(0x1000, FaultType::InvalidPte, AccessType::Read),
            fatal.clone(),
            fatal,
        ];
        let out = coalesce(entries, true);
        assert_eq!(out.len(), 3);
        assert!(out[0].merged.is_empty());
    }

    #[test]
    fn disabled_coalescing_keeps_every_entry() {
        let entries = vec![
            replayable(0x1000, FaultType::InvalidPte, AccessType::Read),
            replayable(0x1000, FaultType::InvalidPte, AccessType::Read),
        ];
        assert_eq!(coalesce(entries, false).len(), 2);
    }
}
