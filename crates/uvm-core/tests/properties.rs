#![cfg(not(target_arch = "wasm32"))]

mod common;

use std::collections::HashSet;

use proptest::prelude::*;
use uvm_core::arch::supported_arch_ids;
use uvm_core::fault::{
    coalesce, AccessType, CancelVaMode, ClientType, FaultBufferEntry, FaultKind, FaultSource, FaultType,
    FaultUnit,
};
use uvm_core::hal::MmuEngineType;
use uvm_core::mmu::{Prot, PteFlags};
use uvm_core::tlb::{page_table_level, targeted_range, MIN_INVALIDATE_SHIFT};
use uvm_core::{Aperture, GpuPhysAddress};
use uvm_hwref::mmu::PAGE_SIZE_4K;

fn aperture() -> impl Strategy<Value = Aperture> {
    prop_oneof![Just(Aperture::Vid), Just(Aperture::Sys)]
}

fn prot() -> impl Strategy<Value = Prot> {
    prop_oneof![Just(Prot::ReadOnly), Just(Prot::ReadWrite)]
}

fn access() -> impl Strategy<Value = AccessType> {
    prop::sample::select(AccessType::ALL.to_vec())
}

fn fault(page: u64, utlb: u32, access_type: AccessType) -> FaultBufferEntry {
    FaultBufferEntry::new(
        0x7f00_0000_0000 + page * PAGE_SIZE_4K,
        GpuPhysAddress::vid(0x20_0000),
        FaultSource {
            client_type: ClientType::Gpc,
            client_id: 0,
            gpc_id: 0,
            mmu_engine_id: 0x40,
            mmu_engine_type: MmuEngineType::Graphics,
            ve_id: 0,
            unit: FaultUnit::Utlb(utlb),
        },
        FaultType::InvalidPte,
        access_type,
        FaultKind::Replayable {
            cancel_va_mode: CancelVaMode::All,
        },
    )
}

proptest! {
    #[test]
    fn ptes_decode_to_what_was_encoded(
        page in 0u64..(1 << 24),
        aperture in aperture(),
        prot in prot(),
        cached in any::<bool>(),
    ) {
        let flags = if cached { PteFlags::CACHED } else { PteFlags::empty() };
        let address = page << 12;
        for arch_id in supported_arch_ids() {
            let gpu = common::gpu(arch_id);
            let mode = gpu.default_mmu_mode().unwrap();
            let pte = mode.make_pte(aperture, address, prot, flags).unwrap();
            let decoded = mode.decode_pte(pte).expect("valid PTE");
            prop_assert_eq!(decoded.aperture, aperture, "{}", gpu.arch.name);
            prop_assert_eq!(decoded.address, address, "{}", gpu.arch.name);
            prop_assert_eq!(decoded.prot, prot, "{}", gpu.arch.name);
            prop_assert_eq!(decoded.flags.contains(PteFlags::CACHED), cached, "{}", gpu.arch.name);
        }
    }

    #[test]
    fn coalescing_preserves_every_access(
        faults in prop::collection::vec((0u64..4, 0u32..3, access()), 1..40),
    ) {
        let input: Vec<FaultBufferEntry> =
            faults.iter().map(|&(page, utlb, access)| fault(page, utlb, access)).collect();
        let merged = coalesce(input.clone(), true);

        let total: u32 = merged.iter().map(|e| e.num_instances).sum();
        prop_assert_eq!(total as usize, input.len());

        let mut keys = HashSet::new();
        for entry in &merged {
            prop_assert!(keys.insert((entry.fault_address, entry.source.unit)));
            prop_assert_eq!(entry.merged.len() + 1, entry.num_instances as usize);
            prop_assert_eq!(entry.access_type_mask.highest(), Some(entry.access_type));
            for dup in &entry.merged {
                prop_assert_eq!(dup.fault_address, entry.fault_address);
                prop_assert!(dup.access_type <= entry.access_type);
            }
        }

        let unmerged = coalesce(input.clone(), false);
        prop_assert_eq!(unmerged, input);
    }

    #[test]
    fn targeted_windows_cover_the_range(base in any::<u64>(), size in 1u64..(1 << 40)) {
        match targeted_range(base, size) {
            Some((start, log2)) => {
                prop_assert!(log2 >= MIN_INVALIDATE_SHIFT && log2 < 64);
                prop_assert_eq!(start & ((1u64 << log2) - 1), 0);
                prop_assert!(start <= base);
                prop_assert!(base - start + (size - 1) < (1u64 << log2));
            }
            None => prop_assert!(base.checked_add(size - 1).is_none() || base ^ (base + (size - 1)) >= 1 << 63),
        }
    }
}

#[test]
fn invalidate_levels_count_up_from_the_ptes() {
    for arch_id in supported_arch_ids() {
        let gpu = common::gpu(arch_id);
        let caps = gpu.caps();
        let mode = gpu.default_mmu_mode().unwrap();
        let leaf = mode.page_table_depth(PAGE_SIZE_4K);
        assert_eq!(page_table_level(caps, 0), 0, "{}", gpu.arch.name);
        if caps.tlb_top_level != 0 {
            assert_eq!(page_table_level(caps, leaf), 1, "{}", gpu.arch.name);
            for depth in 1..leaf {
                assert!(
                    page_table_level(caps, depth) > page_table_level(caps, depth + 1),
                    "{} depth {depth}",
                    gpu.arch.name
                );
            }
        }
    }
}
