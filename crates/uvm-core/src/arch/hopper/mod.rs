//! Hopper: the 57-bit page-table format, wider copy addresses, relocated MMU engine ids and the
//! SEC2 engine for confidential computing.

pub(crate) mod ce;
pub(crate) mod mmu;
pub(crate) mod sec2;

use uvm_hwref::class::{
    AMPERE_CHANNEL_GPFIFO_A, AMPERE_DMA_COPY_B, ARCH_AD100, ARCH_GH100, HOPPER_CHANNEL_GPFIFO_A,
    HOPPER_DMA_COPY_A, HOPPER_SEC2_WORK_LAUNCH_A,
};
use uvm_hwref::fault::engine_id;

use crate::access_counter::{self, AccessCounterEntry};
use crate::error::Result;
use crate::fault::{parse, FaultBufferEntry};
use crate::hal::{AccessCounterBufferHal, ArchCaps, ArchHal, FaultBufferHal, HalDescriptor, MmuEngineType};

use super::inherit;

pub(crate) const DESCRIPTORS: &[HalDescriptor] = &[
    HalDescriptor::host(HOPPER_CHANNEL_GPFIFO_A, AMPERE_CHANNEL_GPFIFO_A, inherit),
    HalDescriptor::ce(HOPPER_DMA_COPY_A, AMPERE_DMA_COPY_B, ce::ce),
    HalDescriptor::sec2_base(HOPPER_SEC2_WORK_LAUNCH_A, sec2::sec2),
    HalDescriptor::arch(ARCH_GH100, ARCH_AD100, arch),
    HalDescriptor::fault(ARCH_GH100, ARCH_AD100, fault),
    HalDescriptor::access_counter(ARCH_GH100, ARCH_AD100, access_counters),
];

fn mmu_engine_type(engine_id: u16) -> MmuEngineType {
    match engine_id {
        engine_id::HOPPER_CE0..=engine_id::HOPPER_CE9 => MmuEngineType::Ce,
        engine_id::HOPPER_HOST0..=engine_id::HOPPER_HOST43 => MmuEngineType::Host,
        _ => MmuEngineType::Graphics,
    }
}

fn arch(parent: ArchHal) -> ArchHal {
    ArchHal {
        name: "gh100",
        mmu_mode_hal: mmu::mode,
        mmu_engine_type,
        caps: ArchCaps {
            tlb_top_level: 6,
            ..parent.caps
        },
        ..parent
    }
}

fn parse_replayable(arch: &ArchHal, words: &[u32]) -> Result<FaultBufferEntry> {
    parse::parse_c369(arch, words, engine_id::HOPPER_GRAPHICS, true)
}

fn parse_non_replayable(arch: &ArchHal, words: &[u32]) -> Result<FaultBufferEntry> {
    parse::parse_c369(arch, words, engine_id::HOPPER_GRAPHICS, false)
}

fn fault(parent: FaultBufferHal) -> FaultBufferHal {
    FaultBufferHal {
        parse_replayable_entry: parse_replayable,
        parse_non_replayable_entry: parse_non_replayable,
        ..parent
    }
}

fn parse_notification(arch: &ArchHal, words: &[u32]) -> Result<AccessCounterEntry> {
    access_counter::parse_entry_with(arch, words, engine_id::HOPPER_GRAPHICS)
}

fn access_counters(parent: AccessCounterBufferHal) -> AccessCounterBufferHal {
    AccessCounterBufferHal {
        parse_entry: parse_notification,
        ..parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_counter::record::RawNotification;
    use crate::access_counter::NotificationTarget;
    use crate::arch;
    use crate::fault::parse::record::RawFault;
    use crate::fault::FaultUnit;
    use crate::tlb::page_table_level;
    use pretty_assertions::assert_eq;

    #[test]
    fn engine_ranges_moved() {
        assert_eq!(mmu_engine_type(0x15), MmuEngineType::Ce);
        assert_eq!(mmu_engine_type(0x0F), MmuEngineType::Graphics);
        assert_eq!(mmu_engine_type(0x40), MmuEngineType::Host);
        assert_eq!(mmu_engine_type(0x6B), MmuEngineType::Host);
        assert_eq!(mmu_engine_type(0x80), MmuEngineType::Graphics);
    }

    #[test]
    fn subcontexts_count_from_the_new_graphics_base() {
        let gpu = arch::test_gpu(ARCH_GH100);
        let raw = RawFault {
            engine_id: 0x85,
            ..RawFault::default()
        };
        let entry = (gpu.fault.parse_replayable_entry)(&gpu.arch, &raw.words()).unwrap();
        assert_eq!(entry.source.mmu_engine_type, MmuEngineType::Graphics);
        assert_eq!(entry.source.ve_id, 5);

        let pbdma = RawFault {
            engine_id: 0x41,
            chid: 7,
            ..RawFault::default()
        };
        let entry = (gpu.fault.parse_non_replayable_entry)(&gpu.arch, &pbdma.words()).unwrap();
        assert_eq!(entry.source.mmu_engine_type, MmuEngineType::Host);
        assert_eq!(entry.source.ve_id, 0);
        assert_eq!(entry.source.unit, FaultUnit::Channel(7));

        let notification = RawNotification {
            engine_id: 0x82,
            ..RawNotification::default()
        };
        let entry = (gpu.access_counter.parse_entry)(&gpu.arch, &notification.words()).unwrap();
        match entry.target {
            NotificationTarget::Virtual { ve_id, .. } => assert_eq!(ve_id, 2),
            other => panic!("expected a virtual notification, got {other:?}"),
        }
    }

    #[test]
    fn invalidates_reach_the_sixth_level() {
        let gpu = arch::test_gpu(ARCH_GH100);
        let caps = *gpu.caps();
        let mode = gpu.default_mmu_mode().unwrap();
        assert_eq!(mode.num_va_bits(), 57);
        assert_eq!(page_table_level(&caps, 5), 1);
        assert_eq!(page_table_level(&caps, 1), 5);
        assert_eq!(page_table_level(&caps, 0), 0);
        assert!(caps.has_clear_faulted_channel_register);
        assert!(gpu.info.sec2_class.is_some());
    }
}
