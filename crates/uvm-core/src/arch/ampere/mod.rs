//! Ampere: CHRAM-based channel clears, semaphore methods and 512M pages.

pub(crate) mod host;
pub(crate) mod mmu;

use uvm_hwref::class::{
    AMPERE_CHANNEL_GPFIFO_A, AMPERE_DMA_COPY_A, AMPERE_DMA_COPY_B, ARCH_GA100, ARCH_TU100,
    TURING_CHANNEL_GPFIFO_A, TURING_DMA_COPY_A,
};
use uvm_hwref::fault::{engine_id, gpc_client};

use crate::arch::pascal;
use crate::hal::{ArchCaps, ArchHal, HalDescriptor, MmuEngineType};

use super::inherit;

pub(crate) const DESCRIPTORS: &[HalDescriptor] = &[
    HalDescriptor::host(AMPERE_CHANNEL_GPFIFO_A, TURING_CHANNEL_GPFIFO_A, host::host),
    HalDescriptor::ce(AMPERE_DMA_COPY_A, TURING_DMA_COPY_A, inherit),
    HalDescriptor::ce(AMPERE_DMA_COPY_B, AMPERE_DMA_COPY_A, inherit),
    HalDescriptor::arch(ARCH_GA100, ARCH_TU100, arch),
    HalDescriptor::fault(ARCH_GA100, ARCH_TU100, inherit),
    HalDescriptor::access_counter(ARCH_GA100, ARCH_TU100, inherit),
];

fn mmu_engine_type(engine_id: u16) -> MmuEngineType {
    match engine_id {
        engine_id::AMPERE_CE0..=engine_id::AMPERE_CE9 => MmuEngineType::Ce,
        engine_id::AMPERE_HOST0..=engine_id::AMPERE_HOST31 => MmuEngineType::Host,
        _ => MmuEngineType::Graphics,
    }
}

/// Pascal's map extended with the second half of each GPC's texture units.
pub(crate) fn client_id_to_utlb(client_id: u16) -> Option<u32> {
    let utlb = match client_id {
        gpc_client::T1_8..=gpc_client::T1_15 => 5 + u32::from(client_id - gpc_client::T1_8) / 2,
        gpc_client::PE_4..=gpc_client::PE_7 => 5 + u32::from(client_id - gpc_client::PE_4),
        gpc_client::TPCCS_4..=gpc_client::TPCCS_7 => 5 + u32::from(client_id - gpc_client::TPCCS_4),
        _ => return pascal::client_id_to_utlb(client_id),
    };
    Some(utlb)
}

fn arch(parent: ArchHal) -> ArchHal {
    ArchHal {
        name: "ga100",
        mmu_mode_hal: mmu::mode,
        mmu_engine_type,
        client_id_to_utlb,
        caps: ArchCaps {
            has_clear_faulted_channel_method: false,
            has_clear_faulted_channel_register: true,
            has_clear_faulted_channel_sw_method: true,
            utlbs_per_gpc: 9,
            max_gpcs: 8,
            ..parent.caps
        },
        ..parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;
    use crate::fault::parse::record::RawFault;
    use crate::fault::FaultUnit;
    use pretty_assertions::assert_eq;

    #[test]
    fn upper_texture_units_use_the_new_utlbs() {
        assert_eq!(client_id_to_utlb(gpc_client::T1_8), Some(5));
        assert_eq!(client_id_to_utlb(gpc_client::T1_15), Some(8));
        assert_eq!(client_id_to_utlb(gpc_client::PE_7), Some(8));
        assert_eq!(client_id_to_utlb(gpc_client::TPCCS_4), Some(5));
        assert_eq!(client_id_to_utlb(gpc_client::T1_7), Some(4));
        assert_eq!(client_id_to_utlb(0x30), None);
    }

    #[test]
    fn utlb_numbering_covers_eight_gpcs() {
        let gpu = arch::test_gpu(ARCH_GA100);
        assert_eq!(gpu.caps().utlb_count(), 73);
        assert_eq!(gpu.caps().hub_utlb(), 72);

        let raw = RawFault {
            client: u32::from(gpc_client::PE_7),
            gpc_id: 7,
            ..RawFault::default()
        };
        let entry = (gpu.fault.parse_replayable_entry)(&gpu.arch, &raw.words()).unwrap();
        assert_eq!(entry.source.unit, FaultUnit::Utlb(7 * 9 + 8));

        let hub = RawFault {
            hub: true,
            ..RawFault::default()
        };
        let entry = (gpu.fault.parse_replayable_entry)(&gpu.arch, &hub.words()).unwrap();
        assert_eq!(entry.source.unit, FaultUnit::Utlb(72));
    }

    #[test]
    fn engine_ranges() {
        assert_eq!(mmu_engine_type(0x18), MmuEngineType::Ce);
        assert_eq!(mmu_engine_type(0x3F), MmuEngineType::Host);
        assert_eq!(mmu_engine_type(0x40), MmuEngineType::Graphics);
    }

    #[test]
    fn default_device_takes_the_huge_page_mode() {
        let gpu = arch::test_gpu(ARCH_GA100);
        assert_eq!(gpu.arch.name, "ga100");
        let mode = gpu.default_mmu_mode().unwrap();
        assert!(mode.supports_page_size(512 << 20));
    }
}
