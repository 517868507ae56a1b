//! Drives a replayable fault from the raw buffer record through to the PTE write and TLB
//! invalidate that resolve it, on one GPU with a real page tree behind the resolver.

use std::sync::Arc;

use anyhow::Context;
use pretty_assertions::assert_eq;
use uvm_core::arch::device_info;
use uvm_core::channel::{ChannelRegistry, UserChannel, VaSpaceId};
use uvm_core::config::{PageTableLocation, ReplayPolicy};
use uvm_core::fault::{
    AccessType, FatalFaultEvent, FatalReason, FaultBufferLayout, FaultResolver, RecoveryCoordinator,
    ReplayableFaultBuffer, ReplayableFaultService,
};
use uvm_core::hal::Membar;
use uvm_core::mem::{DeviceIo, MemoryBus, PagedMemory, RecordingRegisters};
use uvm_core::mmu::{LinearAllocator, PageTableRange, PageTree, PageTreeKind, Prot, PteFlags};
use uvm_core::push::{ChannelConfig, Push, PushSink, RecordingSink};
use uvm_core::tlb::TlbBatch;
use uvm_core::{Aperture, GpuHal, GpuPhysAddress, HalRegistry, UvmConfig, UvmError};
use uvm_hwref::class::ARCH_GV100;
use uvm_hwref::fault::{access_type, c369, fault_type};
use uvm_hwref::field::words_to_le_bytes;
use uvm_hwref::host::c06f;
use uvm_hwref::mmu::{PAGE_SIZE_4K, PAGE_SIZE_64K};

const BUFFER: u64 = 0x10_0000;
const GET: u32 = 0x100;
const PUT: u32 = 0x104;
const INSTANCE: u64 = 0x20_0000;
const VA_SPACE: VaSpaceId = 1;
const BACKING: u64 = 0x4000_0000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A VA space that backs every faulting page with consecutive video memory.
struct MappingResolver {
    gpu: Arc<GpuHal>,
    tree: PageTree,
    sink: RecordingSink,
    ranges: Vec<(u64, PageTableRange, u64)>,
    fatal: Vec<FatalFaultEvent>,
}

impl MappingResolver {
    fn new(gpu: Arc<GpuHal>) -> anyhow::Result<Self> {
        let mut push = Push::begin(Arc::clone(&gpu), &ChannelConfig::kernel("va-space", 0x20_0000_0000));
        let tree = PageTree::new(
            &mut push,
            PAGE_SIZE_64K,
            PageTreeKind::User,
            PageTableLocation::Vid,
            Default::default(),
            Box::new(LinearAllocator::new((0x100_0000, 0x200_0000), (0x8000_0000, 0x8100_0000))),
        )?;
        let mut sink = RecordingSink::new();
        sink.submit(push.end()?)?;
        Ok(Self {
            gpu,
            tree,
            sink,
            ranges: Vec::new(),
            fatal: Vec::new(),
        })
    }

    fn map(&mut self, address: u64, access: AccessType) -> uvm_core::Result<()> {
        let prot = if access >= AccessType::Write {
            Prot::ReadWrite
        } else {
            Prot::ReadOnly
        };
        let backing = BACKING + self.ranges.len() as u64 * PAGE_SIZE_4K;
        let pte = self.tree.mode().make_pte(Aperture::Vid, backing, prot, PteFlags::CACHED)?;

        let mut push = Push::begin(Arc::clone(&self.gpu), &ChannelConfig::kernel("va-space", 0x20_0000_0000));
        let range = self.tree.get_entry(&mut push, PAGE_SIZE_4K, address)?;
        self.tree.write_ptes(&mut push, &range, &[pte])?;
        let mut batch = TlbBatch::default();
        batch.invalidate(address & !(PAGE_SIZE_4K - 1), PAGE_SIZE_4K, PAGE_SIZE_4K, Membar::None);
        batch.end(&mut push, self.tree.pdb()?, Membar::Gpu)?;
        self.sink.submit(push.end()?)?;
        self.ranges.push((address, range, pte));
        Ok(())
    }
}

impl FaultResolver for MappingResolver {
    fn check_access(
        &mut self,
        _va_space: VaSpaceId,
        address: u64,
        access: AccessType,
    ) -> std::result::Result<(), FatalReason> {
        // The top half of the VA space is read-only.
        if address >= 1 << 46 && access >= AccessType::Write {
            Err(FatalReason::InvalidPermissions)
        } else {
            Ok(())
        }
    }

    fn service(&mut self, va_space: VaSpaceId, address: u64, access: AccessType) -> uvm_core::Result<()> {
        if va_space != VA_SPACE {
            return Err(UvmError::FatalFault {
                reason: FatalReason::InvalidAddress,
                address,
            });
        }
        self.map(address, access)
    }

    fn pdb(&self, _va_space: VaSpaceId) -> Option<GpuPhysAddress> {
        self.tree.pdb().ok()
    }

    fn report_fatal(&mut self, event: &FatalFaultEvent) {
        self.fatal.push(event.clone());
    }
}

fn record(address: u64, access: u32) -> [u8; 32] {
    let mut words = [0u32; 8];
    c369::INST_LO.set(&mut words, (INSTANCE >> 12) as u32);
    c369::ADDR_LO.set(&mut words, (address >> 12) as u32);
    c369::ADDR_HI.set(&mut words, (address >> 32) as u32);
    c369::ENGINE_ID.set(&mut words, 0x40);
    c369::FAULT_TYPE.set(&mut words, fault_type::PTE);
    c369::ACCESS_TYPE.set(&mut words, access);
    c369::VALID.set(&mut words, 1);
    let mut bytes = [0u8; 32];
    words_to_le_bytes(&words, &mut bytes);
    bytes
}

fn targeted_invalidates(sink: &RecordingSink) -> anyhow::Result<usize> {
    Ok(sink
        .methods()?
        .iter()
        .filter(|m| m.address == c06f::MEM_OP_A && m.data.len() == 4)
        .filter(|m| {
            c06f::MEM_OP_D_OPERATION.get32(m.data[3]) == c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE_TARGETED
        })
        .count())
}

#[test]
fn faults_are_resolved_by_mapping_the_page() -> anyhow::Result<()> {
    init_tracing();
    let config = UvmConfig::from_json_str(
        &serde_json::json!({
            "fault_batch_count": 8,
            "fault_replay_policy": "batch_flush",
            "spin": { "max_iterations": 16, "warn_after": 8 },
        })
        .to_string(),
    )?;
    assert_eq!(config.fault_replay_policy, ReplayPolicy::BatchFlush);

    let info = device_info(ARCH_GV100).context("GV100 is a supported architecture")?;
    let gpu = GpuHal::attach(HalRegistry::global()?, info)?;

    let layout = FaultBufferLayout {
        base: BUFFER,
        entries: 32,
        get_register: GET,
        put_register: PUT,
    };
    let buffer = ReplayableFaultBuffer::new(Arc::clone(&gpu), layout, &config)?;
    let recovery = RecoveryCoordinator::new(Arc::clone(&gpu), ChannelConfig::kernel("faults", 0x1000));
    let mut service = ReplayableFaultService::new(buffer, recovery, &config);

    let channels = ChannelRegistry::new(64);
    channels.register(UserChannel::new("app", VA_SPACE, GpuPhysAddress::vid(INSTANCE)))?;

    let mut mem = PagedMemory::new();
    let mut regs = RecordingRegisters::new();
    let read_only = (1u64 << 46) + 0x2000;
    let faults = [
        record(0x7000_1000, access_type::VIRT_READ),
        record(0x7000_1000, access_type::VIRT_WRITE),
        record(0x7000_5000, access_type::VIRT_READ),
        record(read_only, access_type::VIRT_WRITE),
    ];
    for (i, bytes) in faults.iter().enumerate() {
        mem.write_bytes(BUFFER + i as u64 * 32, bytes);
    }
    regs.poke(PUT, faults.len() as u32);

    let mut resolver = MappingResolver::new(Arc::clone(&gpu))?;
    let mut sink = RecordingSink::new();
    let stats = {
        let mut io = DeviceIo::new(&mut mem, &mut regs, &mut sink);
        service.service(&mut io, &channels, &mut resolver)?
    };

    assert_eq!(stats.fetched, 4);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.serviced, 2);
    assert_eq!(stats.fatal, 1);
    assert_eq!(regs.peek(GET), 4);

    let mode = gpu.default_mmu_mode()?;
    let mapped: Vec<(u64, Prot)> = resolver
        .ranges
        .iter()
        .map(|&(address, _, pte)| (address, mode.decode_pte(pte).map_or(Prot::None, |d| d.prot)))
        .collect();
    assert_eq!(mapped, vec![(0x7000_1000, Prot::ReadWrite), (0x7000_5000, Prot::ReadOnly)]);
    assert!(resolver.ranges.iter().all(|(_, range, _)| range.page_size == PAGE_SIZE_4K));
    assert_eq!(targeted_invalidates(&resolver.sink)?, 2);

    assert_eq!(resolver.fatal.len(), 1);
    assert_eq!(resolver.fatal[0].address, read_only);
    assert_eq!(resolver.fatal[0].reason, FatalReason::InvalidPermissions);
    Ok(())
}
