// Shared helpers for the integration tests. Each test file includes this with `mod common;`, so
// not every helper is used by every file.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use uvm_core::arch::device_info;
use uvm_core::channel::VaSpaceId;
use uvm_core::fault::{AccessType, FatalFaultEvent, FatalReason, FaultResolver};
use uvm_core::push::RecordingSink;
use uvm_core::{GpuHal, GpuPhysAddress, HalRegistry, Result, UvmError};
use uvm_hwref::fault::c369;
use uvm_hwref::field::words_to_le_bytes;
use uvm_hwref::host::c06f;

pub const RECORD_SIZE: usize = 32;

pub fn gpu(arch_id: u32) -> Arc<GpuHal> {
    let info = device_info(arch_id).expect("known architecture");
    GpuHal::attach(HalRegistry::global().expect("registry"), info).expect("attach")
}

/// One raw fault record in the Volta layout. The Pascal layout places every field written here
/// at the same position.
#[derive(Debug, Clone, Copy)]
pub struct Record {
    pub address: u64,
    pub instance: u64,
    pub fault_type: u32,
    pub access_type: u32,
    pub client: u32,
    pub gpc_id: u32,
    pub engine_id: u32,
    pub chid: u32,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            address: 0x7f00_0000_1000,
            instance: 0x20_0000,
            fault_type: uvm_hwref::fault::fault_type::PTE,
            access_type: uvm_hwref::fault::access_type::VIRT_READ,
            client: 0,
            gpc_id: 0,
            engine_id: 0x40,
            chid: 0,
        }
    }
}

impl Record {
    pub fn at(address: u64, access_type: u32) -> Self {
        Self {
            address,
            access_type,
            ..Self::default()
        }
    }

    pub fn bytes(&self) -> [u8; RECORD_SIZE] {
        let mut w = [0u32; 8];
        c369::INST_LO.set(&mut w, (self.instance >> 12) as u32);
        c369::INST_HI.set(&mut w, (self.instance >> 32) as u32);
        c369::ADDR_LO.set(&mut w, (self.address >> 12) as u32);
        c369::ADDR_HI.set(&mut w, (self.address >> 32) as u32);
        c369::ENGINE_ID.set(&mut w, self.engine_id);
        c369::CHID.set(&mut w, self.chid);
        c369::FAULT_TYPE.set(&mut w, self.fault_type);
        c369::CLIENT.set(&mut w, self.client);
        c369::ACCESS_TYPE.set(&mut w, self.access_type);
        c369::GPC_ID.set(&mut w, self.gpc_id);
        c369::VALID.set(&mut w, 1);
        let mut out = [0u8; RECORD_SIZE];
        words_to_le_bytes(&w, &mut out);
        out
    }
}

/// VA-space side of fault servicing with scripted answers.
#[derive(Debug, Default)]
pub struct TestResolver {
    /// `(address, access)` pairs refused with `InvalidPermissions`.
    pub denied: HashSet<(u64, AccessType)>,
    /// Addresses whose servicing fails with the given error.
    pub failing: Vec<(u64, UvmError)>,
    pub pdb: Option<GpuPhysAddress>,
    pub serviced: Vec<(VaSpaceId, u64, AccessType)>,
    pub fatal: Vec<FatalFaultEvent>,
}

impl TestResolver {
    pub fn new() -> Self {
        Self {
            pdb: Some(GpuPhysAddress::vid(0x80_0000)),
            ..Self::default()
        }
    }
}

impl FaultResolver for TestResolver {
    fn check_access(
        &mut self,
        _va_space: VaSpaceId,
        address: u64,
        access: AccessType,
    ) -> std::result::Result<(), FatalReason> {
        if self.denied.contains(&(address, access)) {
            Err(FatalReason::InvalidPermissions)
        } else {
            Ok(())
        }
    }

    fn service(&mut self, va_space: VaSpaceId, address: u64, access: AccessType) -> Result<()> {
        if let Some((_, err)) = self.failing.iter().find(|(a, _)| *a == address) {
            return Err(err.clone());
        }
        self.serviced.push((va_space, address, access));
        Ok(())
    }

    fn pdb(&self, _va_space: VaSpaceId) -> Option<GpuPhysAddress> {
        self.pdb
    }

    fn report_fatal(&mut self, event: &FatalFaultEvent) {
        self.fatal.push(event.clone());
    }
}

/// The `REPLAY` field of every TLB-invalidate `MEM_OP` burst submitted, in order.
pub fn replay_ops(sink: &RecordingSink) -> Vec<u32> {
    let invalidate = [
        c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE,
        c06f::MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE_TARGETED,
    ];
    sink.methods()
        .expect("recorded segments decode")
        .iter()
        .filter(|m| m.address == c06f::MEM_OP_A && m.data.len() == 4)
        .filter(|m| invalidate.contains(&c06f::MEM_OP_D_OPERATION.get32(m.data[3])))
        .map(|m| c06f::MEM_OP_C_TLB_INVALIDATE_REPLAY.get32(m.data[2]))
        .collect()
}
