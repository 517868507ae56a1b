//! Fault-buffer record parsers shared by the architecture tables.
//!
//! Parsing never fails on an unknown encoding: the entry is built with a placeholder value and
//! [`FaultBufferEntry::unrecognized`] set, and [`super::classify::triage`] decides what to do
//! with it.

use uvm_hwref::fault::{b069, c369, MMU_CLIENT_TYPE_GPC};
use uvm_hwref::field::{join_u64, WordField};
use uvm_hwref::host::{APERTURE_SYS_MEM_COHERENT, APERTURE_SYS_MEM_NONCOHERENT, APERTURE_VID_MEM};

use crate::address::{Aperture, GpuPhysAddress};
use crate::error::Result;
use crate::hal::{ArchHal, MmuEngineType};

use super::{
    AccessType, CancelVaMode, ClientType, FaultBufferEntry, FaultKind, FaultSource, FaultType,
    FaultUnit, Unrecognized,
};

pub(crate) fn instance_aperture(raw: u32) -> Option<Aperture> {
    match raw {
        APERTURE_VID_MEM => Some(Aperture::Vid),
        APERTURE_SYS_MEM_COHERENT => Some(Aperture::Sys),
        APERTURE_SYS_MEM_NONCOHERENT => Some(Aperture::SysNonCoherent),
        _ => None,
    }
}

/// Subcontext of a graphics engine, counted up from `graphics_engine_base`. `Err` carries an
/// engine id that lies too far past the base to name one.
pub(crate) fn subcontext_id(
    engine_type: MmuEngineType,
    engine_id: u16,
    graphics_engine_base: u16,
) -> std::result::Result<u8, u16> {
    match engine_type {
        MmuEngineType::Graphics if engine_id >= graphics_engine_base => {
            u8::try_from(engine_id - graphics_engine_base).map_err(|_| engine_id)
        }
        _ => Ok(0),
    }
}

/// Fields common to both record layouts.
struct RawRecord {
    inst_aperture: u32,
    inst_lo: u32,
    inst_hi: u32,
    addr_lo: u32,
    addr_hi: u32,
    timestamp_lo: u32,
    timestamp_hi: u32,
    fault_type: u32,
    access_type: u32,
    client: u16,
    client_type: u32,
    gpc_id: u16,
}

impl RawRecord {
    fn read(
        words: &[u32],
        inst: (WordField, WordField, WordField),
        addr: (WordField, WordField),
        timestamp: (WordField, WordField),
        fault_type: WordField,
        access_type: WordField,
        client: (WordField, WordField, WordField),
    ) -> Self {
        Self {
            inst_aperture: inst.0.get(words),
            inst_lo: inst.1.get(words),
            inst_hi: inst.2.get(words),
            addr_lo: addr.0.get(words),
            addr_hi: addr.1.get(words),
            timestamp_lo: timestamp.0.get(words),
            timestamp_hi: timestamp.1.get(words),
            fault_type: fault_type.get(words),
            access_type: access_type.get(words),
            client: client.0.get(words) as u16,
            client_type: client.1.get(words),
            gpc_id: client.2.get(words) as u16,
        }
    }

    fn b069(words: &[u32]) -> Self {
        Self::read(
            words,
            (b069::INST_APERTURE, b069::INST_LO, b069::INST_HI),
            (b069::ADDR_LO, b069::ADDR_HI),
            (b069::TIMESTAMP_LO, b069::TIMESTAMP_HI),
            b069::FAULT_TYPE,
            b069::ACCESS_TYPE,
            (b069::CLIENT, b069::MMU_CLIENT_TYPE, b069::GPC_ID),
        )
    }

    fn c369(words: &[u32]) -> Self {
        Self::read(
            words,
            (c369::INST_APERTURE, c369::INST_LO, c369::INST_HI),
            (c369::ADDR_LO, c369::ADDR_HI),
            (c369::TIMESTAMP_LO, c369::TIMESTAMP_HI),
            c369::FAULT_TYPE,
            c369::ACCESS_TYPE,
            (c369::CLIENT, c369::MMU_CLIENT_TYPE, c369::GPC_ID),
        )
    }

    fn client_type(&self) -> ClientType {
        if self.client_type == MMU_CLIENT_TYPE_GPC {
            ClientType::Gpc
        } else {
            ClientType::Hub
        }
    }

    /// Builds the entry with placeholder values standing in for anything unrecognized.
    fn into_entry(self, source: FaultSource, kind: FaultKind) -> FaultBufferEntry {
        let mut unrecognized = None;

        let aperture = instance_aperture(self.inst_aperture).unwrap_or_else(|| {
            unrecognized = Some(Unrecognized::InstanceAperture(self.inst_aperture));
            Aperture::Vid
        });
        let instance_ptr = GpuPhysAddress::new(
            aperture,
            (u64::from(self.inst_hi) << 32) | (u64::from(self.inst_lo) << 12),
        );
        let fault_type = FaultType::from_hw(self.fault_type).unwrap_or_else(|| {
            unrecognized = Some(Unrecognized::FaultType(self.fault_type));
            FaultType::Unrecognized
        });
        let (access_type, is_virtual) = AccessType::from_hw(self.access_type).unwrap_or_else(|| {
            unrecognized.get_or_insert(Unrecognized::AccessType(self.access_type));
            (AccessType::Read, true)
        });

        let mut entry = FaultBufferEntry::new(
            (u64::from(self.addr_hi) << 32) | (u64::from(self.addr_lo) << 12),
            instance_ptr,
            source,
            fault_type,
            access_type,
            kind,
        );
        entry.timestamp = join_u64(self.timestamp_hi, self.timestamp_lo);
        entry.is_virtual = is_virtual;
        entry.unrecognized = unrecognized;
        entry
    }
}

/// uTLB a GPC or hub client reports through. Unknown GPC clients land on uTLB 0 and are
/// flagged.
fn utlb_for(arch: &ArchHal, client_type: ClientType, gpc_id: u16, client: u16) -> (u32, Option<Unrecognized>) {
    let caps = &arch.caps;
    match client_type {
        ClientType::Hub => (caps.hub_utlb(), None),
        ClientType::Gpc => match (arch.client_id_to_utlb)(client) {
            Some(utlb) => (caps.utlbs_per_gpc * u32::from(gpc_id) + utlb, None),
            None => (0, Some(Unrecognized::Client(client))),
        },
    }
}

/// Pascal replayable record. Only graphics work replays on Pascal, and the record carries no
/// engine id.
pub(crate) fn parse_b069(arch: &ArchHal, words: &[u32]) -> Result<FaultBufferEntry> {
    let raw = RawRecord::b069(words);
    let client_type = raw.client_type();
    let (utlb, client_unrecognized) = utlb_for(arch, client_type, raw.gpc_id, raw.client);
    let source = FaultSource {
        client_type,
        client_id: raw.client,
        gpc_id: raw.gpc_id,
        mmu_engine_id: 0,
        mmu_engine_type: MmuEngineType::Graphics,
        ve_id: 0,
        unit: FaultUnit::Utlb(utlb),
    };
    let mut entry = raw.into_entry(
        source,
        FaultKind::Replayable {
            cancel_va_mode: CancelVaMode::All,
        },
    );
    if entry.unrecognized.is_none() {
        entry.unrecognized = client_unrecognized;
    }
    Ok(entry)
}

/// Volta and later record, shared by the replayable and non-replayable buffers.
/// `graphics_engine_base` is the first graphics MMU engine id; subcontext ids count up from it.
pub(crate) fn parse_c369(
    arch: &ArchHal,
    words: &[u32],
    graphics_engine_base: u16,
    replayable: bool,
) -> Result<FaultBufferEntry> {
    let raw = RawRecord::c369(words);
    let client_type = raw.client_type();
    let engine_id = c369::ENGINE_ID.get(words) as u16;
    let engine_type = (arch.mmu_engine_type)(engine_id);
    let (ve_id, subcontext_unrecognized) =
        match subcontext_id(engine_type, engine_id, graphics_engine_base) {
            Ok(ve_id) => (ve_id, None),
            Err(engine_id) => (0, Some(Unrecognized::Subcontext(engine_id))),
        };

    let (unit, kind, client_unrecognized) = if replayable {
        let (utlb, unrecognized) = utlb_for(arch, client_type, raw.gpc_id, raw.client);
        let kind = FaultKind::Replayable {
            cancel_va_mode: CancelVaMode::All,
        };
        (FaultUnit::Utlb(utlb), kind, unrecognized)
    } else {
        let channel = FaultUnit::Channel(c369::CHID.get(words));
        (channel, FaultKind::NonReplayable { buffer_index: 0 }, None)
    };

    let source = FaultSource {
        client_type,
        client_id: raw.client,
        gpc_id: raw.gpc_id,
        mmu_engine_id: engine_id,
        mmu_engine_type: engine_type,
        ve_id,
        unit,
    };
    let mut entry = raw.into_entry(source, kind);
    if entry.unrecognized.is_none() {
        entry.unrecognized = client_unrecognized.or(subcontext_unrecognized);
    }
    Ok(entry)
}

pub(crate) fn b069_is_valid(words: &[u32]) -> bool {
    b069::VALID.is_set(words)
}

pub(crate) fn b069_clear_valid(words: &mut [u32]) {
    b069::VALID.set(words, 0);
}

pub(crate) fn c369_is_valid(words: &[u32]) -> bool {
    c369::VALID.is_set(words)
}

pub(crate) fn c369_clear_valid(words: &mut [u32]) {
    c369::VALID.set(words, 0);
}
