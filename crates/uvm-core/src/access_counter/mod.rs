//! Access-counter notifications.
//!
//! The GPU counts accesses to tracked regions and writes a notification into a ring once a
//! counter crosses the configured threshold. MIMC counters track accesses to memory in the
//! faulting GPU's own video memory, MOMC counters accesses to memory elsewhere. Notifications
//! either name a virtual address plus the instance block that made the access, or a physical
//! address in some processor's memory.

pub mod buffer;
pub mod service;

use std::fmt;

use uvm_hwref::access_counter as hw;
use uvm_hwref::access_counter::config as hw_config;
use uvm_hwref::field::join_u64;

use crate::address::{Aperture, GpuAddress, GpuPhysAddress};
use crate::config::{AccessCounterGranularity, AccessCounterSettings, MAX_ACCESS_COUNTER_THRESHOLD};
use crate::error::{Result, UvmError};
use crate::fault::parse::{instance_aperture, subcontext_id};
use crate::hal::{ArchHal, MmuEngineType};

pub use buffer::{AccessCounterBuffer, AccessCounterBufferLayout, NotificationBatch, NotificationFetchMode};
pub use service::{AccessCounterHandler, AccessCounterService, AccessCounterStats, NotificationAction, TrackedRegion};

/// Largest range a single reverse-map translation covers.
pub const MAX_TRANSLATION_SIZE: u64 = 2 << 20;

/// Each notification carries one accessed bit per 1/32 of the tracked region.
pub const SUB_GRANULARITY_REGIONS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessCounterType {
    /// Accesses to local video memory.
    Mimc,
    /// Accesses to memory outside the GPU.
    Momc,
}

impl fmt::Display for AccessCounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mimc => "mimc",
            Self::Momc => "momc",
        })
    }
}

/// Processor whose memory a physical notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessorId {
    Cpu,
    /// The GPU that raised the notification.
    LocalGpu,
    /// Peer GPU reached through peer mapping `n`.
    Peer(u8),
}

/// What the notification's address refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationTarget {
    Virtual {
        instance_ptr: GpuPhysAddress,
        mmu_engine_id: u16,
        mmu_engine_type: MmuEngineType,
        /// Subcontext of the accessing graphics engine, 0 for other engines.
        ve_id: u8,
    },
    Physical {
        resident: ProcessorId,
    },
}

/// One parsed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessCounterEntry {
    pub address: GpuAddress,
    pub counter_type: AccessCounterType,
    pub counter_value: u32,
    /// One bit per [`SUB_GRANULARITY_REGIONS`]th of the tracked region that saw accesses.
    pub sub_granularity: u32,
    /// Identify the counter for a targeted clear.
    pub bank: u32,
    pub tag: u32,
    pub target: NotificationTarget,
}

impl AccessCounterEntry {
    #[inline]
    pub fn is_virtual(&self) -> bool {
        matches!(self.target, NotificationTarget::Virtual { .. })
    }
}

/// Whether counters stop at the threshold or count on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseLimit {
    None,
    Full,
}

/// Precomputed geometry for one counter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterTypeConfig {
    pub granularity: AccessCounterGranularity,
    pub use_limit: UseLimit,
    /// Bytes covered by one reverse-map translation: the tracked region, capped at
    /// [`MAX_TRANSLATION_SIZE`].
    pub translation_size: u64,
    /// Bytes covered by one bit of [`AccessCounterEntry::sub_granularity`].
    pub sub_granularity_region_size: u64,
    pub translations_per_counter: u64,
}

impl CounterTypeConfig {
    pub fn new(granularity: AccessCounterGranularity, use_limit: UseLimit) -> Self {
        let bytes = granularity.bytes();
        let sub_granularity_region_size = match granularity {
            AccessCounterGranularity::Size64K => bytes,
            _ => bytes / u64::from(SUB_GRANULARITY_REGIONS),
        };
        let translation_size = bytes.min(MAX_TRANSLATION_SIZE);
        Self {
            granularity,
            use_limit,
            translation_size,
            sub_granularity_region_size,
            translations_per_counter: (bytes / translation_size).max(1),
        }
    }

    /// Bytes tracked by one counter.
    #[inline]
    pub fn region_size(&self) -> u64 {
        self.granularity.bytes()
    }
}

/// Programming of the counter unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCounterConfig {
    pub mimc: CounterTypeConfig,
    pub momc: CounterTypeConfig,
    /// Accesses a counter accumulates before it notifies.
    pub threshold: u32,
}

impl AccessCounterConfig {
    /// Both counter types track at the configured granularity and never saturate.
    pub fn from_settings(settings: &AccessCounterSettings) -> Self {
        let config = CounterTypeConfig::new(settings.granularity, UseLimit::Full);
        Self {
            mimc: config,
            momc: config,
            threshold: settings.threshold.clamp(1, MAX_ACCESS_COUNTER_THRESHOLD),
        }
    }

    pub fn for_type(&self, counter_type: AccessCounterType) -> &CounterTypeConfig {
        match counter_type {
            AccessCounterType::Mimc => &self.mimc,
            AccessCounterType::Momc => &self.momc,
        }
    }
}

fn granularity_value(granularity: AccessCounterGranularity) -> u32 {
    match granularity {
        AccessCounterGranularity::Size64K => hw_config::GRANULARITY_64K,
        AccessCounterGranularity::Size2M => hw_config::GRANULARITY_2M,
        AccessCounterGranularity::Size16M => hw_config::GRANULARITY_16M,
        AccessCounterGranularity::Size16G => hw_config::GRANULARITY_16G,
    }
}

fn use_limit_value(limit: UseLimit) -> u32 {
    match limit {
        UseLimit::None => hw_config::USE_LIMIT_NONE,
        UseLimit::Full => hw_config::USE_LIMIT_FULL,
    }
}

/// `ACCESS_CNTR_CONFIG` value for Volta and later.
pub(crate) fn config_register_value(config: &AccessCounterConfig) -> u32 {
    hw_config::MIMC_GRANULARITY.value32(granularity_value(config.mimc.granularity))
        | hw_config::MOMC_GRANULARITY.value32(granularity_value(config.momc.granularity))
        | hw_config::MIMC_USE_LIMIT.value32(use_limit_value(config.mimc.use_limit))
        | hw_config::MOMC_USE_LIMIT.value32(use_limit_value(config.momc.use_limit))
        | hw_config::THRESHOLD.value32(config.threshold.min(hw_config::THRESHOLD_MAX))
}

pub(crate) fn entry_is_valid(words: &[u32]) -> bool {
    hw::VALID.is_set(words)
}

pub(crate) fn entry_clear_valid(words: &mut [u32]) {
    hw::VALID.set(words, 0);
}

/// Parses a Volta-layout notification. `graphics_engine_base` is the first graphics MMU engine
/// id; subcontext ids count up from it.
pub(crate) fn parse_entry_with(
    arch: &ArchHal,
    words: &[u32],
    graphics_engine_base: u16,
) -> Result<AccessCounterEntry> {
    let address = join_u64(hw::ADDR_HI.get(words), hw::ADDR_LO.get(words));
    let counter_type = if hw::COUNTER_TYPE.get(words) == hw::COUNTER_TYPE_MIMC {
        AccessCounterType::Mimc
    } else {
        AccessCounterType::Momc
    };

    let (address, target) = if hw::TYPE.get(words) == hw::TYPE_GVA {
        let raw_aperture = hw::INST_APERTURE.get(words);
        let aperture = instance_aperture(raw_aperture).ok_or_else(|| {
            UvmError::invalid_state(format!(
                "{}: access counter instance aperture {raw_aperture:#x}",
                arch.name
            ))
        })?;
        let instance_ptr = GpuPhysAddress::new(
            aperture,
            (u64::from(hw::INST_HI.get(words)) << 32) | (u64::from(hw::INST_LO.get(words)) << 12),
        );
        let mmu_engine_id = hw::MMU_ENGINE_ID.get(words) as u16;
        let mmu_engine_type = (arch.mmu_engine_type)(mmu_engine_id);
        let ve_id = subcontext_id(mmu_engine_type, mmu_engine_id, graphics_engine_base)
            .map_err(|engine_id| {
                UvmError::invalid_state(format!(
                    "{}: access counter graphics engine {engine_id:#x} names no subcontext",
                    arch.name
                ))
            })?;
        let target = NotificationTarget::Virtual {
            instance_ptr,
            mmu_engine_id,
            mmu_engine_type,
            ve_id,
        };
        (GpuAddress::virt(address), target)
    } else {
        let (aperture, resident) = match hw::APERTURE.get(words) {
            hw::APERTURE_VID_MEM => (Aperture::Vid, ProcessorId::LocalGpu),
            hw::APERTURE_PEER_MEM => {
                let peer = hw::PEER_ID.get(words) as u8;
                (Aperture::Peer(peer), ProcessorId::Peer(peer))
            }
            hw::APERTURE_SYS_MEM_COHERENT => (Aperture::Sys, ProcessorId::Cpu),
            _ => (Aperture::SysNonCoherent, ProcessorId::Cpu),
        };
        let target = NotificationTarget::Physical { resident };
        (GpuAddress::phys(GpuPhysAddress::new(aperture, address)), target)
    };

    Ok(AccessCounterEntry {
        address,
        counter_type,
        counter_value: hw::COUNTER_VAL.get(words),
        sub_granularity: hw::SUB_GRANULARITY.get(words),
        bank: hw::BANK.get(words),
        tag: hw::NOTIFY_TAG.get(words),
        target,
    })
}
