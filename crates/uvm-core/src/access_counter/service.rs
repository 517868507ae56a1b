//! Access-counter notification servicing.

use std::sync::Arc;

use crate::channel::{ChannelRegistry, VaSpaceId};
use crate::config::{AccessCounterSettings, UvmConfig};
use crate::error::Result;
use crate::hal::{wfi_membar, GpuHal, Membar};
use crate::mem::DeviceIo;
use crate::push::{ChannelConfig, Push, PushSink};

use super::buffer::{AccessCounterBuffer, NotificationFetchMode};
use super::{AccessCounterEntry, AccessCounterType, CounterTypeConfig, NotificationTarget};

/// What to do with the counter once its notification has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    /// Leave the counter alone; it will not notify again until it is cleared.
    Keep,
    /// Reset the counter so it can notify again.
    Clear,
}

/// One translation-sized slice of a tracked region that saw accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRegion {
    pub base: u64,
    pub size: u64,
    /// Accessed sub-regions within `[base, base + size)`, one bit per `sub_region_size` bytes.
    pub accessed: u32,
    pub sub_region_size: u64,
}

/// Migration policy for notified regions.
pub trait AccessCounterHandler {
    fn service_virtual(
        &mut self,
        va_space: VaSpaceId,
        entry: &AccessCounterEntry,
        region: &TrackedRegion,
    ) -> Result<NotificationAction>;

    fn service_physical(&mut self, entry: &AccessCounterEntry, region: &TrackedRegion) -> Result<NotificationAction>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AccessCounterStats {
    pub batches: u64,
    pub virt: u64,
    pub phys: u64,
    pub serviced: u64,
    /// Dropped because migration is off for the counter type or the instance is unknown.
    pub dropped: u64,
    pub cleared: u64,
}

impl AccessCounterStats {
    fn add(&mut self, other: &Self) {
        self.batches += other.batches;
        self.virt += other.virt;
        self.phys += other.phys;
        self.serviced += other.serviced;
        self.dropped += other.dropped;
        self.cleared += other.cleared;
    }
}

/// Slices of the counter's region that saw accesses, each at most one translation long.
pub fn tracked_regions(config: &CounterTypeConfig, entry: &AccessCounterEntry) -> Vec<TrackedRegion> {
    let region_size = config.region_size();
    let base = entry.address.address & !(region_size - 1);
    let sub_granularity = if config.translations_per_counter == 1 && region_size == config.sub_granularity_region_size {
        1
    } else {
        entry.sub_granularity
    };
    let sub_region_size = config.sub_granularity_region_size.min(config.translation_size);
    let sub_regions_per_translation = (config.translation_size / sub_region_size).max(1);

    (0..config.translations_per_counter)
        .filter_map(|index| {
            let offset = index * config.translation_size;
            let first = offset / config.sub_granularity_region_size;
            let accessed = if config.sub_granularity_region_size >= config.translation_size {
                (sub_granularity >> first) & 1
            } else {
                let mask = if sub_regions_per_translation >= 32 {
                    u32::MAX
                } else {
                    (1u32 << sub_regions_per_translation) - 1
                };
                sub_granularity.checked_shr(first as u32).unwrap_or(0) & mask
            };
            (accessed != 0).then_some(TrackedRegion {
                base: base + offset,
                size: config.translation_size,
                accessed,
                sub_region_size,
            })
        })
        .collect()
}

pub struct AccessCounterService {
    buffer: AccessCounterBuffer,
    channel: ChannelConfig,
    settings: AccessCounterSettings,
    stats: AccessCounterStats,
}

impl AccessCounterService {
    pub fn new(buffer: AccessCounterBuffer, channel: ChannelConfig, config: &UvmConfig) -> Self {
        Self {
            buffer,
            channel,
            settings: config.access_counters,
            stats: AccessCounterStats::default(),
        }
    }

    pub fn buffer(&self) -> &AccessCounterBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut AccessCounterBuffer {
        &mut self.buffer
    }

    pub fn stats(&self) -> AccessCounterStats {
        self.stats
    }

    fn gpu(&self) -> &Arc<GpuHal> {
        self.buffer.gpu()
    }

    fn submit(&self, sink: &mut dyn PushSink, build: impl FnOnce(&mut Push)) -> Result<()> {
        let mut push = Push::begin(Arc::clone(self.gpu()), &self.channel);
        build(&mut push);
        sink.submit(push.end()?)
    }

    pub fn clear_all(&self, sink: &mut dyn PushSink) -> Result<()> {
        tracing::debug!(gpu = %self.gpu().name(), "clearing all access counters");
        let clear = self.gpu().host.access_counter_clear_all;
        self.submit(sink, |push| {
            clear(push);
            wfi_membar(push, Membar::Gpu);
        })
    }

    pub fn clear_type(&self, sink: &mut dyn PushSink, counter_type: AccessCounterType) -> Result<()> {
        tracing::debug!(gpu = %self.gpu().name(), %counter_type, "clearing access counters");
        let clear = self.gpu().host.access_counter_clear_type;
        self.submit(sink, |push| {
            clear(push, counter_type);
            wfi_membar(push, Membar::Gpu);
        })
    }

    /// Clears the counters behind `entries` in one push.
    pub fn clear_targeted(&self, sink: &mut dyn PushSink, entries: &[AccessCounterEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let clear = self.gpu().host.access_counter_clear_targeted;
        self.submit(sink, |push| {
            for entry in entries {
                clear(push, entry);
            }
            wfi_membar(push, Membar::Gpu);
        })
    }

    fn migration_enabled(&self, counter_type: AccessCounterType) -> bool {
        match counter_type {
            AccessCounterType::Mimc => self.settings.mimc_migration,
            AccessCounterType::Momc => self.settings.momc_migration,
        }
    }

    /// Services notifications until the ring is drained.
    ///
    /// Notifications of a counter type with migration disabled are dropped and their counters
    /// cleared. Notifications from an instance block no channel is registered for are dropped
    /// without clearing.
    pub fn service(
        &mut self,
        io: &mut DeviceIo<'_>,
        channels: &ChannelRegistry,
        handler: &mut dyn AccessCounterHandler,
    ) -> Result<AccessCounterStats> {
        let mut stats = AccessCounterStats::default();
        loop {
            let batch = self
                .buffer
                .fetch(&mut *io.mem, &mut *io.regs, NotificationFetchMode::BatchReady)?;
            if batch.is_empty() {
                break;
            }
            stats.batches += 1;
            stats.virt += batch.virt.len() as u64;
            stats.phys += batch.phys.len() as u64;

            let mut to_clear = Vec::new();
            for entry in batch.virt.iter().chain(&batch.phys) {
                if !self.migration_enabled(entry.counter_type) {
                    stats.dropped += 1;
                    to_clear.push(*entry);
                    continue;
                }
                let config = self.buffer.config().for_type(entry.counter_type);
                let regions = tracked_regions(config, entry);
                let action = match entry.target {
                    NotificationTarget::Virtual {
                        instance_ptr, ve_id, ..
                    } => {
                        let Some(va_space) = channels.resolve_va_space(instance_ptr, ve_id) else {
                            tracing::debug!(
                                instance_ptr = %instance_ptr,
                                "dropping access counter notification from unknown instance"
                            );
                            stats.dropped += 1;
                            continue;
                        };
                        service_regions(&regions, |region| handler.service_virtual(va_space, entry, region))?
                    }
                    NotificationTarget::Physical { .. } => {
                        service_regions(&regions, |region| handler.service_physical(entry, region))?
                    }
                };
                stats.serviced += 1;
                if action == NotificationAction::Clear {
                    to_clear.push(*entry);
                }
            }

            self.clear_targeted(&mut *io.sink, &to_clear)?;
            stats.cleared += to_clear.len() as u64;
        }
        tracing::trace!(
            gpu = %self.gpu().name(),
            batches = stats.batches,
            serviced = stats.serviced,
            dropped = stats.dropped,
            "access counter service pass done"
        );
        self.stats.add(&stats);
        Ok(stats)
    }
}

/// Runs `service` over every region. The counter is cleared if any region asks for it.
fn service_regions(
    regions: &[TrackedRegion],
    mut service: impl FnMut(&TrackedRegion) -> Result<NotificationAction>,
) -> Result<NotificationAction> {
    let mut action = NotificationAction::Keep;
    for region in regions {
        if service(region)? == NotificationAction::Clear {
            action = NotificationAction::Clear;
        }
    }
    Ok(action)
}
