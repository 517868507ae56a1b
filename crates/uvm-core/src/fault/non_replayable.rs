//! Non-replayable fault service.
//!
//! The faulting access has already been dropped by the time the record is seen, so there is
//! nothing to replay or cancel: serviceable faults get their page mapped and the stalled channel
//! is put back on its runlist; the rest are reported so the owning context can be torn down.

use crate::channel::ChannelRegistry;
use crate::config::UvmConfig;
use crate::error::Result;
use crate::hal::MmuEngineType;
use crate::mem::DeviceIo;
use crate::spin::SpinPolicy;

use super::buffer::NonReplayableFaultBuffer;
use super::classify::check_access_permissions;
use super::recovery::RecoveryCoordinator;
use super::service::{fatal_reason_of, FatalFaultEvent, FaultResolver, ServiceStats};
use super::FatalReason;

pub struct NonReplayableFaultService {
    buffer: NonReplayableFaultBuffer,
    recovery: RecoveryCoordinator,
    spin: SpinPolicy,
    stats: ServiceStats,
}

impl NonReplayableFaultService {
    pub fn new(buffer: NonReplayableFaultBuffer, recovery: RecoveryCoordinator, config: &UvmConfig) -> Self {
        Self {
            buffer,
            recovery,
            spin: config.spin,
            stats: ServiceStats::default(),
        }
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats
    }

    /// Services every record of a shadow-buffer snapshot.
    pub fn service(
        &mut self,
        io: &mut DeviceIo<'_>,
        shadow: &[u8],
        channels: &ChannelRegistry,
        resolver: &mut dyn FaultResolver,
    ) -> Result<ServiceStats> {
        let entries = self.buffer.parse_shadow(shadow)?;
        let mut stats = ServiceStats {
            batches: 1,
            fetched: entries.len() as u64,
            ..ServiceStats::default()
        };

        for mut entry in entries {
            let Some(channel) = channels.lookup(entry.instance_ptr).filter(|c| !c.is_detached()) else {
                tracing::debug!(
                    instance_ptr = %entry.instance_ptr,
                    "dropping non-replayable fault from unregistered channel"
                );
                stats.stale += 1;
                continue;
            };
            let va_space = channels.resolve_va_space(entry.instance_ptr, entry.source.ve_id);

            if !entry.is_fatal {
                match va_space {
                    None => entry.mark_fatal(FatalReason::InvalidAddress),
                    Some(va_space) => {
                        let address = entry.fault_address;
                        let access = check_access_permissions(&mut entry, |access| {
                            resolver.check_access(va_space, address, access)
                        });
                        if entry.is_invalid_prefetch {
                            stats.invalid_prefetch += 1;
                        }
                        if let Some(access) = access {
                            match resolver.service(va_space, address, access) {
                                Ok(()) => stats.serviced += 1,
                                Err(err) => {
                                    tracing::debug!(
                                        address = format_args!("{address:#x}"),
                                        "servicing non-replayable fault failed: {err}"
                                    );
                                    entry.mark_fatal(
                                        fatal_reason_of(&err).unwrap_or(FatalReason::InternalError),
                                    );
                                }
                            }
                        }
                    }
                }
            }

            if entry.is_fatal {
                let event = FatalFaultEvent::new(&entry, va_space);
                tracing::warn!(
                    gpu = %self.recovery.gpu().name(),
                    channel = %channel.name,
                    address = format_args!("{:#x}", event.address),
                    fault_type = %event.fault_type,
                    reason = %event.reason,
                    "fatal non-replayable fault"
                );
                resolver.report_fatal(&event);
                stats.fatal += 1;
                continue;
            }

            if matches!(
                entry.source.mmu_engine_type,
                MmuEngineType::Host | MmuEngineType::Ce
            ) {
                self.recovery
                    .clear_faulted_channel(io, &channel, &entry, &self.spin)?;
            }
        }

        self.stats.add(&stats);
        Ok(stats)
    }
}
