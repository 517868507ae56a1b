//! Replayable fault service loop.
//!
//! One pass fetches a batch, merges duplicates, resolves each fault to its VA space, checks
//! permissions and services what it can through a [`FaultResolver`]. Faults that cannot be
//! serviced are cancelled (by VA where the hardware supports it, otherwise per uTLB) and
//! reported; everything else is retried by a replay issued according to the configured
//! [`ReplayPolicy`].

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::address::GpuPhysAddress;
use crate::channel::{ChannelRegistry, VaSpaceId};
use crate::config::{ReplayPolicy, UvmConfig};
use crate::error::{Result, UvmError};
use crate::hal::ReplayType;
use crate::mem::DeviceIo;

use super::buffer::{FetchMode, FlushMode, ReplayableFaultBuffer};
use super::classify::check_access_permissions;
use super::coalesce::coalesce;
use super::recovery::RecoveryCoordinator;
use super::{AccessType, FatalReason, FaultBufferEntry, FaultType};

/// Faults are serviced one VA block at a time.
pub const VA_BLOCK_SHIFT: u32 = 21;

/// The VA-space side of fault servicing.
pub trait FaultResolver {
    /// Whether `access` to `address` is allowed by the VA space's logical permissions.
    fn check_access(
        &mut self,
        va_space: VaSpaceId,
        address: u64,
        access: AccessType,
    ) -> std::result::Result<(), FatalReason>;

    /// Makes the page resident and mapped on the faulting GPU for `access`.
    ///
    /// [`UvmError::FatalFault`] and [`UvmError::OutOfMemory`] make the fault fatal; any other
    /// error aborts the batch.
    fn service(&mut self, va_space: VaSpaceId, address: u64, access: AccessType) -> Result<()>;

    /// Page-directory base of the VA space on the faulting GPU, if it is still mapped there.
    fn pdb(&self, va_space: VaSpaceId) -> Option<GpuPhysAddress>;

    fn report_fatal(&mut self, event: &FatalFaultEvent);
}

/// A fault the driver gave up on, as reported to the owning VA space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalFaultEvent {
    /// `None` when the faulting context could not be matched to a VA space.
    pub va_space: Option<VaSpaceId>,
    pub address: u64,
    pub instance_ptr: GpuPhysAddress,
    pub fault_type: FaultType,
    pub access_type: AccessType,
    pub reason: FatalReason,
    pub is_replayable: bool,
    pub num_instances: u32,
}

impl FatalFaultEvent {
    pub(crate) fn new(entry: &FaultBufferEntry, va_space: Option<VaSpaceId>) -> Self {
        Self {
            va_space,
            address: entry.fault_address,
            instance_ptr: entry.instance_ptr,
            fault_type: entry.fault_type,
            access_type: entry.access_type,
            reason: entry.fatal_reason.unwrap_or(FatalReason::InternalError),
            is_replayable: entry.is_replayable(),
            num_instances: entry.num_instances,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStats {
    pub batches: u64,
    /// Raw records consumed.
    pub fetched: u64,
    /// Records merged into another.
    pub duplicates: u64,
    pub serviced: u64,
    pub fatal: u64,
    pub invalid_prefetch: u64,
    /// Faults from channels no longer registered.
    pub stale: u64,
    pub replays: u64,
    pub cancels: u64,
}

impl ServiceStats {
    pub(crate) fn add(&mut self, other: &Self) {
        self.batches += other.batches;
        self.fetched += other.fetched;
        self.duplicates += other.duplicates;
        self.serviced += other.serviced;
        self.fatal += other.fatal;
        self.invalid_prefetch += other.invalid_prefetch;
        self.stale += other.stale;
        self.replays += other.replays;
        self.cancels += other.cancels;
    }
}

/// Maps an error from [`FaultResolver::service`] to the reason the fault becomes fatal, or
/// `None` if the error should abort the batch.
pub(crate) fn fatal_reason_of(err: &UvmError) -> Option<FatalReason> {
    match err {
        UvmError::FatalFault { reason, .. } => Some(*reason),
        UvmError::OutOfMemory => Some(FatalReason::OutOfMemory),
        _ => None,
    }
}

struct Pending {
    entry: FaultBufferEntry,
    va_space: Option<VaSpaceId>,
    /// Position in fetch order.
    order: usize,
}

pub struct ReplayableFaultService {
    buffer: ReplayableFaultBuffer,
    recovery: RecoveryCoordinator,
    policy: ReplayPolicy,
    coalesce: bool,
    stats: ServiceStats,
}

impl ReplayableFaultService {
    pub fn new(buffer: ReplayableFaultBuffer, recovery: RecoveryCoordinator, config: &UvmConfig) -> Self {
        Self {
            buffer,
            recovery,
            policy: config.fault_replay_policy,
            coalesce: config.fault_coalesce,
            stats: ServiceStats::default(),
        }
    }

    /// Totals over every call to [`ReplayableFaultService::service`].
    pub fn stats(&self) -> ServiceStats {
        self.stats
    }

    pub fn buffer(&self) -> &ReplayableFaultBuffer {
        &self.buffer
    }

    /// Services batches until the buffer is drained or a batch contains a fatal fault.
    ///
    /// At least one replay is issued per call. Returns the statistics of this call.
    pub fn service(
        &mut self,
        io: &mut DeviceIo<'_>,
        channels: &ChannelRegistry,
        resolver: &mut dyn FaultResolver,
    ) -> Result<ServiceStats> {
        let mut stats = ServiceStats::default();
        let result = self.service_batches(io, channels, resolver, &mut stats);
        if result.is_ok() && (self.policy == ReplayPolicy::Once || stats.replays == 0) {
            self.replay(io, ReplayType::Start, &mut stats)?;
        }
        self.stats.add(&stats);
        result.map(|()| stats)
    }

    fn service_batches(
        &mut self,
        io: &mut DeviceIo<'_>,
        channels: &ChannelRegistry,
        resolver: &mut dyn FaultResolver,
        stats: &mut ServiceStats,
    ) -> Result<()> {
        loop {
            let raw = self
                .buffer
                .fetch(&mut *io.mem, &mut *io.regs, FetchMode::BatchReady)?;
            if raw.is_empty() {
                return Ok(());
            }
            let fetched = raw.len();
            let merged = coalesce(raw, self.coalesce);
            let duplicates = fetched - merged.len();
            stats.batches += 1;
            stats.fetched += fetched as u64;
            stats.duplicates += duplicates as u64;

            let mut batch = self.preprocess(merged, channels, stats);
            if let Err(err) = self.service_batch(io, resolver, &mut batch, stats) {
                tracing::error!(gpu = %self.recovery.gpu().name(), "fault batch failed: {err}");
                let reason = fatal_reason_of(&err).unwrap_or(FatalReason::InternalError);
                for pending in &mut batch {
                    if !pending.entry.is_invalid_prefetch {
                        pending.entry.mark_fatal(reason);
                    }
                }
                if let Err(cancel_err) = self.cancel_fatal(io, resolver, &batch, stats) {
                    tracing::error!("cancelling failed batch: {cancel_err}");
                }
                return Err(err);
            }

            if batch.iter().any(|p| p.entry.is_fatal) {
                return self.cancel_fatal(io, resolver, &batch, stats);
            }

            match self.policy {
                ReplayPolicy::Block | ReplayPolicy::Once => {}
                ReplayPolicy::Batch => self.replay(io, ReplayType::Start, stats)?,
                ReplayPolicy::BatchFlush => {
                    // Mostly duplicates means the GPU is re-faulting faster than the batch is
                    // serviced; drop what is queued instead of servicing it again.
                    let mode = if duplicates * 100 > fetched * 50 {
                        FlushMode::UpdatePut
                    } else {
                        FlushMode::CachedPut
                    };
                    self.buffer.flush(&mut *io.mem, &mut *io.regs, mode)?;
                    self.replay(io, ReplayType::Start, stats)?;
                }
            }
        }
    }

    /// Resolves VA spaces, drops stale faults and sorts by VA space, address and descending
    /// access type.
    fn preprocess(
        &self,
        entries: Vec<FaultBufferEntry>,
        channels: &ChannelRegistry,
        stats: &mut ServiceStats,
    ) -> Vec<Pending> {
        let mut batch = Vec::with_capacity(entries.len());
        for (order, entry) in entries.into_iter().enumerate() {
            let va_space = channels.resolve_va_space(entry.instance_ptr, entry.source.ve_id);
            if va_space.is_none() && !entry.is_fatal {
                // Fault from a channel torn down while the fault was in flight. Its accesses are
                // gone; replaying drops the record.
                tracing::debug!(
                    instance_ptr = %entry.instance_ptr,
                    address = format_args!("{:#x}", entry.fault_address),
                    "dropping fault from unregistered channel"
                );
                stats.stale += 1;
                continue;
            }
            batch.push(Pending {
                entry,
                va_space,
                order,
            });
        }
        batch.sort_by_key(|p| (p.va_space, p.entry.fault_address, Reverse(p.entry.access_type)));
        batch
    }

    fn service_batch(
        &mut self,
        io: &mut DeviceIo<'_>,
        resolver: &mut dyn FaultResolver,
        batch: &mut [Pending],
        stats: &mut ServiceStats,
    ) -> Result<()> {
        let mut current_block = None;
        for pending in batch.iter_mut() {
            let Some(va_space) = pending.va_space else {
                continue;
            };
            let block = (va_space, pending.entry.fault_address >> VA_BLOCK_SHIFT);
            if self.policy == ReplayPolicy::Block && current_block.is_some_and(|b| b != block) {
                self.replay(io, ReplayType::Start, stats)?;
            }
            current_block = Some(block);

            let entry = &mut pending.entry;
            if entry.is_fatal || entry.is_throttled {
                continue;
            }
            let address = entry.fault_address;
            let access = check_access_permissions(entry, |access| {
                resolver.check_access(va_space, address, access)
            });
            if entry.is_invalid_prefetch {
                stats.invalid_prefetch += 1;
            }
            let Some(access) = access else {
                continue;
            };
            match resolver.service(va_space, address, access) {
                Ok(()) => stats.serviced += 1,
                Err(err) => match fatal_reason_of(&err) {
                    Some(reason) => entry.mark_fatal(reason),
                    None => return Err(err),
                },
            }
        }
        if self.policy == ReplayPolicy::Block && current_block.is_some() {
            self.replay(io, ReplayType::Start, stats)?;
        }
        Ok(())
    }

    fn replay(&mut self, io: &mut DeviceIo<'_>, replay_type: ReplayType, stats: &mut ServiceStats) -> Result<()> {
        self.recovery.replay(&mut *io.sink, replay_type)?;
        stats.replays += 1;
        Ok(())
    }

    /// Cancels and reports every fatal fault in the batch, then flushes the buffer and replays
    /// so the remaining accesses make progress.
    fn cancel_fatal(
        &mut self,
        io: &mut DeviceIo<'_>,
        resolver: &mut dyn FaultResolver,
        batch: &[Pending],
        stats: &mut ServiceStats,
    ) -> Result<()> {
        let gpu = std::sync::Arc::clone(self.recovery.gpu());
        let mut global: BTreeSet<GpuPhysAddress> = BTreeSet::new();
        let replay_type;

        if gpu.caps().fault_cancel_va {
            let mut by_pdb: BTreeMap<GpuPhysAddress, Vec<&FaultBufferEntry>> = BTreeMap::new();
            for pending in batch.iter().filter(|p| p.entry.is_fatal) {
                let pdb = pending.va_space.and_then(|va_space| resolver.pdb(va_space));
                match pdb {
                    Some(pdb) if !pending.entry.needs_global_cancel => {
                        by_pdb.entry(pdb).or_default().push(&pending.entry)
                    }
                    _ => {
                        global.insert(pending.entry.instance_ptr);
                    }
                }
            }
            for (pdb, entries) in &by_pdb {
                self.recovery.cancel_va(&mut *io.sink, *pdb, entries)?;
                stats.cancels += entries.len() as u64;
            }
            replay_type = ReplayType::Start;
        } else {
            // Without VA cancel, a targeted cancel drops every pending access of one uTLB. Only
            // cancel uTLBs whose oldest fault is fatal; the rest fault again after the replay.
            let mut oldest: HashMap<(GpuPhysAddress, u32), &Pending> = HashMap::new();
            for pending in batch {
                let Some(utlb) = pending.entry.source.utlb_id() else {
                    continue;
                };
                let slot = oldest.entry((pending.entry.instance_ptr, utlb)).or_insert(pending);
                if pending.order < slot.order {
                    *slot = pending;
                }
            }
            let mut targets: BTreeMap<(GpuPhysAddress, u32), (u32, u32)> = BTreeMap::new();
            for pending in batch.iter().filter(|p| p.entry.is_fatal) {
                let entry = &pending.entry;
                if entry.needs_global_cancel {
                    global.insert(entry.instance_ptr);
                    continue;
                }
                let Some(utlb) = entry.source.utlb_id() else {
                    global.insert(entry.instance_ptr);
                    continue;
                };
                let first_is_fatal = oldest
                    .get(&(entry.instance_ptr, utlb))
                    .is_some_and(|first| first.entry.is_fatal);
                if first_is_fatal {
                    targets.insert(
                        (entry.instance_ptr, utlb),
                        (u32::from(entry.source.gpc_id), u32::from(entry.source.client_id)),
                    );
                }
            }
            for (&(instance_ptr, _), &(gpc_id, client_id)) in &targets {
                self.recovery
                    .cancel_targeted(&mut *io.sink, instance_ptr, gpc_id, client_id)?;
                stats.cancels += 1;
            }
            replay_type = ReplayType::StartAckAll;
        }

        for instance_ptr in &global {
            self.recovery.cancel_global(&mut *io.sink, *instance_ptr)?;
            stats.cancels += 1;
        }

        for pending in batch.iter().filter(|p| p.entry.is_fatal) {
            let event = FatalFaultEvent::new(&pending.entry, pending.va_space);
            tracing::warn!(
                gpu = %gpu.name(),
                address = format_args!("{:#x}", event.address),
                instance_ptr = %event.instance_ptr,
                fault_type = %event.fault_type,
                access_type = %event.access_type,
                reason = %event.reason,
                "fatal fault"
            );
            resolver.report_fatal(&event);
            stats.fatal += 1;
        }

        self.buffer
            .flush(&mut *io.mem, &mut *io.regs, FlushMode::UpdatePut)?;
        self.replay(io, replay_type, stats)
    }
}
