//! Cancel, replay and faulted-channel recovery.
//!
//! Every operation here is a short kernel push on the fault-servicing channel, except the
//! register-based faulted-channel clear which pokes CHRAM directly.

use std::sync::Arc;

use crate::address::GpuPhysAddress;
use crate::channel::UserChannel;
use crate::error::{Result, UvmError};
use crate::hal::{wfi_membar, GpuHal, Membar, ReplayType};
use crate::mem::DeviceIo;
use crate::push::{ChannelConfig, Push, PushSink};
use crate::spin::SpinPolicy;

use super::FaultBufferEntry;

/// How a faulted channel was put back on the runlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearFaultedPath {
    /// `CLEAR_FAULTED` host method.
    Method,
    /// Direct CHRAM write plus runlist doorbell.
    Register,
    /// Driver-private software method, decoded by the hypervisor.
    SwMethod,
}

/// Issues recovery pushes for one GPU on a dedicated kernel channel.
#[derive(Debug)]
pub struct RecoveryCoordinator {
    gpu: Arc<GpuHal>,
    channel: ChannelConfig,
}

impl RecoveryCoordinator {
    pub fn new(gpu: Arc<GpuHal>, channel: ChannelConfig) -> Self {
        Self { gpu, channel }
    }

    pub fn gpu(&self) -> &Arc<GpuHal> {
        &self.gpu
    }

    fn submit(&self, sink: &mut dyn PushSink, build: impl FnOnce(&mut Push)) -> Result<()> {
        let mut push = Push::begin(Arc::clone(&self.gpu), &self.channel);
        build(&mut push);
        sink.submit(push.end()?)
    }

    /// Asks the MMU to retry every access still waiting on a fault.
    pub fn replay(&self, sink: &mut dyn PushSink, replay_type: ReplayType) -> Result<()> {
        tracing::trace!(gpu = %self.gpu.name(), ?replay_type, "replaying faults");
        let replay = self.gpu.host.replay_faults;
        self.submit(sink, |push| replay(push, replay_type))
    }

    /// Cancels every outstanding fault of the context behind `instance_ptr`.
    pub fn cancel_global(&self, sink: &mut dyn PushSink, instance_ptr: GpuPhysAddress) -> Result<()> {
        tracing::debug!(gpu = %self.gpu.name(), instance_ptr = %instance_ptr, "global fault cancel");
        let cancel = self.gpu.host.cancel_faults_global;
        self.submit(sink, |push| {
            cancel(push, instance_ptr);
            wfi_membar(push, Membar::Gpu);
        })
    }

    /// Cancels the outstanding faults of one uTLB of the context behind `instance_ptr`.
    pub fn cancel_targeted(
        &self,
        sink: &mut dyn PushSink,
        instance_ptr: GpuPhysAddress,
        gpc_id: u32,
        client_id: u32,
    ) -> Result<()> {
        tracing::debug!(
            gpu = %self.gpu.name(),
            instance_ptr = %instance_ptr,
            gpc_id,
            client_id,
            "targeted fault cancel"
        );
        let cancel = self.gpu.host.cancel_faults_targeted;
        self.submit(sink, |push| {
            cancel(push, instance_ptr, gpc_id, client_id);
            wfi_membar(push, Membar::Gpu);
        })
    }

    /// Cancels the accesses of each fatal entry to its page only, in one push. Entries without a
    /// cancel mode (non-replayable) cancel every access.
    pub fn cancel_va(
        &self,
        sink: &mut dyn PushSink,
        pdb: GpuPhysAddress,
        entries: &[&FaultBufferEntry],
    ) -> Result<()> {
        if !self.gpu.caps().fault_cancel_va {
            return Err(UvmError::assertion(format!(
                "{} cannot cancel faults by VA",
                self.gpu.name()
            )));
        }
        let cancel = self.gpu.host.cancel_faults_va;
        self.submit(sink, |push| {
            for entry in entries {
                let mode = entry.cancel_va_mode().unwrap_or_default();
                tracing::debug!(
                    address = format_args!("{:#x}", entry.fault_address),
                    instance_ptr = %entry.instance_ptr,
                    ?mode,
                    "VA fault cancel"
                );
                cancel(push, pdb, entry, mode);
            }
            wfi_membar(push, Membar::Gpu);
        })
    }

    /// Puts a channel stalled by a non-replayable fault back on its runlist, using the
    /// mechanism the architecture and virtualization mode allow.
    pub fn clear_faulted_channel(
        &self,
        io: &mut DeviceIo<'_>,
        channel: &UserChannel,
        entry: &FaultBufferEntry,
        spin: &SpinPolicy,
    ) -> Result<ClearFaultedPath> {
        let path = self.clear_faulted_path()?;
        tracing::debug!(
            gpu = %self.gpu.name(),
            channel = %channel.name,
            chid = channel.hw_channel_id,
            ?path,
            "clearing faulted channel"
        );
        let host = &self.gpu.host;
        match path {
            ClearFaultedPath::Register => {
                (host.clear_faulted_channel_register)(&mut *io.regs, channel, entry, spin)?
            }
            ClearFaultedPath::SwMethod => {
                let clear = host.clear_faulted_channel_sw_method;
                self.submit(&mut *io.sink, |push| clear(push, channel, entry))?
            }
            ClearFaultedPath::Method => {
                let clear = host.clear_faulted_channel_method;
                self.submit(&mut *io.sink, |push| clear(push, channel, entry))?
            }
        }
        Ok(path)
    }

    fn clear_faulted_path(&self) -> Result<ClearFaultedPath> {
        let caps = self.gpu.caps();
        let sriov_heavy = self.gpu.info.sriov_heavy;
        if sriov_heavy && caps.has_clear_faulted_channel_sw_method {
            Ok(ClearFaultedPath::SwMethod)
        } else if caps.has_clear_faulted_channel_register && !sriov_heavy {
            Ok(ClearFaultedPath::Register)
        } else if caps.has_clear_faulted_channel_method {
            Ok(ClearFaultedPath::Method)
        } else {
            Err(UvmError::assertion(format!(
                "{} has no way to clear a faulted channel",
                self.gpu.name()
            )))
        }
    }
}
