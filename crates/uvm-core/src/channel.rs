//! User channels as seen by the fault path.
//!
//! The fault service only ever knows a faulting channel by the physical address of its instance
//! block. [`ChannelRegistry`] maps that back to the channel, and for graphics channels that share
//! a TSG, [`SubcontextInfo`] maps the faulting subcontext (VEID) to the VA space bound to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::address::GpuPhysAddress;
use crate::error::{Result, UvmError};

/// Opaque VA-space handle owned by the layer above the fault service.
pub type VaSpaceId = u64;

/// A channel registered by user space.
#[derive(Debug)]
pub struct UserChannel {
    pub name: String,
    /// VA space the channel was created in. Subcontext channels resolve faults through
    /// [`UserChannel::subcontext`] instead.
    pub va_space: VaSpaceId,
    pub instance_ptr: GpuPhysAddress,
    pub hw_channel_id: u32,
    pub hw_runlist_id: u32,
    pub tsg_id: Option<u32>,
    pub ve_id: u8,
    /// Token written to the runlist doorbell to reschedule the channel after a fault is cleared.
    pub clear_faulted_token: u32,
    /// Register offset of the channel's CHRAM entry.
    pub chram_offset: u32,
    /// Register offset of the runlist doorbell.
    pub doorbell_offset: u32,
    pub subcontext: Option<Arc<SubcontextInfo>>,
    detached: AtomicBool,
}

impl UserChannel {
    pub fn new(name: impl Into<String>, va_space: VaSpaceId, instance_ptr: GpuPhysAddress) -> Self {
        Self {
            name: name.into(),
            va_space,
            instance_ptr,
            hw_channel_id: 0,
            hw_runlist_id: 0,
            tsg_id: None,
            ve_id: 0,
            clear_faulted_token: 0,
            chram_offset: 0,
            doorbell_offset: 0,
            subcontext: None,
            detached: AtomicBool::new(false),
        }
    }

    /// Whether the channel has been unregistered. A detached channel may still be referenced by
    /// a fault batch in flight; its faults are dropped.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SubcontextSlot {
    va_space: VaSpaceId,
    ref_count: u32,
}

/// Per-TSG table of the VA space bound to each subcontext.
#[derive(Debug)]
pub struct SubcontextInfo {
    pub tsg_id: u32,
    slots: RwLock<Vec<Option<SubcontextSlot>>>,
}

impl SubcontextInfo {
    pub fn new(tsg_id: u32, max_subcontexts: usize) -> Self {
        Self {
            tsg_id,
            slots: RwLock::new(vec![None; max_subcontexts]),
        }
    }

    /// Binds `va_space` to `ve_id`, or takes another reference on an existing identical
    /// binding. Binding a different VA space to an occupied subcontext is an error.
    pub fn bind(&self, ve_id: u8, va_space: VaSpaceId) -> Result<()> {
        let mut slots = self.slots.write().map_err(|_| poisoned())?;
        let slot = slots.get_mut(usize::from(ve_id)).ok_or_else(|| {
            UvmError::invalid_state(format!("TSG {}: VEID {ve_id} out of range", self.tsg_id))
        })?;
        match slot {
            Some(bound) if bound.va_space == va_space => bound.ref_count += 1,
            Some(bound) => {
                return Err(UvmError::invalid_state(format!(
                    "TSG {}: VEID {ve_id} already bound to VA space {:#x}",
                    self.tsg_id, bound.va_space
                )))
            }
            None => {
                *slot = Some(SubcontextSlot {
                    va_space,
                    ref_count: 1,
                })
            }
        }
        Ok(())
    }

    /// Drops one reference. Returns true once the subcontext is free.
    pub fn unbind(&self, ve_id: u8) -> Result<bool> {
        let mut slots = self.slots.write().map_err(|_| poisoned())?;
        let Some(slot) = slots.get_mut(usize::from(ve_id)) else {
            return Ok(true);
        };
        let Some(bound) = slot else {
            return Err(UvmError::invalid_state(format!(
                "TSG {}: VEID {ve_id} is not bound",
                self.tsg_id
            )));
        };
        bound.ref_count -= 1;
        if bound.ref_count == 0 {
            *slot = None;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn va_space(&self, ve_id: u8) -> Option<VaSpaceId> {
        let slots = self.slots.read().ok()?;
        slots.get(usize::from(ve_id)).copied().flatten().map(|slot| slot.va_space)
    }
}

fn poisoned() -> UvmError {
    UvmError::invalid_state("channel registry lock poisoned")
}

#[derive(Debug, Default)]
struct Channels {
    by_instance: HashMap<GpuPhysAddress, Arc<UserChannel>>,
    subcontexts: HashMap<u32, Arc<SubcontextInfo>>,
}

/// Instance-pointer lookup of every registered channel on one GPU.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    inner: RwLock<Channels>,
    max_subcontexts: usize,
}

impl ChannelRegistry {
    /// `max_subcontexts` sizes the per-TSG subcontext tables.
    pub fn new(max_subcontexts: usize) -> Self {
        Self {
            inner: RwLock::default(),
            max_subcontexts,
        }
    }

    /// Registers `channel`, binding its subcontext when it belongs to a TSG.
    pub fn register(&self, mut channel: UserChannel) -> Result<Arc<UserChannel>> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        if inner.by_instance.contains_key(&channel.instance_ptr) {
            return Err(UvmError::invalid_state(format!(
                "channel {} instance pointer {} already registered",
                channel.name, channel.instance_ptr
            )));
        }
        if let Some(tsg_id) = channel.tsg_id {
            let max = self.max_subcontexts;
            let info = inner
                .subcontexts
                .entry(tsg_id)
                .or_insert_with(|| Arc::new(SubcontextInfo::new(tsg_id, max)))
                .clone();
            info.bind(channel.ve_id, channel.va_space)?;
            channel.subcontext = Some(info);
        }

        let channel = Arc::new(channel);
        inner
            .by_instance
            .insert(channel.instance_ptr, Arc::clone(&channel));
        tracing::debug!(
            channel = %channel.name,
            instance_ptr = %channel.instance_ptr,
            chid = channel.hw_channel_id,
            "channel registered"
        );
        Ok(channel)
    }

    /// Removes the channel, releasing its subcontext binding. Outstanding references see
    /// [`UserChannel::is_detached`].
    pub fn unregister(&self, instance_ptr: GpuPhysAddress) -> Result<Option<Arc<UserChannel>>> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let Some(channel) = inner.by_instance.remove(&instance_ptr) else {
            return Ok(None);
        };
        channel.detached.store(true, Ordering::Release);
        if let (Some(tsg_id), Some(info)) = (channel.tsg_id, &channel.subcontext) {
            info.unbind(channel.ve_id)?;
            let tsg_in_use = inner.by_instance.values().any(|c| c.tsg_id == Some(tsg_id));
            if !tsg_in_use {
                inner.subcontexts.remove(&tsg_id);
            }
        }
        Ok(Some(channel))
    }

    pub fn lookup(&self, instance_ptr: GpuPhysAddress) -> Option<Arc<UserChannel>> {
        let inner = self.inner.read().ok()?;
        inner.by_instance.get(&instance_ptr).cloned()
    }

    /// VA space a fault from `instance_ptr` and subcontext `ve_id` belongs to. `None` for
    /// instance pointers of channels that are gone or were never registered.
    pub fn resolve_va_space(&self, instance_ptr: GpuPhysAddress, ve_id: u8) -> Option<VaSpaceId> {
        let channel = self.lookup(instance_ptr)?;
        match &channel.subcontext {
            Some(info) => info.va_space(ve_id),
            None => Some(channel.va_space),
        }
    }

    pub fn subcontext(&self, tsg_id: u32) -> Option<Arc<SubcontextInfo>> {
        let inner = self.inner.read().ok()?;
        inner.subcontexts.get(&tsg_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map_or(0, |inner| inner.by_instance.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, va_space: VaSpaceId, inst: u64) -> UserChannel {
        UserChannel::new(name, va_space, GpuPhysAddress::vid(inst))
    }

    #[test]
    fn lookup_by_instance_pointer() {
        let registry = ChannelRegistry::new(64);
        registry.register(channel("a", 1, 0x1000)).unwrap();
        registry.register(channel("b", 2, 0x2000)).unwrap();

        assert_eq!(registry.lookup(GpuPhysAddress::vid(0x2000)).unwrap().name, "b");
        assert_eq!(registry.resolve_va_space(GpuPhysAddress::vid(0x1000), 0), Some(1));
        // Same offset, different aperture.
        assert!(registry.lookup(GpuPhysAddress::sys(0x1000)).is_none());
    }

    #[test]
    fn duplicate_instance_pointer_is_rejected() {
        let registry = ChannelRegistry::new(64);
        registry.register(channel("a", 1, 0x1000)).unwrap();
        let err = registry.register(channel("b", 2, 0x1000)).unwrap_err();
        assert!(matches!(err, UvmError::InvalidState(_)));
    }

    #[test]
    fn subcontexts_resolve_per_veid() {
        let registry = ChannelRegistry::new(64);
        let mut gr0 = channel("gr0", 10, 0x1000);
        gr0.tsg_id = Some(3);
        gr0.ve_id = 0;
        let mut gr1 = channel("gr1", 11, 0x2000);
        gr1.tsg_id = Some(3);
        gr1.ve_id = 1;
        registry.register(gr0).unwrap();
        registry.register(gr1).unwrap();

        // A fault reported through gr0's instance block from VEID 1 belongs to gr1's VA space.
        assert_eq!(registry.resolve_va_space(GpuPhysAddress::vid(0x1000), 1), Some(11));
        assert_eq!(registry.resolve_va_space(GpuPhysAddress::vid(0x1000), 2), None);
        assert!(registry.subcontext(3).is_some());
    }

    #[test]
    fn conflicting_subcontext_binding_is_rejected() {
        let info = SubcontextInfo::new(1, 4);
        info.bind(2, 7).unwrap();
        info.bind(2, 7).unwrap();
        assert!(info.bind(2, 8).is_err());
        assert!(info.bind(9, 7).is_err());

        assert!(!info.unbind(2).unwrap());
        assert!(info.unbind(2).unwrap());
        assert_eq!(info.va_space(2), None);
        assert!(info.unbind(2).is_err());
    }

    #[test]
    fn unregister_detaches_and_releases_tsg() {
        let registry = ChannelRegistry::new(8);
        let mut gr = channel("gr", 5, 0x3000);
        gr.tsg_id = Some(9);
        let held = registry.register(gr).unwrap();

        let removed = registry.unregister(GpuPhysAddress::vid(0x3000)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&held, &removed));
        assert!(held.is_detached());
        assert!(registry.is_empty());
        assert!(registry.subcontext(9).is_none());
        assert!(registry.unregister(GpuPhysAddress::vid(0x3000)).unwrap().is_none());
    }
}
