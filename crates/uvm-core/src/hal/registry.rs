//! HAL descriptor registry.
//!
//! Descriptors form one inheritance forest per role: a descriptor either supplies a complete
//! base table or derives from its parent's resolved table. The registry resolves every
//! descriptor once; lookups afterwards are plain map reads.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{Result, UvmError};

use super::tables::{AccessCounterBufferHal, ArchHal, CeHal, FaultBufferHal, HostHal, Sec2Hal};

/// How a descriptor's table is produced.
#[derive(Clone, Copy)]
pub enum Derive<T> {
    /// Complete table with no parent.
    Base(fn() -> T),
    /// Parent's resolved table with overrides applied.
    Override(fn(T) -> T),
}

#[derive(Clone, Copy)]
pub enum HalOps {
    Host(Derive<HostHal>),
    Ce(Derive<CeHal>),
    Arch(Derive<ArchHal>),
    Fault(Derive<FaultBufferHal>),
    AccessCounter(Derive<AccessCounterBufferHal>),
    Sec2(Derive<Sec2Hal>),
}

impl HalOps {
    fn role(&self) -> &'static str {
        match self {
            Self::Host(_) => "host",
            Self::Ce(_) => "ce",
            Self::Arch(_) => "arch",
            Self::Fault(_) => "fault",
            Self::AccessCounter(_) => "access_counter",
            Self::Sec2(_) => "sec2",
        }
    }
}

/// Class or architecture id plus the table it contributes.
#[derive(Clone, Copy)]
pub struct HalDescriptor {
    pub id: u32,
    pub parent_id: Option<u32>,
    pub ops: HalOps,
}

impl std::fmt::Debug for HalDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalDescriptor")
            .field("id", &format_args!("{:#x}", self.id))
            .field("parent_id", &self.parent_id.map(|id| format!("{id:#x}")))
            .field("role", &self.ops.role())
            .finish()
    }
}

impl HalDescriptor {
    pub const fn host_base(id: u32, base: fn() -> HostHal) -> Self {
        Self {
            id,
            parent_id: None,
            ops: HalOps::Host(Derive::Base(base)),
        }
    }

    pub const fn host(id: u32, parent: u32, derive: fn(HostHal) -> HostHal) -> Self {
        Self {
            id,
            parent_id: Some(parent),
            ops: HalOps::Host(Derive::Override(derive)),
        }
    }

    pub const fn ce_base(id: u32, base: fn() -> CeHal) -> Self {
        Self {
            id,
            parent_id: None,
            ops: HalOps::Ce(Derive::Base(base)),
        }
    }

    pub const fn ce(id: u32, parent: u32, derive: fn(CeHal) -> CeHal) -> Self {
        Self {
            id,
            parent_id: Some(parent),
            ops: HalOps::Ce(Derive::Override(derive)),
        }
    }

    pub const fn arch_base(id: u32, base: fn() -> ArchHal) -> Self {
        Self {
            id,
            parent_id: None,
            ops: HalOps::Arch(Derive::Base(base)),
        }
    }

    pub const fn arch(id: u32, parent: u32, derive: fn(ArchHal) -> ArchHal) -> Self {
        Self {
            id,
            parent_id: Some(parent),
            ops: HalOps::Arch(Derive::Override(derive)),
        }
    }

    pub const fn fault_base(id: u32, base: fn() -> FaultBufferHal) -> Self {
        Self {
            id,
            parent_id: None,
            ops: HalOps::Fault(Derive::Base(base)),
        }
    }

    pub const fn fault(id: u32, parent: u32, derive: fn(FaultBufferHal) -> FaultBufferHal) -> Self {
        Self {
            id,
            parent_id: Some(parent),
            ops: HalOps::Fault(Derive::Override(derive)),
        }
    }

    pub const fn access_counter_base(id: u32, base: fn() -> AccessCounterBufferHal) -> Self {
        Self {
            id,
            parent_id: None,
            ops: HalOps::AccessCounter(Derive::Base(base)),
        }
    }

    pub const fn access_counter(
        id: u32,
        parent: u32,
        derive: fn(AccessCounterBufferHal) -> AccessCounterBufferHal,
    ) -> Self {
        Self {
            id,
            parent_id: Some(parent),
            ops: HalOps::AccessCounter(Derive::Override(derive)),
        }
    }

    pub const fn sec2_base(id: u32, base: fn() -> Sec2Hal) -> Self {
        Self {
            id,
            parent_id: None,
            ops: HalOps::Sec2(Derive::Base(base)),
        }
    }
}

/// Resolved tables for every registered class and architecture id.
#[derive(Default)]
pub struct HalRegistry {
    host: HashMap<u32, HostHal>,
    ce: HashMap<u32, CeHal>,
    arch: HashMap<u32, ArchHal>,
    fault: HashMap<u32, FaultBufferHal>,
    access_counter: HashMap<u32, AccessCounterBufferHal>,
    sec2: HashMap<u32, Sec2Hal>,
}

impl std::fmt::Debug for HalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalRegistry")
            .field("host", &self.host.len())
            .field("ce", &self.ce.len())
            .field("arch", &self.arch.len())
            .field("fault", &self.fault.len())
            .field("access_counter", &self.access_counter.len())
            .field("sec2", &self.sec2.len())
            .finish()
    }
}

struct Resolver<T> {
    role: &'static str,
    pending: HashMap<u32, (Option<u32>, Derive<T>)>,
    resolved: HashMap<u32, T>,
    visiting: Vec<u32>,
}

impl<T: Copy> Resolver<T> {
    fn new(role: &'static str, entries: Vec<(u32, Option<u32>, Derive<T>)>) -> Result<Self> {
        let mut pending = HashMap::with_capacity(entries.len());
        for (id, parent, derive) in entries {
            if pending.insert(id, (parent, derive)).is_some() {
                return Err(UvmError::invalid_state(format!(
                    "duplicate {role} descriptor {id:#x}"
                )));
            }
        }
        Ok(Self {
            role,
            pending,
            resolved: HashMap::new(),
            visiting: Vec::new(),
        })
    }

    fn resolve(&mut self, id: u32) -> Result<T> {
        if let Some(table) = self.resolved.get(&id) {
            return Ok(*table);
        }
        let role = self.role;
        let Some(&(parent, derive)) = self.pending.get(&id) else {
            return Err(UvmError::invalid_state(format!(
                "{role} descriptor {id:#x} is missing"
            )));
        };
        if self.visiting.contains(&id) {
            return Err(UvmError::invalid_state(format!(
                "{role} descriptor {id:#x} inherits from itself"
            )));
        }

        self.visiting.push(id);
        let table = match (parent, derive) {
            (None, Derive::Base(base)) => base(),
            (Some(parent), Derive::Override(derive)) => {
                if !self.pending.contains_key(&parent) {
                    return Err(UvmError::invalid_state(format!(
                        "{role} descriptor {id:#x} derives from missing parent {parent:#x}"
                    )));
                }
                derive(self.resolve(parent)?)
            }
            (None, Derive::Override(_)) => {
                return Err(UvmError::invalid_state(format!(
                    "{role} descriptor {id:#x} overrides a table but names no parent"
                )));
            }
            (Some(parent), Derive::Base(_)) => {
                return Err(UvmError::invalid_state(format!(
                    "{role} descriptor {id:#x} is a base table but names parent {parent:#x}"
                )));
            }
        };
        self.visiting.pop();
        self.resolved.insert(id, table);
        Ok(table)
    }

    fn finish(mut self) -> Result<HashMap<u32, T>> {
        let mut ids: Vec<u32> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.resolve(id)?;
        }
        Ok(self.resolved)
    }
}

macro_rules! role_entries {
    ($descriptors:expr, $variant:ident) => {
        $descriptors
            .iter()
            .filter_map(|d| match d.ops {
                HalOps::$variant(derive) => Some((d.id, d.parent_id, derive)),
                _ => None,
            })
            .collect::<Vec<_>>()
    };
}

impl HalRegistry {
    /// Resolves `descriptors` into complete tables.
    ///
    /// Fails with [`UvmError::InvalidState`] on duplicate ids within a role, a parent id that is
    /// not registered for the same role, or a base/override mismatch.
    pub fn build(descriptors: &[HalDescriptor]) -> Result<Self> {
        let registry = Self {
            host: Resolver::new("host", role_entries!(descriptors, Host))?.finish()?,
            ce: Resolver::new("ce", role_entries!(descriptors, Ce))?.finish()?,
            arch: Resolver::new("arch", role_entries!(descriptors, Arch))?.finish()?,
            fault: Resolver::new("fault", role_entries!(descriptors, Fault))?.finish()?,
            access_counter: Resolver::new(
                "access_counter",
                role_entries!(descriptors, AccessCounter),
            )?
            .finish()?,
            sec2: Resolver::new("sec2", role_entries!(descriptors, Sec2))?.finish()?,
        };
        tracing::debug!(
            descriptors = descriptors.len(),
            host = registry.host.len(),
            ce = registry.ce.len(),
            arch = registry.arch.len(),
            "HAL registry built"
        );
        Ok(registry)
    }

    /// Registry over every supported class and architecture, built on first use.
    pub fn global() -> Result<&'static Self> {
        static REGISTRY: OnceLock<Result<HalRegistry>> = OnceLock::new();
        REGISTRY
            .get_or_init(|| Self::build(&crate::arch::descriptors()))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn host(&self, class: u32) -> Option<&HostHal> {
        self.host.get(&class)
    }

    pub fn ce(&self, class: u32) -> Option<&CeHal> {
        self.ce.get(&class)
    }

    pub fn arch(&self, arch_id: u32) -> Option<&ArchHal> {
        self.arch.get(&arch_id)
    }

    pub fn fault(&self, arch_id: u32) -> Option<&FaultBufferHal> {
        self.fault.get(&arch_id)
    }

    pub fn access_counter(&self, arch_id: u32) -> Option<&AccessCounterBufferHal> {
        self.access_counter.get(&arch_id)
    }

    pub fn sec2(&self, class: u32) -> Option<&Sec2Hal> {
        self.sec2.get(&class)
    }
}
