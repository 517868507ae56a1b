//! Notification ring.
//!
//! Same producer/consumer protocol as the replayable fault ring: the GPU advances `PUT`, the
//! driver consumes and advances `GET`, and a record's valid bit may trail `PUT`.

use std::sync::Arc;

use uvm_hwref::access_counter::info;
use uvm_hwref::fault::buffer_ptr;
use uvm_hwref::field::{words_from_le_bytes, words_to_le_bytes};

use crate::config::UvmConfig;
use crate::error::{Result, UvmError};
use crate::fault::FlushMode;
use crate::hal::GpuHal;
use crate::mem::{MemoryBus, RegisterIo};
use crate::spin::SpinPolicy;

use super::{AccessCounterConfig, AccessCounterEntry, NotificationTarget};

/// Where the ring and its registers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCounterBufferLayout {
    pub base: u64,
    pub entries: u32,
    pub get_register: u32,
    pub put_register: u32,
    /// `ACCESS_CNTR_BUFFER_INFO`: enable bit plus overflow status.
    pub info_register: u32,
    pub config_register: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationFetchMode {
    /// Up to one batch, stopping at the first record that is not valid yet.
    BatchReady,
    /// Everything up to `PUT`, re-reading `PUT` until the ring is empty.
    All,
}

/// Notifications of one fetch, split by target and sorted for servicing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NotificationBatch {
    /// Sorted by instance pointer, then subcontext.
    pub virt: Vec<AccessCounterEntry>,
    /// Sorted by resident processor.
    pub phys: Vec<AccessCounterEntry>,
}

impl NotificationBatch {
    pub fn len(&self) -> usize {
        self.virt.len() + self.phys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.virt.is_empty() && self.phys.is_empty()
    }

    fn sort(&mut self) {
        self.virt.sort_by_key(|entry| match entry.target {
            NotificationTarget::Virtual {
                instance_ptr,
                ve_id,
                ..
            } => Some((instance_ptr, ve_id)),
            NotificationTarget::Physical { .. } => None,
        });
        self.phys.sort_by_key(|entry| match entry.target {
            NotificationTarget::Physical { resident } => Some(resident),
            NotificationTarget::Virtual { .. } => None,
        });
    }
}

#[derive(Debug)]
pub struct AccessCounterBuffer {
    gpu: Arc<GpuHal>,
    layout: AccessCounterBufferLayout,
    config: AccessCounterConfig,
    cached_get: u32,
    cached_put: u32,
    batch_count: u32,
    spin: SpinPolicy,
    enabled: bool,
    overflows: u64,
}

impl AccessCounterBuffer {
    pub fn new(gpu: Arc<GpuHal>, layout: AccessCounterBufferLayout, config: &UvmConfig) -> Result<Self> {
        if !gpu.caps().access_counters || gpu.access_counter.entry_size == 0 {
            return Err(UvmError::unsupported(format!(
                "{} has no access counters",
                gpu.name()
            )));
        }
        if layout.entries == 0 {
            return Err(UvmError::invalid_state("access counter buffer has no entries"));
        }
        Ok(Self {
            gpu,
            layout,
            config: AccessCounterConfig::from_settings(&config.access_counters),
            cached_get: 0,
            cached_put: 0,
            batch_count: config.fault_batch_count.clamp(1, layout.entries),
            spin: config.spin,
            enabled: false,
            overflows: 0,
        })
    }

    pub fn gpu(&self) -> &Arc<GpuHal> {
        &self.gpu
    }

    pub fn config(&self) -> &AccessCounterConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn cached_get(&self) -> u32 {
        self.cached_get
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Programs the counter configuration and turns notifications on.
    pub fn enable(&mut self, regs: &mut dyn RegisterIo) {
        let value = (self.gpu.access_counter.config_value)(&self.config);
        regs.write32(self.layout.config_register, value);
        let current = regs.read32(self.layout.info_register);
        regs.write32(self.layout.info_register, info::EN.set32(current, 1));
        self.cached_get = buffer_ptr::PTR.get32(regs.read32(self.layout.get_register));
        self.cached_put = self.cached_get;
        self.enabled = true;
        tracing::debug!(
            gpu = %self.gpu.name(),
            config = format_args!("{value:#x}"),
            threshold = self.config.threshold,
            "access counter notifications enabled"
        );
    }

    /// Turns notifications off. Records already in the ring stay there until flushed.
    pub fn disable(&mut self, regs: &mut dyn RegisterIo) {
        let current = regs.read32(self.layout.info_register);
        regs.write32(self.layout.info_register, info::EN.set32(current, 0));
        self.enabled = false;
        tracing::debug!(gpu = %self.gpu.name(), "access counter notifications disabled");
    }

    fn entry_address(&self, index: u32) -> u64 {
        self.layout.base + u64::from(index) * self.gpu.access_counter.entry_size as u64
    }

    fn next(&self, index: u32) -> u32 {
        (index + 1) % self.layout.entries
    }

    fn read_words(&self, mem: &mut dyn MemoryBus, index: u32) -> Vec<u32> {
        let mut bytes = vec![0u8; self.gpu.access_counter.entry_size];
        mem.read_bytes(self.entry_address(index), &mut bytes);
        words_from_le_bytes(&bytes)
    }

    fn read_put(&mut self, regs: &mut dyn RegisterIo) -> Result<u32> {
        let index = buffer_ptr::PTR.get32(regs.read32(self.layout.put_register));
        if index >= self.layout.entries {
            return Err(UvmError::invalid_state(format!(
                "{}: access counter PUT {index} out of range",
                self.gpu.name()
            )));
        }
        self.cached_put = index;
        Ok(index)
    }

    fn write_get(&mut self, regs: &mut dyn RegisterIo) {
        let current = regs.read32(self.layout.get_register);
        if buffer_ptr::PTR.get32(current) != self.cached_get {
            regs.write32(self.layout.get_register, buffer_ptr::PTR.value32(self.cached_get));
        }
    }

    /// Counts and acknowledges an overflow report. Notifications lost to an overflow are not
    /// recoverable; the counters involved keep counting and notify again.
    fn check_overflow(&mut self, regs: &mut dyn RegisterIo) {
        let status = regs.read32(self.layout.info_register);
        if info::OVERFLOW.is_set(u64::from(status)) {
            self.overflows += 1;
            tracing::warn!(gpu = %self.gpu.name(), "access counter buffer overflowed");
            regs.write32(self.layout.info_register, status);
        }
    }

    /// Whether notifications are waiting, reading `PUT` only when the ring looks empty.
    pub fn pending(&mut self, mem: &mut dyn MemoryBus, regs: &mut dyn RegisterIo) -> Result<bool> {
        if self.cached_get != self.cached_put {
            return Ok(true);
        }
        let words = self.read_words(mem, self.cached_get);
        if (self.gpu.access_counter.entry_is_valid)(&words) {
            return Ok(true);
        }
        Ok(self.read_put(regs)? != self.cached_get)
    }

    /// Consumes notifications. Physical addresses are aligned down to their translation size.
    pub fn fetch(
        &mut self,
        mem: &mut dyn MemoryBus,
        regs: &mut dyn RegisterIo,
        mode: NotificationFetchMode,
    ) -> Result<NotificationBatch> {
        self.check_overflow(regs);
        let mut batch = NotificationBatch::default();
        let result = self.fetch_into(mem, regs, mode, &mut batch);
        self.write_get(regs);
        result?;
        batch.sort();
        tracing::trace!(
            gpu = %self.gpu.name(),
            virt = batch.virt.len(),
            phys = batch.phys.len(),
            get = self.cached_get,
            "fetched access counter notifications"
        );
        Ok(batch)
    }

    fn fetch_into(
        &mut self,
        mem: &mut dyn MemoryBus,
        regs: &mut dyn RegisterIo,
        mode: NotificationFetchMode,
        batch: &mut NotificationBatch,
    ) -> Result<()> {
        let limit = match mode {
            NotificationFetchMode::BatchReady => self.batch_count as usize,
            NotificationFetchMode::All => usize::MAX,
        };
        let hal = self.gpu.access_counter;
        if self.cached_get == self.cached_put {
            self.read_put(regs)?;
        }

        while batch.len() < limit {
            if self.cached_get == self.cached_put
                && (mode == NotificationFetchMode::BatchReady || self.read_put(regs)? == self.cached_get)
            {
                break;
            }
            let index = self.cached_get;
            let mut words = self.read_words(mem, index);
            if !(hal.entry_is_valid)(&words) {
                if mode == NotificationFetchMode::BatchReady && !batch.is_empty() {
                    break;
                }
                self.spin.spin_until("access counter entry valid", || {
                    words = self.read_words(mem, index);
                    (hal.entry_is_valid)(&words)
                })?;
            }

            let parsed = (hal.parse_entry)(&self.gpu.arch, &words);
            (hal.entry_clear_valid)(&mut words);
            let mut bytes = vec![0u8; hal.entry_size];
            words_to_le_bytes(&words, &mut bytes);
            mem.write_bytes(self.entry_address(index), &bytes);
            self.cached_get = self.next(index);

            let mut entry = parsed?;
            if entry.is_virtual() {
                batch.virt.push(entry);
            } else {
                let translation_size = self.config.for_type(entry.counter_type).translation_size;
                entry.address.address &= !(translation_size - 1);
                batch.phys.push(entry);
            }
        }
        Ok(())
    }

    /// Drops every notification up to `PUT` without servicing it.
    pub fn flush(&mut self, mem: &mut dyn MemoryBus, regs: &mut dyn RegisterIo, mode: FlushMode) -> Result<()> {
        if mode == FlushMode::UpdatePut {
            self.read_put(regs)?;
        }
        let hal = self.gpu.access_counter;
        let mut flushed = 0u32;
        while self.cached_get != self.cached_put {
            let index = self.cached_get;
            let mut words = self.read_words(mem, index);
            if !(hal.entry_is_valid)(&words) {
                let waited = self.spin.spin_until("access counter entry valid", || {
                    words = self.read_words(mem, index);
                    (hal.entry_is_valid)(&words)
                });
                if let Err(err) = waited {
                    self.write_get(regs);
                    return Err(err);
                }
            }
            (hal.entry_clear_valid)(&mut words);
            let mut bytes = vec![0u8; hal.entry_size];
            words_to_le_bytes(&words, &mut bytes);
            mem.write_bytes(self.entry_address(index), &bytes);
            self.cached_get = self.next(index);
            flushed += 1;
        }
        self.write_get(regs);
        tracing::trace!(gpu = %self.gpu.name(), ?mode, flushed, "flushed access counter buffer");
        Ok(())
    }
}
