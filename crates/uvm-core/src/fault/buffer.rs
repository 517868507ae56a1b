//! Fault-buffer rings.
//!
//! The replayable buffer is a ring in memory the GPU writes records into, advancing `PUT`; the
//! driver consumes records and advances `GET`. A record's valid bit may become visible after
//! `PUT` has moved past it, so consuming a record always waits for the bit and clears it
//! afterwards.
//!
//! Non-replayable faults are copied out by the resource manager's interrupt handler into a
//! shadow buffer, which [`NonReplayableFaultBuffer::parse_shadow`] turns into entries.

use std::sync::Arc;

use uvm_hwref::fault::buffer_ptr;
use uvm_hwref::field::{words_from_le_bytes, words_to_le_bytes};

use crate::config::UvmConfig;
use crate::error::{Result, UvmError};
use crate::hal::GpuHal;
use crate::mem::{MemoryBus, RegisterIo};
use crate::spin::SpinPolicy;

use super::classify::triage;
use super::{FaultBufferEntry, FaultKind};

/// Where the replayable ring and its pointer registers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultBufferLayout {
    /// Bus address of entry 0.
    pub base: u64,
    pub entries: u32,
    pub get_register: u32,
    pub put_register: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Up to one batch, waiting for every record up to `PUT` to become valid.
    BatchAll,
    /// Up to one batch, stopping at the first record that is not valid yet.
    BatchReady,
    /// Everything up to `PUT`, re-reading `PUT` until the ring is empty.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Drop records up to the `PUT` value last read.
    CachedPut,
    /// Read `PUT` again first, dropping everything the GPU has reported so far.
    UpdatePut,
}

/// Driver-side state of the replayable fault ring.
#[derive(Debug)]
pub struct ReplayableFaultBuffer {
    gpu: Arc<GpuHal>,
    layout: FaultBufferLayout,
    cached_get: u32,
    cached_put: u32,
    batch_count: u32,
    strict: bool,
    spin: SpinPolicy,
    overflows: u64,
}

impl ReplayableFaultBuffer {
    pub fn new(gpu: Arc<GpuHal>, layout: FaultBufferLayout, config: &UvmConfig) -> Result<Self> {
        if !gpu.caps().replayable_faults || gpu.fault.entry_size == 0 {
            return Err(UvmError::unsupported(format!(
                "{} has no replayable fault buffer",
                gpu.name()
            )));
        }
        if layout.entries == 0 {
            return Err(UvmError::invalid_state("fault buffer has no entries"));
        }
        let batch_count = config.fault_batch_count.clamp(1, layout.entries);
        Ok(Self {
            gpu,
            layout,
            cached_get: 0,
            cached_put: 0,
            batch_count,
            strict: config.fault_strict_classification,
            spin: config.spin,
            overflows: 0,
        })
    }

    pub fn batch_count(&self) -> u32 {
        self.batch_count
    }

    pub fn cached_get(&self) -> u32 {
        self.cached_get
    }

    pub fn cached_put(&self) -> u32 {
        self.cached_put
    }

    /// Overflows observed since the buffer was created.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    fn entry_address(&self, index: u32) -> u64 {
        self.layout.base + u64::from(index) * self.gpu.fault.entry_size as u64
    }

    fn next(&self, index: u32) -> u32 {
        (index + 1) % self.layout.entries
    }

    fn read_put(&mut self, regs: &mut dyn RegisterIo) -> Result<u32> {
        let put = regs.read32(self.layout.put_register);
        if buffer_ptr::PUT_GETPTR_CORRUPTED.is_set(u64::from(put)) {
            return Err(UvmError::invalid_state(format!(
                "{}: fault buffer GET pointer reported corrupted",
                self.gpu.name()
            )));
        }
        let index = buffer_ptr::PTR.get32(put);
        if index >= self.layout.entries {
            return Err(UvmError::invalid_state(format!(
                "{}: fault buffer PUT {index} out of range",
                self.gpu.name()
            )));
        }
        self.cached_put = index;
        Ok(index)
    }

    /// Publishes `cached_get`, acknowledging a pending overflow or corruption report.
    fn write_get(&mut self, regs: &mut dyn RegisterIo) {
        let current = u64::from(regs.read32(self.layout.get_register));
        let mut value = buffer_ptr::PTR.value32(self.cached_get);
        if buffer_ptr::GET_OVERFLOW.is_set(current) {
            self.overflows += 1;
            tracing::warn!(gpu = %self.gpu.name(), "replayable fault buffer overflowed");
            value |= buffer_ptr::GET_OVERFLOW.value32(1);
        }
        if buffer_ptr::GET_GETPTR_CORRUPTED.is_set(current) {
            value |= buffer_ptr::GET_GETPTR_CORRUPTED.value32(1);
        }
        regs.write32(self.layout.get_register, value);
    }

    fn read_words(&self, mem: &mut dyn MemoryBus, index: u32) -> Vec<u32> {
        let mut bytes = vec![0u8; self.gpu.fault.entry_size];
        mem.read_bytes(self.entry_address(index), &mut bytes);
        words_from_le_bytes(&bytes)
    }

    fn wait_valid(&self, mem: &mut dyn MemoryBus, index: u32) -> Result<Vec<u32>> {
        let is_valid = self.gpu.fault.entry_is_valid;
        let mut words = self.read_words(mem, index);
        if !is_valid(&words) {
            self.spin.spin_until("fault buffer entry valid", || {
                words = self.read_words(mem, index);
                is_valid(&words)
            })?;
        }
        Ok(words)
    }

    fn clear_valid(&self, mem: &mut dyn MemoryBus, index: u32, words: &mut [u32]) {
        (self.gpu.fault.entry_clear_valid)(words);
        let mut bytes = vec![0u8; self.gpu.fault.entry_size];
        words_to_le_bytes(words, &mut bytes);
        mem.write_bytes(self.entry_address(index), &bytes);
    }

    /// Consumes records, parsing and triaging each one.
    ///
    /// `GET` is written back even when parsing fails, so a record that cannot be parsed is not
    /// seen again.
    pub fn fetch(
        &mut self,
        mem: &mut dyn MemoryBus,
        regs: &mut dyn RegisterIo,
        mode: FetchMode,
    ) -> Result<Vec<FaultBufferEntry>> {
        let mut entries = Vec::new();
        let result = self.fetch_into(mem, regs, mode, &mut entries);
        self.write_get(regs);
        result.map(|()| entries)
    }

    fn fetch_into(
        &mut self,
        mem: &mut dyn MemoryBus,
        regs: &mut dyn RegisterIo,
        mode: FetchMode,
        entries: &mut Vec<FaultBufferEntry>,
    ) -> Result<()> {
        let limit = match mode {
            FetchMode::All => usize::MAX,
            FetchMode::BatchAll | FetchMode::BatchReady => self.batch_count as usize,
        };
        if self.cached_get == self.cached_put {
            self.read_put(regs)?;
        }

        while entries.len() < limit {
            if self.cached_get == self.cached_put {
                if mode != FetchMode::All || self.read_put(regs)? == self.cached_get {
                    break;
                }
            }
            let index = self.cached_get;
            let mut words = if mode == FetchMode::BatchReady && !entries.is_empty() {
                let words = self.read_words(mem, index);
                if !(self.gpu.fault.entry_is_valid)(&words) {
                    break;
                }
                words
            } else {
                self.wait_valid(mem, index)?
            };

            let parsed = (self.gpu.fault.parse_replayable_entry)(&self.gpu.arch, &words);
            self.clear_valid(mem, index, &mut words);
            self.cached_get = self.next(index);

            let mut entry = parsed?;
            triage(&mut entry, self.gpu.caps(), self.strict)?;
            entries.push(entry);
        }
        tracing::trace!(
            gpu = %self.gpu.name(),
            fetched = entries.len(),
            get = self.cached_get,
            put = self.cached_put,
            "fetched fault batch"
        );
        Ok(())
    }

    /// Drops every record up to `PUT` without servicing it.
    pub fn flush(
        &mut self,
        mem: &mut dyn MemoryBus,
        regs: &mut dyn RegisterIo,
        mode: FlushMode,
    ) -> Result<()> {
        if mode == FlushMode::UpdatePut {
            self.read_put(regs)?;
        }
        let mut flushed = 0u32;
        while self.cached_get != self.cached_put {
            let index = self.cached_get;
            let mut words = match self.wait_valid(mem, index) {
                Ok(words) => words,
                Err(err) => {
                    self.write_get(regs);
                    return Err(err);
                }
            };
            self.clear_valid(mem, index, &mut words);
            self.cached_get = self.next(index);
            flushed += 1;
        }
        self.write_get(regs);
        tracing::trace!(gpu = %self.gpu.name(), ?mode, flushed, "flushed fault buffer");
        Ok(())
    }
}

/// Parser for the shadow copy of the non-replayable buffer.
#[derive(Debug)]
pub struct NonReplayableFaultBuffer {
    gpu: Arc<GpuHal>,
    strict: bool,
}

impl NonReplayableFaultBuffer {
    pub fn new(gpu: Arc<GpuHal>, config: &UvmConfig) -> Result<Self> {
        if !gpu.caps().non_replayable_faults || gpu.fault.entry_size == 0 {
            return Err(UvmError::unsupported(format!(
                "{} has no non-replayable fault buffer",
                gpu.name()
            )));
        }
        Ok(Self {
            gpu,
            strict: config.fault_strict_classification,
        })
    }

    pub fn gpu(&self) -> &Arc<GpuHal> {
        &self.gpu
    }

    /// Parses every valid record in `shadow`, tagging each with its position. Trailing bytes
    /// short of a full record are ignored.
    pub fn parse_shadow(&self, shadow: &[u8]) -> Result<Vec<FaultBufferEntry>> {
        let fault = &self.gpu.fault;
        let mut entries = Vec::new();
        for (index, record) in shadow.chunks_exact(fault.entry_size).enumerate() {
            let words = words_from_le_bytes(record);
            if !(fault.entry_is_valid)(&words) {
                continue;
            }
            let mut entry = (fault.parse_non_replayable_entry)(&self.gpu.arch, &words)?;
            entry.kind = FaultKind::NonReplayable {
                buffer_index: index as u32,
            };
            triage(&mut entry, self.gpu.caps(), self.strict)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
