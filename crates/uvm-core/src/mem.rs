//! Memory and register access used by the fault and access-counter buffers and by channel
//! recovery.

use std::collections::HashMap;

/// Access to memory the driver shares with the GPU (fault buffers, notification rings).
///
/// Offsets are bus addresses as seen by the CPU mapping of the buffer.
pub trait MemoryBus {
    fn read_bytes(&mut self, paddr: u64, dst: &mut [u8]);
    fn write_bytes(&mut self, paddr: u64, src: &[u8]);

    #[inline]
    fn read_u32(&mut self, paddr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read_bytes(paddr, &mut buf);
        u32::from_le_bytes(buf)
    }

    #[inline]
    fn read_u64(&mut self, paddr: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read_bytes(paddr, &mut buf);
        u64::from_le_bytes(buf)
    }

    #[inline]
    fn write_u32(&mut self, paddr: u64, value: u32) {
        self.write_bytes(paddr, &value.to_le_bytes());
    }

    #[inline]
    fn write_u64(&mut self, paddr: u64, value: u64) {
        self.write_bytes(paddr, &value.to_le_bytes());
    }
}

impl<T: MemoryBus + ?Sized> MemoryBus for &mut T {
    #[inline]
    fn read_bytes(&mut self, paddr: u64, dst: &mut [u8]) {
        <T as MemoryBus>::read_bytes(&mut **self, paddr, dst)
    }

    #[inline]
    fn write_bytes(&mut self, paddr: u64, src: &[u8]) {
        <T as MemoryBus>::write_bytes(&mut **self, paddr, src)
    }
}

/// 32-bit MMIO register window (BAR0 or the usermode region).
pub trait RegisterIo {
    fn read32(&mut self, offset: u32) -> u32;
    fn write32(&mut self, offset: u32, value: u32);

    /// Orders prior register writes before subsequent ones.
    fn wmb(&mut self) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &mut T {
    #[inline]
    fn read32(&mut self, offset: u32) -> u32 {
        <T as RegisterIo>::read32(&mut **self, offset)
    }

    #[inline]
    fn write32(&mut self, offset: u32, value: u32) {
        <T as RegisterIo>::write32(&mut **self, offset, value)
    }

    #[inline]
    fn wmb(&mut self) {
        <T as RegisterIo>::wmb(&mut **self)
    }
}

/// Everything a service loop touches on the device: shared buffers, registers, and the channel
/// pushes are submitted to.
pub struct DeviceIo<'a> {
    pub mem: &'a mut dyn MemoryBus,
    pub regs: &'a mut dyn RegisterIo,
    pub sink: &'a mut dyn crate::push::PushSink,
}

impl<'a> DeviceIo<'a> {
    pub fn new(
        mem: &'a mut dyn MemoryBus,
        regs: &'a mut dyn RegisterIo,
        sink: &'a mut dyn crate::push::PushSink,
    ) -> Self {
        Self { mem, regs, sink }
    }
}

const PAGE_SHIFT: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Sparse byte-addressable memory backed by 4 KiB pages allocated on first write. Unwritten
/// memory reads as zero.
#[derive(Debug, Default, Clone)]
pub struct PagedMemory {
    pages: HashMap<u64, Box<[u8; PAGE_SIZE]>>,
}

impl PagedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }
}

impl MemoryBus for PagedMemory {
    fn read_bytes(&mut self, paddr: u64, dst: &mut [u8]) {
        for (i, slot) in dst.iter_mut().enumerate() {
            let addr = paddr.wrapping_add(i as u64);
            *slot = self
                .pages
                .get(&(addr >> PAGE_SHIFT))
                .map_or(0, |page| page[(addr as usize) & (PAGE_SIZE - 1)]);
        }
    }

    fn write_bytes(&mut self, paddr: u64, src: &[u8]) {
        for (i, byte) in src.iter().copied().enumerate() {
            let addr = paddr.wrapping_add(i as u64);
            let page = self
                .pages
                .entry(addr >> PAGE_SHIFT)
                .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
            page[(addr as usize) & (PAGE_SIZE - 1)] = byte;
        }
    }
}

/// Register file that records every access. Reads of never-written registers return zero.
#[derive(Debug, Default, Clone)]
pub struct RecordingRegisters {
    values: HashMap<u32, u32>,
    pub log: Vec<RegisterAccess>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAccess {
    Read { offset: u32, value: u32 },
    Write { offset: u32, value: u32 },
    Wmb,
}

impl RecordingRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a register value without logging an access.
    pub fn poke(&mut self, offset: u32, value: u32) {
        self.values.insert(offset, value);
    }

    pub fn peek(&self, offset: u32) -> u32 {
        self.values.get(&offset).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.log
            .iter()
            .filter_map(|access| match *access {
                RegisterAccess::Write { offset, value } => Some((offset, value)),
                _ => None,
            })
            .collect()
    }
}

impl RegisterIo for RecordingRegisters {
    fn read32(&mut self, offset: u32) -> u32 {
        let value = self.peek(offset);
        self.log.push(RegisterAccess::Read { offset, value });
        value
    }

    fn write32(&mut self, offset: u32, value: u32) {
        self.values.insert(offset, value);
        self.log.push(RegisterAccess::Write { offset, value });
    }

    fn wmb(&mut self) {
        self.log.push(RegisterAccess::Wmb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paged_memory_reads_zero_until_written() {
        let mut mem = PagedMemory::new();
        assert_eq!(mem.read_u64(0x1234_5000), 0);
        assert_eq!(mem.resident_pages(), 0);

        // Straddles a page boundary.
        mem.write_u64(0xFFC, 0x1122_3344_5566_7788);
        assert_eq!(mem.read_u64(0xFFC), 0x1122_3344_5566_7788);
        assert_eq!(mem.read_u32(0x1000), 0x1122_3344);
        assert_eq!(mem.resident_pages(), 2);
    }

    #[test]
    fn recording_registers_log_in_order() {
        let mut regs = RecordingRegisters::new();
        regs.poke(0x10, 7);
        assert_eq!(regs.read32(0x10), 7);
        regs.write32(0x20, 1);
        regs.wmb();
        assert_eq!(
            regs.log,
            vec![
                RegisterAccess::Read { offset: 0x10, value: 7 },
                RegisterAccess::Write { offset: 0x20, value: 1 },
                RegisterAccess::Wmb,
            ]
        );
        assert_eq!(regs.writes(), vec![(0x20, 1)]);
    }
}
