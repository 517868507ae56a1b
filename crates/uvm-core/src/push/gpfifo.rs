use uvm_hwref::host::gp_entry;

use crate::hal::GpfifoSync;

/// GPFIFO ring descriptor pointing at a pushbuffer segment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpfifoEntry(pub u64);

impl GpfifoEntry {
    /// Builds an entry for `length_words` words at `va`. `privileged` marks the segment as
    /// kernel-issued, which only architectures before Ampere honor.
    pub fn new(va: u64, length_words: u32, sync: GpfifoSync, privileged: bool) -> Self {
        debug_assert_eq!(va & 0x3, 0, "pushbuffer segments are word aligned");
        let entry0 = gp_entry::ENTRY0_FETCH.value32(gp_entry::ENTRY0_FETCH_UNCONDITIONAL)
            | gp_entry::ENTRY0_GET.value32((va >> 2) as u32);
        let sync = match sync {
            GpfifoSync::Proceed => gp_entry::ENTRY1_SYNC_PROCEED,
            GpfifoSync::Wait => gp_entry::ENTRY1_SYNC_WAIT,
        };
        let mut entry1 = gp_entry::ENTRY1_GET_HI.value32((va >> 32) as u32)
            | gp_entry::ENTRY1_LEVEL.value32(gp_entry::ENTRY1_LEVEL_MAIN)
            | gp_entry::ENTRY1_LENGTH.value32(length_words)
            | gp_entry::ENTRY1_SYNC.value32(sync);
        if privileged {
            entry1 |= gp_entry::ENTRY1_PRIV.value32(gp_entry::ENTRY1_PRIV_KERNEL);
        }
        Self(uvm_hwref::join_u64(entry1, entry0))
    }

    /// Zero-length entry the front-end skips over.
    pub fn noop() -> Self {
        Self(
            (gp_entry::ENTRY1_OPCODE.value(gp_entry::ENTRY1_OPCODE_NOP as u64)) << 32
                | gp_entry::ENTRY0_FETCH.value(gp_entry::ENTRY0_FETCH_UNCONDITIONAL as u64),
        )
    }

    pub fn to_words(self) -> [u32; 2] {
        [self.0 as u32, (self.0 >> 32) as u32]
    }

    pub fn va(self) -> u64 {
        let [entry0, entry1] = self.to_words();
        (u64::from(gp_entry::ENTRY1_GET_HI.get32(entry1)) << 32)
            | (u64::from(gp_entry::ENTRY0_GET.get32(entry0)) << 2)
    }

    pub fn length_words(self) -> u32 {
        gp_entry::ENTRY1_LENGTH.get32(self.to_words()[1])
    }

    pub fn is_privileged(self) -> bool {
        gp_entry::ENTRY1_PRIV.get32(self.to_words()[1]) == gp_entry::ENTRY1_PRIV_KERNEL
    }

    pub fn sync(self) -> GpfifoSync {
        if gp_entry::ENTRY1_SYNC.get32(self.to_words()[1]) == gp_entry::ENTRY1_SYNC_WAIT {
            GpfifoSync::Wait
        } else {
            GpfifoSync::Proceed
        }
    }
}
