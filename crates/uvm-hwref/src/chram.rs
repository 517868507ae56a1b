//! Per-channel RAM (Ampere and later) and the runlist doorbell used to clear a faulted channel.

use crate::field::Field;

pub const CHANNEL_ENABLE: Field = Field::bit(1);
pub const CHANNEL_BUSY: Field = Field::bit(3);
pub const CHANNEL_PBDMA_FAULTED: Field = Field::bit(22);
pub const CHANNEL_ENG_FAULTED: Field = Field::bit(23);

/// Write-one-to-reset value clearing the PBDMA-faulted latch.
pub const CHANNEL_RESET_PBDMA_FAULTED: u32 = 0x11;
/// Write-one-to-reset value clearing the engine-faulted latch.
pub const CHANNEL_RESET_ENG_FAULTED: u32 = 0x21;

/// Runlist doorbell (`NOTIFY_CHANNEL_PENDING`) layout.
pub mod doorbell {
    use super::Field;

    pub const VECTOR: Field = Field::new(11, 0);
    pub const RUNLIST_ID: Field = Field::new(22, 16);
}
