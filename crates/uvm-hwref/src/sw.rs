//! Driver-private software methods trapped on [`crate::class::UVM_SW_OBJECT`].
//!
//! Used where the host front-end cannot be reached directly (SR-IOV heavy guests); the
//! hypervisor decodes them on the guest's behalf.

use crate::field::Field;

pub const CLEAR_FAULTED_A: u32 = 0x0600;
pub const CLEAR_FAULTED_A_TYPE: Field = Field::bit(0);
pub const CLEAR_FAULTED_A_TYPE_PBDMA_FAULTED: u32 = 0;
pub const CLEAR_FAULTED_A_TYPE_ENG_FAULTED: u32 = 1;
pub const CLEAR_FAULTED_A_INST_APERTURE: Field = Field::new(5, 4);
pub const CLEAR_FAULTED_A_INST_LOW: Field = Field::new(31, 12);
pub const CLEAR_FAULTED_B: u32 = 0x0604;
