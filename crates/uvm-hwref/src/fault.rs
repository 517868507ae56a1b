//! MMU fault reporting: fault-buffer record layouts, fault/access/client enumerations and the
//! GET/PUT pointer registers.

use crate::field::{Field, WordField};

/// Raw `FAULT_TYPE` values.
pub mod fault_type {
    pub const PDE: u32 = 0x00;
    pub const PDE_SIZE: u32 = 0x01;
    pub const PTE: u32 = 0x02;
    pub const VA_LIMIT_VIOLATION: u32 = 0x03;
    pub const UNBOUND_INST_BLOCK: u32 = 0x04;
    pub const PRIV_VIOLATION: u32 = 0x05;
    pub const RO_VIOLATION: u32 = 0x06;
    pub const WO_VIOLATION: u32 = 0x07;
    pub const PITCH_MASK_VIOLATION: u32 = 0x08;
    pub const WORK_CREATION: u32 = 0x09;
    pub const UNSUPPORTED_APERTURE: u32 = 0x0A;
    pub const COMPRESSION_FAILURE: u32 = 0x0B;
    pub const UNSUPPORTED_KIND: u32 = 0x0C;
    pub const REGION_VIOLATION: u32 = 0x0D;
    pub const POISONED: u32 = 0x0E;
    pub const ATOMIC_VIOLATION: u32 = 0x0F;
    /// Hopper and later.
    pub const CC_VIOLATION: u32 = 0x10;
}

/// Raw `ACCESS_TYPE` values.
pub mod access_type {
    pub const VIRT_READ: u32 = 0x0;
    pub const VIRT_WRITE: u32 = 0x1;
    pub const VIRT_ATOMIC_STRONG: u32 = 0x2;
    pub const VIRT_PREFETCH: u32 = 0x3;
    pub const VIRT_ATOMIC_WEAK: u32 = 0x4;
    pub const PHYS_READ: u32 = 0x8;
    pub const PHYS_WRITE: u32 = 0x9;
    pub const PHYS_ATOMIC: u32 = 0xA;
    pub const PHYS_PREFETCH: u32 = 0xB;
}

pub const MMU_CLIENT_TYPE_GPC: u32 = 0;
pub const MMU_CLIENT_TYPE_HUB: u32 = 1;

/// GPC client ids. Each group of two texture units shares a uTLB with one PE and one TPC
/// context switcher.
pub mod gpc_client {
    pub const T1_0: u16 = 0x00;
    pub const T1_7: u16 = 0x07;
    pub const PE_0: u16 = 0x08;
    pub const PE_3: u16 = 0x0B;
    pub const RAST: u16 = 0x0F;
    pub const GCC: u16 = 0x10;
    pub const GPCCS: u16 = 0x11;
    pub const TPCCS_0: u16 = 0x14;
    pub const TPCCS_3: u16 = 0x17;
    /// Ampere and later add a second bank of four LTPs.
    pub const T1_8: u16 = 0x20;
    pub const T1_15: u16 = 0x27;
    pub const PE_4: u16 = 0x28;
    pub const PE_7: u16 = 0x2B;
    pub const TPCCS_4: u16 = 0x2C;
    pub const TPCCS_7: u16 = 0x2F;
}

/// HUB client ids.
pub mod hub_client {
    pub const CE0: u16 = 0x01;
    pub const CE1: u16 = 0x02;
    pub const HOST: u16 = 0x06;
    pub const HOST_CPU: u16 = 0x07;
    pub const HSCE0: u16 = 0x20;
    pub const HSCE9: u16 = 0x29;
}

/// Pascal replayable fault-buffer record (32 bytes).
pub mod b069 {
    use super::WordField;

    pub const ENTRY_SIZE: usize = 32;

    pub const INST_APERTURE: WordField = WordField::new(0, 9, 8);
    pub const INST_LO: WordField = WordField::new(0, 31, 12);
    pub const INST_HI: WordField = WordField::new(1, 31, 0);
    pub const ADDR_LO: WordField = WordField::new(2, 31, 12);
    pub const ADDR_HI: WordField = WordField::new(3, 31, 0);
    pub const TIMESTAMP_LO: WordField = WordField::new(4, 31, 0);
    pub const TIMESTAMP_HI: WordField = WordField::new(5, 31, 0);
    pub const FAULT_TYPE: WordField = WordField::new(7, 4, 0);
    pub const CLIENT: WordField = WordField::new(7, 14, 8);
    pub const ACCESS_TYPE: WordField = WordField::new(7, 18, 16);
    pub const MMU_CLIENT_TYPE: WordField = WordField::bit(7, 20);
    pub const GPC_ID: WordField = WordField::new(7, 28, 24);
    pub const VALID: WordField = WordField::bit(7, 31);
}

/// Volta and later fault-buffer record (32 bytes), shared by replayable and non-replayable
/// buffers.
pub mod c369 {
    use super::WordField;

    pub const ENTRY_SIZE: usize = 32;

    pub const INST_APERTURE: WordField = WordField::new(0, 9, 8);
    pub const INST_LO: WordField = WordField::new(0, 31, 12);
    pub const INST_HI: WordField = WordField::new(1, 31, 0);
    pub const ADDR_PHYS_APERTURE: WordField = WordField::new(2, 1, 0);
    pub const ADDR_LO: WordField = WordField::new(2, 31, 12);
    pub const ADDR_HI: WordField = WordField::new(3, 31, 0);
    pub const TIMESTAMP_LO: WordField = WordField::new(4, 31, 0);
    pub const TIMESTAMP_HI: WordField = WordField::new(5, 31, 0);
    pub const ENGINE_ID: WordField = WordField::new(6, 8, 0);
    pub const CHID: WordField = WordField::new(6, 31, 20);
    pub const FAULT_TYPE: WordField = WordField::new(7, 4, 0);
    pub const REPLAYABLE_FAULT: WordField = WordField::bit(7, 7);
    pub const CLIENT: WordField = WordField::new(7, 14, 8);
    pub const ACCESS_TYPE: WordField = WordField::new(7, 19, 16);
    pub const MMU_CLIENT_TYPE: WordField = WordField::bit(7, 20);
    pub const GPC_ID: WordField = WordField::new(7, 28, 24);
    pub const PROTECTED_MODE: WordField = WordField::bit(7, 29);
    pub const REPLAYABLE_FAULT_EN: WordField = WordField::bit(7, 30);
    pub const VALID: WordField = WordField::bit(7, 31);
}

/// MMU engine id ranges per generation.
pub mod engine_id {
    pub const VOLTA_CE0: u16 = 0x0F;
    pub const VOLTA_CE8: u16 = 0x17;
    pub const VOLTA_HOST0: u16 = 0x20;
    pub const VOLTA_HOST13: u16 = 0x2D;
    pub const VOLTA_GRAPHICS: u16 = 0x40;

    pub const AMPERE_CE0: u16 = 0x0F;
    pub const AMPERE_CE9: u16 = 0x18;
    pub const AMPERE_HOST0: u16 = 0x20;
    pub const AMPERE_HOST31: u16 = 0x3F;
    pub const AMPERE_GRAPHICS: u16 = 0x40;

    pub const HOPPER_CE0: u16 = 0x15;
    pub const HOPPER_CE9: u16 = 0x1E;
    pub const HOPPER_HOST0: u16 = 0x40;
    pub const HOPPER_HOST43: u16 = 0x6B;
    pub const HOPPER_GRAPHICS: u16 = 0x80;
}

/// Fault-buffer GET/PUT pointer registers.
pub mod buffer_ptr {
    use super::Field;

    pub const PTR: Field = Field::new(19, 0);
    pub const GET_GETPTR_CORRUPTED: Field = Field::bit(30);
    pub const GET_OVERFLOW: Field = Field::bit(31);
    pub const PUT_GETPTR_CORRUPTED: Field = Field::bit(30);
    pub const PUT_OVERFLOW: Field = Field::bit(31);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fields_do_not_overlap() {
        let word7 = [
            c369::FAULT_TYPE,
            c369::REPLAYABLE_FAULT,
            c369::CLIENT,
            c369::ACCESS_TYPE,
            c369::MMU_CLIENT_TYPE,
            c369::GPC_ID,
            c369::PROTECTED_MODE,
            c369::REPLAYABLE_FAULT_EN,
            c369::VALID,
        ];
        let mut seen = 0u64;
        for f in word7 {
            assert_eq!(f.word, 7);
            assert_eq!(seen & f.field.mask(), 0, "{f:?} overlaps");
            seen |= f.field.mask();
        }
    }

    #[test]
    fn engine_ranges_are_disjoint_from_graphics() {
        assert!(engine_id::VOLTA_HOST13 < engine_id::VOLTA_GRAPHICS);
        assert!(engine_id::AMPERE_HOST31 < engine_id::AMPERE_GRAPHICS);
        assert!(engine_id::HOPPER_HOST43 < engine_id::HOPPER_GRAPHICS);
        assert!(engine_id::HOPPER_CE9 < engine_id::HOPPER_HOST0);
    }
}
