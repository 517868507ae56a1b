//! Access-counter notification buffer (Volta and later).

use crate::field::{Field, WordField};

pub const ENTRY_SIZE: usize = 32;

pub const TYPE: WordField = WordField::bit(0, 0);
pub const TYPE_GPA: u32 = 0;
pub const TYPE_GVA: u32 = 1;
pub const ADDR_TYPE: WordField = WordField::bit(0, 1);
pub const COUNTER_TYPE: WordField = WordField::bit(0, 2);
pub const COUNTER_TYPE_MIMC: u32 = 0;
pub const COUNTER_TYPE_MOMC: u32 = 1;
pub const APERTURE: WordField = WordField::new(0, 4, 3);
pub const APERTURE_VID_MEM: u32 = 0;
pub const APERTURE_PEER_MEM: u32 = 1;
pub const APERTURE_SYS_MEM_COHERENT: u32 = 2;
pub const APERTURE_SYS_MEM_NONCOHERENT: u32 = 3;
pub const PEER_ID: WordField = WordField::new(0, 7, 5);
pub const INST_APERTURE: WordField = WordField::new(0, 9, 8);
pub const MMU_ENGINE_ID: WordField = WordField::new(0, 28, 20);
pub const ADDR_LO: WordField = WordField::new(1, 31, 0);
pub const ADDR_HI: WordField = WordField::new(2, 31, 0);
pub const SUB_GRANULARITY: WordField = WordField::new(3, 31, 0);
pub const INST_LO: WordField = WordField::new(4, 31, 12);
pub const INST_HI: WordField = WordField::new(5, 31, 0);
pub const BANK: WordField = WordField::new(6, 3, 0);
pub const NOTIFY_TAG: WordField = WordField::new(6, 23, 4);
pub const COUNTER_VAL: WordField = WordField::new(7, 15, 0);
pub const VALID: WordField = WordField::bit(7, 31);

/// `ACCESS_CNTR_CONFIG` register.
pub mod config {
    use super::Field;

    pub const MIMC_GRANULARITY: Field = Field::new(1, 0);
    pub const MOMC_GRANULARITY: Field = Field::new(3, 2);
    pub const GRANULARITY_64K: u32 = 0;
    pub const GRANULARITY_2M: u32 = 1;
    pub const GRANULARITY_16M: u32 = 2;
    pub const GRANULARITY_16G: u32 = 3;
    pub const MIMC_USE_LIMIT: Field = Field::new(6, 4);
    pub const MOMC_USE_LIMIT: Field = Field::new(10, 8);
    pub const USE_LIMIT_NONE: u32 = 0;
    pub const USE_LIMIT_FULL: u32 = 4;
    pub const THRESHOLD: Field = Field::new(31, 16);
    pub const THRESHOLD_MAX: u32 = 0xFFFF;
}

/// `ACCESS_CNTR_BUFFER_INFO` register.
pub mod info {
    use super::Field;

    pub const EN: Field = Field::bit(0);
    pub const OVERFLOW: Field = Field::bit(31);
    pub const FULL: Field = Field::bit(30);
    pub const PTR: Field = Field::new(19, 0);
}
