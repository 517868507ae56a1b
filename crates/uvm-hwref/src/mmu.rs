//! GPU MMU page-table entry layouts.
//!
//! Three formats exist: `ver1` (Maxwell, two-level with packed big/small directory entries),
//! `ver2` (Pascal through Ada, five levels over a 49-bit VA) and `ver3` (Hopper and later, six
//! levels over a 57-bit VA with permission-control-field encodings).

use crate::field::Field;

pub const PAGE_SIZE_4K: u64 = 4 << 10;
pub const PAGE_SIZE_64K: u64 = 64 << 10;
pub const PAGE_SIZE_128K: u64 = 128 << 10;
pub const PAGE_SIZE_2M: u64 = 2 << 20;
pub const PAGE_SIZE_512M: u64 = 512 << 20;
pub const PAGE_SIZE_256G: u64 = 256 << 30;

/// Physical address bits covered by the 12-bit page shift used by every address field.
pub const ADDRESS_SHIFT: u32 = 12;

pub mod ver1 {
    use super::Field;

    pub const PTE_VALID: Field = Field::bit(0);
    pub const PTE_PRIVILEGE: Field = Field::bit(1);
    pub const PTE_READ_ONLY: Field = Field::bit(2);
    pub const PTE_ADDRESS_SYS: Field = Field::new(31, 4);
    pub const PTE_ADDRESS_VID: Field = Field::new(28, 4);
    pub const PTE_ADDRESS_VID_PEER: Field = Field::new(31, 29);
    pub const PTE_VOL: Field = Field::bit(32);
    pub const PTE_APERTURE: Field = Field::new(34, 33);
    pub const PTE_APERTURE_VIDEO_MEMORY: u64 = 0;
    pub const PTE_APERTURE_PEER_MEMORY: u64 = 1;
    pub const PTE_APERTURE_SYSTEM_COHERENT_MEMORY: u64 = 2;
    pub const PTE_APERTURE_SYSTEM_NON_COHERENT_MEMORY: u64 = 3;
    pub const PTE_KIND: Field = Field::new(43, 36);
    pub const PTE_KIND_SMSKED_MESSAGE: u64 = 0xCA;
    pub const PTE_WRITE_DISABLE: Field = Field::bit(63);

    /// Big-page PTE value telling the MMU to fall back to the small-page table.
    pub const PTE_UNMAPPED_BIG: u64 = 1 << 1;

    pub const PDE_APERTURE_BIG: Field = Field::new(1, 0);
    pub const PDE_ADDRESS_BIG: Field = Field::new(31, 4);
    pub const PDE_APERTURE_SMALL: Field = Field::new(33, 32);
    pub const PDE_VOL_SMALL: Field = Field::bit(34);
    pub const PDE_VOL_BIG: Field = Field::bit(35);
    pub const PDE_ADDRESS_SMALL: Field = Field::new(63, 36);
    pub const PDE_APERTURE_INVALID: u64 = 0;
    pub const PDE_APERTURE_VIDEO_MEMORY: u64 = 1;
    pub const PDE_APERTURE_SYSTEM_COHERENT_MEMORY: u64 = 2;
    pub const PDE_APERTURE_SYSTEM_NON_COHERENT_MEMORY: u64 = 3;

    pub const VA_BITS: u32 = 40;
    /// Number of big pages covered by one directory entry.
    pub const PDE_BIG_PAGES: u64 = 1024;
}

pub mod ver2 {
    use super::Field;

    pub const PTE_VALID: Field = Field::bit(0);
    pub const PTE_APERTURE: Field = Field::new(2, 1);
    pub const PTE_APERTURE_VIDEO_MEMORY: u64 = 0;
    pub const PTE_APERTURE_PEER_MEMORY: u64 = 1;
    pub const PTE_APERTURE_SYSTEM_COHERENT_MEMORY: u64 = 2;
    pub const PTE_APERTURE_SYSTEM_NON_COHERENT_MEMORY: u64 = 3;
    pub const PTE_VOL: Field = Field::bit(3);
    pub const PTE_ENCRYPTED: Field = Field::bit(4);
    pub const PTE_PRIVILEGE: Field = Field::bit(5);
    pub const PTE_READ_ONLY: Field = Field::bit(6);
    pub const PTE_ATOMIC_DISABLE: Field = Field::bit(7);
    pub const PTE_ADDRESS_SYS: Field = Field::new(53, 8);
    pub const PTE_ADDRESS_VID: Field = Field::new(32, 8);
    pub const PTE_ADDRESS_VID_PEER: Field = Field::new(35, 33);
    /// Volta and later: upper bits of a 47-bit peer/vidmem address.
    pub const PTE_ADDRESS_VID_HI: Field = Field::new(45, 36);
    pub const PTE_KIND: Field = Field::new(63, 56);
    pub const PTE_KIND_SMSKED_MESSAGE: u64 = 0xCA;

    pub const PDE_IS_PTE: Field = Field::bit(0);
    pub const PDE_APERTURE: Field = Field::new(2, 1);
    pub const PDE_APERTURE_INVALID: u64 = 0;
    pub const PDE_APERTURE_VIDEO_MEMORY: u64 = 1;
    pub const PDE_APERTURE_SYSTEM_COHERENT_MEMORY: u64 = 2;
    pub const PDE_APERTURE_SYSTEM_NON_COHERENT_MEMORY: u64 = 3;
    pub const PDE_VOL: Field = Field::bit(3);
    /// Volta and later.
    pub const PDE_NO_ATS: Field = Field::bit(5);
    pub const PDE_ADDRESS_SYS: Field = Field::new(53, 8);
    pub const PDE_ADDRESS_VID: Field = Field::new(32, 8);
    /// Big-page tables are 256-byte aligned; their address is stored with an 8-bit shift.
    pub const DUAL_PDE_ADDRESS_BIG: Field = Field::new(53, 4);
    pub const DUAL_PDE_ADDRESS_BIG_SHIFT: u32 = 8;

    pub const VA_BITS: u32 = 49;
}

pub mod ver3 {
    use super::Field;

    pub const PTE_VALID: Field = Field::bit(0);
    pub const PTE_APERTURE: Field = Field::new(2, 1);
    pub const PTE_APERTURE_VIDEO_MEMORY: u64 = 0;
    pub const PTE_APERTURE_PEER_MEMORY: u64 = 1;
    pub const PTE_APERTURE_SYSTEM_COHERENT_MEMORY: u64 = 2;
    pub const PTE_APERTURE_SYSTEM_NON_COHERENT_MEMORY: u64 = 3;
    pub const PTE_PCF: Field = Field::new(7, 3);
    pub const PTE_KIND: Field = Field::new(11, 8);
    pub const PTE_KIND_GENERIC_MEMORY: u64 = 0x6;
    pub const PTE_KIND_SMSKED_MESSAGE: u64 = 0xF;
    pub const PTE_ADDRESS: Field = Field::new(51, 12);
    pub const PTE_PEER_ID: Field = Field::new(63, 61);

    // Valid PTE permission-control-field values with access counting enabled ("ACE").
    pub const PTE_PCF_VALID_RW_ATOMIC_CACHED_ACE: u64 = 0x00;
    pub const PTE_PCF_VALID_RW_ATOMIC_UNCACHED_ACE: u64 = 0x01;
    pub const PTE_PCF_PRIVILEGE_RW_ATOMIC_CACHED_ACE: u64 = 0x02;
    pub const PTE_PCF_PRIVILEGE_RW_ATOMIC_UNCACHED_ACE: u64 = 0x03;
    pub const PTE_PCF_VALID_RW_NO_ATOMIC_CACHED_ACE: u64 = 0x08;
    pub const PTE_PCF_VALID_RW_NO_ATOMIC_UNCACHED_ACE: u64 = 0x09;
    pub const PTE_PCF_VALID_RO_NO_ATOMIC_CACHED_ACE: u64 = 0x0C;
    pub const PTE_PCF_VALID_RO_NO_ATOMIC_UNCACHED_ACE: u64 = 0x0D;
    pub const PTE_PCF_PRIVILEGE_RO_NO_ATOMIC_CACHED_ACE: u64 = 0x0E;
    pub const PTE_PCF_PRIVILEGE_RO_NO_ATOMIC_UNCACHED_ACE: u64 = 0x0F;
    /// Offset from an ACE value to its access-counter-disabled ("ACD") twin.
    pub const PTE_PCF_ACD_OFFSET: u64 = 0x10;

    // Invalid PTE permission-control-field values.
    pub const PTE_PCF_INVALID: u64 = 0x00;
    pub const PTE_PCF_SPARSE: u64 = 0x01;
    pub const PTE_PCF_NO_VALID_4KB_PAGE: u64 = 0x03;

    pub const PDE_IS_PTE: Field = Field::bit(0);
    pub const PDE_APERTURE: Field = Field::new(2, 1);
    pub const PDE_APERTURE_INVALID: u64 = 0;
    pub const PDE_APERTURE_VIDEO_MEMORY: u64 = 1;
    pub const PDE_APERTURE_SYSTEM_COHERENT_MEMORY: u64 = 2;
    pub const PDE_APERTURE_SYSTEM_NON_COHERENT_MEMORY: u64 = 3;
    pub const PDE_PCF: Field = Field::new(5, 3);
    pub const PDE_PCF_INVALID_ATS_ALLOWED: u64 = 0x0;
    pub const PDE_PCF_INVALID_ATS_NOT_ALLOWED: u64 = 0x2;
    pub const PDE_PCF_VALID_CACHED_ATS_ALLOWED: u64 = 0x0;
    pub const PDE_PCF_VALID_UNCACHED_ATS_ALLOWED: u64 = 0x1;
    pub const PDE_PCF_VALID_CACHED_ATS_NOT_ALLOWED: u64 = 0x2;
    pub const PDE_PCF_VALID_UNCACHED_ATS_NOT_ALLOWED: u64 = 0x3;
    pub const PDE_ADDRESS: Field = Field::new(51, 12);
    pub const DUAL_PDE_ADDRESS_BIG: Field = Field::new(51, 8);
    pub const DUAL_PDE_ADDRESS_BIG_SHIFT: u32 = 8;

    pub const VA_BITS: u32 = 57;
}
