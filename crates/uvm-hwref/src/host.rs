//! Host (channel front-end) methods.
//!
//! `a16f` covers the Kepler/Maxwell host class; `c06f` covers the Pascal and later host classes,
//! which kept the memory-operation layout stable and only grew new fields.

use crate::field::Field;

pub mod a16f {
    use super::Field;

    pub const SET_OBJECT: u32 = 0x0000;
    pub const NOP: u32 = 0x0008;
    pub const SEMAPHOREA: u32 = 0x0010;
    pub const SEMAPHOREA_OFFSET_UPPER: Field = Field::new(7, 0);
    pub const SEMAPHOREB: u32 = 0x0014;
    pub const SEMAPHOREB_OFFSET_LOWER: Field = Field::new(31, 2);
    pub const SEMAPHOREC: u32 = 0x0018;
    pub const SEMAPHORED: u32 = 0x001C;
    pub const SEMAPHORED_OPERATION: Field = Field::new(4, 0);
    pub const SEMAPHORED_OPERATION_ACQUIRE: u32 = 0x1;
    pub const SEMAPHORED_OPERATION_RELEASE: u32 = 0x2;
    pub const SEMAPHORED_OPERATION_ACQ_GEQ: u32 = 0x4;
    pub const SEMAPHORED_ACQUIRE_SWITCH: Field = Field::bit(12);
    pub const SEMAPHORED_RELEASE_WFI: Field = Field::bit(20);
    pub const SEMAPHORED_RELEASE_WFI_EN: u32 = 0;
    pub const SEMAPHORED_RELEASE_WFI_DIS: u32 = 1;
    pub const SEMAPHORED_RELEASE_SIZE: Field = Field::bit(24);
    pub const SEMAPHORED_RELEASE_SIZE_16BYTE: u32 = 0;
    pub const SEMAPHORED_RELEASE_SIZE_4BYTE: u32 = 1;
    pub const NON_STALL_INTERRUPT: u32 = 0x0020;

    pub const MEM_OP_A: u32 = 0x0028;
    pub const MEM_OP_A_TLB_INVALIDATE_ADDR: Field = Field::new(29, 2);
    pub const MEM_OP_A_TLB_INVALIDATE_TARGET: Field = Field::new(31, 30);
    pub const MEM_OP_B: u32 = 0x002C;
    pub const MEM_OP_B_MMU_TLB_INVALIDATE_PDB: Field = Field::bit(8);
    pub const MEM_OP_B_MMU_TLB_INVALIDATE_PDB_ONE: u32 = 0;
    pub const MEM_OP_B_MMU_TLB_INVALIDATE_PDB_ALL: u32 = 1;
    pub const MEM_OP_B_MMU_TLB_INVALIDATE_GPC: Field = Field::bit(9);
    pub const MEM_OP_B_MMU_TLB_INVALIDATE_GPC_ENABLE: u32 = 0;
    pub const MEM_OP_B_MMU_TLB_INVALIDATE_GPC_DISABLE: u32 = 1;
    pub const MEM_OP_B_OPERATION: Field = Field::new(31, 27);
    pub const MEM_OP_B_OPERATION_SYSMEMBAR_FLUSH: u32 = 0x05;
    pub const MEM_OP_B_OPERATION_SOFT_FLUSH: u32 = 0x06;
    pub const MEM_OP_B_OPERATION_MMU_TLB_INVALIDATE: u32 = 0x09;
    pub const MEM_OP_B_OPERATION_L2_FLUSH_DIRTY: u32 = 0x10;

    pub const WFI: u32 = 0x0078;
    pub const WFI_SCOPE: Field = Field::bit(0);
    pub const WFI_SCOPE_CURRENT_SCG_TYPE: u32 = 0;
    pub const WFI_SCOPE_ALL: u32 = 1;
}

pub mod c06f {
    use super::Field;

    pub const SET_OBJECT: u32 = 0x0000;
    pub const NOP: u32 = 0x0008;
    pub const SEMAPHOREA: u32 = 0x0010;
    pub const SEMAPHOREB: u32 = 0x0014;
    pub const SEMAPHOREC: u32 = 0x0018;
    pub const SEMAPHORED: u32 = 0x001C;
    pub const NON_STALL_INTERRUPT: u32 = 0x0020;

    pub const MEM_OP_A: u32 = 0x0028;
    pub const MEM_OP_A_TLB_INVALIDATE_CANCEL_TARGET_CLIENT_UNIT_ID: Field = Field::new(5, 0);
    /// Shares bits with the cancel client id; only present on Volta and later.
    pub const MEM_OP_A_TLB_INVALIDATE_INVALIDATION_SIZE: Field = Field::new(5, 0);
    pub const MEM_OP_A_TLB_INVALIDATE_CANCEL_TARGET_GPC_ID: Field = Field::new(10, 6);
    /// VA-targeted cancel (Volta and later): engine whose faults are cancelled.
    pub const MEM_OP_A_TLB_INVALIDATE_CANCEL_MMU_ENGINE_ID: Field = Field::new(6, 0);
    pub const MEM_OP_A_TLB_INVALIDATE_SYSMEMBAR: Field = Field::bit(11);
    pub const MEM_OP_A_TLB_INVALIDATE_SYSMEMBAR_DIS: u32 = 0;
    pub const MEM_OP_A_TLB_INVALIDATE_SYSMEMBAR_EN: u32 = 1;
    pub const MEM_OP_A_TLB_INVALIDATE_TARGET_ADDR_LO: Field = Field::new(31, 12);

    pub const MEM_OP_B: u32 = 0x002C;
    pub const MEM_OP_B_TLB_INVALIDATE_TARGET_ADDR_HI: Field = Field::new(31, 0);

    pub const MEM_OP_C: u32 = 0x0030;
    pub const MEM_OP_C_MEMBAR_TYPE: Field = Field::new(2, 0);
    pub const MEM_OP_C_MEMBAR_TYPE_SYS_MEMBAR: u32 = 0;
    pub const MEM_OP_C_MEMBAR_TYPE_MEMBAR: u32 = 1;
    pub const MEM_OP_C_TLB_INVALIDATE_PDB: Field = Field::bit(0);
    pub const MEM_OP_C_TLB_INVALIDATE_PDB_ONE: u32 = 0;
    pub const MEM_OP_C_TLB_INVALIDATE_PDB_ALL: u32 = 1;
    pub const MEM_OP_C_TLB_INVALIDATE_GPC: Field = Field::bit(1);
    pub const MEM_OP_C_TLB_INVALIDATE_GPC_ENABLE: u32 = 0;
    pub const MEM_OP_C_TLB_INVALIDATE_GPC_DISABLE: u32 = 1;
    pub const MEM_OP_C_TLB_INVALIDATE_REPLAY: Field = Field::new(4, 2);
    pub const MEM_OP_C_TLB_INVALIDATE_REPLAY_NONE: u32 = 0;
    pub const MEM_OP_C_TLB_INVALIDATE_REPLAY_START: u32 = 1;
    pub const MEM_OP_C_TLB_INVALIDATE_REPLAY_START_ACK_ALL: u32 = 2;
    pub const MEM_OP_C_TLB_INVALIDATE_REPLAY_CANCEL_TARGETED: u32 = 3;
    pub const MEM_OP_C_TLB_INVALIDATE_REPLAY_CANCEL_GLOBAL: u32 = 4;
    pub const MEM_OP_C_TLB_INVALIDATE_REPLAY_CANCEL_VA_GLOBAL: u32 = 5;
    pub const MEM_OP_C_TLB_INVALIDATE_ACK_TYPE: Field = Field::new(6, 5);
    pub const MEM_OP_C_TLB_INVALIDATE_ACK_TYPE_NONE: u32 = 0;
    pub const MEM_OP_C_TLB_INVALIDATE_ACK_TYPE_GLOBALLY: u32 = 1;
    pub const MEM_OP_C_TLB_INVALIDATE_ACK_TYPE_INTRANODE: u32 = 2;
    /// Cancel access type; shares bits with the page table level.
    pub const MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE: Field = Field::new(9, 7);
    pub const MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE_VIRT_READ: u32 = 0;
    pub const MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE_VIRT_WRITE: u32 = 1;
    pub const MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE_VIRT_ATOMIC_STRONG: u32 = 2;
    pub const MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE_VIRT_ATOMIC_WEAK: u32 = 4;
    pub const MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE_VIRT_ATOMIC_ALL: u32 = 5;
    pub const MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE_VIRT_WRITE_AND_ATOMIC: u32 = 6;
    pub const MEM_OP_C_TLB_INVALIDATE_ACCESS_TYPE_VIRT_ALL: u32 = 7;
    pub const MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL: Field = Field::new(9, 7);
    pub const MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL_ALL: u32 = 0;
    pub const MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL_PTE_ONLY: u32 = 1;
    pub const MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL_UP_TO_PDE0: u32 = 2;
    pub const MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL_UP_TO_PDE1: u32 = 3;
    pub const MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL_UP_TO_PDE2: u32 = 4;
    pub const MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL_UP_TO_PDE3: u32 = 5;
    /// Hopper and later only.
    pub const MEM_OP_C_TLB_INVALIDATE_PAGE_TABLE_LEVEL_UP_TO_PDE4: u32 = 6;
    pub const MEM_OP_C_TLB_INVALIDATE_PDB_APERTURE: Field = Field::new(11, 10);
    pub const MEM_OP_C_TLB_INVALIDATE_PDB_APERTURE_VID_MEM: u32 = 0;
    pub const MEM_OP_C_TLB_INVALIDATE_PDB_APERTURE_SYS_MEM_COHERENT: u32 = 2;
    pub const MEM_OP_C_TLB_INVALIDATE_PDB_APERTURE_SYS_MEM_NONCOHERENT: u32 = 3;
    pub const MEM_OP_C_TLB_INVALIDATE_PDB_ADDR_LO: Field = Field::new(31, 12);
    pub const MEM_OP_C_ACCESS_COUNTER_CLR_TARGETED_NOTIFY_TAG: Field = Field::new(19, 0);

    pub const MEM_OP_D: u32 = 0x0034;
    pub const MEM_OP_D_TLB_INVALIDATE_PDB_ADDR_HI: Field = Field::new(26, 0);
    pub const MEM_OP_D_OPERATION: Field = Field::new(31, 27);
    pub const MEM_OP_D_OPERATION_MEMBAR: u32 = 0x05;
    pub const MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE: u32 = 0x09;
    pub const MEM_OP_D_OPERATION_MMU_TLB_INVALIDATE_TARGETED: u32 = 0x0A;
    pub const MEM_OP_D_OPERATION_L2_FLUSH_DIRTY: u32 = 0x10;
    pub const MEM_OP_D_OPERATION_ACCESS_COUNTER_CLR: u32 = 0x16;
    pub const MEM_OP_D_ACCESS_COUNTER_CLR_TYPE: Field = Field::new(1, 0);
    pub const MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_MIMC: u32 = 0;
    pub const MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_MOMC: u32 = 1;
    pub const MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_ALL: u32 = 2;
    pub const MEM_OP_D_ACCESS_COUNTER_CLR_TYPE_TARGETED: u32 = 3;
    pub const MEM_OP_D_ACCESS_COUNTER_CLR_TARGETED_TYPE: Field = Field::bit(2);
    pub const MEM_OP_D_ACCESS_COUNTER_CLR_TARGETED_BANK: Field = Field::new(6, 3);

    pub const SEM_ADDR_LO: u32 = 0x005C;
    pub const SEM_ADDR_LO_OFFSET: Field = Field::new(31, 2);
    pub const SEM_ADDR_HI: u32 = 0x0060;
    pub const SEM_ADDR_HI_OFFSET: Field = Field::new(24, 0);
    pub const SEM_PAYLOAD_LO: u32 = 0x0064;
    pub const SEM_PAYLOAD_HI: u32 = 0x0068;
    pub const SEM_EXECUTE: u32 = 0x006C;
    pub const SEM_EXECUTE_OPERATION: Field = Field::new(2, 0);
    pub const SEM_EXECUTE_OPERATION_ACQUIRE: u32 = 0;
    pub const SEM_EXECUTE_OPERATION_RELEASE: u32 = 1;
    pub const SEM_EXECUTE_OPERATION_ACQ_CIRC_GEQ: u32 = 3;
    pub const SEM_EXECUTE_ACQUIRE_SWITCH_TSG: Field = Field::bit(12);
    pub const SEM_EXECUTE_RELEASE_WFI: Field = Field::bit(20);
    pub const SEM_EXECUTE_PAYLOAD_SIZE: Field = Field::bit(24);
    pub const SEM_EXECUTE_PAYLOAD_SIZE_32BIT: u32 = 0;
    pub const SEM_EXECUTE_PAYLOAD_SIZE_64BIT: u32 = 1;
    pub const SEM_EXECUTE_RELEASE_TIMESTAMP: Field = Field::bit(25);

    pub const WFI: u32 = 0x0078;
    pub const WFI_SCOPE: Field = Field::bit(0);
    pub const WFI_SCOPE_CURRENT_SCG_TYPE: u32 = 0;

    /// Volta form: identifies the channel by id.
    pub const CLEAR_FAULTED: u32 = 0x0084;
    pub const CLEAR_FAULTED_CHID: Field = Field::new(11, 0);
    pub const CLEAR_FAULTED_TYPE: Field = Field::bit(31);
    pub const CLEAR_FAULTED_TYPE_PBDMA_FAULTED: u32 = 0;
    pub const CLEAR_FAULTED_TYPE_ENG_FAULTED: u32 = 1;

    /// Turing form: identifies the channel by instance block.
    pub const CLEAR_FAULTED_A: u32 = 0x0084;
    pub const CLEAR_FAULTED_A_TYPE: Field = Field::bit(0);
    pub const CLEAR_FAULTED_A_INST_APERTURE: Field = Field::new(5, 4);
    pub const CLEAR_FAULTED_A_INST_LOW: Field = Field::new(31, 12);
    pub const CLEAR_FAULTED_B: u32 = 0x0088;
    pub const CLEAR_FAULTED_B_INST_HI: Field = Field::new(31, 0);
}

/// Aperture encoding shared by instance-block and page-directory-base fields.
pub const APERTURE_VID_MEM: u32 = 0;
pub const APERTURE_SYS_MEM_COHERENT: u32 = 2;
pub const APERTURE_SYS_MEM_NONCOHERENT: u32 = 3;

/// GPFIFO entry layout (two 32-bit words).
pub mod gp_entry {
    use super::Field;

    pub const ENTRY0_FETCH: Field = Field::bit(0);
    pub const ENTRY0_FETCH_UNCONDITIONAL: u32 = 0;
    pub const ENTRY0_FETCH_CONDITIONAL: u32 = 1;
    pub const ENTRY0_GET: Field = Field::new(31, 2);
    pub const ENTRY1_GET_HI: Field = Field::new(7, 0);
    pub const ENTRY1_OPCODE: Field = Field::new(7, 0);
    pub const ENTRY1_OPCODE_NOP: u32 = 0;
    pub const ENTRY1_PRIV: Field = Field::bit(8);
    pub const ENTRY1_PRIV_USER: u32 = 0;
    pub const ENTRY1_PRIV_KERNEL: u32 = 1;
    pub const ENTRY1_LEVEL: Field = Field::bit(9);
    pub const ENTRY1_LEVEL_MAIN: u32 = 0;
    pub const ENTRY1_LEVEL_SUBROUTINE: u32 = 1;
    pub const ENTRY1_LENGTH: Field = Field::new(30, 10);
    pub const ENTRY1_SYNC: Field = Field::bit(31);
    pub const ENTRY1_SYNC_PROCEED: u32 = 0;
    pub const ENTRY1_SYNC_WAIT: u32 = 1;
}

/// Command-stream method header layout.
pub mod method {
    use super::Field;

    pub const OPCODE: Field = Field::new(31, 29);
    pub const COUNT: Field = Field::new(28, 16);
    pub const IMMEDIATE: Field = Field::new(28, 16);
    pub const SUBCHANNEL: Field = Field::new(15, 13);
    pub const ADDRESS: Field = Field::new(11, 0);

    pub const OPCODE_NOP: u32 = 0;
    pub const OPCODE_INC: u32 = 1;
    pub const OPCODE_NON_INC: u32 = 3;
    pub const OPCODE_IMMEDIATE: u32 = 4;
    pub const OPCODE_ONE_INC: u32 = 5;

    pub const COUNT_MAX: u32 = 0x1FFF;
}
