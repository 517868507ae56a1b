//! Copy-engine methods (Pascal layout, carried forward by every later copy class).

use crate::field::Field;

pub const SET_OBJECT: u32 = 0x0000;

pub const SET_SEMAPHORE_A: u32 = 0x0240;
pub const SET_SEMAPHORE_A_UPPER: Field = Field::new(16, 0);
/// Hopper and later widen the upper address halves to 25 bits.
pub const SET_SEMAPHORE_A_UPPER_HOPPER: Field = Field::new(24, 0);
pub const SET_SEMAPHORE_B: u32 = 0x0244;
pub const SET_SEMAPHORE_PAYLOAD: u32 = 0x0248;
pub const SET_SEMAPHORE_PAYLOAD_UPPER: u32 = 0x024C;

pub const SET_SRC_PHYS_MODE: u32 = 0x0260;
pub const SET_DST_PHYS_MODE: u32 = 0x0264;
pub const PHYS_MODE_TARGET: Field = Field::new(1, 0);
pub const PHYS_MODE_TARGET_LOCAL_FB: u32 = 0;
pub const PHYS_MODE_TARGET_COHERENT_SYSMEM: u32 = 1;
pub const PHYS_MODE_TARGET_NONCOHERENT_SYSMEM: u32 = 2;
pub const PHYS_MODE_TARGET_PEERMEM: u32 = 3;
pub const PHYS_MODE_PEER_ID: Field = Field::new(8, 6);

pub const LAUNCH_DMA: u32 = 0x0300;
pub const LAUNCH_DMA_DATA_TRANSFER_TYPE: Field = Field::new(1, 0);
pub const LAUNCH_DMA_DATA_TRANSFER_TYPE_NONE: u32 = 0;
pub const LAUNCH_DMA_DATA_TRANSFER_TYPE_PIPELINED: u32 = 1;
pub const LAUNCH_DMA_DATA_TRANSFER_TYPE_NON_PIPELINED: u32 = 2;
pub const LAUNCH_DMA_FLUSH_ENABLE: Field = Field::bit(2);
pub const LAUNCH_DMA_SEMAPHORE_TYPE: Field = Field::new(4, 3);
pub const LAUNCH_DMA_SEMAPHORE_TYPE_NONE: u32 = 0;
pub const LAUNCH_DMA_SEMAPHORE_TYPE_RELEASE_ONE_WORD_SEMAPHORE: u32 = 1;
pub const LAUNCH_DMA_SEMAPHORE_TYPE_RELEASE_FOUR_WORD_SEMAPHORE: u32 = 2;
pub const LAUNCH_DMA_INTERRUPT_TYPE: Field = Field::new(6, 5);
pub const LAUNCH_DMA_SRC_MEMORY_LAYOUT: Field = Field::bit(7);
pub const LAUNCH_DMA_DST_MEMORY_LAYOUT: Field = Field::bit(8);
pub const LAUNCH_DMA_MEMORY_LAYOUT_PITCH: u32 = 1;
pub const LAUNCH_DMA_MULTI_LINE_ENABLE: Field = Field::bit(9);
pub const LAUNCH_DMA_REMAP_ENABLE: Field = Field::bit(10);
pub const LAUNCH_DMA_SRC_TYPE: Field = Field::bit(12);
pub const LAUNCH_DMA_DST_TYPE: Field = Field::bit(13);
pub const LAUNCH_DMA_TYPE_VIRTUAL: u32 = 0;
pub const LAUNCH_DMA_TYPE_PHYSICAL: u32 = 1;
pub const LAUNCH_DMA_SEMAPHORE_REDUCTION: Field = Field::new(17, 14);
pub const LAUNCH_DMA_SEMAPHORE_REDUCTION_INC: u32 = 3;
pub const LAUNCH_DMA_SEMAPHORE_REDUCTION_ENABLE: Field = Field::bit(18);
/// Volta and later: scope of the flush requested by `FLUSH_ENABLE`.
pub const LAUNCH_DMA_FLUSH_TYPE: Field = Field::bit(25);
pub const LAUNCH_DMA_FLUSH_TYPE_SYS: u32 = 0;
pub const LAUNCH_DMA_FLUSH_TYPE_GL: u32 = 1;

pub const OFFSET_IN_UPPER: u32 = 0x0400;
pub const OFFSET_IN_LOWER: u32 = 0x0404;
pub const OFFSET_OUT_UPPER: u32 = 0x0408;
pub const OFFSET_OUT_LOWER: u32 = 0x040C;
pub const OFFSET_UPPER: Field = Field::new(16, 0);
pub const OFFSET_UPPER_HOPPER: Field = Field::new(24, 0);
pub const PITCH_IN: u32 = 0x0410;
pub const PITCH_OUT: u32 = 0x0414;
pub const LINE_LENGTH_IN: u32 = 0x0418;
pub const LINE_COUNT: u32 = 0x041C;

pub const SET_REMAP_CONST_A: u32 = 0x0700;
pub const SET_REMAP_CONST_B: u32 = 0x0704;
pub const SET_REMAP_COMPONENTS: u32 = 0x0708;
pub const REMAP_DST_X: Field = Field::new(2, 0);
pub const REMAP_DST_Y: Field = Field::new(6, 4);
pub const REMAP_CONST_A: u32 = 4;
pub const REMAP_CONST_B: u32 = 5;
pub const REMAP_COMPONENT_SIZE: Field = Field::new(17, 16);
pub const REMAP_COMPONENT_SIZE_FOUR: u32 = 3;
pub const REMAP_NUM_DST_COMPONENTS: Field = Field::new(25, 24);
pub const REMAP_NUM_DST_COMPONENTS_ONE: u32 = 0;
pub const REMAP_NUM_DST_COMPONENTS_TWO: u32 = 1;
