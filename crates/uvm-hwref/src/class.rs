//! Hardware class numbers and architecture identifiers.
//!
//! Host, copy-engine and secure-copy tables are keyed by the class the resource manager
//! allocates for the device; architecture, fault-buffer and access-counter tables are keyed by
//! the architecture id reported at attach time.

pub const ARCH_GM000: u32 = 0x110;
pub const ARCH_GM200: u32 = 0x120;
pub const ARCH_GP100: u32 = 0x130;
pub const ARCH_GV100: u32 = 0x140;
pub const ARCH_TU100: u32 = 0x160;
pub const ARCH_GA100: u32 = 0x170;
pub const ARCH_GH100: u32 = 0x180;
pub const ARCH_AD100: u32 = 0x190;
pub const ARCH_GB100: u32 = 0x1A0;

pub const KEPLER_CHANNEL_GPFIFO_B: u32 = 0xA16F;
pub const PASCAL_CHANNEL_GPFIFO_A: u32 = 0xC06F;
pub const VOLTA_CHANNEL_GPFIFO_A: u32 = 0xC36F;
pub const TURING_CHANNEL_GPFIFO_A: u32 = 0xC46F;
pub const AMPERE_CHANNEL_GPFIFO_A: u32 = 0xC56F;
pub const HOPPER_CHANNEL_GPFIFO_A: u32 = 0xC86F;
pub const BLACKWELL_CHANNEL_GPFIFO_A: u32 = 0xC96F;

pub const MAXWELL_DMA_COPY_A: u32 = 0xB0B5;
pub const PASCAL_DMA_COPY_A: u32 = 0xC0B5;
pub const PASCAL_DMA_COPY_B: u32 = 0xC1B5;
pub const VOLTA_DMA_COPY_A: u32 = 0xC3B5;
pub const TURING_DMA_COPY_A: u32 = 0xC5B5;
pub const AMPERE_DMA_COPY_A: u32 = 0xC6B5;
pub const AMPERE_DMA_COPY_B: u32 = 0xC7B5;
pub const HOPPER_DMA_COPY_A: u32 = 0xC8B5;
pub const BLACKWELL_DMA_COPY_A: u32 = 0xC9B5;

pub const HOPPER_SEC2_WORK_LAUNCH_A: u32 = 0xCBA2;

/// Software object bound on the kernel channels to trap driver-private methods.
pub const UVM_SW_OBJECT: u32 = 0xC076;

/// Subchannel assignments used by kernel pushes.
pub const SUBCHANNEL_HOST: u8 = 0;
pub const SUBCHANNEL_SEC2: u8 = 3;
pub const SUBCHANNEL_CE: u8 = 4;
pub const SUBCHANNEL_SW: u8 = 5;

/// Methods below this offset are decoded by the host front-end regardless of subchannel.
pub const HOST_METHOD_LIMIT: u32 = 0x100;
