//! Secure-copy (SEC2) work-launch methods.

use crate::field::Field;

pub const SET_OBJECT: u32 = 0x0000;

pub const EXECUTE: u32 = 0x0300;
pub const EXECUTE_NOTIFY: Field = Field::bit(0);
pub const EXECUTE_FLUSH_DISABLE: Field = Field::bit(1);
pub const EXECUTE_PAYLOAD_VALID: Field = Field::bit(2);

pub const DECRYPT_COPY_SRC_ADDR_HI: u32 = 0x0400;
pub const DECRYPT_COPY_SRC_ADDR_LO: u32 = 0x0404;
pub const DECRYPT_COPY_DST_ADDR_HI: u32 = 0x0408;
pub const DECRYPT_COPY_DST_ADDR_LO: u32 = 0x040C;
pub const DECRYPT_COPY_SIZE: u32 = 0x0410;
pub const DECRYPT_COPY_AUTH_TAG_ADDR_HI: u32 = 0x0414;
pub const DECRYPT_COPY_AUTH_TAG_ADDR_LO: u32 = 0x0418;

/// Location of the authentication tag covering the methods that follow.
pub const METHOD_STREAM_AUTH_TAG_ADDR_HI: u32 = 0x041C;
pub const METHOD_STREAM_AUTH_TAG_ADDR_LO: u32 = 0x0420;
/// Tags are HMAC-SHA256 digests.
pub const METHOD_STREAM_AUTH_TAG_SIZE: usize = 32;
pub const METHOD_STREAM_AUTH_TAG_ALIGNMENT: u64 = 16;

pub const SET_SEMAPHORE_A: u32 = 0x0440;
pub const SET_SEMAPHORE_A_UPPER: Field = Field::new(24, 0);
pub const SET_SEMAPHORE_B: u32 = 0x0444;
pub const SET_SEMAPHORE_PAYLOAD_LOWER: u32 = 0x0448;
pub const SET_SEMAPHORE_PAYLOAD_UPPER: u32 = 0x044C;

