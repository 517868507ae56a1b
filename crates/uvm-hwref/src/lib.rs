//! Hardware reference tables for discrete NVIDIA GPUs as seen by the unified-memory driver.
//!
//! Everything here is plain data: class numbers, method offsets, register and record bit-field
//! layouts. Encoding logic that depends on the architecture lives in `uvm-core`.

#![forbid(unsafe_code)]

pub mod access_counter;
pub mod ce;
pub mod chram;
pub mod class;
pub mod fault;
pub mod field;
pub mod host;
pub mod mmu;
pub mod sec2;
pub mod sw;

pub use field::{join_u64, Field, WordField};
