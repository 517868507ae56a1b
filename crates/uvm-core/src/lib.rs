//! Virtual-memory and fault-servicing core of a unified-memory driver for discrete NVIDIA GPUs.
//!
//! The crate is organised around per-generation HAL tables ([`hal`], populated by [`arch`]):
//! everything that encodes a page-table entry, a pushbuffer method or a fault record goes
//! through the table resolved for the attached device. On top of those sit the page tree
//! ([`mmu`]), the pushbuffer builder ([`push`]), TLB invalidation ([`tlb`]), and the fault
//! and access-counter service loops ([`fault`], [`access_counter`]).

#![forbid(unsafe_code)]

pub mod access_counter;
pub mod address;
pub mod arch;
pub mod channel;
pub mod config;
pub mod error;
pub mod fault;
pub mod hal;
pub mod mem;
pub mod mmu;
pub mod push;
pub mod spin;
pub mod tlb;

pub use address::{Aperture, GpuAddress, GpuPhysAddress};
pub use config::UvmConfig;
pub use error::{Result, UvmError};
pub use hal::{GpuHal, HalRegistry};
