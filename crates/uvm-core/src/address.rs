//! GPU physical and virtual address values.

use std::fmt;

/// Memory domain a physical address resides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Aperture {
    /// Another GPU's video memory, reached through peer mapping `n` (0..=7).
    Peer(u8),
    /// Coherent system memory.
    Sys,
    SysNonCoherent,
    /// Local video memory.
    Vid,
    /// Whatever the engine's default target is. Only meaningful for virtual addresses.
    Default,
}

impl Aperture {
    pub const MAX_PEERS: u8 = 8;

    #[inline]
    pub const fn is_sys(self) -> bool {
        matches!(self, Self::Sys | Self::SysNonCoherent)
    }

    #[inline]
    pub const fn peer_id(self) -> Option<u8> {
        match self {
            Self::Peer(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Aperture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(id) => write!(f, "peer{id}"),
            Self::Sys => f.write_str("sys"),
            Self::SysNonCoherent => f.write_str("sys-nc"),
            Self::Vid => f.write_str("vid"),
            Self::Default => f.write_str("default"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuPhysAddress {
    pub aperture: Aperture,
    pub address: u64,
}

impl GpuPhysAddress {
    pub const fn new(aperture: Aperture, address: u64) -> Self {
        Self { aperture, address }
    }

    pub const fn vid(address: u64) -> Self {
        Self::new(Aperture::Vid, address)
    }

    pub const fn sys(address: u64) -> Self {
        Self::new(Aperture::Sys, address)
    }

    #[must_use]
    pub const fn offset(self, bytes: u64) -> Self {
        Self::new(self.aperture, self.address.wrapping_add(bytes))
    }
}

impl fmt::Display for GpuPhysAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.aperture, self.address)
    }
}

/// Address as consumed by an engine: either a virtual address or a physical address tagged
/// with its aperture.
///
/// Ordering is lexicographic on (virtual flag, aperture, address); the unprotected bit only
/// breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuAddress {
    pub is_virtual: bool,
    pub aperture: Aperture,
    pub address: u64,
    /// Confidential computing: the access targets unprotected (shared) memory.
    pub is_unprotected: bool,
}

impl GpuAddress {
    pub const fn virt(address: u64) -> Self {
        Self {
            is_virtual: true,
            aperture: Aperture::Default,
            address,
            is_unprotected: false,
        }
    }

    pub const fn phys(phys: GpuPhysAddress) -> Self {
        Self {
            is_virtual: false,
            aperture: phys.aperture,
            address: phys.address,
            is_unprotected: false,
        }
    }

    #[must_use]
    pub const fn unprotected(mut self) -> Self {
        self.is_unprotected = true;
        self
    }

    #[must_use]
    pub const fn offset(mut self, bytes: u64) -> Self {
        self.address = self.address.wrapping_add(bytes);
        self
    }

    pub const fn as_phys(self) -> Option<GpuPhysAddress> {
        if self.is_virtual {
            None
        } else {
            Some(GpuPhysAddress::new(self.aperture, self.address))
        }
    }
}

impl From<GpuPhysAddress> for GpuAddress {
    fn from(phys: GpuPhysAddress) -> Self {
        Self::phys(phys)
    }
}
