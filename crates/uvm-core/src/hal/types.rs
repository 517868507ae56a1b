//! Small value types shared by every HAL table.

/// Memory barrier scope.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Membar {
    #[default]
    None,
    /// Orders accesses as observed by the GPU.
    Gpu,
    /// Orders accesses as observed by the whole system, including the CPU and peers.
    Sys,
}

/// Engine class an MMU engine id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MmuEngineType {
    Graphics,
    Host,
    Ce,
}

/// What a replay request asks the MMU to do with outstanding faulted accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayType {
    /// Retry all pending faulted accesses.
    Start,
    /// Retry all pending faulted accesses and acknowledge once every uTLB has done so.
    StartAckAll,
}

/// GPFIFO fetch synchronization mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpfifoSync {
    /// The segment may be fetched before the previous one finishes executing.
    #[default]
    Proceed,
    /// Fetch stalls until the previous segment's engine synchronization completes.
    Wait,
}

/// Properties of the pushing channel that method validation depends on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MethodContext {
    pub privileged: bool,
    pub sriov_heavy: bool,
    pub confidential_computing: bool,
}

/// Whether a test invalidate targets one VA or the whole address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbTargetVa {
    All,
    Targeted(u64),
}

/// Explicit control over every knob of a TLB invalidate, for validating the regular paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbInvalidateTestParams {
    pub target: TlbTargetVa,
    /// Raw `PAGE_TABLE_LEVEL` value.
    pub page_table_level: u32,
    pub membar: Membar,
    pub disable_gpc_invalidate: bool,
}
