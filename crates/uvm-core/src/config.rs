//! Driver tunables.
//!
//! The defaults match the module parameters of the shipping driver. A JSON document may override
//! any subset of them; unknown keys are rejected so that typos do not silently fall back to a
//! default.

use serde::Deserialize;

use crate::error::{Result, UvmError};
use crate::spin::SpinPolicy;

pub const DEFAULT_FAULT_BATCH_COUNT: u32 = 256;
pub const DEFAULT_ACCESS_COUNTER_THRESHOLD: u32 = 256;
pub const MAX_ACCESS_COUNTER_THRESHOLD: u32 = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UvmConfig {
    /// Maximum number of fault-buffer entries fetched per service batch.
    pub fault_batch_count: u32,
    /// Merge duplicate faults within a batch.
    pub fault_coalesce: bool,
    pub fault_replay_policy: ReplayPolicy,
    /// Treat unrecognized fault encodings as assertion failures instead of fatal faults.
    pub fault_strict_classification: bool,
    pub page_table_location: PageTableLocation,
    pub ats: AtsConfig,
    pub access_counters: AccessCounterSettings,
    pub spin: SpinPolicy,
}

impl Default for UvmConfig {
    fn default() -> Self {
        Self {
            fault_batch_count: DEFAULT_FAULT_BATCH_COUNT,
            fault_coalesce: true,
            fault_replay_policy: ReplayPolicy::default(),
            fault_strict_classification: cfg!(debug_assertions),
            page_table_location: PageTableLocation::default(),
            ats: AtsConfig::default(),
            access_counters: AccessCounterSettings::default(),
            spin: SpinPolicy::default(),
        }
    }
}

impl UvmConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validated()
    }

    /// Rejects out-of-range values and clamps the ones with a documented clamp.
    pub fn validated(mut self) -> Result<Self> {
        if self.fault_batch_count == 0 {
            return Err(UvmError::Config("fault_batch_count must be non-zero".into()));
        }
        if self.ats.enabled && !(32..=57).contains(&self.ats.cpu_va_bits) {
            return Err(UvmError::Config(format!(
                "ats.cpu_va_bits {} outside 32..=57",
                self.ats.cpu_va_bits
            )));
        }
        if self.spin.max_iterations == 0 {
            return Err(UvmError::Config("spin.max_iterations must be non-zero".into()));
        }
        self.access_counters.threshold = self
            .access_counters
            .threshold
            .clamp(1, MAX_ACCESS_COUNTER_THRESHOLD);
        Ok(self)
    }
}

/// When the replayable-fault service asks the GPU to retry faulting accesses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// Replay after every serviced 2M VA block.
    Block,
    /// Replay after every batch.
    Batch,
    /// Flush the buffer and replay after every batch.
    #[default]
    BatchFlush,
    /// Replay once, after the buffer has been drained.
    Once,
}

/// Where page-table directories are allocated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageTableLocation {
    /// Video memory, falling back to system memory when video memory is exhausted.
    #[default]
    Default,
    Vid,
    Sys,
}

/// Address-translation-services settings. When enabled, the GPU may forward translations it
/// cannot resolve to the CPU IOMMU, which needs to be told where the CPU VA space ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AtsConfig {
    pub enabled: bool,
    pub cpu_va_bits: u32,
    /// CPU addresses use canonical form, leaving a hole in the middle of the VA space.
    pub canonical: bool,
}

impl Default for AtsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cpu_va_bits: 48,
            canonical: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessCounterSettings {
    pub enabled: bool,
    pub granularity: AccessCounterGranularity,
    pub threshold: u32,
    pub mimc_migration: bool,
    pub momc_migration: bool,
}

impl Default for AccessCounterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            granularity: AccessCounterGranularity::default(),
            threshold: DEFAULT_ACCESS_COUNTER_THRESHOLD,
            mimc_migration: true,
            momc_migration: false,
        }
    }
}

/// Size of the region tracked by one access counter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum AccessCounterGranularity {
    #[serde(rename = "64K")]
    Size64K,
    #[default]
    #[serde(rename = "2M")]
    Size2M,
    #[serde(rename = "16M")]
    Size16M,
    #[serde(rename = "16G")]
    Size16G,
}

impl AccessCounterGranularity {
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Size64K => 64 << 10,
            Self::Size2M => 2 << 20,
            Self::Size16M => 16 << 20,
            Self::Size16G => 16 << 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        let config = UvmConfig::from_json_str("{}").unwrap();
        assert_eq!(config, UvmConfig::default());
        assert_eq!(config.fault_replay_policy, ReplayPolicy::BatchFlush);
        assert_eq!(config.access_counters.granularity.bytes(), 2 << 20);
    }

    #[test]
    fn overrides_are_applied() {
        let config = UvmConfig::from_json_str(
            r#"{
                "fault_batch_count": 32,
                "fault_replay_policy": "once",
                "page_table_location": "sys",
                "ats": { "enabled": true, "cpu_va_bits": 49 },
                "access_counters": { "granularity": "16G", "threshold": 0 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.fault_batch_count, 32);
        assert_eq!(config.fault_replay_policy, ReplayPolicy::Once);
        assert_eq!(config.page_table_location, PageTableLocation::Sys);
        assert!(config.ats.enabled && config.ats.canonical);
        assert_eq!(config.ats.cpu_va_bits, 49);
        assert_eq!(config.access_counters.granularity, AccessCounterGranularity::Size16G);
        assert_eq!(config.access_counters.threshold, 1);
    }

    #[test]
    fn threshold_is_clamped_high() {
        let config =
            UvmConfig::from_json_str(r#"{ "access_counters": { "threshold": 100000 } }"#).unwrap();
        assert_eq!(config.access_counters.threshold, MAX_ACCESS_COUNTER_THRESHOLD);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = UvmConfig::from_json_str(r#"{ "fault_batch": 1 }"#).unwrap_err();
        assert!(matches!(err, UvmError::Config(_)), "{err:?}");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            UvmConfig::from_json_str(r#"{ "fault_batch_count": 0 }"#),
            Err(UvmError::Config(_))
        ));
        assert!(matches!(
            UvmConfig::from_json_str(r#"{ "ats": { "enabled": true, "cpu_va_bits": 64 } }"#),
            Err(UvmError::Config(_))
        ));
    }
}
