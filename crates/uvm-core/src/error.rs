use thiserror::Error;

use crate::fault::FatalReason;

pub type Result<T> = std::result::Result<T, UvmError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UvmError {
    /// HAL table or tree bookkeeping is inconsistent. Aborts device attach.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The requested combination is not offered by this architecture.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Capability or architecture mismatch at a call site. Always a programming error.
    #[error("assertion violated: {0}")]
    AssertionViolation(String),

    #[error("fatal fault at {address:#x}: {reason}")]
    FatalFault { reason: FatalReason, address: u64 },

    #[error("timed out waiting for {what} after {iterations} iterations")]
    SpinTimeout { what: &'static str, iterations: u64 },

    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl UvmError {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedConfiguration(msg.into())
    }

    pub(crate) fn assertion(msg: impl Into<String>) -> Self {
        Self::AssertionViolation(msg.into())
    }
}

impl From<serde_json::Error> for UvmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
