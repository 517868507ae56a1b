//! Bounded busy-waiting on hardware-visible state.
//!
//! Used where the caller may run with interrupts disabled and therefore cannot sleep. The
//! bound is part of the policy so tests can fail fast instead of spinning.

use serde::Deserialize;

use crate::error::{Result, UvmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpinPolicy {
    /// Polls before giving up with [`UvmError::SpinTimeout`].
    pub max_iterations: u64,
    /// Polls after which a single warning is logged.
    pub warn_after: u64,
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 1 << 26,
            warn_after: 1 << 20,
        }
    }
}

impl SpinPolicy {
    /// Checks the condition exactly once.
    pub const fn fail_fast() -> Self {
        Self {
            max_iterations: 1,
            warn_after: u64::MAX,
        }
    }

    /// Polls `cond` until it returns true. Returns the number of polls it took.
    pub fn spin_until(&self, what: &'static str, mut cond: impl FnMut() -> bool) -> Result<u64> {
        let mut iterations = 0u64;
        while iterations < self.max_iterations {
            iterations += 1;
            if cond() {
                return Ok(iterations);
            }
            if iterations == self.warn_after {
                tracing::warn!(what, iterations, "still spinning");
            }
            std::hint::spin_loop();
        }
        tracing::error!(what, iterations, "spin timed out");
        Err(UvmError::SpinTimeout { what, iterations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_poll_count() {
        let mut polls = 0;
        let taken = SpinPolicy::default()
            .spin_until("counter", || {
                polls += 1;
                polls == 3
            })
            .unwrap();
        assert_eq!(taken, 3);
    }

    #[test]
    fn fail_fast_checks_once() {
        let err = SpinPolicy::fail_fast()
            .spin_until("never", || false)
            .unwrap_err();
        assert_eq!(
            err,
            UvmError::SpinTimeout {
                what: "never",
                iterations: 1
            }
        );
        assert!(SpinPolicy::fail_fast().spin_until("now", || true).is_ok());
    }
}
