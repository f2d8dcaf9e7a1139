//! Runtime configuration
//!
//! Defaults reproduce the limits the accelerator's reference programs use.
//! Environment variables override discovery for containers and tests.

use dsa_hw::wq::{ENQ_RETRY_MAX, POLL_RETRY_MAX};
use std::path::PathBuf;

/// Force a specific work-queue character device (skips discovery).
pub const ENV_WQ_PATH: &str = "DSA_WQ_PATH";

/// Relocate the sysfs tree (`$DSA_SYSFS_ROOT/sys/bus/dsa/devices`).
pub const ENV_SYSFS_ROOT: &str = "DSA_SYSFS_ROOT";

/// Default resumptions allowed on top of one per [`FAULT_GRANULE`].
pub const DEFAULT_RESUME_LIMIT: u32 = 4096;

/// A request may fault once per 4 KiB page it has not touched yet.
pub const FAULT_GRANULE: u32 = 4096;

/// Client limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Total enqueue attempts before `QueueSaturated`.
    pub enqueue_retry_limit: u32,
    /// Polls before `CompletionTimeout` on the bounded waits
    /// (`await_completion` and the `*_bounded` submissions); `None` spins
    /// until the record is written.
    pub poll_limit: Option<u32>,
    /// Resumptions allowed beyond one per [`FAULT_GRANULE`] of the request.
    pub resume_limit: u32,
    /// Set the cache-control hint on descriptors built by the client.
    pub cache_control: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            enqueue_retry_limit: ENQ_RETRY_MAX,
            poll_limit: Some(POLL_RETRY_MAX),
            resume_limit: DEFAULT_RESUME_LIMIT,
            cache_control: false,
        }
    }
}

impl ClientConfig {
    /// Set the enqueue attempt budget (at least one attempt is always made).
    #[must_use]
    pub fn with_enqueue_retry_limit(mut self, limit: u32) -> Self {
        self.enqueue_retry_limit = limit.max(1);
        self
    }

    /// Set the poll budget; `None` waits without bound.
    #[must_use]
    pub fn with_poll_limit(mut self, limit: Option<u32>) -> Self {
        self.poll_limit = limit;
        self
    }

    /// Set the resumption slack.
    #[must_use]
    pub fn with_resume_limit(mut self, limit: u32) -> Self {
        self.resume_limit = limit;
        self
    }

    /// Resumptions allowed for a request of `bytes`: one per page it spans
    /// plus the configured slack.
    #[must_use]
    pub const fn resume_allowance(&self, bytes: u32) -> u32 {
        bytes.div_ceil(FAULT_GRANULE).saturating_add(self.resume_limit)
    }

    /// Toggle the cache-control hint.
    #[must_use]
    pub fn with_cache_control(mut self, enabled: bool) -> Self {
        self.cache_control = enabled;
        self
    }
}

/// Timing-slot channel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Timed operations during calibration; the minimum becomes the unit.
    pub calibration_rounds: u32,
    /// Slots in one transmission.
    pub slot_count: usize,
    /// Receiver samples per slot (sampling interval = unit / oversample).
    pub oversample: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            calibration_rounds: 50,
            slot_count: 100,
            oversample: 16,
        }
    }
}

/// `DSA_WQ_PATH`, if set and non-empty.
pub fn wq_path_override() -> Option<PathBuf> {
    std::env::var_os(ENV_WQ_PATH)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// sysfs root honouring `DSA_SYSFS_ROOT`.
pub fn sysfs_root() -> PathBuf {
    std::env::var_os(ENV_SYSFS_ROOT)
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("/"), PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_limits() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.enqueue_retry_limit, 1000);
        assert_eq!(cfg.poll_limit, Some(10_000));
        assert!(!cfg.cache_control);

        let ch = ChannelConfig::default();
        assert_eq!(ch.calibration_rounds, 50);
        assert_eq!(ch.slot_count, 100);
        assert_eq!(ch.oversample, 16);
    }

    #[test]
    fn resume_allowance_scales_with_request() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.resume_allowance(0), DEFAULT_RESUME_LIMIT);
        assert_eq!(cfg.resume_allowance(1), DEFAULT_RESUME_LIMIT + 1);
        assert_eq!(cfg.resume_allowance(64 << 20), 16_384 + DEFAULT_RESUME_LIMIT);

        let tight = cfg.with_resume_limit(0);
        assert_eq!(tight.resume_allowance(8192), 2);
        assert_eq!(ClientConfig::default().with_resume_limit(u32::MAX).resume_allowance(4096), u32::MAX);
    }

    #[test]
    fn retry_limit_never_drops_to_zero() {
        let cfg = ClientConfig::default().with_enqueue_retry_limit(0);
        assert_eq!(cfg.enqueue_retry_limit, 1);
    }
}
