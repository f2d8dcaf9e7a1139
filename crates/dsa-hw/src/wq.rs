//! Work-queue identifiers and paths exposed by the `idxd` driver.
//!
//! Source: `Documentation/ABI/stable/sysfs-driver-dma-idxd`.

/// Size of the submission portal mapping (one page).
pub const PORTAL_SIZE: usize = 4096;

/// Enqueue retries before a shared queue is considered saturated.
pub const ENQ_RETRY_MAX: u32 = 1000;

/// Completion polls before a bounded wait gives up.
pub const POLL_RETRY_MAX: u32 = 10_000;

/// Root of the `dsa` bus in sysfs.
pub const SYSFS_BUS: &str = "/sys/bus/dsa/devices";

/// Directory holding the work-queue character devices.
pub const DEV_DIR: &str = "/dev/dsa";

/// Prefix of work-queue entries on the bus (`wq<device>.<queue>`).
pub const WQ_PREFIX: &str = "wq";

/// Work-queue type (`type` attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WqType {
    /// Not configured.
    None,
    /// Owned by an in-kernel user.
    Kernel,
    /// Exposed to user space through a character device.
    User,
}

impl WqType {
    /// Parse the sysfs attribute value.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "kernel" => Self::Kernel,
            "user" => Self::User,
            _ => Self::None,
        }
    }
}

/// Work-queue mode (`mode` attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WqMode {
    /// Single client, submitted with `MOVDIR64B`.
    Dedicated,
    /// Many clients, submitted with `ENQCMD`; may reject when full.
    Shared,
}

impl WqMode {
    /// Parse the sysfs attribute value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "dedicated" => Some(Self::Dedicated),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

impl std::fmt::Display for WqType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Kernel => write!(f, "kernel"),
            Self::User => write!(f, "user"),
        }
    }
}

impl std::fmt::Display for WqMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dedicated => write!(f, "dedicated"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// Whether a bus entry name looks like a work queue (`wq0.1`).
#[must_use]
pub fn is_wq_name(name: &str) -> bool {
    name.strip_prefix(WQ_PREFIX)
        .and_then(|rest| rest.split_once('.'))
        .is_some_and(|(dev, queue)| {
            !dev.is_empty()
                && !queue.is_empty()
                && dev.bytes().all(|b| b.is_ascii_digit())
                && queue.bytes().all(|b| b.is_ascii_digit())
        })
}
