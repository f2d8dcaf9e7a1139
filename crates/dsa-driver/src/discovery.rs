//! Runtime work-queue discovery
//!
//! Scans the `dsa` bus in sysfs for work queues and reads their
//! configuration attributes. A queue is usable for `ENQCMD` submission when
//! it is enabled, of type `user` and in `shared` mode.

use crate::error::{DsaError, Result};
use dsa_hw::wq::{self, WqMode, WqType};
use std::path::{Path, PathBuf};

/// Work-queue manager for runtime discovery
#[derive(Debug)]
pub struct WqManager {
    queues: Vec<WorkQueueInfo>,
}

/// Information about a discovered work queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkQueueInfo {
    /// Queue name (`wq0.0`)
    pub name: String,

    /// Owning device (`dsa0`)
    pub device: String,

    /// Queue type
    pub wq_type: WqType,

    /// Queue mode (`None` when the attribute is unreadable)
    pub mode: Option<WqMode>,

    /// Queue state (`enabled`, `disabled`, ...)
    pub state: String,

    /// Queue depth in descriptors
    pub size: u32,

    /// Largest accepted transfer in bytes
    pub max_transfer_size: u64,

    /// Arbitration priority
    pub priority: u32,

    /// Character device for the portal (`/dev/dsa/wq0.0`)
    pub dev_path: PathBuf,
}

impl WorkQueueInfo {
    /// Whether the queue can take `ENQCMD` submissions from this process.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.wq_type == WqType::User && self.mode == Some(WqMode::Shared) && self.is_enabled()
    }

    /// Whether the queue is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state == "enabled"
    }

    /// Device file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dev_path
    }
}

impl WqManager {
    /// Discover all work queues on the system
    ///
    /// Honours `DSA_SYSFS_ROOT` for relocated sysfs trees.
    ///
    /// # Errors
    ///
    /// Returns `DsaError::NoDeviceAvailable` if no work queue is present.
    pub fn discover() -> Result<Self> {
        let root = crate::config::sysfs_root();
        let bus = root.join(wq::SYSFS_BUS.trim_start_matches('/'));
        Self::discover_in(&bus, Path::new(wq::DEV_DIR))
    }

    /// Discover work queues below an explicit bus directory.
    ///
    /// # Errors
    ///
    /// Returns `DsaError::NoDeviceAvailable` if the directory is missing or
    /// holds no work queue.
    pub fn discover_in(bus: &Path, dev_dir: &Path) -> Result<Self> {
        tracing::info!("Discovering DSA work queues in {}", bus.display());

        let entries = match std::fs::read_dir(bus) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot read {}: {e}", bus.display());
                return Err(DsaError::NoDeviceAvailable);
            }
        };

        let mut queues = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !wq::is_wq_name(&name) {
                continue;
            }

            let info = Self::read_queue(&entry.path(), &name, dev_dir);
            tracing::debug!(
                "{}: type={} mode={:?} state={} size={} max_xfer={}",
                info.name,
                info.wq_type,
                info.mode,
                info.state,
                info.size,
                info.max_transfer_size
            );
            queues.push(info);
        }

        if queues.is_empty() {
            tracing::error!("No DSA work queues found");
            return Err(DsaError::NoDeviceAvailable);
        }

        // Bus order is directory order; sort for stable selection
        queues.sort_by(|a, b| natural_key(&a.name).cmp(&natural_key(&b.name)));

        tracing::info!("Discovered {} work queue(s)", queues.len());
        Ok(Self { queues })
    }

    /// Number of discovered queues
    #[must_use]
    pub const fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// All discovered queues
    #[must_use]
    pub fn queues(&self) -> &[WorkQueueInfo] {
        &self.queues
    }

    /// First enabled user-mode shared queue
    ///
    /// # Errors
    ///
    /// Returns `DsaError::NoDeviceAvailable` if none qualifies.
    pub fn first_usable(&self) -> Result<&WorkQueueInfo> {
        self.queues
            .iter()
            .find(|q| q.is_usable())
            .ok_or(DsaError::NoDeviceAvailable)
    }

    fn read_queue(dir: &Path, name: &str, dev_dir: &Path) -> WorkQueueInfo {
        let wq_type = read_attr(dir, "type").map_or(WqType::None, |v| WqType::parse(&v));
        let mode = read_attr(dir, "mode").and_then(|v| WqMode::parse(&v));
        let state = read_attr(dir, "state").unwrap_or_else(|| "unknown".to_string());
        let size = read_attr(dir, "size").and_then(|v| v.parse().ok()).unwrap_or(0);
        let max_transfer_size = read_attr(dir, "max_transfer_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let priority = read_attr(dir, "priority").and_then(|v| v.parse().ok()).unwrap_or(0);

        WorkQueueInfo {
            name: name.to_string(),
            device: owning_device(dir, name),
            wq_type,
            mode,
            state,
            size,
            max_transfer_size,
            priority,
            dev_path: dev_dir.join(name),
        }
    }
}

/// Read a trimmed sysfs attribute.
fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(attr))
        .ok()
        .map(|s| s.trim().to_string())
}

/// Device that owns the queue: the parent directory of the resolved bus
/// link (`.../dsa0/wq0.0`), or `dsa<N>` derived from the queue name.
fn owning_device(dir: &Path, name: &str) -> String {
    std::fs::canonicalize(dir)
        .ok()
        .and_then(|p| p.parent().and_then(|d| d.file_name()).map(|n| n.to_string_lossy().to_string()))
        .filter(|n| {
            n.strip_prefix("dsa")
                .is_some_and(|idx| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()))
        })
        .unwrap_or_else(|| {
            let index = name
                .trim_start_matches(wq::WQ_PREFIX)
                .split('.')
                .next()
                .unwrap_or_default();
            format!("dsa{index}")
        })
}

/// `wq10.2` sorts after `wq2.0`.
fn natural_key(name: &str) -> (u32, u32) {
    let rest = name.trim_start_matches(wq::WQ_PREFIX);
    let mut parts = rest.split('.').map(|p| p.parse::<u32>().unwrap_or(u32::MAX));
    (parts.next().unwrap_or(u32::MAX), parts.next().unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_bus(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("dsa-discovery-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).expect("temp bus");
        root
    }

    fn add_queue(bus: &Path, name: &str, ty: &str, mode: &str, state: &str) {
        let dir = bus.join(name);
        fs::create_dir_all(&dir).expect("wq dir");
        fs::write(dir.join("type"), format!("{ty}\n")).expect("type");
        fs::write(dir.join("mode"), format!("{mode}\n")).expect("mode");
        fs::write(dir.join("state"), format!("{state}\n")).expect("state");
        fs::write(dir.join("size"), "16\n").expect("size");
        fs::write(dir.join("max_transfer_size"), "2097152\n").expect("max");
    }

    #[test]
    fn selects_first_enabled_user_shared_queue() {
        let bus = fake_bus("select");
        fs::create_dir_all(bus.join("dsa0")).expect("device dir");
        add_queue(&bus, "wq0.0", "kernel", "dedicated", "enabled");
        add_queue(&bus, "wq0.1", "user", "dedicated", "enabled");
        add_queue(&bus, "wq0.2", "user", "shared", "disabled");
        add_queue(&bus, "wq0.3", "user", "shared", "enabled");
        add_queue(&bus, "wq1.0", "user", "shared", "enabled");

        let mgr = WqManager::discover_in(&bus, Path::new("/dev/dsa")).expect("discovery");
        assert_eq!(mgr.queue_count(), 5);

        let wq = mgr.first_usable().expect("usable queue");
        assert_eq!(wq.name, "wq0.3");
        assert_eq!(wq.dev_path, PathBuf::from("/dev/dsa/wq0.3"));
        assert_eq!(wq.size, 16);
        assert_eq!(wq.max_transfer_size, 2_097_152);

        let _ = fs::remove_dir_all(&bus);
    }

    #[test]
    fn no_usable_queue_is_reported() {
        let bus = fake_bus("none");
        add_queue(&bus, "wq0.0", "kernel", "shared", "enabled");

        let mgr = WqManager::discover_in(&bus, Path::new("/dev/dsa")).expect("discovery");
        assert!(matches!(mgr.first_usable(), Err(DsaError::NoDeviceAvailable)));

        let _ = fs::remove_dir_all(&bus);
    }

    #[test]
    fn missing_bus_means_no_device() {
        let missing = std::env::temp_dir().join("dsa-discovery-does-not-exist");
        assert!(matches!(
            WqManager::discover_in(&missing, Path::new("/dev/dsa")),
            Err(DsaError::NoDeviceAvailable)
        ));
    }

    #[test]
    fn natural_ordering() {
        assert!(natural_key("wq2.0") < natural_key("wq10.0"));
        assert!(natural_key("wq0.9") < natural_key("wq0.10"));
    }

    #[test]
    fn test_system_discovery() {
        // Real hardware only reports; absence is not a failure
        match WqManager::discover() {
            Ok(mgr) => {
                for q in mgr.queues() {
                    println!("  {} ({}) type={} mode={:?} state={}", q.name, q.device, q.wq_type, q.mode, q.state);
                }
            }
            Err(e) => println!("No DSA work queues (expected without hardware): {e}"),
        }
    }
}
