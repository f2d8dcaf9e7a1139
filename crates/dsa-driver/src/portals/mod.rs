//! Submission portal implementations

pub mod hardware;
pub mod software;

pub use hardware::HardwarePortal;
pub use software::{PortalStats, SoftwarePortal};
