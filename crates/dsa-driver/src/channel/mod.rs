//! Timing-slot channel
//!
//! The sender encodes one bit per time slot: during the slot of a 1-bit it
//! runs one full accelerator operation, during a 0-bit it stays idle. A
//! receiver sharing the device sees its own operations slow down in the
//! busy slots.
//!
//! ```text
//! calibrate ──► unit (min of N timed operations)
//!                │
//!                ▼
//! SlotTable   [0, u) [u, 2u) [2u, 3u) ...
//!                │
//!                ▼
//! Sender      bit=1 → op once inside the window
//!             bit=0 → idle
//!             window already closed → bit dropped
//! ```
//!
//! Only the sender is implemented. The receiver parameters that follow from
//! calibration (oversampling factor and sampling interval) are exposed on
//! [`Calibration`].

pub mod calibrate;
pub mod sender;
pub mod slots;

pub use calibrate::{calibrate, Calibration};
pub use sender::{alternating_bits, Sender, SlotOutcome, TransmitReport};
pub use slots::{SlotPosition, SlotTable};
