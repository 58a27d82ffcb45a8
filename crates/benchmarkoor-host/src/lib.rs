//! Scoped CPU-frequency and turbo-boost conditioning
//!
//! Pins frequency, governor and turbo state for the duration of a
//! measurement and restores the captured originals afterward, including
//! after crashes via timestamped state files in the cache directory.

pub mod conditioner;
pub mod error;
mod sysfs;

pub use conditioner::{Conditioner, CpuState, OriginalSettings, TurboState};
pub use error::{HostError, Result};
