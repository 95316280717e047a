use core::fmt;

use axerrno::AxError;

/// Errors reported by the protection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmpError {
    /// The slot index is outside `[0, num_slots)`. Hardware was not touched.
    InvalidSlot { slot: usize, num_slots: usize },
    /// A checked access was requested with a width other than 1, 2, 4 or 8
    /// bytes. This is a programming error.
    UnsupportedWidth(usize),
    /// The register file did not hold the self-test sentinels.
    HardwareAbsent,
}

pub type PmpResult<T = ()> = Result<T, PmpError>;

impl fmt::Display for PmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSlot { slot, num_slots } => {
                write!(f, "invalid slot {} (table has {} slots)", slot, num_slots)
            }
            Self::UnsupportedWidth(width) => write!(f, "unsupported access width {}", width),
            Self::HardwareAbsent => write!(f, "protection registers not detected"),
        }
    }
}

impl From<PmpError> for AxError {
    fn from(err: PmpError) -> Self {
        match err {
            PmpError::InvalidSlot { .. } => AxError::InvalidInput,
            PmpError::UnsupportedWidth(_) => AxError::Unsupported,
            PmpError::HardwareAbsent => AxError::NotFound,
        }
    }
}
