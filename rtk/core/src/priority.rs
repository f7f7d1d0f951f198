//! Bounded task priorities

use core::fmt;

use crate::config::MAX_PRIORITIES;
use crate::{KernelError, KernelResult};

/// Type-safe task priority.
///
/// Larger values are more urgent. Priority 0 belongs to the idle task and is
/// also available to application tasks that only run when nothing else can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority, shared with the idle task
    pub const IDLE: Priority = Priority(0);

    /// Highest priority the kernel schedules
    pub const MAX: Priority = Priority((MAX_PRIORITIES - 1) as u8);

    /// Creates a priority, rejecting values outside `0..MAX_PRIORITIES`.
    pub fn new(priority: u8) -> KernelResult<Self> {
        if (priority as usize) < MAX_PRIORITIES {
            Ok(Priority(priority))
        } else {
            Err(KernelError::InvalidParameters)
        }
    }

    /// Create priority without validation (const fn)
    pub const fn new_unchecked(priority: u8) -> Self {
        Priority(priority)
    }

    /// Get the raw priority value
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Index into per-priority tables
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Key used to order wait lists: more urgent tasks get smaller keys.
    pub const fn event_key(self) -> u32 {
        (MAX_PRIORITIES - self.0 as usize) as u32
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::IDLE
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Priority {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Priority({})", self.0);
    }
}

/// Macro to create compile-time priority constants
#[macro_export]
macro_rules! priority {
    ($value:literal) => {
        $crate::Priority::new_unchecked($value)
    };
}
