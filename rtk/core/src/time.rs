//! Tick counting and time-out bookkeeping

use core::fmt;

use crate::FatalError;

/// Tick counter width
pub type TickType = u32;

/// Wait forever
pub const MAX_DELAY: TickType = TickType::MAX;

/// Do not wait at all
pub const NO_WAIT: TickType = 0;

/// Tick counter guarded by a bitwise complement mirror.
///
/// Every advance first checks that the mirror still holds `!count`; a
/// mismatch means the counter was overwritten behind the kernel's back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickCounter {
    count: TickType,
    mirror: TickType,
    overflows: TickType,
}

impl TickCounter {
    /// Create a counter starting at `start`
    pub const fn new(start: TickType) -> Self {
        Self {
            count: start,
            mirror: !start,
            overflows: 0,
        }
    }

    /// Current tick value
    pub const fn now(&self) -> TickType {
        self.count
    }

    /// Number of times the counter wrapped to zero
    pub const fn overflows(&self) -> TickType {
        self.overflows
    }

    /// Advances by one tick. Returns `true` when the counter wrapped.
    pub fn advance(&mut self) -> Result<bool, FatalError> {
        if self.mirror != !self.count {
            return Err(FatalError::TickMirrorMismatch);
        }
        self.count = self.count.wrapping_add(1);
        self.mirror = !self.count;
        if self.count == 0 {
            self.overflows = self.overflows.wrapping_add(1);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Overwrites the counter without touching the mirror.
    #[doc(hidden)]
    pub fn corrupt(&mut self, value: TickType) {
        self.count = value;
    }
}

impl fmt::Display for TickCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.count)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TickCounter {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "tick:{}", self.count);
    }
}

/// Snapshot taken when a bounded wait starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeOut {
    overflow_count: TickType,
    entered: TickType,
}

impl TimeOut {
    /// Captures the tick state at the start of a wait
    pub const fn capture(counter: &TickCounter) -> Self {
        Self {
            overflow_count: counter.overflows,
            entered: counter.count,
        }
    }

    /// Tick value when the wait started
    pub const fn entered(&self) -> TickType {
        self.entered
    }

    /// Checks whether a wait of `remaining` ticks, started at this snapshot,
    /// has expired.
    ///
    /// When time is left `remaining` is reduced by the elapsed ticks and the
    /// snapshot is moved to `counter`, so repeated checks stay exact.
    pub fn expired(&mut self, counter: &TickCounter, remaining: &mut TickType) -> bool {
        let now = counter.count;
        let elapsed = now.wrapping_sub(self.entered);

        if *remaining == MAX_DELAY {
            false
        } else if counter.overflows != self.overflow_count && now >= self.entered {
            // Wrapped and came back around past the start point.
            *remaining = 0;
            true
        } else if elapsed < *remaining {
            *remaining -= elapsed;
            *self = Self::capture(counter);
            false
        } else {
            *remaining = 0;
            true
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TimeOut {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "TimeOut({}, {})", self.overflow_count, self.entered);
    }
}
