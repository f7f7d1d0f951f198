//! Generation-checked object handles
//!
//! A handle is a slot index plus the generation the slot had when the object
//! was created. Deleting an object bumps the slot generation, so every handle
//! to it stops resolving, even after the slot is reused.

use core::fmt;

/// Slot generation counter
pub type Generation = u16;

/// Untyped slot reference shared by all handle kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    index: u16,
    generation: Generation,
}

impl RawHandle {
    /// Create a raw handle
    pub const fn new(index: u16, generation: Generation) -> Self {
        Self { index, generation }
    }

    /// Slot index
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Slot generation at creation time
    pub const fn generation(self) -> Generation {
        self.generation
    }

    /// Packs the handle into a single word, index in the low half.
    pub const fn to_bits(self) -> u32 {
        (self.index as u32) | ((self.generation as u32) << 16)
    }

    /// Inverse of [`RawHandle::to_bits`]
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            index: bits as u16,
            generation: (bits >> 16) as u16,
        }
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for RawHandle {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "#{}.{}", self.index, self.generation);
    }
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(RawHandle);

        impl $name {
            /// Wraps a raw slot reference
            pub const fn from_raw(raw: RawHandle) -> Self {
                Self(raw)
            }

            /// Underlying slot reference
            pub const fn raw(self) -> RawHandle {
                self.0
            }

            /// Slot index
            pub const fn index(self) -> usize {
                self.0.index()
            }

            /// Slot generation
            pub const fn generation(self) -> Generation {
                self.0.generation()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", stringify!($name), self.0)
            }
        }

        #[cfg(feature = "defmt")]
        impl defmt::Format for $name {
            fn format(&self, fmt: defmt::Formatter) {
                defmt::write!(fmt, "{}{}", stringify!($name), self.0);
            }
        }
    };
}

typed_handle!(
    /// Handle to a task control block
    TaskHandle
);
typed_handle!(
    /// Handle to a queue, semaphore or mutex
    QueueHandle
);
typed_handle!(
    /// Handle to an event group
    EventGroupHandle
);
typed_handle!(
    /// Handle to a software timer
    TimerHandle
);
typed_handle!(
    /// Handle to an event poll object
    PollHandle
);

/// Semaphores are queues with zero-sized items
pub type SemaphoreHandle = QueueHandle;

/// Mutexes are queues of length one with zero-sized items
pub type MutexHandle = QueueHandle;
