#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![forbid(unsafe_code)]

//! # RTK Core
//!
//! Shared vocabulary for the RTK kernel: the error taxonomy, bounded task
//! priorities, tick arithmetic with wraparound-aware time-outs, generation
//! checked object handles and the kernel configuration.
//!
//! Nothing in this crate touches scheduler state; it is safe to use from
//! ports and application code alike.

use core::fmt;

pub mod config;
pub mod handle;
pub mod priority;
pub mod time;

pub use config::*;
pub use handle::*;
pub use priority::*;
pub use time::*;

#[cfg(test)]
mod tests;

/// RTK version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout the kernel
pub type KernelResult<T> = Result<T, KernelError>;

/// Error kinds reported synchronously by kernel services.
///
/// Conditions that mean the kernel itself is inconsistent are never returned
/// here; they are routed to the port's fatal hook instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A required buffer or argument was empty
    NullArgument,
    /// Handle is stale, out of range or refers to another kind of object
    InvalidHandle,
    /// Object is already live
    AlreadyInUse,
    /// Argument outside its permitted range
    InvalidParameters,
    /// Caller buffer has the wrong size for the object
    AlignmentOrSizeMismatch,
    /// Blocking call made while the scheduler is suspended
    SchedulerSuspended,
    /// Queue stayed full for the whole wait
    QueueFull,
    /// Queue stayed empty for the whole wait
    QueueEmpty,
    /// Wait expired before the condition became true
    Timeout,
    /// Object was deleted while the caller waited on it
    ResourceDeleted,
    /// Mutex released by a task that does not hold it
    NotOwnedByCaller,
    /// Mutex recursion counter is inconsistent or would overflow
    Corrupted,
    /// Copy into or out of caller memory was refused
    DataCopyFailure,
    /// Operation not allowed in the object's current state
    InvalidOperation,
    /// Every event slot of a poll object is taken
    EventsLimitReached,
    /// Empty or malformed event mask
    InvalidEvents,
    /// No free slot left in a fixed-capacity object table
    CapacityExhausted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::NullArgument => write!(f, "Required argument is empty"),
            KernelError::InvalidHandle => write!(f, "Invalid object handle"),
            KernelError::AlreadyInUse => write!(f, "Object already in use"),
            KernelError::InvalidParameters => write!(f, "Invalid parameters"),
            KernelError::AlignmentOrSizeMismatch => write!(f, "Buffer size or alignment mismatch"),
            KernelError::SchedulerSuspended => write!(f, "Scheduler is suspended"),
            KernelError::QueueFull => write!(f, "Queue is full"),
            KernelError::QueueEmpty => write!(f, "Queue is empty"),
            KernelError::Timeout => write!(f, "Wait timed out"),
            KernelError::ResourceDeleted => write!(f, "Object deleted while waiting"),
            KernelError::NotOwnedByCaller => write!(f, "Mutex not owned by caller"),
            KernelError::Corrupted => write!(f, "Mutex recursion counter corrupted"),
            KernelError::DataCopyFailure => write!(f, "Data copy failed"),
            KernelError::InvalidOperation => write!(f, "Invalid operation"),
            KernelError::EventsLimitReached => write!(f, "Event slot limit reached"),
            KernelError::InvalidEvents => write!(f, "Invalid event mask"),
            KernelError::CapacityExhausted => write!(f, "Object table exhausted"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KernelError {}

#[cfg(feature = "defmt")]
impl defmt::Format for KernelError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            KernelError::NullArgument => defmt::write!(fmt, "NullArgument"),
            KernelError::InvalidHandle => defmt::write!(fmt, "InvalidHandle"),
            KernelError::AlreadyInUse => defmt::write!(fmt, "AlreadyInUse"),
            KernelError::InvalidParameters => defmt::write!(fmt, "InvalidParameters"),
            KernelError::AlignmentOrSizeMismatch => defmt::write!(fmt, "AlignmentOrSizeMismatch"),
            KernelError::SchedulerSuspended => defmt::write!(fmt, "SchedulerSuspended"),
            KernelError::QueueFull => defmt::write!(fmt, "QueueFull"),
            KernelError::QueueEmpty => defmt::write!(fmt, "QueueEmpty"),
            KernelError::Timeout => defmt::write!(fmt, "Timeout"),
            KernelError::ResourceDeleted => defmt::write!(fmt, "ResourceDeleted"),
            KernelError::NotOwnedByCaller => defmt::write!(fmt, "NotOwnedByCaller"),
            KernelError::Corrupted => defmt::write!(fmt, "Corrupted"),
            KernelError::DataCopyFailure => defmt::write!(fmt, "DataCopyFailure"),
            KernelError::InvalidOperation => defmt::write!(fmt, "InvalidOperation"),
            KernelError::EventsLimitReached => defmt::write!(fmt, "EventsLimitReached"),
            KernelError::InvalidEvents => defmt::write!(fmt, "InvalidEvents"),
            KernelError::CapacityExhausted => defmt::write!(fmt, "CapacityExhausted"),
        }
    }
}

/// Kernel-internal consistency violations.
///
/// These are delivered to the port's fatal hook; the kernel does not return
/// from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// Task selection found every ready list empty
    NoReadyTask,
    /// Tick counter and its complement mirror disagree
    TickMirrorMismatch,
    /// An active timer list referenced a timer slot that is not live
    InvalidTimer,
    /// The port rejected a task stack on switch-out
    StackCheckFailed,
    /// A list item was found outside the list it was expected in
    ListCorrupted,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::NoReadyTask => write!(f, "no ready task to schedule"),
            FatalError::TickMirrorMismatch => write!(f, "tick counter mirror mismatch"),
            FatalError::InvalidTimer => write!(f, "invalid timer in active list"),
            FatalError::StackCheckFailed => write!(f, "task stack check failed"),
            FatalError::ListCorrupted => write!(f, "kernel list corrupted"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FatalError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            FatalError::NoReadyTask => defmt::write!(fmt, "NoReadyTask"),
            FatalError::TickMirrorMismatch => defmt::write!(fmt, "TickMirrorMismatch"),
            FatalError::InvalidTimer => defmt::write!(fmt, "InvalidTimer"),
            FatalError::StackCheckFailed => defmt::write!(fmt, "StackCheckFailed"),
            FatalError::ListCorrupted => defmt::write!(fmt, "ListCorrupted"),
        }
    }
}
