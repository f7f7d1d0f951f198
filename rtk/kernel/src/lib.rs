#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![forbid(unsafe_code)]

//! # RTK Kernel
//!
//! A preemptive, priority based kernel for single core processors. The
//! [`Kernel`] context owns every task and synchronization object; nothing is
//! allocated at run time and every object lives in a fixed table addressed
//! by generation checked handles.
//!
//! ## Module Overview
//! - [`list`]        – Index linked lists shared by every wait structure.
//! - [`kernel`]      – Scheduler core: ticks, task selection, suspension.
//! - [`task`]        – Task creation, delays, suspension and priorities.
//! - [`queue`]       – Bounded queues and semaphores.
//! - [`mutex`]       – Nesting mutexes with priority inheritance.
//! - [`event_group`] – Flag words tasks can wait on.
//! - [`poll`]        – One wait over several event sources.
//! - [`timer`]       – Software timers and the timer service task.
//! - [`notify`]      – Direct-to-task notifications.
//! - [`port`]        – What the kernel needs from the processor.
//! - [`trace`]       – Trace records handed to the port.

pub mod event_group;
pub mod kernel;
pub mod list;
pub mod mutex;
pub mod notify;
pub mod poll;
pub mod port;
pub mod queue;
pub mod task;
pub mod timer;
pub mod trace;

pub use event_group::{EventBits, EVENT_BITS_MASK};
pub use kernel::{Kernel, SchedulerResources, SchedulerState, SuspendGuard};
pub use notify::NotifyAction;
pub use poll::{
    PollEvent, PollEvents, PollTarget, GROUP_DELETED, NOTIFICATION_RECEIVED, QUEUE_READABLE,
    QUEUE_WRITABLE,
};
pub use port::{Port, StackWord, TaskEntry};
pub use queue::{QueueKind, SendPosition};
pub use rtk_core::*;
pub use task::{TaskParams, TaskState, TaskStatus};
pub use timer::{ServiceOutcome, TimerCallback, COMMAND_SIZE};
pub use trace::TraceEvent;

#[cfg(test)]
mod tests;
