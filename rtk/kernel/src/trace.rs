//! Kernel trace records
//!
//! Every record has a one-byte identifier from [`records`] and a short
//! little-endian payload produced by [`TraceEvent::encode`].

use rtk_core::{
    EventGroupHandle, Priority, QueueHandle, RawHandle, TaskHandle, TickType, TimerHandle,
};

/// Canonical record identifiers.
pub mod records {
    /// Scheduler related record identifiers.
    pub mod sched {
        /// Scheduler started
        pub const START: u8 = 1;
        /// Task selected to run
        pub const SWITCHED_IN: u8 = 2;
        /// Scheduler suspended
        pub const SUSPEND_ALL: u8 = 3;
        /// Scheduler resumed
        pub const RESUME_ALL: u8 = 4;
        /// Tick processed
        pub const TICK: u8 = 5;
    }

    /// Task lifecycle record identifiers.
    pub mod task {
        pub const CREATE: u8 = 16;
        pub const DELETE: u8 = 17;
        pub const DELAY: u8 = 18;
        pub const SUSPEND: u8 = 19;
        pub const RESUME: u8 = 20;
        pub const PRIORITY_SET: u8 = 21;
        pub const PRIORITY_INHERIT: u8 = 22;
        pub const PRIORITY_DISINHERIT: u8 = 23;
        pub const NOTIFY: u8 = 24;
    }

    /// Queue, semaphore and mutex record identifiers.
    pub mod queue {
        pub const CREATE: u8 = 32;
        pub const SEND: u8 = 33;
        pub const RECEIVE: u8 = 34;
        pub const BLOCK_ON_SEND: u8 = 35;
        pub const BLOCK_ON_RECEIVE: u8 = 36;
        pub const DELETE: u8 = 37;
    }

    /// Event group record identifiers.
    pub mod event_group {
        pub const SET_BITS: u8 = 48;
        pub const CLEAR_BITS: u8 = 49;
        pub const WAIT_BLOCK: u8 = 50;
        pub const DELETE: u8 = 51;
    }

    /// Software timer record identifiers.
    pub mod timer {
        pub const COMMAND: u8 = 64;
        pub const EXPIRED: u8 = 65;
    }
}

/// A single trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    SchedulerStart,
    TaskSwitchedIn { task: TaskHandle },
    SuspendAll { depth: u8 },
    ResumeAll,
    Tick { count: TickType },
    TaskCreate { task: TaskHandle, priority: Priority },
    TaskDelete { task: TaskHandle },
    TaskDelay { task: TaskHandle, ticks: TickType },
    TaskSuspend { task: TaskHandle },
    TaskResume { task: TaskHandle },
    PrioritySet { task: TaskHandle, priority: Priority },
    PriorityInherit { task: TaskHandle, priority: Priority },
    PriorityDisinherit { task: TaskHandle, priority: Priority },
    TaskNotify { task: TaskHandle, value: u32 },
    QueueCreate { queue: QueueHandle },
    QueueSend { queue: QueueHandle, waiting: u16 },
    QueueReceive { queue: QueueHandle, waiting: u16 },
    QueueBlockOnSend { queue: QueueHandle },
    QueueBlockOnReceive { queue: QueueHandle },
    QueueDelete { queue: QueueHandle },
    EventGroupSetBits { group: EventGroupHandle, bits: u32 },
    EventGroupClearBits { group: EventGroupHandle, bits: u32 },
    EventGroupWaitBlock { group: EventGroupHandle, bits: u32 },
    EventGroupDelete { group: EventGroupHandle },
    TimerCommand { timer: TimerHandle, command: u8 },
    TimerExpired { timer: TimerHandle },
}

/// Largest payload [`TraceEvent::encode`] produces
pub const MAX_PAYLOAD: usize = 8;

impl TraceEvent {
    /// Record identifier.
    pub fn record_id(&self) -> u8 {
        use records::*;
        match self {
            Self::SchedulerStart => sched::START,
            Self::TaskSwitchedIn { .. } => sched::SWITCHED_IN,
            Self::SuspendAll { .. } => sched::SUSPEND_ALL,
            Self::ResumeAll => sched::RESUME_ALL,
            Self::Tick { .. } => sched::TICK,
            Self::TaskCreate { .. } => task::CREATE,
            Self::TaskDelete { .. } => task::DELETE,
            Self::TaskDelay { .. } => task::DELAY,
            Self::TaskSuspend { .. } => task::SUSPEND,
            Self::TaskResume { .. } => task::RESUME,
            Self::PrioritySet { .. } => task::PRIORITY_SET,
            Self::PriorityInherit { .. } => task::PRIORITY_INHERIT,
            Self::PriorityDisinherit { .. } => task::PRIORITY_DISINHERIT,
            Self::TaskNotify { .. } => task::NOTIFY,
            Self::QueueCreate { .. } => queue::CREATE,
            Self::QueueSend { .. } => queue::SEND,
            Self::QueueReceive { .. } => queue::RECEIVE,
            Self::QueueBlockOnSend { .. } => queue::BLOCK_ON_SEND,
            Self::QueueBlockOnReceive { .. } => queue::BLOCK_ON_RECEIVE,
            Self::QueueDelete { .. } => queue::DELETE,
            Self::EventGroupSetBits { .. } => event_group::SET_BITS,
            Self::EventGroupClearBits { .. } => event_group::CLEAR_BITS,
            Self::EventGroupWaitBlock { .. } => event_group::WAIT_BLOCK,
            Self::EventGroupDelete { .. } => event_group::DELETE,
            Self::TimerCommand { .. } => timer::COMMAND,
            Self::TimerExpired { .. } => timer::EXPIRED,
        }
    }

    /// Writes the payload into `buf` and returns its length.
    pub fn encode(&self, buf: &mut [u8; MAX_PAYLOAD]) -> usize {
        fn put_handle(buf: &mut [u8], pos: usize, raw: RawHandle) -> usize {
            buf[pos..pos + 4].copy_from_slice(&raw.to_bits().to_le_bytes());
            pos + 4
        }
        fn put_u32(buf: &mut [u8], pos: usize, value: u32) -> usize {
            buf[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
            pos + 4
        }
        fn put_u16(buf: &mut [u8], pos: usize, value: u16) -> usize {
            buf[pos..pos + 2].copy_from_slice(&value.to_le_bytes());
            pos + 2
        }

        match *self {
            Self::SchedulerStart | Self::ResumeAll => 0,
            Self::SuspendAll { depth } => {
                buf[0] = depth;
                1
            }
            Self::Tick { count } => put_u32(buf, 0, count),
            Self::TaskSwitchedIn { task }
            | Self::TaskDelete { task }
            | Self::TaskSuspend { task }
            | Self::TaskResume { task } => put_handle(buf, 0, task.raw()),
            Self::TaskCreate { task, priority }
            | Self::PrioritySet { task, priority }
            | Self::PriorityInherit { task, priority }
            | Self::PriorityDisinherit { task, priority } => {
                let pos = put_handle(buf, 0, task.raw());
                buf[pos] = priority.raw();
                pos + 1
            }
            Self::TaskDelay { task, ticks: value } | Self::TaskNotify { task, value } => {
                let pos = put_handle(buf, 0, task.raw());
                put_u32(buf, pos, value)
            }
            Self::QueueCreate { queue }
            | Self::QueueBlockOnSend { queue }
            | Self::QueueBlockOnReceive { queue }
            | Self::QueueDelete { queue } => put_handle(buf, 0, queue.raw()),
            Self::QueueSend { queue, waiting } | Self::QueueReceive { queue, waiting } => {
                let pos = put_handle(buf, 0, queue.raw());
                put_u16(buf, pos, waiting)
            }
            Self::EventGroupSetBits { group, bits }
            | Self::EventGroupClearBits { group, bits }
            | Self::EventGroupWaitBlock { group, bits } => {
                let pos = put_handle(buf, 0, group.raw());
                put_u32(buf, pos, bits)
            }
            Self::EventGroupDelete { group } => put_handle(buf, 0, group.raw()),
            Self::TimerCommand { timer, command } => {
                let pos = put_handle(buf, 0, timer.raw());
                buf[pos] = command;
                pos + 1
            }
            Self::TimerExpired { timer } => put_handle(buf, 0, timer.raw()),
        }
    }
}
