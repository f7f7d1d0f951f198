//! Compile-time capacities and runtime kernel configuration

use crate::priority::Priority;
use crate::time::TickType;

/// Number of distinct task priorities (0 is the idle priority)
pub const MAX_PRIORITIES: usize = 8;

/// Maximum number of live tasks, idle and timer service included
pub const MAX_TASKS: usize = 16;

/// Maximum number of live queues, semaphores and mutexes
///
/// The timer service command queue takes one slot.
pub const MAX_QUEUES: usize = 16;

/// Maximum number of live event groups
pub const MAX_EVENT_GROUPS: usize = 8;

/// Maximum number of live software timers
pub const MAX_TIMERS: usize = 16;

/// Maximum number of live event poll objects
pub const MAX_POLL_OBJECTS: usize = 8;

/// Event slots per poll object
pub const POLL_SLOTS: usize = 4;

/// Maximum task and timer name length in bytes
pub const MAX_TASK_NAME_LEN: usize = 16;

/// Runtime kernel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Tick interrupt rate programmed through the port
    pub tick_rate_hz: u32,
    /// Preempt the running task when a higher priority task becomes ready
    pub preemption: bool,
    /// Share the CPU between equal priority tasks on every tick
    pub time_slicing: bool,
    /// Priority of the timer service task
    pub timer_task_priority: Priority,
    /// Depth of the timer service command queue
    pub timer_queue_length: usize,
    /// Name given to the idle task
    pub idle_task_name: &'static str,
    /// Name given to the timer service task
    pub timer_task_name: &'static str,
    /// Tick count the kernel starts counting from
    pub initial_tick_count: TickType,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 1000,
            preemption: true,
            time_slicing: true,
            timer_task_priority: Priority::new_unchecked((MAX_PRIORITIES - 1) as u8),
            timer_queue_length: 8,
            idle_task_name: "IDLE",
            timer_task_name: "Tmr Svc",
            initial_tick_count: 0,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

/// Builder for kernel configuration.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the tick interrupt rate.
    pub fn tick_rate_hz(mut self, rate: u32) -> Self {
        self.config.tick_rate_hz = rate;
        self
    }

    /// Enables or disables preemption.
    pub fn preemption(mut self, enabled: bool) -> Self {
        self.config.preemption = enabled;
        self
    }

    /// Enables or disables time slicing between equal priority tasks.
    pub fn time_slicing(mut self, enabled: bool) -> Self {
        self.config.time_slicing = enabled;
        self
    }

    /// Sets the timer service task priority.
    pub fn timer_task_priority(mut self, priority: Priority) -> Self {
        self.config.timer_task_priority = priority;
        self
    }

    /// Sets the number of commands the timer service queue can hold.
    pub fn timer_queue_length(mut self, length: usize) -> Self {
        self.config.timer_queue_length = length;
        self
    }

    /// Sets the idle and timer service task names.
    pub fn task_names(mut self, idle: &'static str, timer: &'static str) -> Self {
        self.config.idle_task_name = idle;
        self.config.timer_task_name = timer;
        self
    }

    /// Starts the tick counter at `ticks` instead of zero.
    ///
    /// Useful to exercise the counter wraparound paths.
    pub fn initial_tick_count(mut self, ticks: TickType) -> Self {
        self.config.initial_tick_count = ticks;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}
