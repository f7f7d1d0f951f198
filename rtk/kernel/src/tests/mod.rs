//! In-crate test harness.
//!
//! [`TestPort`] records what the kernel asks of the processor. The helpers
//! below play the part of the context switch handler: [`settle`] performs
//! any requested switch and runs the timer service whenever it is the
//! selected task, so a test always continues as the task that would be
//! running on real hardware.

use rtk_core::{KernelConfig, Priority, TaskHandle, TickType};

use crate::kernel::{Kernel, SchedulerResources};
use crate::port::{Port, StackWord, TaskEntry};
use crate::task::TaskParams;
use crate::timer::COMMAND_SIZE;
use crate::trace::TraceEvent;

mod queue;
mod timer;

pub(crate) const STACK_WORDS: usize = 64;
pub(crate) const TIMER_QUEUE_LEN: usize = 8;

#[derive(Default)]
pub(crate) struct TestPort {
    pub yield_requested: bool,
    pub yields: usize,
    pub tick_rate: Option<u32>,
    pub events: Vec<TraceEvent>,
    pub fired: Vec<(crate::TimerHandle, TickType)>,
    pub privileges: Vec<u32>,
    pub deny_access: bool,
}

impl TestPort {
    pub fn take_yield(&mut self) -> bool {
        core::mem::take(&mut self.yield_requested)
    }
}

impl Port for TestPort {
    fn init_stack(&mut self, stack: &mut [StackWord], _entry: TaskEntry, arg: usize) -> usize {
        let top = stack.len() - 1;
        stack[top] = arg;
        top
    }

    fn request_yield(&mut self) {
        self.yield_requested = true;
        self.yields += 1;
    }

    fn start_tick(&mut self, rate_hz: u32) {
        self.tick_rate = Some(rate_hz);
    }

    fn check_access(&self, _buffer: &[u8], _write: bool) -> bool {
        !self.deny_access
    }

    fn switch_privilege(&mut self, token: u32) -> u32 {
        self.privileges.push(token);
        0
    }

    fn trace(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

pub(crate) type TestKernel<'a> = Kernel<'a, TestPort>;
pub(crate) type Stacks<'a> = core::slice::IterMut<'a, [StackWord; STACK_WORDS]>;

pub(crate) struct Memory {
    idle: [StackWord; STACK_WORDS],
    timer: [StackWord; STACK_WORDS],
    timer_queue: [u8; TIMER_QUEUE_LEN * COMMAND_SIZE],
    stacks: [[StackWord; STACK_WORDS]; 8],
}

impl Memory {
    pub fn new() -> Self {
        Self {
            idle: [0; STACK_WORDS],
            timer: [0; STACK_WORDS],
            timer_queue: [0; TIMER_QUEUE_LEN * COMMAND_SIZE],
            stacks: [[0; STACK_WORDS]; 8],
        }
    }
}

pub(crate) fn config() -> KernelConfig {
    KernelConfig::builder()
        .timer_queue_length(TIMER_QUEUE_LEN)
        .build()
}

pub(crate) fn boot(mem: &mut Memory, config: KernelConfig) -> (TestKernel<'_>, Stacks<'_>) {
    let Memory {
        idle,
        timer,
        timer_queue,
        stacks,
    } = mem;
    let resources = SchedulerResources {
        idle_stack: idle,
        timer_stack: timer,
        timer_queue,
    };
    let kernel = Kernel::new(TestPort::default(), config, resources).unwrap();
    (kernel, stacks.iter_mut())
}

fn task_body(_: usize) {}

pub(crate) fn spawn<'a>(
    k: &mut TestKernel<'a>,
    stacks: &mut Stacks<'a>,
    name: &str,
    priority: u8,
) -> TaskHandle {
    let stack = stacks.next().unwrap();
    k.task_create(TaskParams::new(
        name,
        Priority::new(priority).unwrap(),
        task_body,
        stack,
    ))
    .unwrap()
}

/// Starts the scheduler and lets the timer service reach its first wait.
pub(crate) fn start(k: &mut TestKernel<'_>) {
    k.start_scheduler().unwrap();
    settle(k);
}

/// Performs pending context switches and runs the timer service while it
/// is the selected task.
pub(crate) fn settle(k: &mut TestKernel<'_>) {
    loop {
        if k.port_mut().take_yield() {
            k.switch_context();
            continue;
        }
        if k.current.is_some() && k.current == k.timer_service.task {
            if k.timer_service_run().is_ok() {
                continue;
            }
        }
        break;
    }
}

/// Delivers `n` tick interrupts, switching after each as the epilogue
/// would.
pub(crate) fn advance(k: &mut TestKernel<'_>, n: u32) {
    for _ in 0..n {
        if k.tick() {
            k.port_mut().request_yield();
        }
        settle(k);
    }
}

/// Handle of the running task.
pub(crate) fn running(k: &TestKernel<'_>) -> TaskHandle {
    k.current_task().unwrap()
}
