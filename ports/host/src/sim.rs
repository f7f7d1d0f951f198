//! Step driven task simulation.

use log::{debug, warn};
use rtk_kernel::{
    Kernel, KernelConfig, KernelError, KernelResult, Port, Priority, SchedulerResources,
    StackWord, TaskHandle, TaskParams, TaskState, COMMAND_SIZE,
};

use crate::HostPort;

/// Body of a simulated task.
///
/// Called each time the task gets a step while it is the running task. A
/// blocking call that returns `WouldBlock` simply ends the step; the same
/// call is made again on the task's next step, once it runs again.
pub type TaskBody<'a> = Box<dyn FnMut(&mut Kernel<'a, HostPort>) + 'a>;

fn host_task(_: usize) {}

/// Stacks and buffers the kernel borrows for its lifetime.
pub struct HostMemory {
    idle: Vec<StackWord>,
    timer: Vec<StackWord>,
    timer_queue: Vec<u8>,
    stacks: Vec<Vec<StackWord>>,
}

impl HostMemory {
    /// Memory for the kernel's own tasks plus `tasks` application stacks of
    /// `stack_words` words each.
    pub fn new(config: &KernelConfig, tasks: usize, stack_words: usize) -> Self {
        Self {
            idle: vec![0; stack_words],
            timer: vec![0; stack_words],
            timer_queue: vec![0; config.timer_queue_length * COMMAND_SIZE],
            stacks: vec![vec![0; stack_words]; tasks],
        }
    }
}

/// A kernel plus the bodies of its tasks.
pub struct Simulator<'a> {
    kernel: Kernel<'a, HostPort>,
    stacks: std::slice::IterMut<'a, Vec<StackWord>>,
    bodies: Vec<(TaskHandle, TaskBody<'a>)>,
}

impl<'a> Simulator<'a> {
    pub fn new(
        port: HostPort,
        config: KernelConfig,
        memory: &'a mut HostMemory,
    ) -> KernelResult<Self> {
        let HostMemory {
            idle,
            timer,
            timer_queue,
            stacks,
        } = memory;
        let resources = SchedulerResources {
            idle_stack: idle.as_mut_slice(),
            timer_stack: timer.as_mut_slice(),
            timer_queue: timer_queue.as_mut_slice(),
        };
        Ok(Self {
            kernel: Kernel::new(port, config, resources)?,
            stacks: stacks.iter_mut(),
            bodies: Vec::new(),
        })
    }

    pub fn kernel(&self) -> &Kernel<'a, HostPort> {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel<'a, HostPort> {
        &mut self.kernel
    }

    pub fn port(&self) -> &HostPort {
        self.kernel.port()
    }

    /// Creates a task running `body` on the next free stack.
    pub fn spawn(
        &mut self,
        name: &str,
        priority: u8,
        body: impl FnMut(&mut Kernel<'a, HostPort>) + 'a,
    ) -> KernelResult<TaskHandle> {
        let priority = Priority::new(priority)?;
        let stack = self.stacks.next().ok_or(KernelError::CapacityExhausted)?;
        let handle = self.kernel.task_create(TaskParams::new(
            name,
            priority,
            host_task,
            stack.as_mut_slice(),
        ))?;

        let kernel = &self.kernel;
        self.bodies
            .retain(|(task, _)| kernel.task_state(*task) != TaskState::Deleted);
        self.bodies.push((handle, Box::new(body)));
        debug!("simulating task '{}' as {}", name, handle);
        self.settle();
        Ok(handle)
    }

    /// Starts the scheduler.
    pub fn start(&mut self) -> KernelResult<()> {
        self.kernel.start_scheduler()?;
        self.settle();
        Ok(())
    }

    /// Carries out pending context switches and runs the timer service
    /// while it is the selected task.
    pub fn settle(&mut self) {
        loop {
            if self.kernel.port_mut().take_yield() {
                self.kernel.switch_context();
                continue;
            }
            let current = self.kernel.current_task();
            if current.is_some() && current == self.kernel.timer_service_task() {
                match self.kernel.timer_service_run() {
                    Ok(_) => continue,
                    Err(err) => warn!("timer service step failed: {}", err),
                }
            }
            break;
        }
    }

    /// Gives the running task one step. Returns the task that ran.
    pub fn step(&mut self) -> Option<TaskHandle> {
        self.settle();
        let current = self.kernel.current_task()?;
        if let Some((_, body)) = self.bodies.iter_mut().find(|(task, _)| *task == current) {
            body(&mut self.kernel);
        }
        self.settle();
        Some(current)
    }

    /// Delivers one tick interrupt.
    pub fn tick(&mut self) {
        if self.kernel.tick() {
            self.kernel.port_mut().request_yield();
        }
        self.settle();
    }

    /// Runs `isr` as an interrupt handler. It returns whether it woke a
    /// task that outranks the interrupted one, as the `_from_isr` calls
    /// report.
    pub fn interrupt(&mut self, isr: impl FnOnce(&mut Kernel<'a, HostPort>) -> bool) {
        if isr(&mut self.kernel) {
            self.kernel.port_mut().request_yield();
        }
        self.settle();
    }

    /// Runs for `ticks` ticks, stepping the running task `steps` times
    /// before each one.
    pub fn run(&mut self, ticks: u32, steps: u32) {
        for _ in 0..ticks {
            for _ in 0..steps {
                self.step();
            }
            self.tick();
        }
    }
}
