//! Hosted port for the RTK kernel.
//!
//! There is no real context switch on a host: [`HostPort`] records yield
//! requests and [`Simulator`] acts on them, running each task's body as a
//! step function whenever that task is the one selected. This is enough to
//! drive the kernel through complete scenarios in ordinary tests and
//! desktop tools.
//!
//! Trace records go to the `log` facade and, optionally, to any writer as
//! framed binary records (see [`trace`]).

use std::io::Write;

use log::{error, trace, warn};
use rtk_kernel::{FatalError, Port, StackWord, TaskEntry, TraceEvent};

mod sim;
pub mod trace;

pub use sim::{HostMemory, Simulator, TaskBody};
pub use trace::{FrameDecoder, TraceError, TraceFrame, TraceWriter};

/// Word painted over fresh stacks; its survival marks unused stack.
pub const STACK_FILL: StackWord = 0xA5A5_A5A5;

/// Words of the initial frame written at the top of each stack
const INITIAL_FRAME_WORDS: usize = 2;

type BoxedWriter = TraceWriter<Box<dyn Write + Send>>;

/// [`Port`] implementation for hosted targets.
#[derive(Default)]
pub struct HostPort {
    yield_requested: bool,
    tick_rate: Option<u32>,
    privilege: u32,
    run_time: u32,
    capture: bool,
    events: Vec<TraceEvent>,
    writer: Option<BoxedWriter>,
}

impl HostPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps every trace record in memory, see [`HostPort::events`].
    pub fn capturing(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Also writes trace records as frames to `writer`.
    pub fn with_trace_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        let boxed: Box<dyn Write + Send> = Box::new(writer);
        self.writer = Some(TraceWriter::new(boxed));
        self
    }

    /// Returns and clears the pending yield request.
    pub fn take_yield(&mut self) -> bool {
        core::mem::take(&mut self.yield_requested)
    }

    /// Tick rate programmed by the kernel, once the scheduler started.
    pub fn tick_rate(&self) -> Option<u32> {
        self.tick_rate
    }

    /// Privilege token currently in effect.
    pub fn privilege(&self) -> u32 {
        self.privilege
    }

    /// Number of run-time statistics updates (switches plus ticks).
    pub fn run_time(&self) -> u32 {
        self.run_time
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn flush_trace(&mut self) -> Result<(), TraceError> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Port for HostPort {
    fn init_stack(&mut self, stack: &mut [StackWord], entry: TaskEntry, arg: usize) -> usize {
        stack.fill(STACK_FILL);
        let top = stack.len().saturating_sub(INITIAL_FRAME_WORDS);
        let frame = [arg, entry as usize];
        for (slot, word) in stack[top..].iter_mut().zip(frame) {
            *slot = word;
        }
        top
    }

    fn request_yield(&mut self) {
        self.yield_requested = true;
    }

    fn start_tick(&mut self, rate_hz: u32) {
        self.tick_rate = Some(rate_hz);
    }

    fn validate_stack(&self, stack: &[StackWord], stack_pointer: usize) -> bool {
        stack_pointer < stack.len() && stack.first() == Some(&STACK_FILL)
    }

    fn switch_privilege(&mut self, token: u32) -> u32 {
        core::mem::replace(&mut self.privilege, token)
    }

    fn update_run_time_stats(&mut self) {
        self.run_time = self.run_time.wrapping_add(1);
    }

    fn trace(&mut self, event: TraceEvent) {
        trace!("{:?}", event);
        if self.capture {
            self.events.push(event);
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.write_event(self.run_time, &event) {
                warn!("trace output disabled: {}", err);
                self.writer = None;
            }
        }
    }

    fn fatal(&mut self, error: FatalError) -> ! {
        error!("kernel fatal error: {}", error);
        panic!("kernel fatal error: {}", error)
    }
}

/// Words at the bottom of `stack` that were never written.
pub fn stack_high_water_mark(stack: &[StackWord]) -> usize {
    stack.iter().take_while(|&&word| word == STACK_FILL).count()
}

#[cfg(test)]
mod tests;
