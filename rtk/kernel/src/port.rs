//! Processor port interface
//!
//! Everything the kernel needs from the CPU and its tick hardware goes
//! through [`Port`]. Only stack preparation and yield requests are
//! mandatory; the remaining hooks default to no-ops so a minimal port stays
//! small.

use rtk_core::FatalError;

use crate::trace::TraceEvent;

/// Machine word used for task stacks
pub type StackWord = usize;

/// Task entry point. The argument is the value passed at creation.
pub type TaskEntry = fn(usize);

pub trait Port {
    /// Lays out the initial context of a new task on `stack` and returns the
    /// saved stack pointer as a word offset into `stack`.
    fn init_stack(&mut self, stack: &mut [StackWord], entry: TaskEntry, arg: usize) -> usize;

    /// Requests a context switch at the next opportunity.
    ///
    /// Called from task level when a higher priority task became ready, or
    /// when the running task blocked. The kernel then expects
    /// [`Kernel::switch_context`](crate::Kernel::switch_context) to run.
    fn request_yield(&mut self);

    /// Programs the periodic tick interrupt.
    fn start_tick(&mut self, _rate_hz: u32) {}

    /// Checks a task stack when the task is switched out.
    fn validate_stack(&self, _stack: &[StackWord], _stack_pointer: usize) -> bool {
        true
    }

    /// Checks that the caller may read (`write == false`) or write `buffer`.
    fn check_access(&self, _buffer: &[u8], _write: bool) -> bool {
        true
    }

    /// Switches to the access privileges identified by `token` and returns
    /// the token that was active before.
    fn switch_privilege(&mut self, token: u32) -> u32 {
        token
    }

    /// Called on every context switch and every tick.
    fn update_run_time_stats(&mut self) {}

    /// Receives kernel trace records.
    fn trace(&mut self, _event: TraceEvent) {}

    /// Kernel consistency violation. Must not return.
    fn fatal(&mut self, error: FatalError) -> ! {
        panic!("kernel fatal error: {}", error)
    }
}
