//! Direct-to-task notifications
//!
//! Every task has one 32-bit notification value and a pending flag. A
//! notification updates the value and wakes the task if it is waiting for
//! one; it is cheaper than a semaphore or event group when there is exactly
//! one receiver.

use rtk_core::{KernelError, KernelResult, TaskHandle, TickType};

use crate::kernel::Kernel;
use crate::port::Port;
use crate::task::WaitKey;
use crate::trace::TraceEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NotifyState {
    NotWaiting,
    Waiting,
    Received,
}

/// How a notification updates the receiver's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    /// Leave the value alone; only mark a notification pending
    NoAction,
    /// OR the given bits in
    SetBits,
    /// Add one, ignoring the given value
    Increment,
    /// Replace the value
    SetValueWithOverwrite,
    /// Replace the value unless a notification is already pending
    SetValueWithoutOverwrite,
}

#[cfg(feature = "defmt")]
impl defmt::Format for NotifyAction {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::NoAction => defmt::write!(fmt, "NoAction"),
            Self::SetBits => defmt::write!(fmt, "SetBits"),
            Self::Increment => defmt::write!(fmt, "Increment"),
            Self::SetValueWithOverwrite => defmt::write!(fmt, "SetValueWithOverwrite"),
            Self::SetValueWithoutOverwrite => defmt::write!(fmt, "SetValueWithoutOverwrite"),
        }
    }
}

impl<'a, P: Port> Kernel<'a, P> {
    /// Notifies a task.
    ///
    /// With [`NotifyAction::SetValueWithoutOverwrite`] the call fails with
    /// `QueueFull` while an earlier notification is still pending.
    pub fn notify(
        &mut self,
        handle: TaskHandle,
        value: u32,
        action: NotifyAction,
    ) -> KernelResult<()> {
        let t = self.task_index(Some(handle))?;
        let woken = self.critical(|k| k.notify_inner(t, value, action))?;
        self.emit(TraceEvent::TaskNotify {
            task: handle,
            value,
        });
        if woken {
            self.yield_if_preempting();
        }
        Ok(())
    }

    /// Interrupt-safe [`Kernel::notify`]. Returns `true` when the notified
    /// task outranks the interrupted one.
    pub fn notify_from_isr(
        &mut self,
        handle: TaskHandle,
        value: u32,
        action: NotifyAction,
    ) -> KernelResult<bool> {
        let t = self.task_index(Some(handle))?;
        let woken = self.critical(|k| k.notify_inner(t, value, action))?;
        self.emit(TraceEvent::TaskNotify {
            task: handle,
            value,
        });
        Ok(woken)
    }

    /// Increments the notification value, like giving a counting semaphore.
    pub fn notify_give(&mut self, handle: TaskHandle) -> KernelResult<()> {
        self.notify(handle, 0, NotifyAction::Increment)
    }

    pub fn notify_give_from_isr(&mut self, handle: TaskHandle) -> KernelResult<bool> {
        self.notify_from_isr(handle, 0, NotifyAction::Increment)
    }

    fn notify_inner(&mut self, t: usize, value: u32, action: NotifyAction) -> KernelResult<bool> {
        let tcb = &mut self.tasks[t].value;
        let original = tcb.notify_state;

        match action {
            NotifyAction::NoAction => {}
            NotifyAction::SetBits => tcb.notify_value |= value,
            NotifyAction::Increment => tcb.notify_value = tcb.notify_value.wrapping_add(1),
            NotifyAction::SetValueWithOverwrite => tcb.notify_value = value,
            NotifyAction::SetValueWithoutOverwrite => {
                if original == NotifyState::Received {
                    return Err(KernelError::QueueFull);
                }
                tcb.notify_value = value;
            }
        }
        tcb.notify_state = NotifyState::Received;

        let mut woken = false;
        if original == NotifyState::Waiting {
            woken = self.make_ready_from_wait(t);
        }
        if self.notification_readiness_changed(t) {
            woken = true;
        }
        Ok(woken)
    }

    /// Waits for a notification and returns the value it carried.
    ///
    /// `clear_on_entry` bits are cleared before waiting when nothing is
    /// pending; `clear_on_exit` bits are cleared after the value is read.
    pub fn notify_wait(
        &mut self,
        clear_on_entry: u32,
        clear_on_exit: u32,
        ticks: TickType,
    ) -> nb::Result<u32, KernelError> {
        let t = self.task_index(None)?;
        let nothing_pending = |k: &Self| k.tasks[t].value.notify_state != NotifyState::Received;
        if self.take_wait(WaitKey::Notify).is_none()
            && self.notify_block(t, ticks, nothing_pending, clear_on_entry)?
        {
            return Err(nb::Error::WouldBlock);
        }

        self.critical(|k| {
            let tcb = &mut k.tasks[t].value;
            let value = tcb.notify_value;
            let received = tcb.notify_state == NotifyState::Received;
            if received {
                tcb.notify_value &= !clear_on_exit;
            }
            tcb.notify_state = NotifyState::NotWaiting;
            k.notification_readiness_changed(t);
            if received {
                Ok(value)
            } else {
                Err(nb::Error::Other(KernelError::Timeout))
            }
        })
    }

    /// Waits for the notification value to become non-zero, then either
    /// clears it or decrements it. Returns the value before that.
    pub fn notify_take(
        &mut self,
        clear_on_exit: bool,
        ticks: TickType,
    ) -> nb::Result<u32, KernelError> {
        let t = self.task_index(None)?;
        if self.take_wait(WaitKey::Notify).is_none()
            && self.notify_block(t, ticks, |k: &Self| k.tasks[t].value.notify_value == 0, 0)?
        {
            return Err(nb::Error::WouldBlock);
        }

        self.critical(|k| {
            let tcb = &mut k.tasks[t].value;
            let value = tcb.notify_value;
            if value != 0 {
                tcb.notify_value = if clear_on_exit { 0 } else { value - 1 };
            }
            tcb.notify_state = NotifyState::NotWaiting;
            k.notification_readiness_changed(t);
            if value != 0 {
                Ok(value)
            } else {
                Err(nb::Error::Other(KernelError::Timeout))
            }
        })
    }

    /// Parks the running task until notified if `must_wait` holds. Returns
    /// `true` when it blocked.
    fn notify_block(
        &mut self,
        t: usize,
        ticks: TickType,
        must_wait: impl Fn(&Self) -> bool,
        clear_on_entry: u32,
    ) -> KernelResult<bool> {
        let ticks = self.effective_wait(ticks);
        if ticks == 0 || !must_wait(&*self) {
            return Ok(false);
        }
        self.check_can_block(ticks)?;

        self.suspend_all();
        let block = self.critical(|k| {
            if !must_wait(&*k) {
                return false;
            }
            let tcb = &mut k.tasks[t].value;
            tcb.notify_value &= !clear_on_entry;
            tcb.notify_state = NotifyState::Waiting;
            true
        });
        if block {
            self.add_current_to_delayed(ticks, true);
            let wait = self.new_wait(WaitKey::Notify, ticks);
            self.store_wait(wait);
        }
        if !self.resume_all() && block {
            self.yield_within_api();
        }
        Ok(block)
    }

    /// Clears a pending notification. Returns `true` if one was pending.
    pub fn notify_state_clear(&mut self, handle: Option<TaskHandle>) -> KernelResult<bool> {
        let t = self.task_index(handle)?;
        Ok(self.critical(|k| {
            let tcb = &mut k.tasks[t].value;
            let pending = tcb.notify_state == NotifyState::Received;
            if pending {
                tcb.notify_state = NotifyState::NotWaiting;
                k.notification_readiness_changed(t);
            }
            pending
        }))
    }
}
