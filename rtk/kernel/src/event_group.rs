//! Event groups
//!
//! An event group is a word of flag bits that tasks can wait on. The top
//! byte is reserved: waiting tasks store their request in the key of their
//! event item, and the reserved bits carry the wait options and, on wakeup,
//! the reason the task woke.
//!
//! Setting bits from an interrupt would mean walking an unbounded wait list
//! with interrupts masked, so the `_from_isr` variants hand the work to the
//! timer service instead.

use log::trace;
use rtk_core::{EventGroupHandle, KernelError, KernelResult, RawHandle, TickType};

use crate::kernel::{layout, resolve, vacant_slot, Kernel};
use crate::poll::{PollLink, GROUP_DELETED};
use crate::port::Port;
use crate::task::WaitKey;
use crate::timer::TimerCommand;
use crate::trace::TraceEvent;

/// Flag word of an event group.
pub type EventBits = u32;

/// Bits available to applications.
pub const EVENT_BITS_MASK: EventBits = 0x00FF_FFFF;

const CONTROL_BITS: EventBits = 0xFF00_0000;
const CLEAR_ON_EXIT_BIT: EventBits = 0x0100_0000;
const UNBLOCKED_DUE_TO_BIT_SET: EventBits = 0x0200_0000;
const WAIT_FOR_ALL_BIT: EventBits = 0x0400_0000;
const GROUP_DELETED_BIT: EventBits = 0x0800_0000;

pub(crate) struct EventGroup {
    pub bits: EventBits,
    pub watcher: Option<PollLink>,
}

impl EventGroup {
    pub fn vacant() -> Self {
        Self {
            bits: 0,
            watcher: None,
        }
    }
}

fn wait_condition_met(current: EventBits, wanted: EventBits, wait_for_all: bool) -> bool {
    if wait_for_all {
        current & wanted == wanted
    } else {
        current & wanted != 0
    }
}

fn check_user_bits(bits: EventBits) -> KernelResult<()> {
    if bits & CONTROL_BITS != 0 {
        Err(KernelError::InvalidParameters)
    } else {
        Ok(())
    }
}

impl<'a, P: Port> Kernel<'a, P> {
    pub(crate) fn group_index(&self, handle: EventGroupHandle) -> KernelResult<usize> {
        resolve(&self.groups, handle.raw())
    }

    /// Creates an event group with every bit clear.
    pub fn event_group_create(&mut self) -> KernelResult<EventGroupHandle> {
        let g = vacant_slot(&self.groups).ok_or(KernelError::CapacityExhausted)?;
        self.lists.init_list(layout::group_waiters(g));
        let generation = self.groups[g].occupy(EventGroup::vacant());
        Ok(EventGroupHandle::from_raw(RawHandle::new(g as u16, generation)))
    }

    /// Sets `bits` and wakes every waiter whose condition now holds.
    ///
    /// Returns the bits as they stand once woken waiters cleared theirs.
    pub fn event_group_set_bits(
        &mut self,
        handle: EventGroupHandle,
        bits: EventBits,
    ) -> KernelResult<EventBits> {
        check_user_bits(bits)?;
        let g = self.group_index(handle)?;
        Ok(self.group_set_bits(g, bits))
    }

    pub(crate) fn group_set_bits(&mut self, g: usize, bits: EventBits) -> EventBits {
        let group = EventGroupHandle::from_raw(RawHandle::new(g as u16, self.groups[g].generation));
        self.emit(TraceEvent::EventGroupSetBits { group, bits });

        let mut suspend = self.suspend();
        let waiters = layout::group_waiters(g);
        suspend.groups[g].value.bits |= bits;

        let mut to_clear = 0;
        let mut item = suspend.lists.head(waiters);
        while let Some(current) = item {
            item = suspend.lists.next_item(current);
            let request = suspend.lists.value(current);
            let wanted = request & EVENT_BITS_MASK;
            let current_bits = suspend.groups[g].value.bits;
            if !wait_condition_met(current_bits, wanted, request & WAIT_FOR_ALL_BIT != 0) {
                continue;
            }
            if request & CLEAR_ON_EXIT_BIT != 0 {
                to_clear |= wanted;
            }
            suspend.remove_from_unordered_event_list(
                current,
                current_bits | UNBLOCKED_DUE_TO_BIT_SET,
            );
        }

        suspend.groups[g].value.bits &= !to_clear;
        suspend.group_readiness_changed(g);
        let result = suspend.groups[g].value.bits;
        drop(suspend);
        result
    }

    /// Clears `bits` and returns the value before clearing. Never wakes a
    /// task.
    pub fn event_group_clear_bits(
        &mut self,
        handle: EventGroupHandle,
        bits: EventBits,
    ) -> KernelResult<EventBits> {
        check_user_bits(bits)?;
        let g = self.group_index(handle)?;
        Ok(self.group_clear_bits(g, bits))
    }

    pub(crate) fn group_clear_bits(&mut self, g: usize, bits: EventBits) -> EventBits {
        let group = EventGroupHandle::from_raw(RawHandle::new(g as u16, self.groups[g].generation));
        self.emit(TraceEvent::EventGroupClearBits { group, bits });
        self.critical(|k| {
            let previous = k.groups[g].value.bits;
            k.groups[g].value.bits &= !bits;
            k.group_readiness_changed(g);
            previous
        })
    }

    pub fn event_group_get_bits(&self, handle: EventGroupHandle) -> KernelResult<EventBits> {
        let g = self.group_index(handle)?;
        Ok(self.critical_read(|k| k.groups[g].value.bits))
    }

    pub fn event_group_get_bits_from_isr(
        &self,
        handle: EventGroupHandle,
    ) -> KernelResult<EventBits> {
        let g = self.group_index(handle)?;
        Ok(self.groups[g].value.bits)
    }

    /// Defers [`Kernel::event_group_set_bits`] to the timer service. Returns
    /// `true` when the timer service task outranks the interrupted task.
    pub fn event_group_set_bits_from_isr(
        &mut self,
        handle: EventGroupHandle,
        bits: EventBits,
    ) -> KernelResult<bool> {
        check_user_bits(bits)?;
        self.group_index(handle)?;
        self.timer_command_from_isr(TimerCommand::SetEventBits {
            group: handle.raw(),
            bits,
        })
    }

    /// Defers [`Kernel::event_group_clear_bits`] to the timer service.
    pub fn event_group_clear_bits_from_isr(
        &mut self,
        handle: EventGroupHandle,
        bits: EventBits,
    ) -> KernelResult<bool> {
        check_user_bits(bits)?;
        self.group_index(handle)?;
        self.timer_command_from_isr(TimerCommand::ClearEventBits {
            group: handle.raw(),
            bits,
        })
    }

    /// Waits until any (or with `wait_for_all`, every) bit of `mask` is set.
    ///
    /// Returns the group's bits at the moment the condition held, before
    /// `clear_on_exit` cleared the bits of `mask`. Fails with `Timeout` when
    /// the wait runs out and with `ResourceDeleted` when the group is
    /// deleted meanwhile.
    pub fn event_group_wait_bits(
        &mut self,
        handle: EventGroupHandle,
        mask: EventBits,
        clear_on_exit: bool,
        wait_for_all: bool,
        ticks: TickType,
    ) -> nb::Result<EventBits, KernelError> {
        if mask == 0 {
            return Err(nb::Error::Other(KernelError::InvalidParameters));
        }
        check_user_bits(mask)?;
        let key = WaitKey::GroupWait(handle.raw());

        if self.take_wait(key).is_some() {
            return self.group_wait_finished(handle, mask, clear_on_exit, wait_for_all);
        }
        let g = self.group_index(handle)?;
        let ticks = self.effective_wait(ticks);
        self.check_can_block(ticks)?;

        let mut suspend = self.suspend();
        let current_bits = suspend.groups[g].value.bits;
        if wait_condition_met(current_bits, mask, wait_for_all) {
            if clear_on_exit {
                suspend.groups[g].value.bits &= !mask;
                suspend.group_readiness_changed(g);
            }
            return Ok(current_bits);
        }
        if ticks == 0 {
            return Err(nb::Error::Other(KernelError::Timeout));
        }

        let mut request = mask;
        if clear_on_exit {
            request |= CLEAR_ON_EXIT_BIT;
        }
        if wait_for_all {
            request |= WAIT_FOR_ALL_BIT;
        }
        suspend.place_on_unordered_event_list(layout::group_waiters(g), request, ticks);
        let wait = suspend.new_wait(key, ticks);
        suspend.store_wait(wait);
        suspend.emit(TraceEvent::EventGroupWaitBlock {
            group: handle,
            bits: mask,
        });
        if !suspend.resume() {
            self.yield_within_api();
        }
        Err(nb::Error::WouldBlock)
    }

    /// Sets `set`, then waits for every bit of `wait_for`.
    ///
    /// Used as a rendezvous: the last task to arrive sees its condition met
    /// at once and clears `wait_for` for everyone.
    pub fn event_group_sync(
        &mut self,
        handle: EventGroupHandle,
        set: EventBits,
        wait_for: EventBits,
        ticks: TickType,
    ) -> nb::Result<EventBits, KernelError> {
        if wait_for == 0 {
            return Err(nb::Error::Other(KernelError::InvalidParameters));
        }
        check_user_bits(set | wait_for)?;
        let key = WaitKey::GroupSync(handle.raw());

        if self.take_wait(key).is_some() {
            return self.group_wait_finished(handle, wait_for, true, true);
        }
        let g = self.group_index(handle)?;
        let ticks = self.effective_wait(ticks);
        self.check_can_block(ticks)?;

        let mut suspend = self.suspend();
        let original = suspend.groups[g].value.bits;
        suspend.group_set_bits(g, set);
        let bits = original | set;
        if bits & wait_for == wait_for {
            suspend.groups[g].value.bits &= !wait_for;
            suspend.group_readiness_changed(g);
            return Ok(bits);
        }
        if ticks == 0 {
            return Err(nb::Error::Other(KernelError::Timeout));
        }

        let request = wait_for | CLEAR_ON_EXIT_BIT | WAIT_FOR_ALL_BIT;
        suspend.place_on_unordered_event_list(layout::group_waiters(g), request, ticks);
        let wait = suspend.new_wait(key, ticks);
        suspend.store_wait(wait);
        suspend.emit(TraceEvent::EventGroupWaitBlock {
            group: handle,
            bits: wait_for,
        });
        if !suspend.resume() {
            self.yield_within_api();
        }
        Err(nb::Error::WouldBlock)
    }

    /// Second half of a wait: the task has run again after blocking.
    fn group_wait_finished(
        &mut self,
        handle: EventGroupHandle,
        mask: EventBits,
        clear_on_exit: bool,
        wait_for_all: bool,
    ) -> nb::Result<EventBits, KernelError> {
        let t = self.task_index(None)?;
        let value = self.critical(|k| {
            k.tasks[t].value.delay_aborted = false;
            k.reset_event_item_value(t)
        });

        if value & UNBLOCKED_DUE_TO_BIT_SET != 0 {
            if value & GROUP_DELETED_BIT != 0 {
                return Err(nb::Error::Other(KernelError::ResourceDeleted));
            }
            return Ok(value & EVENT_BITS_MASK);
        }

        // Timed out, but the bits may have been set since.
        let g = self.group_index(handle)?;
        self.critical(|k| {
            let bits = k.groups[g].value.bits;
            if wait_condition_met(bits, mask, wait_for_all) {
                if clear_on_exit {
                    k.groups[g].value.bits &= !mask;
                    k.group_readiness_changed(g);
                }
                Ok(bits)
            } else {
                Err(nb::Error::Other(KernelError::Timeout))
            }
        })
    }

    /// Deletes an event group. Waiting tasks wake with `ResourceDeleted`; a
    /// registered poll object sees one deletion event.
    pub fn event_group_delete(&mut self, handle: EventGroupHandle) -> KernelResult<()> {
        let g = self.group_index(handle)?;
        self.emit(TraceEvent::EventGroupDelete { group: handle });

        let mut suspend = self.suspend();
        let waiters = layout::group_waiters(g);
        while let Some(item) = suspend.lists.head(waiters) {
            suspend.remove_from_unordered_event_list(
                item,
                UNBLOCKED_DUE_TO_BIT_SET | GROUP_DELETED_BIT,
            );
        }
        suspend.critical(|k| {
            if let Some(link) = k.groups[g].value.watcher.take() {
                k.poll_update(link, GROUP_DELETED);
            }
            k.groups[g].release();
            k.groups[g].value = EventGroup::vacant();
        });
        drop(suspend);
        trace!("event group {} deleted", handle);
        Ok(())
    }

    fn group_readiness_changed(&mut self, g: usize) -> bool {
        let Some(link) = self.groups[g].value.watcher else {
            return false;
        };
        let bits = self.groups[g].value.bits;
        self.poll_update(link, bits)
    }
}
