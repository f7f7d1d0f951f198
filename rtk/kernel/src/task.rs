//! Task control blocks and task-level services

use core::fmt;

use heapless::{String, Vec};
use log::{debug, trace};
use rtk_core::{
    KernelError, KernelResult, Priority, RawHandle, TaskHandle, TickType, TimeOut,
    MAX_TASK_NAME_LEN, MAX_TASKS,
};

use crate::kernel::{layout, resolve, vacant_slot, Kernel};
use crate::list::Owner;
use crate::notify::NotifyState;
use crate::port::{Port, StackWord, TaskEntry};
use crate::trace::TraceEvent;

/// Observable task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Ready,
    Blocked,
    Suspended,
    Deleted,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TaskState {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Running => defmt::write!(fmt, "Running"),
            Self::Ready => defmt::write!(fmt, "Ready"),
            Self::Blocked => defmt::write!(fmt, "Blocked"),
            Self::Suspended => defmt::write!(fmt, "Suspended"),
            Self::Deleted => defmt::write!(fmt, "Deleted"),
        }
    }
}

/// Parameters for [`Kernel::task_create`].
pub struct TaskParams<'s, 'a> {
    pub name: &'s str,
    pub priority: Priority,
    pub entry: TaskEntry,
    pub arg: usize,
    pub stack: &'a mut [StackWord],
}

impl<'s, 'a> TaskParams<'s, 'a> {
    pub fn new(
        name: &'s str,
        priority: Priority,
        entry: TaskEntry,
        stack: &'a mut [StackWord],
    ) -> Self {
        Self {
            name,
            priority,
            entry,
            arg: 0,
            stack,
        }
    }

    /// Value passed to the entry point
    pub fn with_arg(mut self, arg: usize) -> Self {
        self.arg = arg;
        self
    }
}

/// Snapshot of one task, as returned by [`Kernel::task_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub handle: TaskHandle,
    pub name: String<MAX_TASK_NAME_LEN>,
    pub number: u32,
    pub state: TaskState,
    pub priority: Priority,
    pub base_priority: Priority,
    pub stack_words: usize,
}

/// Identifies which blocking call a stored wait belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitKey {
    Send(RawHandle),
    Receive(RawHandle),
    Peek(RawHandle),
    Take(RawHandle),
    GroupWait(RawHandle),
    GroupSync(RawHandle),
    Poll(RawHandle),
    Notify,
}

/// Time-out bookkeeping kept across retries of one blocking call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitState {
    pub key: WaitKey,
    pub timeout: TimeOut,
    pub remaining: TickType,
    /// Mutex waits: the holder inherited our priority
    pub inherited: bool,
}

pub(crate) struct Tcb<'a> {
    pub name: String<MAX_TASK_NAME_LEN>,
    pub priority: Priority,
    pub base_priority: Priority,
    pub mutexes_held: usize,
    pub stack: &'a mut [StackWord],
    pub stack_pointer: usize,
    pub entry: TaskEntry,
    pub arg: usize,
    pub number: u32,
    pub notify_value: u32,
    pub notify_state: NotifyState,
    pub wait: Option<WaitState>,
    pub delay_aborted: bool,
    pub event_value_in_use: bool,
}

impl<'a> Tcb<'a> {
    pub fn vacant() -> Self {
        Self {
            name: String::new(),
            priority: Priority::IDLE,
            base_priority: Priority::IDLE,
            mutexes_held: 0,
            stack: Default::default(),
            stack_pointer: 0,
            entry: |_| {},
            arg: 0,
            number: 0,
            notify_value: 0,
            notify_state: NotifyState::NotWaiting,
            wait: None,
            delay_aborted: false,
            event_value_in_use: false,
        }
    }
}

/// Copies as much of `name` as fits, never splitting a character.
pub(crate) fn truncated_name(name: &str) -> String<MAX_TASK_NAME_LEN> {
    let mut out = String::new();
    for ch in name.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

impl<'a, P: Port> Kernel<'a, P> {
    /// Resolves a task handle; `None` means the running task.
    pub(crate) fn task_index(&self, handle: Option<TaskHandle>) -> KernelResult<usize> {
        match handle {
            Some(handle) => resolve(&self.tasks, handle.raw()),
            None => self.current.ok_or(KernelError::InvalidOperation),
        }
    }

    /// Creates a task on the caller's stack and makes it ready.
    pub fn task_create(&mut self, params: TaskParams<'_, 'a>) -> KernelResult<TaskHandle> {
        if params.stack.is_empty() {
            return Err(KernelError::NullArgument);
        }
        let priority = Priority::new(params.priority.raw())?;
        let t = vacant_slot(&self.tasks).ok_or(KernelError::CapacityExhausted)?;

        let stack_pointer = self.port.init_stack(params.stack, params.entry, params.arg);
        self.task_number = self.task_number.wrapping_add(1);
        let tcb = Tcb {
            name: truncated_name(params.name),
            priority,
            base_priority: priority,
            stack: params.stack,
            stack_pointer,
            entry: params.entry,
            arg: params.arg,
            number: self.task_number,
            ..Tcb::vacant()
        };

        let state = layout::state_item(t);
        let event = layout::event_item(t);
        self.lists.init_item(state);
        self.lists.init_item(event);
        self.lists.set_owner(state, Owner::Task(t));
        self.lists.set_owner(event, Owner::Task(t));
        self.lists.set_value(event, priority.event_key());
        self.lists.init_list(layout::held(t));
        self.lists.init_list(layout::poll_list(t));
        self.tasks[t].occupy(tcb);

        let handle = self.task_handle(t);
        self.critical(|k| {
            k.task_count += 1;
            match k.current {
                None => k.current = Some(t),
                Some(current) if !k.running => {
                    if k.tasks[current].value.priority <= priority {
                        k.current = Some(t);
                    }
                }
                Some(_) => {}
            }
            k.add_to_ready(t);
        });

        debug!("task '{}' created at {}", params.name, priority);
        self.emit(TraceEvent::TaskCreate {
            task: handle,
            priority,
        });
        if self.running && self.outranks_current(t) {
            self.yield_if_preempting();
        }
        Ok(handle)
    }

    /// Deletes a task; `None` deletes the running task.
    ///
    /// Held mutexes are released to their next waiter and every poll object
    /// the task owns is destroyed. A task deleting itself keeps its slot
    /// until the next context switch.
    pub fn task_delete(&mut self, handle: Option<TaskHandle>) -> KernelResult<()> {
        let t = self.task_index(handle)?;
        let deleted = self.task_handle(t);

        let mut suspend = self.suspend();
        suspend.release_mutexes_held_by(t);
        suspend.destroy_polls_owned_by(t);

        let self_delete = suspend.critical(|k| {
            let waited_on = k.lists.container(layout::event_item(t));
            k.lists.remove(layout::state_item(t));
            k.lists.remove(layout::event_item(t));
            if let Some(list) = waited_on {
                k.mutex_waiter_left(list);
            }
            k.task_count -= 1;

            if k.current == Some(t) {
                k.lists
                    .insert_end(layout::TERMINATION, layout::state_item(t));
                // Invalidate handles now; the slot itself is reclaimed later.
                k.tasks[t].generation = k.tasks[t].generation.wrapping_add(1);
                true
            } else {
                k.tasks[t].release();
                k.reset_next_unblock();
                false
            }
        });
        suspend.emit(TraceEvent::TaskDelete { task: deleted });
        debug!("task {} deleted", deleted);
        drop(suspend);

        if self_delete && self.running {
            self.yield_within_api();
        }
        Ok(())
    }

    /// Frees the slots of self-deleted tasks that are no longer running.
    pub(crate) fn reclaim_terminated(&mut self) {
        let mut item = self.lists.head(layout::TERMINATION);
        while let Some(current_item) = item {
            item = self.lists.next_item(current_item);
            if let Owner::Task(t) = self.lists.owner(current_item) {
                if self.current != Some(t) {
                    self.lists.remove(current_item);
                    self.tasks[t].live = false;
                }
            }
        }
    }

    /// Blocks the running task for `ticks` ticks.
    pub fn delay(&mut self, ticks: TickType) -> KernelResult<()> {
        let t = self.task_index(None)?;
        if self.suspended > 0 {
            return Err(KernelError::SchedulerSuspended);
        }

        let mut already_yielded = false;
        if ticks > 0 {
            self.suspend_all();
            let task = self.task_handle(t);
            self.emit(TraceEvent::TaskDelay { task, ticks });
            self.add_current_to_delayed(ticks, false);
            already_yielded = self.resume_all();
        }
        if !already_yielded {
            self.yield_within_api();
        }
        Ok(())
    }

    /// Blocks until `previous_wake + increment`, then advances
    /// `previous_wake` to that time.
    ///
    /// Returns `false` when the wake time had already passed and the task
    /// did not block.
    pub fn delay_until(
        &mut self,
        previous_wake: &mut TickType,
        increment: TickType,
    ) -> KernelResult<bool> {
        if increment == 0 {
            return Err(KernelError::InvalidParameters);
        }
        self.task_index(None)?;
        if self.suspended > 0 {
            return Err(KernelError::SchedulerSuspended);
        }

        self.suspend_all();
        let now = self.ticks.now();
        let wake_time = previous_wake.wrapping_add(increment);

        let should_delay = if now < *previous_wake {
            // The counter wrapped since the previous wake.
            wake_time < *previous_wake && wake_time > now
        } else {
            wake_time < *previous_wake || wake_time > now
        };
        *previous_wake = wake_time;

        if should_delay {
            self.add_current_to_delayed(wake_time.wrapping_sub(now), false);
        }
        let already_yielded = self.resume_all();
        if !already_yielded {
            self.yield_within_api();
        }
        Ok(should_delay)
    }

    /// Suspends a task; `None` suspends the running task.
    pub fn task_suspend(&mut self, handle: Option<TaskHandle>) -> KernelResult<()> {
        let t = self.task_index(handle)?;
        let task = self.task_handle(t);

        self.critical(|k| {
            let state = layout::state_item(t);
            k.lists.remove(state);
            k.lists.remove(layout::event_item(t));
            k.lists.insert_end(layout::SUSPENDED, state);

            if k.tasks[t].value.notify_state == NotifyState::Waiting {
                k.tasks[t].value.notify_state = NotifyState::NotWaiting;
            }
            k.cancel_poll_waits_of(t);
        });
        self.emit(TraceEvent::TaskSuspend { task });

        if self.running {
            self.critical(|k| k.reset_next_unblock());
        }

        if self.current == Some(t) {
            if self.running {
                self.yield_within_api();
            } else if self.lists.len(layout::SUSPENDED) == self.task_count {
                self.current = None;
            } else {
                self.switch_context();
            }
        }
        Ok(())
    }

    /// Returns `true` if `t` sits on the suspended list because it was
    /// suspended, not because it waits without time-out.
    pub(crate) fn is_task_suspended(&self, t: usize) -> bool {
        self.lists
            .is_contained_within(layout::SUSPENDED, layout::state_item(t))
            && self.lists.container(layout::event_item(t)).is_none()
            && self.tasks[t].value.notify_state != NotifyState::Waiting
            && !self.is_poll_waiting(t)
    }

    /// Resumes a suspended task.
    pub fn task_resume(&mut self, handle: TaskHandle) -> KernelResult<()> {
        let t = self.task_index(Some(handle))?;
        if self.current == Some(t) {
            return Ok(());
        }

        let resumed = self.critical(|k| {
            if !k.is_task_suspended(t) {
                return false;
            }
            k.lists.remove(layout::state_item(t));
            k.add_to_ready(t);
            true
        });
        if resumed {
            self.emit(TraceEvent::TaskResume { task: handle });
            if self.at_least_current(t) {
                self.yield_if_preempting();
            }
        }
        Ok(())
    }

    /// Interrupt-safe [`Kernel::task_resume`]. Returns `true` when the
    /// resumed task outranks the interrupted one.
    pub fn task_resume_from_isr(&mut self, handle: TaskHandle) -> KernelResult<bool> {
        let t = self.task_index(Some(handle))?;

        let woken = self.critical(|k| {
            if !k.is_task_suspended(t) {
                return false;
            }
            if k.suspended == 0 {
                let woken = k.outranks_current(t);
                if woken {
                    k.yield_pending = true;
                }
                k.lists.remove(layout::state_item(t));
                k.add_to_ready(t);
                woken
            } else {
                k.lists
                    .insert_end(layout::PENDING_READY, layout::event_item(t));
                false
            }
        });
        self.emit(TraceEvent::TaskResume { task: handle });
        Ok(woken)
    }

    /// Effective priority of a task; `None` means the running task.
    pub fn priority_get(&self, handle: Option<TaskHandle>) -> KernelResult<Priority> {
        let t = self.task_index(handle)?;
        Ok(self.critical_read(|k| k.tasks[t].value.priority))
    }

    /// Interrupt-safe [`Kernel::priority_get`].
    pub fn priority_get_from_isr(&self, handle: Option<TaskHandle>) -> KernelResult<Priority> {
        let t = self.task_index(handle)?;
        Ok(self.tasks[t].value.priority)
    }

    /// Base priority, ignoring inheritance.
    pub fn base_priority_get(&self, handle: Option<TaskHandle>) -> KernelResult<Priority> {
        let t = self.task_index(handle)?;
        Ok(self.tasks[t].value.base_priority)
    }

    /// Changes the base priority of a task; `None` means the running task.
    ///
    /// A task that inherited a higher priority through a mutex keeps it
    /// until the inheritance ends; the effective priority never drops below
    /// the new base.
    pub fn priority_set(
        &mut self,
        handle: Option<TaskHandle>,
        priority: Priority,
    ) -> KernelResult<()> {
        let t = self.task_index(handle)?;
        let priority = Priority::new(priority.raw())?;
        let task = self.task_handle(t);

        let yield_required = self.critical(|k| {
            let tcb = &k.tasks[t].value;
            if tcb.base_priority == priority {
                return false;
            }
            let is_current = k.current == Some(t);
            let current_priority = k.current_priority().unwrap_or(Priority::IDLE);

            let yield_required = if priority > tcb.base_priority {
                !is_current && priority > current_priority
            } else {
                is_current
            };

            let old_priority = tcb.priority;
            let inherited = k.highest_mutex_waiter(t);
            let effective = match inherited {
                Some(waiter) if waiter > priority => waiter,
                _ => priority,
            };

            let tcb = &mut k.tasks[t].value;
            tcb.base_priority = priority;
            tcb.priority = effective;
            let in_use = tcb.event_value_in_use;

            if !in_use {
                let event = layout::event_item(t);
                if k.lists.container(event) == Some(layout::PENDING_READY) {
                    k.lists.set_value(event, effective.event_key());
                } else {
                    k.lists.relocate(event, effective.event_key());
                }
            }

            let state = layout::state_item(t);
            if k.lists
                .is_contained_within(layout::ready(old_priority.index()), state)
            {
                k.lists.remove(state);
                k.add_to_ready(t);
            }
            yield_required
        });

        self.emit(TraceEvent::PrioritySet { task, priority });
        if yield_required {
            self.yield_if_preempting();
        }
        Ok(())
    }

    /// Forces a blocked task out of its wait. The interrupted call reports a
    /// time-out. Returns `false` if the task was not blocked.
    pub fn task_abort_delay(&mut self, handle: TaskHandle) -> KernelResult<bool> {
        let t = self.task_index(Some(handle))?;
        if self.task_state(handle) != TaskState::Blocked {
            return Ok(false);
        }

        self.suspend_all();
        self.lists.remove(layout::state_item(t));
        self.critical(|k| {
            if k.lists.container(layout::event_item(t)).is_some() {
                k.lists.remove(layout::event_item(t));
            }
            k.tasks[t].value.delay_aborted = true;
            if k.tasks[t].value.notify_state == NotifyState::Waiting {
                k.tasks[t].value.notify_state = NotifyState::NotWaiting;
            }
            k.cancel_poll_waits_of(t);
        });
        self.add_to_ready(t);
        if self.config.preemption && self.outranks_current(t) {
            self.yield_pending = true;
        }
        self.resume_all();
        Ok(true)
    }

    /// State of any task handle, including stale ones.
    pub fn task_state(&self, handle: TaskHandle) -> TaskState {
        let Ok(t) = resolve(&self.tasks, handle.raw()) else {
            return TaskState::Deleted;
        };
        if self.current == Some(t) {
            return TaskState::Running;
        }

        if self.lists.container(layout::event_item(t)) == Some(layout::PENDING_READY) {
            return TaskState::Ready;
        }
        let state = layout::state_item(t);
        match self.lists.container(state) {
            Some(list) if list == self.delayed || list == self.overflow_delayed => {
                TaskState::Blocked
            }
            Some(layout::SUSPENDED) => {
                if self.is_task_suspended(t) {
                    TaskState::Suspended
                } else {
                    TaskState::Blocked
                }
            }
            Some(layout::TERMINATION) | None => TaskState::Deleted,
            Some(_) => TaskState::Ready,
        }
    }

    /// Name of a task.
    pub fn task_name(&self, handle: TaskHandle) -> KernelResult<&str> {
        let t = self.task_index(Some(handle))?;
        Ok(self.tasks[t].value.name.as_str())
    }

    /// Status of every live task, in slot order.
    pub fn task_snapshot(&self) -> Vec<TaskStatus, MAX_TASKS> {
        let mut out = Vec::new();
        for (t, slot) in self.tasks.iter().enumerate() {
            if !slot.live || self.lists.is_contained_within(layout::TERMINATION, layout::state_item(t))
            {
                continue;
            }
            let handle = self.task_handle(t);
            let tcb = &slot.value;
            let status = TaskStatus {
                handle,
                name: tcb.name.clone(),
                number: tcb.number,
                state: self.task_state(handle),
                priority: tcb.priority,
                base_priority: tcb.base_priority,
                stack_words: tcb.stack.len(),
            };
            // Cannot overflow: one entry per task slot.
            let _ = out.push(status);
        }
        trace!("snapshot of {} tasks", out.len());
        out
    }
}
