//! Scheduler core
//!
//! [`Kernel`] owns every kernel object: the list arena, the task table, the
//! queue, event group, timer and poll tables, and the tick counter. This file
//! holds the parts every primitive builds on: ready-list bookkeeping, tick
//! processing, task selection, scheduler suspension and the event-list
//! helpers that block and unblock tasks.
//!
//! ## Blocking model
//!
//! A blocking call that cannot complete parks the running task on the
//! relevant lists, asks the port for a yield and returns
//! `Err(nb::Error::WouldBlock)`. Once the task runs again it repeats the same
//! call; the kernel keeps the task's time-out snapshot between attempts so
//! the total wait never exceeds the tick count of the first attempt.

use core::ops::{Deref, DerefMut};

use log::{debug, error, trace};
use rtk_core::{
    FatalError, Generation, KernelConfig, KernelError, KernelResult, Priority, RawHandle,
    TaskHandle, TickCounter, TickType, TimeOut, MAX_DELAY, MAX_EVENT_GROUPS, MAX_POLL_OBJECTS,
    MAX_PRIORITIES, MAX_QUEUES, MAX_TASKS, MAX_TIMERS,
};

use crate::event_group::EventGroup;
use crate::list::{ItemId, ListArena, ListId, Owner};
use crate::poll::PollObject;
use crate::port::{Port, StackWord};
use crate::queue::Queue;
use crate::task::{Tcb, WaitKey, WaitState};
use crate::timer::{Timer, TimerService};
use crate::trace::TraceEvent;

/// Fixed placement of every list and list item in the arena.
pub(crate) mod layout {
    use super::*;

    pub const DELAYED_A: ListId = ListId::new(MAX_PRIORITIES);
    pub const DELAYED_B: ListId = ListId::new(MAX_PRIORITIES + 1);
    pub const SUSPENDED: ListId = ListId::new(MAX_PRIORITIES + 2);
    pub const PENDING_READY: ListId = ListId::new(MAX_PRIORITIES + 3);
    pub const TERMINATION: ListId = ListId::new(MAX_PRIORITIES + 4);
    pub const TIMERS_A: ListId = ListId::new(MAX_PRIORITIES + 5);
    pub const TIMERS_B: ListId = ListId::new(MAX_PRIORITIES + 6);

    const HELD_BASE: usize = MAX_PRIORITIES + 7;
    const POLL_LIST_BASE: usize = HELD_BASE + MAX_TASKS;
    const SEND_BASE: usize = POLL_LIST_BASE + MAX_TASKS;
    const RECEIVE_BASE: usize = SEND_BASE + MAX_QUEUES;
    const GROUP_BASE: usize = RECEIVE_BASE + MAX_QUEUES;
    pub const LIST_COUNT: usize = GROUP_BASE + MAX_EVENT_GROUPS;

    const EVENT_ITEM_BASE: usize = MAX_TASKS;
    const MUTEX_ITEM_BASE: usize = 2 * MAX_TASKS;
    const TIMER_ITEM_BASE: usize = MUTEX_ITEM_BASE + MAX_QUEUES;
    const POLL_ITEM_BASE: usize = TIMER_ITEM_BASE + MAX_TIMERS;
    pub const ITEM_COUNT: usize = POLL_ITEM_BASE + MAX_POLL_OBJECTS;

    pub const fn ready(priority: usize) -> ListId {
        ListId::new(priority)
    }

    pub const fn held(task: usize) -> ListId {
        ListId::new(HELD_BASE + task)
    }

    pub const fn poll_list(task: usize) -> ListId {
        ListId::new(POLL_LIST_BASE + task)
    }

    pub const fn waiting_to_send(queue: usize) -> ListId {
        ListId::new(SEND_BASE + queue)
    }

    pub const fn waiting_to_receive(queue: usize) -> ListId {
        ListId::new(RECEIVE_BASE + queue)
    }

    pub const fn group_waiters(group: usize) -> ListId {
        ListId::new(GROUP_BASE + group)
    }

    pub const fn state_item(task: usize) -> ItemId {
        ItemId::new(task)
    }

    pub const fn event_item(task: usize) -> ItemId {
        ItemId::new(EVENT_ITEM_BASE + task)
    }

    pub const fn mutex_item(queue: usize) -> ItemId {
        ItemId::new(MUTEX_ITEM_BASE + queue)
    }

    pub const fn timer_item(timer: usize) -> ItemId {
        ItemId::new(TIMER_ITEM_BASE + timer)
    }

    pub const fn poll_item(poll: usize) -> ItemId {
        ItemId::new(POLL_ITEM_BASE + poll)
    }
}

pub(crate) type Lists = ListArena<{ layout::LIST_COUNT }, { layout::ITEM_COUNT }>;

/// One entry of a fixed object table.
pub(crate) struct Slot<T> {
    pub generation: Generation,
    pub live: bool,
    pub value: T,
}

impl<T> Slot<T> {
    pub fn new(value: T) -> Self {
        Self {
            generation: 0,
            live: false,
            value,
        }
    }

    pub fn resolves(&self, raw: RawHandle) -> bool {
        self.live && self.generation == raw.generation()
    }

    pub fn occupy(&mut self, value: T) -> Generation {
        self.value = value;
        self.live = true;
        self.generation
    }

    /// Marks the slot vacant. Outstanding handles stop resolving.
    pub fn release(&mut self) {
        self.live = false;
        self.generation = self.generation.wrapping_add(1);
    }
}

pub(crate) fn vacant_slot<T>(slots: &[Slot<T>]) -> Option<usize> {
    slots.iter().position(|slot| !slot.live)
}

pub(crate) fn resolve<T>(slots: &[Slot<T>], raw: RawHandle) -> KernelResult<usize> {
    match slots.get(raw.index()) {
        Some(slot) if slot.resolves(raw) => Ok(raw.index()),
        _ => Err(KernelError::InvalidHandle),
    }
}

/// Memory the kernel needs for its own tasks and the timer command queue.
pub struct SchedulerResources<'a> {
    pub idle_stack: &'a mut [StackWord],
    pub timer_stack: &'a mut [StackWord],
    /// `timer_queue_length * timer::COMMAND_SIZE` bytes
    pub timer_queue: &'a mut [u8],
}

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    NotStarted,
    Running,
    Suspended,
}

#[cfg(feature = "defmt")]
impl defmt::Format for SchedulerState {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::NotStarted => defmt::write!(fmt, "NotStarted"),
            Self::Running => defmt::write!(fmt, "Running"),
            Self::Suspended => defmt::write!(fmt, "Suspended"),
        }
    }
}

/// The kernel context.
pub struct Kernel<'a, P: Port> {
    pub(crate) port: P,
    pub(crate) config: KernelConfig,
    pub(crate) lists: Lists,
    pub(crate) tasks: [Slot<Tcb<'a>>; MAX_TASKS],
    pub(crate) queues: [Slot<Queue<'a>>; MAX_QUEUES],
    pub(crate) groups: [Slot<EventGroup>; MAX_EVENT_GROUPS],
    pub(crate) timers: [Slot<Timer<'a, P>>; MAX_TIMERS],
    pub(crate) polls: [Slot<PollObject>; MAX_POLL_OBJECTS],
    pub(crate) timer_service: TimerService,
    pub(crate) current: Option<usize>,
    pub(crate) ticks: TickCounter,
    pub(crate) next_unblock: TickType,
    pub(crate) delayed: ListId,
    pub(crate) overflow_delayed: ListId,
    pub(crate) top_ready: usize,
    pub(crate) suspended: u8,
    pub(crate) pended_ticks: TickType,
    pub(crate) yield_pending: bool,
    pub(crate) running: bool,
    pub(crate) task_count: usize,
    pub(crate) task_number: u32,
    idle_stack: Option<&'a mut [StackWord]>,
    timer_stack: Option<&'a mut [StackWord]>,
}

impl<'a, P: Port> Kernel<'a, P> {
    /// Creates the kernel and its timer command queue.
    ///
    /// No task runs until [`Kernel::start_scheduler`].
    pub fn new(
        port: P,
        config: KernelConfig,
        resources: SchedulerResources<'a>,
    ) -> KernelResult<Self> {
        if config.timer_task_priority.index() >= MAX_PRIORITIES {
            return Err(KernelError::InvalidParameters);
        }
        if resources.idle_stack.is_empty() || resources.timer_stack.is_empty() {
            return Err(KernelError::NullArgument);
        }

        let mut kernel = Self {
            port,
            config,
            lists: ListArena::new(),
            tasks: core::array::from_fn(|_| Slot::new(Tcb::vacant())),
            queues: core::array::from_fn(|_| Slot::new(Queue::vacant())),
            groups: core::array::from_fn(|_| Slot::new(EventGroup::vacant())),
            timers: core::array::from_fn(|_| Slot::new(Timer::vacant())),
            polls: core::array::from_fn(|_| Slot::new(PollObject::vacant())),
            timer_service: TimerService::new(),
            current: None,
            ticks: TickCounter::new(config.initial_tick_count),
            next_unblock: MAX_DELAY,
            delayed: layout::DELAYED_A,
            overflow_delayed: layout::DELAYED_B,
            top_ready: 0,
            suspended: 0,
            pended_ticks: 0,
            yield_pending: false,
            running: false,
            task_count: 0,
            task_number: 0,
            idle_stack: Some(resources.idle_stack),
            timer_stack: Some(resources.timer_stack),
        };
        kernel.timer_queue_init(resources.timer_queue)?;
        Ok(kernel)
    }

    /// Creates the idle and timer service tasks, programs the tick and
    /// selects the first task to run.
    pub fn start_scheduler(&mut self) -> KernelResult<()> {
        if self.running {
            return Err(KernelError::AlreadyInUse);
        }
        let (Some(idle_stack), Some(timer_stack)) = (self.idle_stack.take(), self.timer_stack.take())
        else {
            return Err(KernelError::AlreadyInUse);
        };

        self.task_create(crate::TaskParams::new(
            self.config.idle_task_name,
            Priority::IDLE,
            idle_task,
            idle_stack,
        ))?;
        let timer_task = self.task_create(crate::TaskParams::new(
            self.config.timer_task_name,
            self.config.timer_task_priority,
            crate::timer::timer_task,
            timer_stack,
        ))?;
        self.timer_service.task = Some(timer_task.index());

        self.critical(|k| {
            k.next_unblock = MAX_DELAY;
            k.running = true;
        });
        let rate = self.config.tick_rate_hz;
        self.port.start_tick(rate);
        self.emit(TraceEvent::SchedulerStart);
        debug!("scheduler started with {} tasks", self.task_count);

        self.switch_context();
        Ok(())
    }

    /// Port this kernel runs on.
    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn tick_count(&self) -> TickType {
        self.critical_read(|k| k.ticks.now())
    }

    pub fn tick_count_from_isr(&self) -> TickType {
        self.ticks.now()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        if !self.running {
            SchedulerState::NotStarted
        } else if self.suspended > 0 {
            SchedulerState::Suspended
        } else {
            SchedulerState::Running
        }
    }

    /// Handle of the running task.
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.current.map(|t| self.task_handle(t))
    }

    /// Number of live tasks, including deleted tasks not yet reclaimed.
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    // ------------------------------------------------------------------
    // Critical sections and scheduler suspension
    // ------------------------------------------------------------------

    /// Runs `f` with interrupts masked.
    pub(crate) fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        critical_section::with(|_| f(self))
    }

    pub(crate) fn critical_read<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        critical_section::with(|_| f(self))
    }

    /// Suspends the scheduler. Calls nest.
    ///
    /// Interrupts stay enabled; tasks readied from interrupt context are
    /// parked on the pending-ready list until [`Kernel::resume_all`].
    pub fn suspend_all(&mut self) {
        self.suspended = self.suspended.saturating_add(1);
        let depth = self.suspended;
        self.emit(TraceEvent::SuspendAll { depth });
    }

    /// Resumes the scheduler. Returns `true` if a yield was already requested.
    pub fn resume_all(&mut self) -> bool {
        let mut already_yielded = false;

        self.critical(|k| {
            if k.suspended == 0 {
                return;
            }
            k.suspended -= 1;
            if k.suspended > 0 || k.task_count == 0 {
                return;
            }

            let mut moved = false;
            while let Some(item) = k.lists.head(layout::PENDING_READY) {
                let Owner::Task(t) = k.lists.owner(item) else {
                    k.fatal(FatalError::ListCorrupted);
                };
                k.lists.remove(item);
                k.lists.remove(layout::state_item(t));
                k.add_to_ready(t);
                if k.outranks_current(t) {
                    k.yield_pending = true;
                }
                moved = true;
            }
            if moved {
                k.reset_next_unblock();
            }

            let mut pended = k.pended_ticks;
            while pended > 0 {
                if k.tick() {
                    k.yield_pending = true;
                }
                pended -= 1;
            }
            k.pended_ticks = 0;

            if k.yield_pending && k.config.preemption {
                already_yielded = true;
                k.port.request_yield();
            }
        });

        self.emit(TraceEvent::ResumeAll);
        already_yielded
    }

    /// Suspends the scheduler until the returned guard is dropped.
    pub fn suspend(&mut self) -> SuspendGuard<'_, 'a, P> {
        self.suspend_all();
        SuspendGuard {
            kernel: self,
            done: false,
        }
    }

    // ------------------------------------------------------------------
    // Tick processing and task selection
    // ------------------------------------------------------------------

    /// Processes one tick interrupt.
    ///
    /// Returns `true` when the interrupt epilogue should switch context.
    pub fn tick(&mut self) -> bool {
        self.port.update_run_time_stats();
        let mut switch_required = false;

        if self.suspended == 0 {
            let wrapped = match self.ticks.advance() {
                Ok(wrapped) => wrapped,
                Err(fatal) => self.fatal(fatal),
            };
            if wrapped {
                self.switch_delayed_lists();
            }

            let now = self.ticks.now();
            if now >= self.next_unblock {
                loop {
                    let Some(head) = self.lists.head(self.delayed) else {
                        self.next_unblock = MAX_DELAY;
                        break;
                    };
                    let wake_time = self.lists.value(head);
                    if now < wake_time {
                        self.next_unblock = wake_time;
                        break;
                    }
                    let Owner::Task(t) = self.lists.owner(head) else {
                        self.fatal(FatalError::ListCorrupted);
                    };
                    self.lists.remove(head);
                    let waited_on = self.lists.container(layout::event_item(t));
                    self.lists.remove(layout::event_item(t));
                    self.add_to_ready(t);
                    if let Some(list) = waited_on {
                        if self.mutex_waiter_left(list) && self.config.preemption {
                            switch_required = true;
                        }
                    }

                    if self.config.preemption && self.at_least_current(t) {
                        switch_required = true;
                    }
                }
            }

            if self.config.preemption && self.config.time_slicing {
                if let Some(current) = self.current {
                    let priority = self.tasks[current].value.priority.index();
                    if self.lists.len(layout::ready(priority)) > 1 {
                        switch_required = true;
                    }
                }
            }
            if self.config.preemption && self.yield_pending {
                switch_required = true;
            }
            let count = self.ticks.now();
            self.emit(TraceEvent::Tick { count });
        } else {
            self.pended_ticks = self.pended_ticks.wrapping_add(1);
        }

        switch_required
    }

    /// Selects the next task to run.
    ///
    /// Picks the highest priority non-empty ready list and rotates through
    /// its tasks. Deferred while the scheduler is suspended.
    pub fn switch_context(&mut self) {
        if self.suspended > 0 {
            self.yield_pending = true;
            return;
        }
        self.yield_pending = false;
        self.port.update_run_time_stats();

        if let Some(current) = self.current {
            let tcb = &self.tasks[current].value;
            if !self.port.validate_stack(&tcb.stack[..], tcb.stack_pointer) {
                self.fatal(FatalError::StackCheckFailed);
            }
        }

        let mut top = self.top_ready;
        while self.lists.is_empty(layout::ready(top)) {
            if top == 0 {
                self.fatal(FatalError::NoReadyTask);
            }
            top -= 1;
        }
        match self.lists.next_owner(layout::ready(top)) {
            Some(Owner::Task(t)) => self.current = Some(t),
            _ => self.fatal(FatalError::ListCorrupted),
        }
        self.top_ready = top;

        self.reclaim_terminated();
        if let Some(current) = self.current {
            let task = self.task_handle(current);
            trace!("switched in {}", self.tasks[current].value.name);
            self.emit(TraceEvent::TaskSwitchedIn { task });
        }
    }

    fn switch_delayed_lists(&mut self) {
        core::mem::swap(&mut self.delayed, &mut self.overflow_delayed);
        self.reset_next_unblock();
    }

    pub(crate) fn reset_next_unblock(&mut self) {
        self.next_unblock = self.lists.head_value(self.delayed).unwrap_or(MAX_DELAY);
    }

    // ------------------------------------------------------------------
    // Ready and delayed list bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn add_to_ready(&mut self, t: usize) {
        let priority = self.tasks[t].value.priority.index();
        if priority > self.top_ready {
            self.top_ready = priority;
        }
        self.lists.insert_end(layout::ready(priority), layout::state_item(t));
    }

    /// Moves the running task off its ready list and onto a delayed list.
    ///
    /// With `indefinite` and [`MAX_DELAY`] the task waits on the suspended
    /// list with no wake time.
    pub(crate) fn add_current_to_delayed(&mut self, ticks: TickType, indefinite: bool) {
        let Some(t) = self.current else {
            return;
        };
        self.tasks[t].value.delay_aborted = false;
        let state = layout::state_item(t);
        self.lists.remove(state);

        if ticks == MAX_DELAY && indefinite {
            self.lists.insert_end(layout::SUSPENDED, state);
            return;
        }

        let now = self.ticks.now();
        let wake_time = now.wrapping_add(ticks);
        self.lists.set_value(state, wake_time);
        if wake_time < now {
            self.lists.insert(self.overflow_delayed, state);
        } else {
            self.lists.insert(self.delayed, state);
            if wake_time < self.next_unblock {
                self.next_unblock = wake_time;
            }
        }
    }

    /// Blocks the running task on a priority-ordered wait list.
    pub(crate) fn place_on_event_list(&mut self, list: ListId, ticks: TickType) {
        let Some(t) = self.current else {
            return;
        };
        self.lists.insert(list, layout::event_item(t));
        self.add_current_to_delayed(ticks, true);
    }

    /// Blocks the running task at the tail of `list`, storing `value` in its
    /// event item. Used where the key carries data instead of a priority.
    pub(crate) fn place_on_unordered_event_list(
        &mut self,
        list: ListId,
        value: u32,
        ticks: TickType,
    ) {
        let Some(t) = self.current else {
            return;
        };
        let event = layout::event_item(t);
        self.lists.set_value(event, value);
        self.tasks[t].value.event_value_in_use = true;
        self.lists.insert_end(list, event);
        self.add_current_to_delayed(ticks, true);
    }

    /// Blocks the running task without the retry protocol. Only the timer
    /// service uses this, on its own command queue.
    pub(crate) fn place_on_event_list_restricted(
        &mut self,
        list: ListId,
        ticks: TickType,
        indefinite: bool,
    ) {
        let Some(t) = self.current else {
            return;
        };
        self.lists.insert_end(list, layout::event_item(t));
        let ticks = if indefinite { MAX_DELAY } else { ticks };
        self.add_current_to_delayed(ticks, indefinite);
    }

    /// Wakes the most urgent task waiting on `list`.
    ///
    /// Returns `true` when the woken task outranks the running one.
    pub(crate) fn remove_from_event_list(&mut self, list: ListId) -> bool {
        let Some(item) = self.lists.head(list) else {
            return false;
        };
        let Owner::Task(t) = self.lists.owner(item) else {
            self.fatal(FatalError::ListCorrupted);
        };
        self.lists.remove(item);
        self.make_ready_from_wait(t)
    }

    /// Wakes the task owning `item`, storing `value` in the event item so
    /// the task can read why it woke. Scheduler must be suspended.
    pub(crate) fn remove_from_unordered_event_list(&mut self, item: ItemId, value: u32) -> bool {
        let Owner::Task(t) = self.lists.owner(item) else {
            self.fatal(FatalError::ListCorrupted);
        };
        self.lists.set_value(item, value);
        self.tasks[t].value.event_value_in_use = true;
        self.lists.remove(item);
        self.lists.remove(layout::state_item(t));
        self.add_to_ready(t);
        if self.outranks_current(t) {
            self.yield_pending = true;
            true
        } else {
            false
        }
    }

    /// Moves a task whose wait just ended to its ready list, or to the
    /// pending-ready list while the scheduler is suspended.
    pub(crate) fn make_ready_from_wait(&mut self, t: usize) -> bool {
        if self.suspended == 0 {
            self.lists.remove(layout::state_item(t));
            self.add_to_ready(t);
        } else {
            self.lists
                .insert_end(layout::PENDING_READY, layout::event_item(t));
        }
        if self.outranks_current(t) {
            self.yield_pending = true;
            true
        } else {
            false
        }
    }

    /// Returns the event item value and restores the priority key.
    pub(crate) fn reset_event_item_value(&mut self, t: usize) -> u32 {
        let event = layout::event_item(t);
        let value = self.lists.value(event);
        let key = self.tasks[t].value.priority.event_key();
        self.lists.set_value(event, key);
        self.tasks[t].value.event_value_in_use = false;
        value
    }

    // ------------------------------------------------------------------
    // Time-outs and stored waits
    // ------------------------------------------------------------------

    /// Checks a stored wait, consuming elapsed ticks. An aborted delay counts
    /// as expired.
    pub(crate) fn check_for_timeout(&mut self, wait: &mut WaitState) -> bool {
        self.critical(|k| {
            if let Some(t) = k.current {
                let tcb = &mut k.tasks[t].value;
                if tcb.delay_aborted {
                    tcb.delay_aborted = false;
                    wait.remaining = 0;
                    return true;
                }
            }
            wait.timeout.expired(&k.ticks, &mut wait.remaining)
        })
    }

    /// Takes the stored wait of the running task if it belongs to `key`.
    /// A wait for another call stays stored for that call's retry.
    pub(crate) fn take_wait(&mut self, key: WaitKey) -> Option<WaitState> {
        let t = self.current?;
        let slot = &mut self.tasks[t].value.wait;
        match slot {
            Some(wait) if wait.key == key => slot.take(),
            _ => None,
        }
    }

    pub(crate) fn store_wait(&mut self, wait: WaitState) {
        if let Some(t) = self.current {
            self.tasks[t].value.wait = Some(wait);
        }
    }

    pub(crate) fn new_wait(&self, key: WaitKey, ticks: TickType) -> WaitState {
        WaitState {
            key,
            timeout: TimeOut::capture(&self.ticks),
            remaining: ticks,
            inherited: false,
        }
    }

    /// Fails blocking calls made while the scheduler is suspended.
    pub(crate) fn check_can_block(&self, ticks: TickType) -> KernelResult<()> {
        if ticks != 0 && self.suspended > 0 {
            Err(KernelError::SchedulerSuspended)
        } else {
            Ok(())
        }
    }

    /// Wait budget for the running context. Nothing may block before the
    /// scheduler runs.
    pub(crate) fn effective_wait(&self, ticks: TickType) -> TickType {
        if self.running && self.current.is_some() {
            ticks
        } else {
            0
        }
    }

    // ------------------------------------------------------------------
    // Small helpers
    // ------------------------------------------------------------------

    pub(crate) fn task_handle(&self, t: usize) -> TaskHandle {
        TaskHandle::from_raw(RawHandle::new(t as u16, self.tasks[t].generation))
    }

    pub(crate) fn current_priority(&self) -> Option<Priority> {
        self.current.map(|c| self.tasks[c].value.priority)
    }

    /// Strictly higher priority than the running task.
    pub(crate) fn outranks_current(&self, t: usize) -> bool {
        match self.current_priority() {
            Some(current) => self.tasks[t].value.priority > current,
            None => false,
        }
    }

    pub(crate) fn at_least_current(&self, t: usize) -> bool {
        match self.current_priority() {
            Some(current) => self.tasks[t].value.priority >= current,
            None => false,
        }
    }

    /// Requests a yield because the running task blocked.
    pub(crate) fn yield_within_api(&mut self) {
        self.port.request_yield();
    }

    pub(crate) fn yield_if_preempting(&mut self) {
        if self.config.preemption {
            self.port.request_yield();
        }
    }

    pub(crate) fn emit(&mut self, event: TraceEvent) {
        self.port.trace(event);
    }

    pub(crate) fn fatal(&mut self, error: FatalError) -> ! {
        error!("fatal kernel error: {}", error);
        self.port.fatal(error)
    }
}

/// Keeps the scheduler suspended while alive.
///
/// Dereferences to the kernel; dropping it resumes the scheduler.
pub struct SuspendGuard<'k, 'a, P: Port> {
    kernel: &'k mut Kernel<'a, P>,
    done: bool,
}

impl<'k, 'a, P: Port> SuspendGuard<'k, 'a, P> {
    /// Resumes now and reports whether a yield was already requested.
    pub fn resume(mut self) -> bool {
        self.done = true;
        self.kernel.resume_all()
    }
}

impl<'k, 'a, P: Port> Deref for SuspendGuard<'k, 'a, P> {
    type Target = Kernel<'a, P>;

    fn deref(&self) -> &Self::Target {
        self.kernel
    }
}

impl<'k, 'a, P: Port> DerefMut for SuspendGuard<'k, 'a, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.kernel
    }
}

impl<'k, 'a, P: Port> Drop for SuspendGuard<'k, 'a, P> {
    fn drop(&mut self) {
        if !self.done {
            self.kernel.resume_all();
        }
    }
}

fn idle_task(_: usize) {}
