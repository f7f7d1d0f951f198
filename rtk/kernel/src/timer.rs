//! Software timers and the timer service task
//!
//! Timer operations do not touch the active timer lists directly. They post
//! a command to the timer service's queue, and the service task applies the
//! commands in order, fires expired timers and then sleeps on the queue
//! until the next expiry. Event group operations issued from interrupts are
//! deferred through the same queue.
//!
//! Active timers are kept in two lists sorted by absolute expiry tick: one
//! for the current tick epoch and one for expiries past the next wraparound.
//! The lists swap when the service sees the tick count wrap.

use heapless::String;
use log::{debug, trace, warn};
use rtk_core::{
    FatalError, KernelError, KernelResult, RawHandle, TaskHandle, TickType, TimerHandle,
    MAX_DELAY, MAX_TASK_NAME_LEN,
};

use crate::event_group::EventBits;
use crate::kernel::{layout, resolve, vacant_slot, Kernel};
use crate::list::{ListId, Owner};
use crate::port::Port;
use crate::queue::SendPosition;
use crate::task::truncated_name;
use crate::trace::TraceEvent;

/// Bytes per entry of the timer command queue.
pub const COMMAND_SIZE: usize = 12;

/// Timer expiry callback. Runs on the timer service task.
pub type TimerCallback<'a, P> = fn(&mut Kernel<'a, P>, TimerHandle);

/// Command identifiers as stored in the command queue.
pub mod commands {
    pub const START: u8 = 0;
    pub const RESET: u8 = 1;
    pub const STOP: u8 = 2;
    pub const CHANGE_PERIOD: u8 = 3;
    pub const DELETE: u8 = 4;
    pub const SET_EVENT_BITS: u8 = 5;
    pub const CLEAR_EVENT_BITS: u8 = 6;
}

/// A message for the timer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerCommand {
    /// Arm relative to the tick the command was issued at
    Start { timer: RawHandle, at: TickType },
    Reset { timer: RawHandle, at: TickType },
    Stop { timer: RawHandle },
    ChangePeriod { timer: RawHandle, period: TickType },
    Delete { timer: RawHandle },
    SetEventBits { group: RawHandle, bits: EventBits },
    ClearEventBits { group: RawHandle, bits: EventBits },
}

impl TimerCommand {
    fn id(&self) -> u8 {
        match self {
            Self::Start { .. } => commands::START,
            Self::Reset { .. } => commands::RESET,
            Self::Stop { .. } => commands::STOP,
            Self::ChangePeriod { .. } => commands::CHANGE_PERIOD,
            Self::Delete { .. } => commands::DELETE,
            Self::SetEventBits { .. } => commands::SET_EVENT_BITS,
            Self::ClearEventBits { .. } => commands::CLEAR_EVENT_BITS,
        }
    }

    /// Layout: id, three bytes padding, handle bits, value. Little endian.
    pub fn encode(&self) -> [u8; COMMAND_SIZE] {
        let (handle, value) = match *self {
            Self::Start { timer, at } | Self::Reset { timer, at } => (timer, at),
            Self::Stop { timer } | Self::Delete { timer } => (timer, 0),
            Self::ChangePeriod { timer, period } => (timer, period),
            Self::SetEventBits { group, bits } | Self::ClearEventBits { group, bits } => {
                (group, bits)
            }
        };
        let mut buf = [0u8; COMMAND_SIZE];
        buf[0] = self.id();
        buf[4..8].copy_from_slice(&handle.to_bits().to_le_bytes());
        buf[8..12].copy_from_slice(&value.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; COMMAND_SIZE]) -> Option<Self> {
        let handle = RawHandle::from_bits(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]));
        let value = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let command = match buf[0] {
            commands::START => Self::Start {
                timer: handle,
                at: value,
            },
            commands::RESET => Self::Reset {
                timer: handle,
                at: value,
            },
            commands::STOP => Self::Stop { timer: handle },
            commands::CHANGE_PERIOD => Self::ChangePeriod {
                timer: handle,
                period: value,
            },
            commands::DELETE => Self::Delete { timer: handle },
            commands::SET_EVENT_BITS => Self::SetEventBits {
                group: handle,
                bits: value,
            },
            commands::CLEAR_EVENT_BITS => Self::ClearEventBits {
                group: handle,
                bits: value,
            },
            _ => return None,
        };
        Some(command)
    }
}

/// What one pass of [`Kernel::timer_service_run`] ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Work was done; call again
    Ran,
    /// The service task now waits for a command or the next expiry
    Blocked,
}

pub(crate) struct Timer<'a, P: Port> {
    pub name: String<MAX_TASK_NAME_LEN>,
    pub callback: TimerCallback<'a, P>,
    pub id: usize,
    pub period: TickType,
    pub auto_reload: bool,
    pub active: bool,
    pub privilege: u32,
}

fn no_callback<'a, P: Port>(_: &mut Kernel<'a, P>, _: TimerHandle) {}

impl<'a, P: Port> Timer<'a, P> {
    pub fn vacant() -> Self {
        Self {
            name: String::new(),
            callback: no_callback,
            id: 0,
            period: 0,
            auto_reload: false,
            active: false,
            privilege: 0,
        }
    }
}

pub(crate) struct TimerService {
    pub queue: Option<usize>,
    pub task: Option<usize>,
    current: ListId,
    overflow: ListId,
    last_time: TickType,
}

impl TimerService {
    pub const fn new() -> Self {
        Self {
            queue: None,
            task: None,
            current: layout::TIMERS_A,
            overflow: layout::TIMERS_B,
            last_time: 0,
        }
    }
}

/// Entry point of the timer service task.
///
/// The service body is [`Kernel::timer_service_run`]; a port calls it
/// whenever this task is the one switched in.
pub fn timer_task(_: usize) {}

impl<'a, P: Port> Kernel<'a, P> {
    pub(crate) fn timer_queue_init(&mut self, storage: &'a mut [u8]) -> KernelResult<()> {
        let length = self.config.timer_queue_length;
        if length == 0 {
            return Err(KernelError::InvalidParameters);
        }
        if storage.len() != length * COMMAND_SIZE {
            return Err(KernelError::AlignmentOrSizeMismatch);
        }
        self.lists.init_list(layout::TIMERS_A);
        self.lists.init_list(layout::TIMERS_B);
        let queue = self.queue_create(storage, length, COMMAND_SIZE)?;
        self.timer_service.queue = Some(queue.index());
        self.timer_service.last_time = self.ticks.now();
        Ok(())
    }

    fn timer_index(&self, handle: TimerHandle) -> KernelResult<usize> {
        resolve(&self.timers, handle.raw())
    }

    fn timer_handle(&self, tm: usize) -> TimerHandle {
        TimerHandle::from_raw(RawHandle::new(tm as u16, self.timers[tm].generation))
    }

    /// Handle of the timer service task once the scheduler runs.
    pub fn timer_service_task(&self) -> Option<TaskHandle> {
        self.timer_service.task.map(|t| self.task_handle(t))
    }

    /// Creates a dormant timer.
    ///
    /// `id` is an application value the callback can read back with
    /// [`Kernel::timer_id`].
    pub fn timer_create(
        &mut self,
        name: &str,
        period: TickType,
        auto_reload: bool,
        id: usize,
        callback: TimerCallback<'a, P>,
    ) -> KernelResult<TimerHandle> {
        if period == 0 {
            return Err(KernelError::InvalidParameters);
        }
        let tm = vacant_slot(&self.timers).ok_or(KernelError::CapacityExhausted)?;
        let item = layout::timer_item(tm);
        self.lists.init_item(item);
        self.lists.set_owner(item, Owner::Timer(tm));
        self.timers[tm].occupy(Timer {
            name: truncated_name(name),
            callback,
            id,
            period,
            auto_reload,
            ..Timer::vacant()
        });
        let handle = self.timer_handle(tm);
        debug!("timer '{}' created, period {}", name, period);
        Ok(handle)
    }

    /// Starts a timer; it expires `period` ticks from now.
    pub fn timer_start(&mut self, handle: TimerHandle, ticks: TickType) -> nb::Result<(), KernelError> {
        self.timer_index(handle)?;
        let at = self.tick_count();
        self.timer_command(TimerCommand::Start { timer: handle.raw(), at }, ticks)
    }

    /// Restarts a timer from now, starting it if dormant.
    pub fn timer_reset(&mut self, handle: TimerHandle, ticks: TickType) -> nb::Result<(), KernelError> {
        self.timer_index(handle)?;
        let at = self.tick_count();
        self.timer_command(TimerCommand::Reset { timer: handle.raw(), at }, ticks)
    }

    pub fn timer_stop(&mut self, handle: TimerHandle, ticks: TickType) -> nb::Result<(), KernelError> {
        self.timer_index(handle)?;
        self.timer_command(TimerCommand::Stop { timer: handle.raw() }, ticks)
    }

    /// Changes the period. An active timer restarts from now with the new
    /// period; a dormant timer stays dormant.
    pub fn timer_change_period(
        &mut self,
        handle: TimerHandle,
        period: TickType,
        ticks: TickType,
    ) -> nb::Result<(), KernelError> {
        if period == 0 {
            return Err(nb::Error::Other(KernelError::InvalidParameters));
        }
        self.timer_index(handle)?;
        let command = TimerCommand::ChangePeriod {
            timer: handle.raw(),
            period,
        };
        self.timer_command(command, ticks)
    }

    /// Deletes a timer once the service processes the command.
    pub fn timer_delete(&mut self, handle: TimerHandle, ticks: TickType) -> nb::Result<(), KernelError> {
        self.timer_index(handle)?;
        self.timer_command(TimerCommand::Delete { timer: handle.raw() }, ticks)
    }

    pub fn timer_start_from_isr(&mut self, handle: TimerHandle) -> KernelResult<bool> {
        self.timer_index(handle)?;
        let at = self.tick_count_from_isr();
        self.timer_command_from_isr(TimerCommand::Start { timer: handle.raw(), at })
    }

    pub fn timer_reset_from_isr(&mut self, handle: TimerHandle) -> KernelResult<bool> {
        self.timer_index(handle)?;
        let at = self.tick_count_from_isr();
        self.timer_command_from_isr(TimerCommand::Reset { timer: handle.raw(), at })
    }

    pub fn timer_stop_from_isr(&mut self, handle: TimerHandle) -> KernelResult<bool> {
        self.timer_index(handle)?;
        self.timer_command_from_isr(TimerCommand::Stop { timer: handle.raw() })
    }

    pub fn timer_change_period_from_isr(
        &mut self,
        handle: TimerHandle,
        period: TickType,
    ) -> KernelResult<bool> {
        if period == 0 {
            return Err(KernelError::InvalidParameters);
        }
        self.timer_index(handle)?;
        self.timer_command_from_isr(TimerCommand::ChangePeriod {
            timer: handle.raw(),
            period,
        })
    }

    pub fn timer_delete_from_isr(&mut self, handle: TimerHandle) -> KernelResult<bool> {
        self.timer_index(handle)?;
        self.timer_command_from_isr(TimerCommand::Delete { timer: handle.raw() })
    }

    fn timer_command_queue(&self) -> KernelResult<(usize, RawHandle)> {
        let q = self.timer_service.queue.ok_or(KernelError::InvalidOperation)?;
        Ok((q, RawHandle::new(q as u16, self.queues[q].generation)))
    }

    fn timer_command(
        &mut self,
        command: TimerCommand,
        ticks: TickType,
    ) -> nb::Result<(), KernelError> {
        let (q, raw) = self.timer_command_queue()?;
        let bytes = command.encode();
        self.queue_generic_send(q, raw, &bytes, ticks, SendPosition::Back)
    }

    pub(crate) fn timer_command_from_isr(&mut self, command: TimerCommand) -> KernelResult<bool> {
        let (q, _) = self.timer_command_queue()?;
        let bytes = command.encode();
        self.queue_send_from_isr_inner(q, &bytes, SendPosition::Back)
    }

    pub fn timer_is_active(&self, handle: TimerHandle) -> KernelResult<bool> {
        let tm = self.timer_index(handle)?;
        Ok(self.critical_read(|k| k.timers[tm].value.active))
    }

    pub fn timer_period(&self, handle: TimerHandle) -> KernelResult<TickType> {
        let tm = self.timer_index(handle)?;
        Ok(self.timers[tm].value.period)
    }

    /// Absolute tick of the next expiry. Meaningless while dormant.
    pub fn timer_expiry_time(&self, handle: TimerHandle) -> KernelResult<TickType> {
        let tm = self.timer_index(handle)?;
        Ok(self.lists.value(layout::timer_item(tm)))
    }

    pub fn timer_id(&self, handle: TimerHandle) -> KernelResult<usize> {
        let tm = self.timer_index(handle)?;
        Ok(self.timers[tm].value.id)
    }

    pub fn timer_set_id(&mut self, handle: TimerHandle, id: usize) -> KernelResult<()> {
        let tm = self.timer_index(handle)?;
        self.critical(|k| k.timers[tm].value.id = id);
        Ok(())
    }

    pub fn timer_name(&self, handle: TimerHandle) -> KernelResult<&str> {
        let tm = self.timer_index(handle)?;
        Ok(self.timers[tm].value.name.as_str())
    }

    /// Switches between periodic and one-shot. Takes effect at the next
    /// expiry.
    pub fn timer_set_reload_mode(&mut self, handle: TimerHandle, auto_reload: bool) -> KernelResult<()> {
        let tm = self.timer_index(handle)?;
        self.critical(|k| k.timers[tm].value.auto_reload = auto_reload);
        Ok(())
    }

    /// Access privileges the callback runs with, as understood by
    /// [`Port::switch_privilege`].
    pub fn timer_set_privilege(&mut self, handle: TimerHandle, token: u32) -> KernelResult<()> {
        let tm = self.timer_index(handle)?;
        self.timers[tm].value.privilege = token;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Service task
    // ------------------------------------------------------------------

    /// One pass of the timer service task body: fire what has expired or
    /// block until something will, then apply queued commands.
    ///
    /// Must run on the timer service task.
    pub fn timer_service_run(&mut self) -> KernelResult<ServiceOutcome> {
        if self.timer_service.task.is_none() || self.current != self.timer_service.task {
            return Err(KernelError::InvalidOperation);
        }
        let (next_expiry, list_was_empty) = self.timer_next_expiry();
        let blocked = self.timer_process_or_block(next_expiry, list_was_empty);
        self.timer_process_commands();
        Ok(if blocked {
            ServiceOutcome::Blocked
        } else {
            ServiceOutcome::Ran
        })
    }

    fn timer_next_expiry(&self) -> (TickType, bool) {
        match self.lists.head_value(self.timer_service.current) {
            Some(expiry) => (expiry, false),
            // Wake at the wraparound so the lists get swapped.
            None => (0, true),
        }
    }

    fn timer_process_or_block(&mut self, next_expiry: TickType, list_was_empty: bool) -> bool {
        self.suspend_all();
        let (now, switched) = self.timer_sample_time();
        if switched {
            self.resume_all();
            return false;
        }
        if !list_was_empty && next_expiry <= now {
            self.resume_all();
            self.timer_process_expired(next_expiry, now);
            return false;
        }

        let indefinite = list_was_empty && self.lists.is_empty(self.timer_service.overflow);
        let mut blocked = false;
        if let Some(q) = self.timer_service.queue {
            self.lock_queue(q);
            if self.queues[q].value.waiting == 0 {
                self.place_on_event_list_restricted(
                    layout::waiting_to_receive(q),
                    next_expiry.wrapping_sub(now),
                    indefinite,
                );
                blocked = true;
            }
            self.unlock_queue(q);
        }
        if !self.resume_all() && blocked {
            self.yield_within_api();
        }
        blocked
    }

    /// Reads the tick count, swapping the timer lists if it wrapped since
    /// the last sample.
    fn timer_sample_time(&mut self) -> (TickType, bool) {
        let now = self.tick_count();
        let switched = now < self.timer_service.last_time;
        if switched {
            self.timer_switch_lists();
        }
        self.timer_service.last_time = now;
        (now, switched)
    }

    fn timer_switch_lists(&mut self) {
        // Whatever is left in the current list expired before the wrap.
        while let Some(expiry) = self.lists.head_value(self.timer_service.current) {
            self.timer_process_expired(expiry, MAX_DELAY);
        }
        let service = &mut self.timer_service;
        core::mem::swap(&mut service.current, &mut service.overflow);
    }

    /// Files `tm` under `next_expiry`. Returns `true` when it is already
    /// due and was not inserted.
    fn timer_insert_active(
        &mut self,
        tm: usize,
        next_expiry: TickType,
        now: TickType,
        command_time: TickType,
    ) -> bool {
        let item = layout::timer_item(tm);
        self.lists.set_value(item, next_expiry);

        if next_expiry <= now {
            if now.wrapping_sub(command_time) >= self.timers[tm].value.period {
                return true;
            }
            self.lists.insert(self.timer_service.overflow, item);
        } else if now < command_time && next_expiry >= command_time {
            // The tick count wrapped after the command was issued, but the
            // expiry did not.
            return true;
        } else {
            self.lists.insert(self.timer_service.current, item);
        }
        false
    }

    /// Re-arms a periodic timer from its previous expiry, firing once for
    /// every period already missed.
    fn timer_reload(&mut self, tm: usize, mut expired: TickType, now: TickType) {
        loop {
            let period = self.timers[tm].value.period;
            let next = expired.wrapping_add(period);
            if !self.timer_insert_active(tm, next, now, expired) {
                break;
            }
            expired = next;
            self.timer_fire(tm);
            if !self.timers[tm].live {
                break;
            }
        }
    }

    fn timer_process_expired(&mut self, next_expiry: TickType, now: TickType) {
        let Some(item) = self.lists.head(self.timer_service.current) else {
            return;
        };
        let tm = match self.lists.owner(item) {
            Owner::Timer(tm) if self.timers[tm].live => tm,
            _ => self.fatal(FatalError::InvalidTimer),
        };
        self.lists.remove(item);

        if self.timers[tm].value.auto_reload {
            self.timer_reload(tm, next_expiry, now);
        } else {
            self.timers[tm].value.active = false;
        }
        self.timer_fire(tm);
    }

    /// Runs the callback of `tm` with its access privileges.
    fn timer_fire(&mut self, tm: usize) {
        let handle = self.timer_handle(tm);
        let timer = &self.timers[tm].value;
        let (callback, token) = (timer.callback, timer.privilege);
        trace!("timer '{}' expired", timer.name);
        self.emit(TraceEvent::TimerExpired { timer: handle });

        let previous = self.port.switch_privilege(token);
        callback(self, handle);
        self.port.switch_privilege(previous);
    }

    fn timer_receive_command(&mut self) -> Option<TimerCommand> {
        let (q, raw) = self.timer_command_queue().ok()?;
        let mut buf = [0u8; COMMAND_SIZE];
        self.queue_generic_receive(q, raw, &mut buf, 0, false).ok()?;
        let command = TimerCommand::decode(&buf);
        if command.is_none() {
            warn!("dropping malformed timer command {}", buf[0]);
        }
        command
    }

    fn timer_process_commands(&mut self) {
        while let Some(command) = self.timer_receive_command() {
            let timer = match command {
                TimerCommand::SetEventBits { group, bits } => {
                    match resolve(&self.groups, group) {
                        Ok(g) => {
                            self.group_set_bits(g, bits);
                        }
                        Err(_) => warn!("deferred set bits for stale event group {}", group),
                    }
                    continue;
                }
                TimerCommand::ClearEventBits { group, bits } => {
                    match resolve(&self.groups, group) {
                        Ok(g) => {
                            self.group_clear_bits(g, bits);
                        }
                        Err(_) => warn!("deferred clear bits for stale event group {}", group),
                    }
                    continue;
                }
                TimerCommand::Start { timer, .. }
                | TimerCommand::Reset { timer, .. }
                | TimerCommand::Stop { timer }
                | TimerCommand::ChangePeriod { timer, .. }
                | TimerCommand::Delete { timer } => timer,
            };
            let Ok(tm) = resolve(&self.timers, timer) else {
                warn!("command {} for stale timer {}", command.id(), timer);
                continue;
            };
            self.lists.remove(layout::timer_item(tm));
            let (now, _) = self.timer_sample_time();
            self.emit(TraceEvent::TimerCommand {
                timer: TimerHandle::from_raw(timer),
                command: command.id(),
            });

            match command {
                TimerCommand::Start { at, .. } | TimerCommand::Reset { at, .. } => {
                    self.timers[tm].value.active = true;
                    let next = at.wrapping_add(self.timers[tm].value.period);
                    if self.timer_insert_active(tm, next, now, at) {
                        if self.timers[tm].value.auto_reload {
                            self.timer_reload(tm, next, now);
                        } else {
                            self.timers[tm].value.active = false;
                        }
                        if self.timers[tm].live {
                            self.timer_fire(tm);
                        }
                    }
                }
                TimerCommand::Stop { .. } => self.timers[tm].value.active = false,
                TimerCommand::ChangePeriod { period, .. } => {
                    self.timers[tm].value.period = period;
                    if self.timers[tm].value.active {
                        self.timer_insert_active(tm, now.wrapping_add(period), now, now);
                    }
                }
                TimerCommand::Delete { .. } => {
                    self.timers[tm].release();
                    self.timers[tm].value = Timer::vacant();
                    debug!("timer {} deleted", timer);
                }
                TimerCommand::SetEventBits { .. } | TimerCommand::ClearEventBits { .. } => {}
            }
        }
    }
}
