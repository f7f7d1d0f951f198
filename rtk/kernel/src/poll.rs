//! Event poll: one blocking wait over several event sources
//!
//! A poll object belongs to one task and watches up to [`POLL_SLOTS`]
//! targets: queues, event groups and the owner's own notification slot.
//! Each watched object keeps a [`PollLink`] back to its slot and reports its
//! readiness through [`Kernel::poll_update`] whenever it changes. The update
//! only caches the new event word and, if the owner is waiting, makes it
//! ready. It never blocks and never calls back into the reporting object.

use log::trace;
use rtk_core::{
    EventGroupHandle, KernelError, KernelResult, PollHandle, QueueHandle, RawHandle, TaskHandle,
    TickType, POLL_SLOTS,
};

use crate::kernel::{layout, resolve, vacant_slot, Kernel};
use crate::list::{Owner, MAX_ITEM_VALUE};
use crate::notify::NotifyState;
use crate::port::Port;
use crate::task::WaitKey;

/// Event word reported for a target.
pub type PollEvents = u32;

/// Queue holds at least one item.
pub const QUEUE_READABLE: PollEvents = 1 << 0;
/// Queue has room for at least one item.
pub const QUEUE_WRITABLE: PollEvents = 1 << 1;
/// A notification is pending for the owner.
pub const NOTIFICATION_RECEIVED: PollEvents = 1 << 0;
/// The watched event group was deleted. Reported once, whatever the mask.
pub const GROUP_DELETED: PollEvents = 1 << 31;

/// An object a poll object can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTarget {
    Queue(QueueHandle),
    EventGroup(EventGroupHandle),
    /// The poll owner's own notification slot
    TaskNotification,
}

#[cfg(feature = "defmt")]
impl defmt::Format for PollTarget {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Queue(handle) => defmt::write!(fmt, "Queue({})", handle),
            Self::EventGroup(handle) => defmt::write!(fmt, "EventGroup({})", handle),
            Self::TaskNotification => defmt::write!(fmt, "TaskNotification"),
        }
    }
}

/// One ready target, as reported by [`Kernel::poll_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvent {
    pub target: PollTarget,
    /// Events that are both requested and present
    pub events: PollEvents,
}

impl PollEvent {
    pub const fn empty() -> Self {
        Self {
            target: PollTarget::TaskNotification,
            events: 0,
        }
    }
}

impl Default for PollEvent {
    fn default() -> Self {
        Self::empty()
    }
}

/// Back-link from a watched object to the slot watching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollLink {
    pub poll: usize,
    pub slot: usize,
}

#[derive(Clone, Copy)]
struct PollSlot {
    target: Option<PollTarget>,
    requested: PollEvents,
    observed: PollEvents,
}

impl PollSlot {
    const EMPTY: Self = Self {
        target: None,
        requested: 0,
        observed: 0,
    };

    fn ready(&self) -> PollEvents {
        if self.observed & GROUP_DELETED != 0 {
            GROUP_DELETED
        } else {
            self.observed & self.requested
        }
    }
}

pub(crate) struct PollObject {
    owner: usize,
    slots: [PollSlot; POLL_SLOTS],
    waiting: bool,
}

impl PollObject {
    pub fn vacant() -> Self {
        Self {
            owner: 0,
            slots: [PollSlot::EMPTY; POLL_SLOTS],
            waiting: false,
        }
    }

    fn find(&self, target: PollTarget) -> Option<usize> {
        self.slots.iter().position(|slot| slot.target == Some(target))
    }
}

impl<'a, P: Port> Kernel<'a, P> {
    fn poll_index(&self, handle: PollHandle) -> KernelResult<usize> {
        resolve(&self.polls, handle.raw())
    }

    /// Creates a poll object owned by `owner`, or by the running task.
    pub fn poll_create(&mut self, owner: Option<TaskHandle>) -> KernelResult<PollHandle> {
        let t = self.task_index(owner)?;
        let p = vacant_slot(&self.polls).ok_or(KernelError::CapacityExhausted)?;

        let item = layout::poll_item(p);
        self.lists.init_item(item);
        self.lists.set_owner(item, Owner::Poll(p));
        self.lists.set_value(item, MAX_ITEM_VALUE);
        self.lists.insert_end(layout::poll_list(t), item);

        let generation = self.polls[p].occupy(PollObject {
            owner: t,
            ..PollObject::vacant()
        });
        Ok(PollHandle::from_raw(RawHandle::new(p as u16, generation)))
    }

    /// Starts watching `target` for any of `events`.
    ///
    /// A target can be watched by one poll object at a time: adding a queue,
    /// group or notification slot that another poll object already watches
    /// fails with [`KernelError::InvalidOperation`], as does adding the same
    /// target twice.
    pub fn poll_add(
        &mut self,
        handle: PollHandle,
        target: PollTarget,
        events: PollEvents,
    ) -> KernelResult<()> {
        let p = self.poll_index(handle)?;
        if events == 0 {
            return Err(KernelError::InvalidEvents);
        }
        let owner = self.polls[p].value.owner;

        self.critical(|k| {
            let registered = match target {
                PollTarget::Queue(queue) => {
                    let q = k.queue_index_any(queue)?;
                    k.queues[q].value.watcher.is_some()
                }
                PollTarget::EventGroup(group) => {
                    let g = k.group_index(group)?;
                    k.groups[g].value.watcher.is_some()
                }
                PollTarget::TaskNotification => k
                    .lists
                    .iter(layout::poll_list(owner))
                    .any(|item| k.lists.value(item) != MAX_ITEM_VALUE),
            };
            if registered || k.polls[p].value.find(target).is_some() {
                return Err(KernelError::InvalidOperation);
            }
            let slot = k.polls[p]
                .value
                .slots
                .iter()
                .position(|slot| slot.target.is_none())
                .ok_or(KernelError::EventsLimitReached)?;

            let link = PollLink { poll: p, slot };
            let observed = match target {
                PollTarget::Queue(queue) => {
                    let q = queue.index();
                    k.queues[q].value.watcher = Some(link);
                    k.queue_events(q)
                }
                PollTarget::EventGroup(group) => {
                    let g = group.index();
                    k.groups[g].value.watcher = Some(link);
                    k.groups[g].value.bits
                }
                PollTarget::TaskNotification => {
                    k.lists.set_value(layout::poll_item(p), slot as u32);
                    k.notification_events(owner)
                }
            };
            k.polls[p].value.slots[slot] = PollSlot {
                target: Some(target),
                requested: events,
                observed,
            };
            Ok(())
        })?;
        trace!("poll {} watches {:?}", handle, target);
        Ok(())
    }

    /// Changes the events watched on an already registered target.
    pub fn poll_modify(
        &mut self,
        handle: PollHandle,
        target: PollTarget,
        events: PollEvents,
    ) -> KernelResult<()> {
        let p = self.poll_index(handle)?;
        if events == 0 {
            return Err(KernelError::InvalidEvents);
        }
        let woken = self.critical(|k| {
            let slot = k.polls[p]
                .value
                .find(target)
                .ok_or(KernelError::InvalidOperation)?;
            k.polls[p].value.slots[slot].requested = events;
            let observed = k.polls[p].value.slots[slot].observed;
            Ok(k.poll_update(PollLink { poll: p, slot }, observed))
        })?;
        if woken {
            self.yield_if_preempting();
        }
        Ok(())
    }

    /// Stops watching `target`.
    pub fn poll_remove(&mut self, handle: PollHandle, target: PollTarget) -> KernelResult<()> {
        let p = self.poll_index(handle)?;
        self.critical(|k| {
            let slot = k.polls[p]
                .value
                .find(target)
                .ok_or(KernelError::InvalidOperation)?;
            k.poll_unregister(PollLink { poll: p, slot });
            Ok(())
        })
    }

    /// Fills `out` with every target whose requested events are present.
    ///
    /// Returns the number of entries written, at most `out.len()`. Blocks
    /// for up to `ticks` only when nothing is ready. Only the owner may
    /// wait.
    pub fn poll_wait(
        &mut self,
        handle: PollHandle,
        out: &mut [PollEvent],
        ticks: TickType,
    ) -> nb::Result<usize, KernelError> {
        let p = self.poll_index(handle)?;
        if out.is_empty() {
            return Err(nb::Error::Other(KernelError::NullArgument));
        }
        if self.current != Some(self.polls[p].value.owner) {
            return Err(nb::Error::Other(KernelError::InvalidOperation));
        }
        let key = WaitKey::Poll(handle.raw());
        let stored = self.take_wait(key);
        let ticks = self.effective_wait(ticks);
        if stored.is_none() {
            self.check_can_block(ticks)?;
        }
        let mut state = match stored {
            Some(state) => state,
            None => self.new_wait(key, ticks),
        };

        self.suspend_all();
        let count = self.critical(|k| {
            k.polls[p].value.waiting = false;
            k.poll_collect(p, out)
        });
        if count > 0 {
            self.resume_all();
            return Ok(count);
        }
        if ticks == 0 && stored.is_none() {
            self.resume_all();
            return Err(nb::Error::Other(KernelError::Timeout));
        }
        if self.check_for_timeout(&mut state) {
            self.resume_all();
            return Err(nb::Error::Other(KernelError::Timeout));
        }

        self.critical(|k| {
            k.polls[p].value.waiting = true;
            k.add_current_to_delayed(state.remaining, true);
        });
        self.store_wait(state);
        if !self.resume_all() {
            self.yield_within_api();
        }
        Err(nb::Error::WouldBlock)
    }

    /// Deletes a poll object, unregistering every target. A waiting owner
    /// is woken and its wait fails with `InvalidHandle`.
    pub fn poll_delete(&mut self, handle: PollHandle) -> KernelResult<()> {
        let p = self.poll_index(handle)?;
        let woken = self.critical(|k| k.poll_destroy(p));
        if woken {
            self.yield_if_preempting();
        }
        Ok(())
    }

    fn poll_destroy(&mut self, p: usize) -> bool {
        for slot in 0..POLL_SLOTS {
            if self.polls[p].value.slots[slot].target.is_some() {
                self.poll_unregister(PollLink { poll: p, slot });
            }
        }
        let woken = self.polls[p].value.waiting && self.poll_wake_owner(p);
        self.lists.remove(layout::poll_item(p));
        self.polls[p].release();
        self.polls[p].value = PollObject::vacant();
        woken
    }

    /// Records `events` for the slot behind `link` and wakes the owner if it
    /// waits for them. Returns `true` when the owner outranks the running
    /// task.
    pub(crate) fn poll_update(&mut self, link: PollLink, events: PollEvents) -> bool {
        let object = &mut self.polls[link.poll].value;
        let slot = &mut object.slots[link.slot];
        if slot.target.is_none() {
            return false;
        }
        slot.observed = if events & GROUP_DELETED != 0 {
            GROUP_DELETED
        } else {
            events
        };
        if object.waiting && slot.ready() != 0 {
            self.poll_wake_owner(link.poll)
        } else {
            false
        }
    }

    fn poll_wake_owner(&mut self, p: usize) -> bool {
        self.polls[p].value.waiting = false;
        let t = self.polls[p].value.owner;
        let blocked = match self.lists.container(layout::state_item(t)) {
            Some(list) => {
                list == self.delayed
                    || list == self.overflow_delayed
                    || list == layout::SUSPENDED
            }
            None => false,
        };
        // Already woken by its time-out.
        if !blocked || self.lists.container(layout::event_item(t)).is_some() {
            return false;
        }
        self.make_ready_from_wait(t)
    }

    /// Forgets the registration behind `link` without touching the target.
    pub(crate) fn poll_detach_slot(&mut self, link: PollLink) {
        let slot = &mut self.polls[link.poll].value.slots[link.slot];
        if slot.target == Some(PollTarget::TaskNotification) {
            self.lists
                .set_value(layout::poll_item(link.poll), MAX_ITEM_VALUE);
        }
        *slot = PollSlot::EMPTY;
    }

    fn poll_unregister(&mut self, link: PollLink) {
        match self.polls[link.poll].value.slots[link.slot].target {
            Some(PollTarget::Queue(queue)) => {
                if let Ok(q) = self.queue_index_any(queue) {
                    self.queues[q].value.watcher = None;
                }
            }
            Some(PollTarget::EventGroup(group)) => {
                if let Ok(g) = self.group_index(group) {
                    if self.groups[g].value.watcher == Some(link) {
                        self.groups[g].value.watcher = None;
                    }
                }
            }
            Some(PollTarget::TaskNotification) | None => {}
        }
        self.poll_detach_slot(link);
    }

    /// Copies ready targets into `out`. A deleted event group is reported
    /// once and its slot freed.
    fn poll_collect(&mut self, p: usize, out: &mut [PollEvent]) -> usize {
        let mut count = 0;
        for slot in 0..POLL_SLOTS {
            if count == out.len() {
                break;
            }
            let entry = self.polls[p].value.slots[slot];
            let Some(target) = entry.target else {
                continue;
            };
            let events = entry.ready();
            if events == 0 {
                continue;
            }
            out[count] = PollEvent { target, events };
            count += 1;
            if events == GROUP_DELETED {
                self.poll_detach_slot(PollLink { poll: p, slot });
            }
        }
        count
    }

    /// Owner notification state changed.
    pub(crate) fn notification_readiness_changed(&mut self, t: usize) -> bool {
        let events = self.notification_events(t);
        let mut woken = false;
        let mut item = self.lists.head(layout::poll_list(t));
        while let Some(current) = item {
            item = self.lists.next_item(current);
            let slot = self.lists.value(current);
            if slot == MAX_ITEM_VALUE {
                continue;
            }
            if let Owner::Poll(p) = self.lists.owner(current) {
                let link = PollLink {
                    poll: p,
                    slot: slot as usize,
                };
                woken |= self.poll_update(link, events);
            }
        }
        woken
    }

    fn notification_events(&self, t: usize) -> PollEvents {
        if self.tasks[t].value.notify_state == NotifyState::Received {
            NOTIFICATION_RECEIVED
        } else {
            0
        }
    }

    /// Ends any poll wait of `t` without waking it.
    pub(crate) fn cancel_poll_waits_of(&mut self, t: usize) {
        let mut item = self.lists.head(layout::poll_list(t));
        while let Some(current) = item {
            item = self.lists.next_item(current);
            if let Owner::Poll(p) = self.lists.owner(current) {
                self.polls[p].value.waiting = false;
            }
        }
    }

    pub(crate) fn is_poll_waiting(&self, t: usize) -> bool {
        self.lists
            .iter(layout::poll_list(t))
            .any(|item| match self.lists.owner(item) {
                Owner::Poll(p) => self.polls[p].value.waiting,
                _ => false,
            })
    }

    /// Deletes every poll object owned by `t`.
    pub(crate) fn destroy_polls_owned_by(&mut self, t: usize) {
        self.critical(|k| {
            while let Some(item) = k.lists.head(layout::poll_list(t)) {
                match k.lists.owner(item) {
                    Owner::Poll(p) => {
                        k.polls[p].value.waiting = false;
                        k.poll_destroy(p);
                    }
                    _ => {
                        k.lists.remove(item);
                    }
                }
            }
        });
    }
}
