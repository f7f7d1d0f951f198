//! Mutexes with priority inheritance
//!
//! A mutex is a queue of one zero-sized item. "Available" means the item is
//! present; taking it removes the item and records the holder. Every mutex
//! nests: the holder may take it again, and only the matching number of
//! gives releases it.
//!
//! A holder whose priority is lower than a blocked taker inherits the
//! taker's priority. When the holder releases a mutex, or a waiter gives
//! up, the holder's priority is recomputed from its base priority and the
//! highest priority task still waiting on any mutex it holds.

use log::debug;
use rtk_core::{KernelError, KernelResult, MutexHandle, Priority, TaskHandle, TickType, MAX_QUEUES};

use crate::kernel::{layout, Kernel};
use crate::list::{ListId, Owner};
use crate::port::Port;
use crate::queue::{finish, QueueKind, SendPosition};
use crate::trace::TraceEvent;

impl<'a, P: Port> Kernel<'a, P> {
    fn mutex_index(&self, handle: MutexHandle) -> KernelResult<usize> {
        self.queue_index_of(handle, |kind| kind == QueueKind::Mutex)
    }

    /// Creates an available mutex.
    pub fn mutex_create(&mut self) -> KernelResult<MutexHandle> {
        let handle = self.queue_create_generic(Default::default(), 1, 0, QueueKind::Mutex)?;
        let q = handle.index();
        let item = layout::mutex_item(q);
        self.lists.init_item(item);
        self.lists.set_owner(item, Owner::Queue(q));
        self.queues[q].value.waiting = 1;
        Ok(handle)
    }

    /// Takes a mutex, waiting up to `ticks`.
    ///
    /// Taking a mutex the running task already holds never blocks; it only
    /// increments the nesting depth.
    pub fn mutex_take(
        &mut self,
        handle: MutexHandle,
        ticks: TickType,
    ) -> nb::Result<(), KernelError> {
        let q = self.mutex_index(handle)?;
        let queue = &mut self.queues[q].value;
        if self.current.is_some() && queue.holder == self.current {
            queue.recursion = queue
                .recursion
                .checked_add(1)
                .ok_or(KernelError::Corrupted)?;
            return Ok(());
        }
        self.semaphore_take_inner(q, handle.raw(), ticks)
    }

    /// Gives a mutex back. The last matching give releases it.
    pub fn mutex_give(&mut self, handle: MutexHandle) -> KernelResult<()> {
        let q = self.mutex_index(handle)?;
        let queue = &mut self.queues[q].value;
        if queue.holder.is_none() || queue.holder != self.current {
            return Err(KernelError::NotOwnedByCaller);
        }
        if queue.recursion == 0 {
            return Err(KernelError::Corrupted);
        }
        queue.recursion -= 1;
        if queue.recursion > 0 {
            return Ok(());
        }
        finish(self.queue_generic_send(q, handle.raw(), &[], 0, SendPosition::Back))
    }

    /// Task holding a mutex, if any.
    pub fn mutex_holder(&self, handle: MutexHandle) -> KernelResult<Option<TaskHandle>> {
        let q = self.mutex_index(handle)?;
        Ok(self.queues[q].value.holder.map(|t| self.task_handle(t)))
    }

    /// Nesting depth; zero when the mutex is available.
    pub fn mutex_depth(&self, handle: MutexHandle) -> KernelResult<u32> {
        let q = self.mutex_index(handle)?;
        Ok(self.queues[q].value.recursion)
    }

    /// Records the running task as holder after it took the mutex item.
    pub(crate) fn mutex_acquired(&mut self, q: usize) {
        let Some(t) = self.current else {
            return;
        };
        let queue = &mut self.queues[q].value;
        queue.holder = Some(t);
        queue.recursion = 1;
        self.lists.insert_end(layout::held(t), layout::mutex_item(q));
        self.tasks[t].value.mutexes_held += 1;
    }

    /// Detaches mutex `q` from its former holder `t`. Returns `true` when the
    /// holder's priority dropped.
    pub(crate) fn mutex_released_by(&mut self, t: usize, q: usize) -> bool {
        self.lists.remove(layout::mutex_item(q));
        let tcb = &mut self.tasks[t].value;
        tcb.mutexes_held = tcb.mutexes_held.saturating_sub(1);
        self.reevaluate_holder_priority(t)
    }

    /// Raises the holder of `q` to the running task's priority if it is
    /// lower. Returns `true` while the holder runs on inherited priority.
    pub(crate) fn priority_inherit(&mut self, q: usize) -> bool {
        let (Some(holder), Some(waiter)) = (self.queues[q].value.holder, self.current_priority())
        else {
            return false;
        };
        let tcb = &self.tasks[holder].value;
        if tcb.priority < waiter {
            self.apply_effective_priority(holder, waiter);
            let task = self.task_handle(holder);
            debug!("task {} inherits priority {}", task, waiter);
            self.emit(TraceEvent::PriorityInherit {
                task,
                priority: waiter,
            });
            true
        } else {
            tcb.base_priority < waiter
        }
    }

    /// A waiter on `q` gave up after inheritance; the holder may drop back.
    pub(crate) fn mutex_waiter_timed_out(&mut self, q: usize) {
        if let Some(holder) = self.queues[q].value.holder {
            self.reevaluate_holder_priority(holder);
        }
    }

    /// A task left wait list `list` for a reason other than a wakeup, either
    /// deletion or a timed out wait. Returns `true` when a holder dropped
    /// back.
    pub(crate) fn mutex_waiter_left(&mut self, list: ListId) -> bool {
        let Some(q) = (0..MAX_QUEUES).find(|&q| layout::waiting_to_receive(q) == list) else {
            return false;
        };
        let queue = &self.queues[q].value;
        if !self.queues[q].live || queue.kind != QueueKind::Mutex {
            return false;
        }
        match queue.holder {
            Some(holder) => self.reevaluate_holder_priority(holder),
            None => false,
        }
    }

    /// Highest priority among tasks blocked on any mutex `t` holds.
    pub(crate) fn highest_mutex_waiter(&self, t: usize) -> Option<Priority> {
        self.lists
            .iter(layout::held(t))
            .filter_map(|item| match self.lists.owner(item) {
                Owner::Queue(q) => self.lists.head_owner(layout::waiting_to_receive(q)),
                _ => None,
            })
            .filter_map(|owner| match owner {
                Owner::Task(w) => Some(self.tasks[w].value.priority),
                _ => None,
            })
            .max()
    }

    /// Recomputes the effective priority of `t` from its base priority and
    /// its mutex waiters. Returns `true` when it dropped.
    pub(crate) fn reevaluate_holder_priority(&mut self, t: usize) -> bool {
        let tcb = &self.tasks[t].value;
        let target = match self.highest_mutex_waiter(t) {
            Some(waiter) if waiter > tcb.base_priority => waiter,
            _ => tcb.base_priority,
        };
        if target == tcb.priority {
            return false;
        }
        let dropped = target < tcb.priority;
        self.apply_effective_priority(t, target);
        if dropped {
            let task = self.task_handle(t);
            debug!("task {} disinherits to priority {}", task, target);
            self.emit(TraceEvent::PriorityDisinherit {
                task,
                priority: target,
            });
        }
        dropped
    }

    /// Moves `t` to `priority`, keeping its ready and wait positions sorted.
    fn apply_effective_priority(&mut self, t: usize, priority: Priority) {
        let old = self.tasks[t].value.priority;
        self.tasks[t].value.priority = priority;

        if !self.tasks[t].value.event_value_in_use {
            let event = layout::event_item(t);
            if self.lists.container(event) == Some(layout::PENDING_READY) {
                self.lists.set_value(event, priority.event_key());
            } else {
                self.lists.relocate(event, priority.event_key());
            }
        }

        let state = layout::state_item(t);
        if self.lists.is_contained_within(layout::ready(old.index()), state) {
            self.lists.remove(state);
            self.add_to_ready(t);
        }
    }

    /// Releases every mutex held by a task that is being deleted, waking one
    /// waiter per mutex.
    pub(crate) fn release_mutexes_held_by(&mut self, t: usize) {
        self.critical(|k| {
            while let Some(item) = k.lists.head(layout::held(t)) {
                k.lists.remove(item);
                let Owner::Queue(q) = k.lists.owner(item) else {
                    continue;
                };
                let queue = &mut k.queues[q].value;
                queue.holder = None;
                queue.recursion = 0;
                queue.waiting = 1;
                let receivers = layout::waiting_to_receive(q);
                if !k.lists.is_empty(receivers) {
                    k.remove_from_event_list(receivers);
                }
                k.queue_readiness_changed(q);
            }
            k.tasks[t].value.mutexes_held = 0;
        });
    }
}
