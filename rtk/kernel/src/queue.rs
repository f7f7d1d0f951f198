//! Bounded queues and the semaphores built on them
//!
//! A queue is a ring buffer of fixed-size items in caller-supplied storage,
//! with one wait list for blocked senders and one for blocked receivers.
//! Semaphores are queues whose items have no payload: the occupancy is the
//! count. Mutexes (see [`crate::mutex`]) are binary semaphores with an owner.
//!
//! While a task is inside the blocking window of a send or receive the queue
//! is locked: interrupt-side changes only bump the lock counters, and the
//! wakeups they would have caused are replayed on unlock.

use log::trace;
use rtk_core::{
    KernelError, KernelResult, QueueHandle, RawHandle, SemaphoreHandle, TickType,
};

use crate::kernel::{layout, resolve, vacant_slot, Kernel};
use crate::poll::{PollLink, QUEUE_READABLE, QUEUE_WRITABLE};
use crate::port::Port;
use crate::task::WaitKey;
use crate::trace::TraceEvent;

pub(crate) const QUEUE_UNLOCKED: i8 = -1;
pub(crate) const LOCKED_UNMODIFIED: i8 = 0;

/// What a queue slot is used as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Queue,
    BinarySemaphore,
    CountingSemaphore,
    Mutex,
}

#[cfg(feature = "defmt")]
impl defmt::Format for QueueKind {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Queue => defmt::write!(fmt, "Queue"),
            Self::BinarySemaphore => defmt::write!(fmt, "BinarySemaphore"),
            Self::CountingSemaphore => defmt::write!(fmt, "CountingSemaphore"),
            Self::Mutex => defmt::write!(fmt, "Mutex"),
        }
    }
}

/// Where a sent item goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPosition {
    /// Behind every queued item
    Back,
    /// Ahead of every queued item
    Front,
    /// Replace the only item of a length-one queue, or add it if empty
    Overwrite,
}

pub(crate) struct Queue<'a> {
    pub storage: &'a mut [u8],
    pub item_size: usize,
    pub length: usize,
    /// Byte offset of the next write
    pub write: usize,
    /// Byte offset of the last read
    pub read: usize,
    pub waiting: usize,
    pub rx_lock: i8,
    pub tx_lock: i8,
    pub kind: QueueKind,
    pub holder: Option<usize>,
    pub recursion: u32,
    pub watcher: Option<PollLink>,
}

impl<'a> Queue<'a> {
    pub fn vacant() -> Self {
        Self {
            storage: Default::default(),
            item_size: 0,
            length: 0,
            write: 0,
            read: 0,
            waiting: 0,
            rx_lock: QUEUE_UNLOCKED,
            tx_lock: QUEUE_UNLOCKED,
            kind: QueueKind::Queue,
            holder: None,
            recursion: 0,
            watcher: None,
        }
    }

    fn reset_cursors(&mut self) {
        self.waiting = 0;
        self.write = 0;
        self.read = (self.length - 1) * self.item_size;
        self.rx_lock = QUEUE_UNLOCKED;
        self.tx_lock = QUEUE_UNLOCKED;
    }

    fn is_full(&self) -> bool {
        self.waiting == self.length
    }

    fn is_semaphore(&self) -> bool {
        matches!(
            self.kind,
            QueueKind::BinarySemaphore | QueueKind::CountingSemaphore
        )
    }
}

pub(crate) fn finish<T>(result: nb::Result<T, KernelError>) -> KernelResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(nb::Error::Other(err)) => Err(err),
        // A zero-tick call never parks the caller.
        Err(nb::Error::WouldBlock) => Err(KernelError::Timeout),
    }
}

/// Item count as carried by trace records, saturating at `u16::MAX`.
fn trace_count(waiting: usize) -> u16 {
    u16::try_from(waiting).unwrap_or(u16::MAX)
}

impl<'a, P: Port> Kernel<'a, P> {
    pub(crate) fn queue_index_any(&self, handle: QueueHandle) -> KernelResult<usize> {
        resolve(&self.queues, handle.raw())
    }

    pub(crate) fn queue_index_of(
        &self,
        handle: QueueHandle,
        accept: impl Fn(QueueKind) -> bool,
    ) -> KernelResult<usize> {
        let q = resolve(&self.queues, handle.raw())?;
        if accept(self.queues[q].value.kind) {
            Ok(q)
        } else {
            Err(KernelError::InvalidHandle)
        }
    }

    fn data_queue_index(&self, handle: QueueHandle) -> KernelResult<usize> {
        self.queue_index_of(handle, |kind| kind == QueueKind::Queue)
    }

    fn semaphore_index(&self, handle: SemaphoreHandle) -> KernelResult<usize> {
        self.queue_index_of(handle, |kind| {
            matches!(
                kind,
                QueueKind::BinarySemaphore | QueueKind::CountingSemaphore
            )
        })
    }

    /// Creates a queue of `length` items of `item_size` bytes in `storage`.
    pub fn queue_create(
        &mut self,
        storage: &'a mut [u8],
        length: usize,
        item_size: usize,
    ) -> KernelResult<QueueHandle> {
        if length == 0 || item_size == 0 {
            return Err(KernelError::InvalidParameters);
        }
        if storage.is_empty() {
            return Err(KernelError::NullArgument);
        }
        match length.checked_mul(item_size) {
            Some(bytes) if bytes == storage.len() => {}
            _ => return Err(KernelError::AlignmentOrSizeMismatch),
        }
        self.queue_create_generic(storage, length, item_size, QueueKind::Queue)
    }

    pub(crate) fn queue_create_generic(
        &mut self,
        storage: &'a mut [u8],
        length: usize,
        item_size: usize,
        kind: QueueKind,
    ) -> KernelResult<QueueHandle> {
        let q = vacant_slot(&self.queues).ok_or(KernelError::CapacityExhausted)?;
        let mut queue = Queue {
            storage,
            item_size,
            length,
            kind,
            ..Queue::vacant()
        };
        queue.reset_cursors();

        self.lists.init_list(layout::waiting_to_send(q));
        self.lists.init_list(layout::waiting_to_receive(q));
        let generation = self.queues[q].occupy(queue);
        let handle = QueueHandle::from_raw(RawHandle::new(q as u16, generation));
        trace!("queue {} created: {} x {} bytes", handle, length, item_size);
        self.emit(TraceEvent::QueueCreate { queue: handle });
        Ok(handle)
    }

    /// Empties a queue. One blocked sender, if any, is woken.
    pub fn queue_reset(&mut self, handle: QueueHandle) -> KernelResult<()> {
        let q = self.queue_index_any(handle)?;
        if self.queues[q].value.kind == QueueKind::Mutex {
            return Err(KernelError::InvalidOperation);
        }
        self.critical(|k| {
            k.queues[q].value.reset_cursors();
            let senders = layout::waiting_to_send(q);
            if !k.lists.is_empty(senders) && k.remove_from_event_list(senders) {
                k.yield_if_preempting();
            }
            if k.queue_readiness_changed(q) {
                k.yield_if_preempting();
            }
        });
        Ok(())
    }

    /// Deletes a queue, semaphore or mutex.
    ///
    /// Refused while tasks are blocked on it or while a mutex is held.
    pub fn queue_delete(&mut self, handle: QueueHandle) -> KernelResult<()> {
        let q = self.queue_index_any(handle)?;
        if Some(q) == self.timer_service.queue {
            return Err(KernelError::InvalidOperation);
        }
        self.critical(|k| {
            let queue = &k.queues[q].value;
            if queue.holder.is_some()
                || !k.lists.is_empty(layout::waiting_to_send(q))
                || !k.lists.is_empty(layout::waiting_to_receive(q))
            {
                return Err(KernelError::InvalidOperation);
            }
            if let Some(link) = queue.watcher {
                k.poll_detach_slot(link);
            }
            k.queues[q].release();
            k.queues[q].value = Queue::vacant();
            Ok(())
        })?;
        self.emit(TraceEvent::QueueDelete { queue: handle });
        Ok(())
    }

    /// Number of items in a queue, or the count of a semaphore.
    pub fn messages_waiting(&self, handle: QueueHandle) -> KernelResult<usize> {
        let q = self.queue_index_any(handle)?;
        Ok(self.critical_read(|k| k.queues[q].value.waiting))
    }

    /// Free item slots.
    pub fn spaces_available(&self, handle: QueueHandle) -> KernelResult<usize> {
        let q = self.queue_index_any(handle)?;
        Ok(self.critical_read(|k| {
            let queue = &k.queues[q].value;
            queue.length - queue.waiting
        }))
    }

    pub fn queue_is_full_from_isr(&self, handle: QueueHandle) -> KernelResult<bool> {
        let q = self.queue_index_any(handle)?;
        Ok(self.queues[q].value.is_full())
    }

    pub fn queue_is_empty_from_isr(&self, handle: QueueHandle) -> KernelResult<bool> {
        let q = self.queue_index_any(handle)?;
        Ok(self.queues[q].value.waiting == 0)
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Sends `item`, waiting up to `ticks` for space.
    ///
    /// `item` must be exactly one item long. `WouldBlock` means the running
    /// task now waits for space; call again once it runs.
    pub fn queue_send(
        &mut self,
        handle: QueueHandle,
        item: &[u8],
        ticks: TickType,
        position: SendPosition,
    ) -> nb::Result<(), KernelError> {
        let q = self.data_queue_index(handle)?;
        self.check_item(q, item, false)?;
        if position == SendPosition::Overwrite && self.queues[q].value.length != 1 {
            return Err(nb::Error::Other(KernelError::InvalidParameters));
        }
        self.queue_generic_send(q, handle.raw(), item, ticks, position)
    }

    /// Interrupt-safe send. Returns `true` when a task that outranks the
    /// interrupted one was woken.
    pub fn queue_send_from_isr(
        &mut self,
        handle: QueueHandle,
        item: &[u8],
        position: SendPosition,
    ) -> KernelResult<bool> {
        let q = self.data_queue_index(handle)?;
        self.check_item(q, item, false)?;
        if position == SendPosition::Overwrite && self.queues[q].value.length != 1 {
            return Err(KernelError::InvalidParameters);
        }
        self.queue_send_from_isr_inner(q, item, position)
    }

    fn check_item(&self, q: usize, item: &[u8], write: bool) -> KernelResult<()> {
        if item.len() != self.queues[q].value.item_size {
            return Err(KernelError::AlignmentOrSizeMismatch);
        }
        if !item.is_empty() && !self.port.check_access(item, write) {
            return Err(KernelError::DataCopyFailure);
        }
        Ok(())
    }

    pub(crate) fn queue_generic_send(
        &mut self,
        q: usize,
        raw: RawHandle,
        item: &[u8],
        ticks: TickType,
        position: SendPosition,
    ) -> nb::Result<(), KernelError> {
        let key = WaitKey::Send(raw);
        let mut wait = self.take_wait(key);
        let ticks = self.effective_wait(ticks);
        if wait.is_none() {
            self.check_can_block(ticks)?;
        }

        loop {
            let sent = self.critical(|k| {
                let queue = &k.queues[q].value;
                if queue.waiting >= queue.length && position != SendPosition::Overwrite {
                    return false;
                }
                let mut yield_required = k.copy_to_queue(q, item, position);
                if k.queue_readiness_changed(q) {
                    yield_required = true;
                }
                let receivers = layout::waiting_to_receive(q);
                if !k.lists.is_empty(receivers) && k.remove_from_event_list(receivers) {
                    yield_required = true;
                }
                if yield_required {
                    k.yield_if_preempting();
                }
                true
            });
            if sent {
                let waiting = trace_count(self.queues[q].value.waiting);
                let queue = QueueHandle::from_raw(raw);
                self.emit(TraceEvent::QueueSend { queue, waiting });
                return Ok(());
            }

            if wait.is_none() && ticks == 0 {
                return Err(nb::Error::Other(KernelError::QueueFull));
            }
            let mut state = match wait {
                Some(state) => state,
                None => self.new_wait(key, ticks),
            };

            self.suspend_all();
            self.lock_queue(q);
            if self.check_for_timeout(&mut state) {
                self.unlock_queue(q);
                self.resume_all();
                return Err(nb::Error::Other(KernelError::QueueFull));
            }
            if self.queues[q].value.is_full() {
                self.place_on_event_list(layout::waiting_to_send(q), state.remaining);
                self.emit(TraceEvent::QueueBlockOnSend {
                    queue: QueueHandle::from_raw(raw),
                });
                self.unlock_queue(q);
                if !self.resume_all() {
                    self.yield_within_api();
                }
                self.store_wait(state);
                return Err(nb::Error::WouldBlock);
            }
            // Space appeared while we prepared to block; try again.
            self.unlock_queue(q);
            self.resume_all();
            wait = Some(state);
        }
    }

    pub(crate) fn queue_send_from_isr_inner(
        &mut self,
        q: usize,
        item: &[u8],
        position: SendPosition,
    ) -> KernelResult<bool> {
        self.critical(|k| {
            let queue = &k.queues[q].value;
            if queue.waiting >= queue.length && position != SendPosition::Overwrite {
                return Err(KernelError::QueueFull);
            }
            let tx_lock = queue.tx_lock;
            k.copy_to_queue(q, item, position);
            let mut woken = k.queue_readiness_changed(q);

            if tx_lock == QUEUE_UNLOCKED {
                let receivers = layout::waiting_to_receive(q);
                if !k.lists.is_empty(receivers) && k.remove_from_event_list(receivers) {
                    woken = true;
                }
            } else {
                k.queues[q].value.tx_lock = tx_lock.saturating_add(1);
            }
            Ok(woken)
        })
    }

    /// Copies `item` in and bumps the occupancy. For a mutex this is the
    /// release; returns `true` if the holder's priority dropped.
    fn copy_to_queue(&mut self, q: usize, item: &[u8], position: SendPosition) -> bool {
        let mut yield_required = false;
        let queue = &mut self.queues[q].value;
        let size = queue.item_size;
        let mut waiting = queue.waiting;

        if size == 0 {
            if queue.kind == QueueKind::Mutex {
                queue.recursion = 0;
                if let Some(holder) = queue.holder.take() {
                    yield_required = self.mutex_released_by(holder, q);
                }
            }
        } else if position == SendPosition::Back {
            let at = queue.write;
            queue.storage[at..at + size].copy_from_slice(item);
            queue.write += size;
            if queue.write >= queue.length * size {
                queue.write = 0;
            }
        } else {
            let at = queue.read;
            queue.storage[at..at + size].copy_from_slice(item);
            queue.read = if at == 0 {
                (queue.length - 1) * size
            } else {
                at - size
            };
            if position == SendPosition::Overwrite && waiting > 0 {
                waiting -= 1;
            }
        }

        self.queues[q].value.waiting = waiting + 1;
        yield_required
    }

    // ------------------------------------------------------------------
    // Receive and peek
    // ------------------------------------------------------------------

    /// Receives the oldest item into `out`, waiting up to `ticks`.
    pub fn queue_receive(
        &mut self,
        handle: QueueHandle,
        out: &mut [u8],
        ticks: TickType,
    ) -> nb::Result<(), KernelError> {
        let q = self.data_queue_index(handle)?;
        self.check_item(q, out, true)?;
        self.queue_generic_receive(q, handle.raw(), out, ticks, false)
    }

    /// Copies the oldest item into `out` without removing it.
    pub fn queue_peek(
        &mut self,
        handle: QueueHandle,
        out: &mut [u8],
        ticks: TickType,
    ) -> nb::Result<(), KernelError> {
        let q = self.data_queue_index(handle)?;
        self.check_item(q, out, true)?;
        self.queue_generic_receive(q, handle.raw(), out, ticks, true)
    }

    pub(crate) fn queue_generic_receive(
        &mut self,
        q: usize,
        raw: RawHandle,
        out: &mut [u8],
        ticks: TickType,
        peek: bool,
    ) -> nb::Result<(), KernelError> {
        let key = if peek {
            WaitKey::Peek(raw)
        } else {
            WaitKey::Receive(raw)
        };
        let mut wait = self.take_wait(key);
        let ticks = self.effective_wait(ticks);
        if wait.is_none() {
            self.check_can_block(ticks)?;
        }

        loop {
            let received = self.critical(|k| {
                if k.queues[q].value.waiting == 0 {
                    return false;
                }
                if peek {
                    let read = k.queues[q].value.read;
                    k.copy_from_queue(q, out);
                    k.queues[q].value.read = read;
                    // The item is still there for the next reader.
                    let receivers = layout::waiting_to_receive(q);
                    if !k.lists.is_empty(receivers) && k.remove_from_event_list(receivers) {
                        k.yield_if_preempting();
                    }
                } else {
                    k.copy_from_queue(q, out);
                    k.queues[q].value.waiting -= 1;
                    let mut yield_required = k.queue_readiness_changed(q);
                    let senders = layout::waiting_to_send(q);
                    if !k.lists.is_empty(senders) && k.remove_from_event_list(senders) {
                        yield_required = true;
                    }
                    if yield_required {
                        k.yield_if_preempting();
                    }
                }
                true
            });
            if received {
                if !peek {
                    let waiting = trace_count(self.queues[q].value.waiting);
                    let queue = QueueHandle::from_raw(raw);
                    self.emit(TraceEvent::QueueReceive { queue, waiting });
                }
                return Ok(());
            }

            if wait.is_none() && ticks == 0 {
                return Err(nb::Error::Other(KernelError::QueueEmpty));
            }
            let mut state = match wait {
                Some(state) => state,
                None => self.new_wait(key, ticks),
            };

            self.suspend_all();
            self.lock_queue(q);
            if !self.check_for_timeout(&mut state) {
                if self.queues[q].value.waiting == 0 {
                    self.place_on_event_list(layout::waiting_to_receive(q), state.remaining);
                    self.emit(TraceEvent::QueueBlockOnReceive {
                        queue: QueueHandle::from_raw(raw),
                    });
                    self.unlock_queue(q);
                    if !self.resume_all() {
                        self.yield_within_api();
                    }
                    self.store_wait(state);
                    return Err(nb::Error::WouldBlock);
                }
                self.unlock_queue(q);
                self.resume_all();
            } else {
                self.unlock_queue(q);
                self.resume_all();
                if self.queues[q].value.waiting == 0 {
                    return Err(nb::Error::Other(KernelError::QueueEmpty));
                }
            }
            wait = Some(state);
        }
    }

    /// Interrupt-safe receive. Returns `true` when a task that outranks the
    /// interrupted one was woken.
    pub fn queue_receive_from_isr(
        &mut self,
        handle: QueueHandle,
        out: &mut [u8],
    ) -> KernelResult<bool> {
        let q = self.data_queue_index(handle)?;
        self.check_item(q, out, true)?;
        self.queue_receive_from_isr_inner(q, out)
    }

    /// Interrupt-safe peek.
    pub fn queue_peek_from_isr(&mut self, handle: QueueHandle, out: &mut [u8]) -> KernelResult<()> {
        let q = self.data_queue_index(handle)?;
        self.check_item(q, out, true)?;
        self.critical(|k| {
            if k.queues[q].value.waiting == 0 {
                return Err(KernelError::QueueEmpty);
            }
            let read = k.queues[q].value.read;
            k.copy_from_queue(q, out);
            k.queues[q].value.read = read;
            Ok(())
        })
    }

    fn queue_receive_from_isr_inner(&mut self, q: usize, out: &mut [u8]) -> KernelResult<bool> {
        self.critical(|k| {
            if k.queues[q].value.waiting == 0 {
                return Err(KernelError::QueueEmpty);
            }
            let rx_lock = k.queues[q].value.rx_lock;
            k.copy_from_queue(q, out);
            k.queues[q].value.waiting -= 1;
            let mut woken = k.queue_readiness_changed(q);

            if rx_lock == QUEUE_UNLOCKED {
                let senders = layout::waiting_to_send(q);
                if !k.lists.is_empty(senders) && k.remove_from_event_list(senders) {
                    woken = true;
                }
            } else {
                k.queues[q].value.rx_lock = rx_lock.saturating_add(1);
            }
            Ok(woken)
        })
    }

    fn copy_from_queue(&mut self, q: usize, out: &mut [u8]) {
        let queue = &mut self.queues[q].value;
        let size = queue.item_size;
        if size == 0 {
            return;
        }
        queue.read += size;
        if queue.read >= queue.length * size {
            queue.read = 0;
        }
        let at = queue.read;
        out.copy_from_slice(&queue.storage[at..at + size]);
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    pub(crate) fn lock_queue(&mut self, q: usize) {
        self.critical(|k| {
            let queue = &mut k.queues[q].value;
            if queue.rx_lock == QUEUE_UNLOCKED {
                queue.rx_lock = LOCKED_UNMODIFIED;
            }
            if queue.tx_lock == QUEUE_UNLOCKED {
                queue.tx_lock = LOCKED_UNMODIFIED;
            }
        });
    }

    /// Replays the wakeups interrupts deferred while the queue was locked.
    pub(crate) fn unlock_queue(&mut self, q: usize) {
        self.critical(|k| {
            let mut tx_lock = k.queues[q].value.tx_lock;
            let receivers = layout::waiting_to_receive(q);
            while tx_lock > LOCKED_UNMODIFIED {
                if k.lists.is_empty(receivers) {
                    break;
                }
                if k.remove_from_event_list(receivers) {
                    k.yield_pending = true;
                }
                tx_lock -= 1;
            }
            k.queues[q].value.tx_lock = QUEUE_UNLOCKED;

            let mut rx_lock = k.queues[q].value.rx_lock;
            let senders = layout::waiting_to_send(q);
            while rx_lock > LOCKED_UNMODIFIED {
                if k.lists.is_empty(senders) {
                    break;
                }
                if k.remove_from_event_list(senders) {
                    k.yield_pending = true;
                }
                rx_lock -= 1;
            }
            k.queues[q].value.rx_lock = QUEUE_UNLOCKED;
        });
    }

    /// Lets a registered poll object know the queue's readiness changed.
    pub(crate) fn queue_readiness_changed(&mut self, q: usize) -> bool {
        let Some(link) = self.queues[q].value.watcher else {
            return false;
        };
        let events = self.queue_events(q);
        self.poll_update(link, events)
    }

    pub(crate) fn queue_events(&self, q: usize) -> u32 {
        let queue = &self.queues[q].value;
        let mut events = 0;
        if queue.waiting > 0 {
            events |= QUEUE_READABLE;
        }
        if queue.waiting < queue.length {
            events |= QUEUE_WRITABLE;
        }
        events
    }

    // ------------------------------------------------------------------
    // Semaphores
    // ------------------------------------------------------------------

    /// Creates a binary semaphore, initially empty.
    pub fn semaphore_create_binary(&mut self) -> KernelResult<SemaphoreHandle> {
        self.queue_create_generic(Default::default(), 1, 0, QueueKind::BinarySemaphore)
    }

    /// Creates a counting semaphore.
    pub fn semaphore_create_counting(
        &mut self,
        max_count: usize,
        initial_count: usize,
    ) -> KernelResult<SemaphoreHandle> {
        if max_count == 0 || initial_count > max_count {
            return Err(KernelError::InvalidParameters);
        }
        let handle = self.queue_create_generic(
            Default::default(),
            max_count,
            0,
            QueueKind::CountingSemaphore,
        )?;
        self.queues[handle.index()].value.waiting = initial_count;
        Ok(handle)
    }

    /// Gives a semaphore. Fails with `QueueFull` at the maximum count.
    pub fn semaphore_give(&mut self, handle: SemaphoreHandle) -> KernelResult<()> {
        let q = self.semaphore_index(handle)?;
        finish(self.queue_generic_send(q, handle.raw(), &[], 0, SendPosition::Back))
    }

    pub fn semaphore_give_from_isr(&mut self, handle: SemaphoreHandle) -> KernelResult<bool> {
        let q = self.semaphore_index(handle)?;
        self.queue_send_from_isr_inner(q, &[], SendPosition::Back)
    }

    /// Takes a semaphore, waiting up to `ticks`.
    pub fn semaphore_take(
        &mut self,
        handle: SemaphoreHandle,
        ticks: TickType,
    ) -> nb::Result<(), KernelError> {
        let q = self.semaphore_index(handle)?;
        self.semaphore_take_inner(q, handle.raw(), ticks)
    }

    pub fn semaphore_take_from_isr(&mut self, handle: SemaphoreHandle) -> KernelResult<bool> {
        let q = self.semaphore_index(handle)?;
        self.queue_receive_from_isr_inner(q, &mut [])
            .map_err(|_| KernelError::Timeout)
    }

    /// Current count of a semaphore.
    pub fn semaphore_count(&self, handle: SemaphoreHandle) -> KernelResult<usize> {
        let q = self.semaphore_index(handle)?;
        Ok(self.queues[q].value.waiting)
    }

    /// Take path shared by semaphores and mutexes. Mutex takes apply
    /// priority inheritance while they wait.
    pub(crate) fn semaphore_take_inner(
        &mut self,
        q: usize,
        raw: RawHandle,
        ticks: TickType,
    ) -> nb::Result<(), KernelError> {
        let key = WaitKey::Take(raw);
        let mut wait = self.take_wait(key);
        let ticks = self.effective_wait(ticks);
        if wait.is_none() {
            self.check_can_block(ticks)?;
        }
        let is_mutex = self.queues[q].value.kind == QueueKind::Mutex;

        loop {
            let taken = self.critical(|k| {
                if k.queues[q].value.waiting == 0 {
                    return false;
                }
                k.queues[q].value.waiting -= 1;
                if is_mutex {
                    k.mutex_acquired(q);
                }
                let mut yield_required = k.queue_readiness_changed(q);
                let senders = layout::waiting_to_send(q);
                if !k.lists.is_empty(senders) && k.remove_from_event_list(senders) {
                    yield_required = true;
                }
                if yield_required {
                    k.yield_if_preempting();
                }
                true
            });
            if taken {
                return Ok(());
            }

            if wait.is_none() && ticks == 0 {
                return Err(nb::Error::Other(KernelError::Timeout));
            }
            let mut state = match wait {
                Some(state) => state,
                None => self.new_wait(key, ticks),
            };

            self.suspend_all();
            self.lock_queue(q);
            if !self.check_for_timeout(&mut state) {
                if self.queues[q].value.waiting == 0 {
                    if is_mutex {
                        let inherited = self.critical(|k| k.priority_inherit(q));
                        state.inherited |= inherited;
                    }
                    self.place_on_event_list(layout::waiting_to_receive(q), state.remaining);
                    self.emit(TraceEvent::QueueBlockOnReceive {
                        queue: QueueHandle::from_raw(raw),
                    });
                    self.unlock_queue(q);
                    if !self.resume_all() {
                        self.yield_within_api();
                    }
                    self.store_wait(state);
                    return Err(nb::Error::WouldBlock);
                }
                self.unlock_queue(q);
                self.resume_all();
            } else {
                self.unlock_queue(q);
                self.resume_all();
                if self.queues[q].value.waiting == 0 {
                    if state.inherited {
                        self.critical(|k| k.mutex_waiter_timed_out(q));
                    }
                    return Err(nb::Error::Other(KernelError::Timeout));
                }
            }
            wait = Some(state);
        }
    }

    /// Whether a queue slot is used as a semaphore.
    pub fn is_semaphore(&self, handle: QueueHandle) -> KernelResult<bool> {
        let q = self.queue_index_any(handle)?;
        Ok(self.queues[q].value.is_semaphore())
    }
}
