use rtk_core::{KernelError, MAX_DELAY};

use super::*;
use crate::queue::SendPosition;
use crate::task::TaskState;

/// Starts a low and a high priority task; the high one is left running.
fn low_and_high<'a>(k: &mut TestKernel<'a>, stacks: &mut Stacks<'a>) -> (TaskHandle, TaskHandle) {
    let low = spawn(k, stacks, "low", 1);
    let high = spawn(k, stacks, "high", 3);
    start(k);
    (low, high)
}

#[test]
fn create_validates_geometry() {
    let mut short = [0u8; 8];
    let mut mem = Memory::new();
    let (mut k, _stacks) = boot(&mut mem, config());

    assert_eq!(k.queue_create(&mut [], 0, 4), Err(KernelError::InvalidParameters));
    assert_eq!(k.queue_create(&mut [], 1, 4), Err(KernelError::NullArgument));
    assert_eq!(
        k.queue_create(&mut short, 3, 4),
        Err(KernelError::AlignmentOrSizeMismatch)
    );
}

#[test]
fn front_and_back_match_on_empty_single_slot_queue() {
    let mut front_storage = [0u8; 4];
    let mut back_storage = [0u8; 4];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);

    let front = k.queue_create(&mut front_storage, 1, 4).unwrap();
    let back = k.queue_create(&mut back_storage, 1, 4).unwrap();
    let item = [1, 2, 3, 4];
    k.queue_send(front, &item, 0, SendPosition::Front).unwrap();
    k.queue_send(back, &item, 0, SendPosition::Back).unwrap();

    for q in [front, back] {
        assert_eq!(k.messages_waiting(q), Ok(1));
        assert_eq!(k.spaces_available(q), Ok(0));
        assert_eq!(k.queue_is_full_from_isr(q), Ok(true));
        let mut out = [0u8; 4];
        k.queue_peek(q, &mut out, 0).unwrap();
        assert_eq!(out, item);
        assert_eq!(
            k.queue_send(q, &item, 0, SendPosition::Back),
            Err(nb::Error::Other(KernelError::QueueFull))
        );
    }
}

#[test]
fn items_come_out_in_order() {
    let mut storage = [0u8; 3];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);

    let q = k.queue_create(&mut storage, 3, 1).unwrap();
    k.queue_send(q, &[1], 0, SendPosition::Back).unwrap();
    k.queue_send(q, &[2], 0, SendPosition::Back).unwrap();
    k.queue_send(q, &[0], 0, SendPosition::Front).unwrap();

    let mut received = Vec::new();
    let mut out = [0u8; 1];
    while k.queue_receive(q, &mut out, 0).is_ok() {
        received.push(out[0]);
    }
    assert_eq!(received, vec![0, 1, 2]);
    assert_eq!(
        k.queue_receive(q, &mut out, 0),
        Err(nb::Error::Other(KernelError::QueueEmpty))
    );
    assert_eq!(k.queue_is_empty_from_isr(q), Ok(true));
}

#[test]
fn receiver_blocks_until_item_arrives() {
    let mut storage = [0u8; 2];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let (low, high) = low_and_high(&mut k, &mut stacks);
    let q = k.queue_create(&mut storage, 2, 1).unwrap();

    let mut out = [0u8; 1];
    assert_eq!(k.queue_receive(q, &mut out, 10), Err(nb::Error::WouldBlock));
    settle(&mut k);
    assert_eq!(running(&k), low);
    assert_eq!(k.task_state(high), TaskState::Blocked);

    k.queue_send(q, &[7], 0, SendPosition::Back).unwrap();
    settle(&mut k);
    assert_eq!(running(&k), high);
    k.queue_receive(q, &mut out, 10).unwrap();
    assert_eq!(out, [7]);
    assert_eq!(k.messages_waiting(q), Ok(0));
}

#[test]
fn receive_times_out_after_wait() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let (low, high) = low_and_high(&mut k, &mut stacks);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();

    let mut out = [0u8; 1];
    assert_eq!(k.queue_receive(q, &mut out, 5), Err(nb::Error::WouldBlock));
    settle(&mut k);
    advance(&mut k, 4);
    assert_eq!(running(&k), low);
    advance(&mut k, 1);
    assert_eq!(running(&k), high);
    assert_eq!(
        k.queue_receive(q, &mut out, 5),
        Err(nb::Error::Other(KernelError::QueueEmpty))
    );
}

#[test]
fn other_calls_keep_the_pending_wait() {
    let mut storage = [0u8; 1];
    let mut other_storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let (_low, high) = low_and_high(&mut k, &mut stacks);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();
    let other = k.queue_create(&mut other_storage, 1, 1).unwrap();

    let mut out = [0u8; 1];
    assert_eq!(k.queue_receive(q, &mut out, 5), Err(nb::Error::WouldBlock));
    settle(&mut k);
    advance(&mut k, 5);
    assert_eq!(running(&k), high);

    // A non-blocking call in between does not restart the receive's wait.
    k.queue_send(other, &[1], 0, SendPosition::Back).unwrap();
    assert_eq!(
        k.queue_receive(q, &mut out, 5),
        Err(nb::Error::Other(KernelError::QueueEmpty))
    );
    assert_eq!(k.queue_receive(other, &mut out, 0), Ok(()));
    assert_eq!(out, [1]);
}

#[test]
fn sender_blocks_while_full() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let (low, high) = low_and_high(&mut k, &mut stacks);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();

    k.queue_send(q, &[1], 0, SendPosition::Back).unwrap();
    assert_eq!(
        k.queue_send(q, &[2], 10, SendPosition::Back),
        Err(nb::Error::WouldBlock)
    );
    settle(&mut k);
    assert_eq!(running(&k), low);

    let mut out = [0u8; 1];
    k.queue_receive(q, &mut out, 0).unwrap();
    assert_eq!(out, [1]);
    settle(&mut k);
    assert_eq!(running(&k), high);
    k.queue_send(q, &[2], 10, SendPosition::Back).unwrap();
    assert_eq!(k.messages_waiting(q), Ok(1));
}

#[test]
fn waiters_are_served_by_priority() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let producer = spawn(&mut k, &mut stacks, "producer", 1);
    let mid = spawn(&mut k, &mut stacks, "mid", 2);
    let high = spawn(&mut k, &mut stacks, "high", 3);
    start(&mut k);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();

    let mut out = [0u8; 1];
    assert_eq!(k.queue_receive(q, &mut out, MAX_DELAY), Err(nb::Error::WouldBlock));
    settle(&mut k);
    assert_eq!(running(&k), mid);
    assert_eq!(k.queue_receive(q, &mut out, MAX_DELAY), Err(nb::Error::WouldBlock));
    settle(&mut k);
    assert_eq!(running(&k), producer);

    k.queue_send(q, &[1], 0, SendPosition::Back).unwrap();
    settle(&mut k);
    assert_eq!(running(&k), high);
    assert_eq!(k.task_state(mid), TaskState::Blocked);
}

#[test]
fn isr_send_wakes_receiver() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let (low, high) = low_and_high(&mut k, &mut stacks);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();

    let mut out = [0u8; 1];
    assert_eq!(k.queue_receive(q, &mut out, MAX_DELAY), Err(nb::Error::WouldBlock));
    settle(&mut k);
    assert_eq!(running(&k), low);

    assert_eq!(k.queue_send_from_isr(q, &[9], SendPosition::Back), Ok(true));
    assert_eq!(
        k.queue_send_from_isr(q, &[9], SendPosition::Back),
        Err(KernelError::QueueFull)
    );
    k.port_mut().request_yield();
    settle(&mut k);
    assert_eq!(running(&k), high);
    k.queue_receive(q, &mut out, MAX_DELAY).unwrap();
    assert_eq!(out, [9]);
    assert_eq!(k.queue_receive_from_isr(q, &mut out), Err(KernelError::QueueEmpty));
}

#[test]
fn isr_receive_frees_space() {
    let mut storage = [0u8; 2];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);
    let q = k.queue_create(&mut storage, 2, 1).unwrap();

    k.queue_send_from_isr(q, &[4], SendPosition::Back).unwrap();
    k.queue_send_from_isr(q, &[5], SendPosition::Back).unwrap();
    let mut out = [0u8; 1];
    k.queue_peek_from_isr(q, &mut out).unwrap();
    assert_eq!(out, [4]);
    assert_eq!(k.queue_receive_from_isr(q, &mut out), Ok(false));
    assert_eq!(out, [4]);
    assert_eq!(k.spaces_available(q), Ok(1));
}

#[test]
fn overwrite_replaces_single_item() {
    let mut storage = [0u8; 2];
    let mut long_storage = [0u8; 6];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);
    let q = k.queue_create(&mut storage, 1, 2).unwrap();
    let long = k.queue_create(&mut long_storage, 3, 2).unwrap();

    k.queue_send(q, &[1, 1], 0, SendPosition::Overwrite).unwrap();
    k.queue_send(q, &[2, 2], 0, SendPosition::Overwrite).unwrap();
    assert_eq!(k.messages_waiting(q), Ok(1));
    let mut out = [0u8; 2];
    k.queue_receive(q, &mut out, 0).unwrap();
    assert_eq!(out, [2, 2]);

    assert_eq!(
        k.queue_send(long, &[1, 1], 0, SendPosition::Overwrite),
        Err(nb::Error::Other(KernelError::InvalidParameters))
    );
}

#[test]
fn peek_leaves_item_in_place() {
    let mut storage = [0u8; 2];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);
    let q = k.queue_create(&mut storage, 2, 1).unwrap();

    k.queue_send(q, &[3], 0, SendPosition::Back).unwrap();
    k.queue_send(q, &[4], 0, SendPosition::Back).unwrap();
    let mut out = [0u8; 1];
    k.queue_peek(q, &mut out, 0).unwrap();
    k.queue_peek(q, &mut out, 0).unwrap();
    assert_eq!(out, [3]);
    assert_eq!(k.messages_waiting(q), Ok(2));
    k.queue_receive(q, &mut out, 0).unwrap();
    assert_eq!(out, [3]);
}

#[test]
fn reset_empties_and_wakes_a_sender() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let (low, high) = low_and_high(&mut k, &mut stacks);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();

    k.queue_send(q, &[1], 0, SendPosition::Back).unwrap();
    assert_eq!(
        k.queue_send(q, &[2], MAX_DELAY, SendPosition::Back),
        Err(nb::Error::WouldBlock)
    );
    settle(&mut k);
    assert_eq!(running(&k), low);

    k.queue_reset(q).unwrap();
    assert_eq!(k.messages_waiting(q), Ok(0));
    settle(&mut k);
    assert_eq!(running(&k), high);
    k.queue_send(q, &[2], MAX_DELAY, SendPosition::Back).unwrap();
    let mut out = [0u8; 1];
    k.queue_receive(q, &mut out, 0).unwrap();
    assert_eq!(out, [2]);
}

#[test]
fn delete_refused_while_tasks_wait() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let (low, high) = low_and_high(&mut k, &mut stacks);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();

    let mut out = [0u8; 1];
    assert_eq!(k.queue_receive(q, &mut out, MAX_DELAY), Err(nb::Error::WouldBlock));
    settle(&mut k);
    assert_eq!(running(&k), low);
    assert_eq!(k.queue_delete(q), Err(KernelError::InvalidOperation));

    k.task_delete(Some(high)).unwrap();
    k.queue_delete(q).unwrap();
    assert_eq!(k.messages_waiting(q), Err(KernelError::InvalidHandle));
    assert_eq!(
        k.queue_send(q, &[1], 0, SendPosition::Back),
        Err(nb::Error::Other(KernelError::InvalidHandle))
    );
}

#[test]
fn item_size_must_match() {
    let mut storage = [0u8; 4];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);
    let q = k.queue_create(&mut storage, 1, 4).unwrap();

    assert_eq!(
        k.queue_send(q, &[1, 2], 0, SendPosition::Back),
        Err(nb::Error::Other(KernelError::AlignmentOrSizeMismatch))
    );
    let mut out = [0u8; 8];
    assert_eq!(
        k.queue_receive(q, &mut out, 0),
        Err(nb::Error::Other(KernelError::AlignmentOrSizeMismatch))
    );
}

#[test]
fn refused_copy_reports_data_copy_failure() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();

    k.port_mut().deny_access = true;
    assert_eq!(
        k.queue_send(q, &[1], 0, SendPosition::Back),
        Err(nb::Error::Other(KernelError::DataCopyFailure))
    );
    assert_eq!(k.messages_waiting(q), Ok(0));
}

#[test]
fn blocking_with_suspended_scheduler_is_rejected() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();

    let mut guard = k.suspend();
    let mut out = [0u8; 1];
    assert_eq!(
        guard.queue_receive(q, &mut out, 5),
        Err(nb::Error::Other(KernelError::SchedulerSuspended))
    );
    // A zero wait never blocks, so it is still allowed.
    assert_eq!(
        guard.queue_receive(q, &mut out, 0),
        Err(nb::Error::Other(KernelError::QueueEmpty))
    );
    guard.resume();
}

#[test]
fn nothing_blocks_before_the_scheduler_starts() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, _stacks) = boot(&mut mem, config());
    let q = k.queue_create(&mut storage, 1, 1).unwrap();

    let mut out = [0u8; 1];
    assert_eq!(
        k.queue_receive(q, &mut out, MAX_DELAY),
        Err(nb::Error::Other(KernelError::QueueEmpty))
    );
}

#[test]
fn binary_semaphore_counts_to_one() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);

    let sem = k.semaphore_create_binary().unwrap();
    assert!(k.is_semaphore(sem).unwrap());
    assert_eq!(k.semaphore_count(sem), Ok(0));
    assert_eq!(k.semaphore_take(sem, 0), Err(nb::Error::Other(KernelError::Timeout)));

    k.semaphore_give(sem).unwrap();
    assert_eq!(k.semaphore_give(sem), Err(KernelError::QueueFull));
    k.semaphore_take(sem, 0).unwrap();
    assert_eq!(k.semaphore_count(sem), Ok(0));
}

#[test]
fn counting_semaphore_bounds() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);

    assert_eq!(
        k.semaphore_create_counting(2, 3),
        Err(KernelError::InvalidParameters)
    );
    let sem = k.semaphore_create_counting(3, 1).unwrap();
    assert_eq!(k.semaphore_count(sem), Ok(1));
    k.semaphore_give_from_isr(sem).unwrap();
    k.semaphore_give(sem).unwrap();
    assert_eq!(k.semaphore_give_from_isr(sem), Err(KernelError::QueueFull));
    for _ in 0..3 {
        k.semaphore_take_from_isr(sem).unwrap();
    }
    assert_eq!(k.semaphore_take_from_isr(sem), Err(KernelError::Timeout));
}

#[test]
fn large_counts_saturate_in_trace() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);

    let sem = k.semaphore_create_counting(70_000, 69_999).unwrap();
    k.semaphore_give(sem).unwrap();
    assert_eq!(k.semaphore_count(sem), Ok(70_000));
    assert_eq!(
        k.port().events.last(),
        Some(&TraceEvent::QueueSend {
            queue: sem,
            waiting: u16::MAX,
        })
    );
}

#[test]
fn semaphore_give_wakes_taker() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let (low, high) = low_and_high(&mut k, &mut stacks);
    let sem = k.semaphore_create_binary().unwrap();

    assert_eq!(k.semaphore_take(sem, MAX_DELAY), Err(nb::Error::WouldBlock));
    settle(&mut k);
    assert_eq!(running(&k), low);
    k.semaphore_give(sem).unwrap();
    settle(&mut k);
    assert_eq!(running(&k), high);
    k.semaphore_take(sem, MAX_DELAY).unwrap();
    assert_eq!(k.semaphore_count(sem), Ok(0));
}

#[test]
fn handles_are_checked_against_kind() {
    let mut storage = [0u8; 1];
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    spawn(&mut k, &mut stacks, "task", 1);
    start(&mut k);
    let q = k.queue_create(&mut storage, 1, 1).unwrap();
    let sem = k.semaphore_create_binary().unwrap();

    assert_eq!(k.semaphore_give(q), Err(KernelError::InvalidHandle));
    assert_eq!(
        k.queue_send(sem, &[], 0, SendPosition::Back),
        Err(nb::Error::Other(KernelError::InvalidHandle))
    );
    assert!(!k.is_semaphore(q).unwrap());
}
