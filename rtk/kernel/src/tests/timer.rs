use rtk_core::{KernelConfig, KernelError, TimerHandle, MAX_DELAY};

use super::*;
use crate::timer::ServiceOutcome;

fn record(k: &mut TestKernel<'_>, timer: TimerHandle) {
    let now = k.tick_count();
    k.port_mut().fired.push((timer, now));
}

fn stop_self(k: &mut TestKernel<'_>, timer: TimerHandle) {
    record(k, timer);
    // Runs on the service task, so it must not wait for queue space.
    let _ = k.timer_stop(timer, 0);
}

fn single_task<'a>(k: &mut TestKernel<'a>, stacks: &mut Stacks<'a>) -> TaskHandle {
    let task = spawn(k, stacks, "task", 1);
    start(k);
    task
}

fn fired_at(k: &TestKernel<'_>) -> Vec<TickType> {
    k.port().fired.iter().map(|&(_, at)| at).collect()
}

#[test]
fn one_shot_fires_once() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let task = single_task(&mut k, &mut stacks);
    let timer = k.timer_create("once", 3, false, 0, record).unwrap();
    assert_eq!(k.timer_is_active(timer), Ok(false));

    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    assert_eq!(running(&k), task);
    assert_eq!(k.timer_is_active(timer), Ok(true));
    assert_eq!(k.timer_expiry_time(timer), Ok(3));

    advance(&mut k, 2);
    assert!(k.port().fired.is_empty());
    advance(&mut k, 1);
    assert_eq!(k.port().fired, vec![(timer, 3)]);
    assert_eq!(k.timer_is_active(timer), Ok(false));

    advance(&mut k, 10);
    assert_eq!(k.port().fired.len(), 1);
    assert_eq!(running(&k), task);
}

#[test]
fn periodic_timer_keeps_its_phase() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("tick", 5, true, 0, record).unwrap();

    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    advance(&mut k, 16);
    assert_eq!(fired_at(&k), vec![5, 10, 15]);
    assert_eq!(k.timer_is_active(timer), Ok(true));
    assert_eq!(k.timer_expiry_time(timer), Ok(20));
}

#[test]
fn missed_periods_fire_on_catch_up() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("tick", 5, true, 0, record).unwrap();
    k.timer_start(timer, 0).unwrap();
    settle(&mut k);

    k.suspend_all();
    advance(&mut k, 12);
    k.resume_all();
    settle(&mut k);

    // Expiries at 5 and 10 both run late; the phase is unchanged.
    assert_eq!(fired_at(&k), vec![12, 12]);
    assert_eq!(k.timer_expiry_time(timer), Ok(15));
    advance(&mut k, 3);
    assert_eq!(fired_at(&k), vec![12, 12, 15]);
}

/// Configuration that boots three ticks before the counter wraps.
fn near_wrap() -> KernelConfig {
    KernelConfig::builder()
        .timer_queue_length(TIMER_QUEUE_LEN)
        .initial_tick_count(MAX_DELAY - 2)
        .build()
}

#[test]
fn periodic_timer_crosses_tick_wraparound() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, near_wrap());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("wrap", 5, true, 0, record).unwrap();

    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    assert_eq!(k.timer_expiry_time(timer), Ok(2));

    advance(&mut k, 4);
    assert_eq!(k.tick_count(), 1);
    assert!(k.port().fired.is_empty());
    advance(&mut k, 6);
    assert_eq!(fired_at(&k), vec![2, 7]);
    assert_eq!(k.timer_expiry_time(timer), Ok(12));
}

#[test]
fn one_shot_expires_on_the_wrap() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, near_wrap());
    let task = single_task(&mut k, &mut stacks);
    let timer = k.timer_create("edge", 3, false, 0, record).unwrap();

    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    assert_eq!(k.timer_expiry_time(timer), Ok(0));

    advance(&mut k, 2);
    assert_eq!(k.tick_count(), MAX_DELAY);
    assert!(k.port().fired.is_empty());
    advance(&mut k, 1);
    assert_eq!(k.port().fired, vec![(timer, 0)]);
    assert_eq!(k.timer_is_active(timer), Ok(false));
    assert_eq!(running(&k), task);
}

#[test]
fn expiry_left_before_the_wrap_still_fires() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, near_wrap());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("late", 1, false, 0, record).unwrap();
    k.timer_start(timer, 0).unwrap();
    settle(&mut k);

    // The service only gets to run once the counter has already wrapped.
    k.suspend_all();
    advance(&mut k, 4);
    k.resume_all();
    settle(&mut k);

    assert_eq!(k.port().fired, vec![(timer, 1)]);
    assert_eq!(k.timer_is_active(timer), Ok(false));
}

#[test]
fn stop_and_restart() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("tick", 4, true, 0, record).unwrap();

    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    advance(&mut k, 2);
    k.timer_stop(timer, 0).unwrap();
    settle(&mut k);
    assert_eq!(k.timer_is_active(timer), Ok(false));
    advance(&mut k, 10);
    assert!(k.port().fired.is_empty());

    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    advance(&mut k, 4);
    assert_eq!(fired_at(&k), vec![16]);
}

#[test]
fn reset_pushes_expiry_back() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("watchdog", 5, false, 0, record).unwrap();

    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    advance(&mut k, 3);
    k.timer_reset(timer, 0).unwrap();
    settle(&mut k);
    assert_eq!(k.timer_expiry_time(timer), Ok(8));

    advance(&mut k, 4);
    assert!(k.port().fired.is_empty());
    advance(&mut k, 1);
    assert_eq!(fired_at(&k), vec![8]);
}

#[test]
fn change_period_restarts_active_timer_only() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let dormant = k.timer_create("dormant", 10, false, 0, record).unwrap();
    let active = k.timer_create("active", 10, false, 0, record).unwrap();

    k.timer_change_period(dormant, 3, 0).unwrap();
    settle(&mut k);
    assert_eq!(k.timer_period(dormant), Ok(3));
    assert_eq!(k.timer_is_active(dormant), Ok(false));

    k.timer_start(active, 0).unwrap();
    settle(&mut k);
    advance(&mut k, 2);
    k.timer_change_period(active, 4, 0).unwrap();
    settle(&mut k);
    advance(&mut k, 4);
    assert_eq!(k.port().fired, vec![(active, 6)]);
    assert_eq!(k.timer_is_active(dormant), Ok(false));
}

#[test]
fn delete_takes_effect_in_the_service() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("doomed", 2, true, 0, record).unwrap();

    k.timer_start(timer, 0).unwrap();
    k.timer_delete(timer, 0).unwrap();
    // Still there until the service gets to the command.
    assert_eq!(k.timer_period(timer), Ok(2));
    settle(&mut k);
    assert_eq!(k.timer_period(timer), Err(KernelError::InvalidHandle));
    assert_eq!(
        k.timer_start(timer, 0),
        Err(nb::Error::Other(KernelError::InvalidHandle))
    );
    advance(&mut k, 5);
    assert!(k.port().fired.is_empty());
}

#[test]
fn callback_can_stop_its_own_timer() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("twice", 3, true, 0, stop_self).unwrap();

    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    advance(&mut k, 12);
    assert_eq!(fired_at(&k), vec![3]);
    assert_eq!(k.timer_is_active(timer), Ok(false));
}

#[test]
fn isr_commands_wake_the_service() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let task = single_task(&mut k, &mut stacks);
    let timer = k.timer_create("isr", 2, false, 0, record).unwrap();

    assert_eq!(k.timer_start_from_isr(timer), Ok(true));
    k.port_mut().request_yield();
    settle(&mut k);
    assert_eq!(running(&k), task);
    assert_eq!(k.timer_is_active(timer), Ok(true));

    assert_eq!(k.timer_change_period_from_isr(timer, 0), Err(KernelError::InvalidParameters));
    assert_eq!(k.timer_change_period_from_isr(timer, 6), Ok(true));
    assert_eq!(k.timer_reset_from_isr(timer), Ok(false));
    k.port_mut().request_yield();
    settle(&mut k);
    assert_eq!(k.timer_period(timer), Ok(6));
    assert_eq!(k.timer_expiry_time(timer), Ok(6));

    assert_eq!(k.timer_stop_from_isr(timer), Ok(true));
    assert_eq!(k.timer_delete_from_isr(timer), Ok(false));
    k.port_mut().request_yield();
    settle(&mut k);
    assert_eq!(k.timer_is_active(timer), Err(KernelError::InvalidHandle));
    advance(&mut k, 8);
    assert!(k.port().fired.is_empty());
}

#[test]
fn callbacks_run_with_timer_privilege() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("priv", 1, false, 0, record).unwrap();
    k.timer_set_privilege(timer, 7).unwrap();

    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    advance(&mut k, 1);
    assert_eq!(k.port().fired.len(), 1);
    assert_eq!(k.port().privileges, vec![7, 0]);
}

#[test]
fn attributes() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);

    assert_eq!(
        k.timer_create("zero", 0, false, 0, record),
        Err(KernelError::InvalidParameters)
    );
    let timer = k
        .timer_create("a rather long timer name", 3, false, 42, record)
        .unwrap();
    assert_eq!(k.timer_name(timer), Ok("a rather long ti"));
    assert_eq!(k.timer_id(timer), Ok(42));
    k.timer_set_id(timer, 7).unwrap();
    assert_eq!(k.timer_id(timer), Ok(7));
    assert_eq!(
        k.timer_change_period(timer, 0, 0),
        Err(nb::Error::Other(KernelError::InvalidParameters))
    );

    // A one-shot turned periodic keeps going.
    k.timer_set_reload_mode(timer, true).unwrap();
    k.timer_start(timer, 0).unwrap();
    settle(&mut k);
    advance(&mut k, 6);
    assert_eq!(fired_at(&k), vec![3, 6]);
}

#[test]
fn commands_queue_until_the_service_runs() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let timer = k.timer_create("busy", 5, false, 0, record).unwrap();

    for _ in 0..TIMER_QUEUE_LEN {
        k.timer_reset(timer, 0).unwrap();
    }
    assert_eq!(
        k.timer_reset(timer, 0),
        Err(nb::Error::Other(KernelError::QueueFull))
    );
    settle(&mut k);
    k.timer_reset(timer, MAX_DELAY).unwrap();
}

#[test]
fn service_runs_only_on_its_own_task() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    let task = single_task(&mut k, &mut stacks);

    assert_ne!(k.timer_service_task(), Some(task));
    assert_eq!(k.timer_service_run(), Err(KernelError::InvalidOperation));
    assert_eq!(
        k.task_name(k.timer_service_task().unwrap()),
        Ok("Tmr Svc")
    );
}

#[test]
fn service_blocks_when_idle() {
    let mut mem = Memory::new();
    let (mut k, mut stacks) = boot(&mut mem, config());
    single_task(&mut k, &mut stacks);
    let service = k.timer_service_task().unwrap();
    let timer = k.timer_create("step", 2, false, 0, record).unwrap();

    k.timer_start(timer, 0).unwrap();
    assert!(k.port_mut().take_yield());
    k.switch_context();
    assert_eq!(running(&k), service);
    assert_eq!(k.timer_service_run(), Ok(ServiceOutcome::Ran));
    assert_eq!(k.timer_service_run(), Ok(ServiceOutcome::Blocked));
}
