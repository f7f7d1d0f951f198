use crate::*;

#[test]
fn priority_bounds() {
    assert!(Priority::new(0).is_ok());
    assert!(Priority::new((MAX_PRIORITIES - 1) as u8).is_ok());
    assert_eq!(
        Priority::new(MAX_PRIORITIES as u8),
        Err(KernelError::InvalidParameters)
    );
}

#[test]
fn event_key_orders_urgent_first() {
    let low = priority!(1);
    let high = priority!(5);
    assert!(high.event_key() < low.event_key());
    assert!(low.event_key() < Priority::IDLE.event_key());
    assert_eq!(Priority::IDLE.event_key(), MAX_PRIORITIES as u32);
}

#[test]
fn tick_counter_wraps_and_counts_overflows() {
    let mut ticks = TickCounter::new(TickType::MAX - 1);
    assert_eq!(ticks.advance(), Ok(false));
    assert_eq!(ticks.now(), TickType::MAX);
    assert_eq!(ticks.advance(), Ok(true));
    assert_eq!(ticks.now(), 0);
    assert_eq!(ticks.overflows(), 1);
}

#[test]
fn tick_counter_detects_corruption() {
    let mut ticks = TickCounter::new(10);
    ticks.corrupt(99);
    assert_eq!(ticks.advance(), Err(FatalError::TickMirrorMismatch));
}

#[test]
fn timeout_consumes_remaining_ticks() {
    let mut ticks = TickCounter::new(100);
    let mut timeout = TimeOut::capture(&ticks);
    let mut remaining = 5;

    for _ in 0..3 {
        ticks.advance().unwrap();
    }
    assert!(!timeout.expired(&ticks, &mut remaining));
    assert_eq!(remaining, 2);

    ticks.advance().unwrap();
    ticks.advance().unwrap();
    assert!(timeout.expired(&ticks, &mut remaining));
    assert_eq!(remaining, 0);
}

#[test]
fn timeout_never_expires_for_max_delay() {
    let mut ticks = TickCounter::new(0);
    let mut timeout = TimeOut::capture(&ticks);
    let mut remaining = MAX_DELAY;
    for _ in 0..1000 {
        ticks.advance().unwrap();
    }
    assert!(!timeout.expired(&ticks, &mut remaining));
    assert_eq!(remaining, MAX_DELAY);
}

#[test]
fn timeout_across_wraparound() {
    let mut ticks = TickCounter::new(TickType::MAX - 2);
    let mut timeout = TimeOut::capture(&ticks);
    let mut remaining = 10;
    for _ in 0..5 {
        ticks.advance().unwrap();
    }
    assert!(!timeout.expired(&ticks, &mut remaining));
    assert_eq!(remaining, 5);
    for _ in 0..5 {
        ticks.advance().unwrap();
    }
    assert!(timeout.expired(&ticks, &mut remaining));
}

#[test]
fn handle_bits_round_trip() {
    let raw = RawHandle::new(7, 513);
    assert_eq!(RawHandle::from_bits(raw.to_bits()), raw);
    let task = TaskHandle::from_raw(raw);
    assert_eq!(task.index(), 7);
    assert_eq!(task.generation(), 513);
}

#[test]
fn config_builder_overrides_defaults() {
    let config = KernelConfig::builder()
        .tick_rate_hz(100)
        .time_slicing(false)
        .timer_queue_length(4)
        .initial_tick_count(42)
        .build();
    assert_eq!(config.tick_rate_hz, 100);
    assert!(config.preemption);
    assert!(!config.time_slicing);
    assert_eq!(config.timer_queue_length, 4);
    assert_eq!(config.initial_tick_count, 42);
    assert_eq!(config.timer_task_priority, Priority::MAX);
}
