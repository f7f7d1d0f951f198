use rtk_kernel::trace::records;
use rtk_kernel::{Port, StackWord, TraceEvent};

use crate::trace::{encode_frame, FrameDecoder, TraceError, TraceFrame, TraceWriter};
use crate::{stack_high_water_mark, HostPort, STACK_FILL};

fn entry(_: usize) {}

#[test]
fn frames_survive_escaping() {
    let payload = [0x7E, 0x01, 0x7D, 0x20];
    let bytes = encode_frame(3, 0x7D, 0x7E7E, &payload);
    assert_eq!(bytes.iter().filter(|&&b| b == 0x7E).count(), 1);

    let frames = FrameDecoder::new().push_bytes(&bytes).unwrap();
    assert_eq!(
        frames,
        vec![TraceFrame {
            seq: 3,
            record_id: 0x7D,
            timestamp: 0x7E7E,
            payload: payload.to_vec(),
        }]
    );
}

#[test]
fn decoder_accepts_arbitrary_chunks() {
    let mut stream = encode_frame(1, 10, 100, &[1, 2, 3]);
    stream.extend(encode_frame(2, 11, 101, &[]));

    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    for byte in stream {
        frames.extend(decoder.push_bytes(&[byte]).unwrap());
    }
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload, vec![1, 2, 3]);
    assert_eq!(frames[1].seq, 2);
    assert_eq!(frames[1].timestamp, 101);
    assert!(frames[1].payload.is_empty());
}

#[test]
fn corrupted_frames_are_rejected() {
    let mut bytes = encode_frame(1, 10, 0, &[5, 6]);
    bytes[2] ^= 0x01;
    assert!(matches!(
        FrameDecoder::new().push_bytes(&bytes),
        Err(TraceError::InvalidChecksum { .. })
    ));
    assert!(matches!(
        FrameDecoder::new().push_bytes(&[1, 2, 0x7E]),
        Err(TraceError::FrameTooShort(2))
    ));
}

#[test]
fn writer_frames_kernel_events() {
    let mut writer = TraceWriter::new(Vec::<u8>::new());
    writer
        .write_event(7, &TraceEvent::Tick { count: 0x7E })
        .unwrap();
    writer.write_event(8, &TraceEvent::ResumeAll).unwrap();

    let frames = FrameDecoder::new()
        .push_bytes(&writer.into_inner())
        .unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].seq, 1);
    assert_eq!(frames[0].record_id, records::sched::TICK);
    assert_eq!(frames[0].timestamp, 7);
    assert_eq!(frames[0].payload, 0x7Eu32.to_le_bytes().to_vec());
    assert_eq!(frames[1].record_id, records::sched::RESUME_ALL);
    assert!(frames[1].payload.is_empty());
}

#[test]
fn fresh_stacks_are_painted() {
    let mut port = HostPort::new();
    let mut stack: [StackWord; 8] = [0; 8];

    let sp = port.init_stack(&mut stack, entry, 42);
    assert_eq!(sp, 6);
    assert_eq!(stack[6], 42);
    assert_eq!(stack[7], entry as usize);
    assert_eq!(stack_high_water_mark(&stack), 6);
    assert!(port.validate_stack(&stack, sp));
    assert!(!port.validate_stack(&stack, 8));

    stack[0] = 0;
    assert!(!port.validate_stack(&stack, sp));
    assert_eq!(stack_high_water_mark(&stack), 0);
    assert_eq!(stack[1], STACK_FILL);
}

#[test]
fn privilege_switch_returns_previous_token() {
    let mut port = HostPort::new();
    assert_eq!(port.switch_privilege(3), 0);
    assert_eq!(port.privilege(), 3);
    assert_eq!(port.switch_privilege(0), 3);
}

#[test]
fn trace_goes_to_capture_and_writer() {
    let mut port = HostPort::new().capturing().with_trace_writer(Vec::<u8>::new());
    port.update_run_time_stats();
    port.trace(TraceEvent::SchedulerStart);
    assert_eq!(port.events(), &[TraceEvent::SchedulerStart]);
    assert!(port.flush_trace().is_ok());

    port.clear_events();
    assert!(port.events().is_empty());
    assert_eq!(port.run_time(), 1);
}
