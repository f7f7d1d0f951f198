//! Framed trace output.
//!
//! Kernel trace records are written as HDLC style frames: sequence number,
//! record identifier, a 32-bit little-endian timestamp, the record payload
//! and an inverted additive checksum, with `0x7E` closing each frame and
//! `0x7D` escaping flag and escape bytes. [`FrameDecoder`] reverses the
//! process for host side tooling and tests.

use std::io::{self, Write};

use rtk_kernel::trace::MAX_PAYLOAD;
use rtk_kernel::TraceEvent;
use thiserror::Error;

const FLAG: u8 = 0x7E;
const ESC: u8 = 0x7D;
const ESC_XOR: u8 = 0x20;

/// Bytes ahead of the payload in a decoded frame body
const HEADER_LEN: usize = 2 + 4;

/// Errors raised while writing or reading trace frames.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("frame too short (len={0})")]
    FrameTooShort(usize),
    #[error("checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    InvalidChecksum { expected: u8, found: u8 },
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

/// One decoded trace frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub seq: u8,
    pub record_id: u8,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

/// Encodes trace records into frames and writes them to `W`.
pub struct TraceWriter<W: Write> {
    writer: W,
    seq: u8,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, seq: 0 }
    }

    /// Frames `event` and writes it out.
    pub fn write_event(&mut self, timestamp: u32, event: &TraceEvent) -> Result<(), TraceError> {
        let mut payload = [0u8; MAX_PAYLOAD];
        let len = event.encode(&mut payload);
        self.write_record(event.record_id(), timestamp, &payload[..len])
    }

    pub fn write_record(
        &mut self,
        record_id: u8,
        timestamp: u32,
        payload: &[u8],
    ) -> Result<(), TraceError> {
        self.seq = self.seq.wrapping_add(1);
        let frame = encode_frame(self.seq, record_id, timestamp, payload);
        self.writer.write_all(&frame)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TraceError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Builds one complete frame, closing flag included.
pub fn encode_frame(seq: u8, record_id: u8, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + HEADER_LEN + 4);
    let mut checksum: u8 = 0;

    let body = [seq, record_id]
        .into_iter()
        .chain(timestamp.to_le_bytes())
        .chain(payload.iter().copied());
    for byte in body {
        checksum = checksum.wrapping_add(byte);
        push_escaped(&mut bytes, byte);
    }
    push_escaped(&mut bytes, !checksum);
    bytes.push(FLAG);
    bytes
}

fn push_escaped(dest: &mut Vec<u8>, byte: u8) {
    if byte == FLAG || byte == ESC {
        dest.push(ESC);
        dest.push(byte ^ ESC_XOR);
    } else {
        dest.push(byte);
    }
}

/// Incremental decoder; accepts the byte stream in arbitrary chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    escape_next: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes in and returns every frame they completed.
    pub fn push_bytes(&mut self, input: &[u8]) -> Result<Vec<TraceFrame>, TraceError> {
        let mut frames = Vec::new();
        for &byte in input {
            if byte == FLAG {
                if !self.buffer.is_empty() {
                    let body = std::mem::take(&mut self.buffer);
                    frames.push(decode_body(&body)?);
                }
                self.escape_next = false;
                continue;
            }
            if self.escape_next {
                self.buffer.push(byte ^ ESC_XOR);
                self.escape_next = false;
            } else if byte == ESC {
                self.escape_next = true;
            } else {
                self.buffer.push(byte);
            }
        }
        Ok(frames)
    }
}

fn decode_body(data: &[u8]) -> Result<TraceFrame, TraceError> {
    if data.len() < HEADER_LEN + 1 {
        return Err(TraceError::FrameTooShort(data.len()));
    }
    let (body, checksum) = data.split_at(data.len() - 1);
    let expected = !body.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    if checksum[0] != expected {
        return Err(TraceError::InvalidChecksum {
            expected,
            found: checksum[0],
        });
    }
    let mut timestamp = [0u8; 4];
    timestamp.copy_from_slice(&body[2..HEADER_LEN]);
    Ok(TraceFrame {
        seq: body[0],
        record_id: body[1],
        timestamp: u32::from_le_bytes(timestamp),
        payload: body[HEADER_LEN..].to_vec(),
    })
}
