//! The V0 transport layer: byte-stuffed frames with an 8-bit CRC.
//!
//! A frame on the bus is `STX, msg_id, cpu_id, payload…, CRC, ETX`. The body
//! between STX and ETX is escaped so that neither delimiter nor the escape
//! byte itself can appear inside it: every reserved byte is replaced by
//! `ESC, byte ^ 0x20`. The CRC covers the unescaped `msg_id, cpu_id, payload`
//! and is itself subject to escaping.
//!
//! These constants are fixed by the target firmware; both ends of the bus
//! must agree on them.

use crc::{Crc, CRC_8_SMBUS};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ESC: u8 = 0x1B;

const ESC_XOR: u8 = 0x20;

/// Frames longer than this cannot be legitimate; an unterminated start byte
/// is abandoned once this much data has accumulated behind it.
const MAX_FRAME_LEN: usize = 4096;

const FRAME_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// A complete, CRC-valid frame received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_id: u8,
    pub cpu_id: u8,
    pub payload: Vec<u8>,
}

/// One outcome of feeding bytes to the framer: either a valid frame, or
/// notice of a malformed one so the owner can attribute it to a CPU's
/// invalid-message counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deframed {
    Frame(Frame),
    /// A frame was dropped. `cpu_id` is present when the source address
    /// survived the damage (e.g. a CRC mismatch); orphan escapes and
    /// truncated bodies leave it unrecoverable.
    Malformed { cpu_id: Option<u8> },
}

/// Assembles outbound frames and reassembles inbound ones from arbitrary
/// byte chunks.
///
/// The outbound msg_id is an 8-bit counter that skips 0: msg_id 0 means "no
/// acknowledgement expected" on this bus, so the host never emits it, not
/// even for broadcast destinations.
#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
    msg_id: u8,
    invalid_frames: u64,
}

impl Framer {
    pub fn new() -> Self {
        Framer::default()
    }

    /// Drop any partial input and restart the msg_id sequence at 1.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.msg_id = 0;
    }

    /// Frames dropped without attributing them to any CPU's invalid-message
    /// counter.
    pub fn invalid_frames(&self) -> u64 {
        self.invalid_frames
    }

    /// Count a dropped frame whose source CPU is not in the registry.
    pub(crate) fn record_unattributed(&mut self) {
        self.invalid_frames += 1;
    }

    fn next_msg_id(&mut self) -> u8 {
        self.msg_id = self.msg_id.wrapping_add(1);
        if self.msg_id == 0 {
            self.msg_id = 1;
        }
        self.msg_id
    }

    /// Build the wire form of one frame addressed to `cpu_id`.
    pub fn encode_frame(&mut self, cpu_id: u8, payload: &[u8]) -> Vec<u8> {
        let msg_id = self.next_msg_id();
        let mut body = Vec::with_capacity(payload.len() + 3);
        body.push(msg_id);
        body.push(cpu_id);
        body.extend_from_slice(payload);
        let crc = FRAME_CRC.checksum(&body);
        body.push(crc);

        let mut frame = Vec::with_capacity(body.len() + 2);
        frame.push(STX);
        for &byte in &body {
            if byte == STX || byte == ETX || byte == ESC {
                frame.push(ESC);
                frame.push(byte ^ ESC_XOR);
            } else {
                frame.push(byte);
            }
        }
        frame.push(ETX);
        frame
    }

    /// Feed received bytes and collect every complete frame they finish.
    ///
    /// The framer is re-entrant on partial input: bytes after the last
    /// complete frame stay buffered for the next call, so chunking of the
    /// input never changes the sequence of delivered frames.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<Deframed> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            // Resync: everything before a start byte is line noise.
            match self.buffer.iter().position(|&b| b == STX) {
                Some(0) => {}
                Some(n) => {
                    self.buffer.drain(..n);
                }
                None => {
                    self.buffer.clear();
                    break;
                }
            }

            let Some(etx_pos) = self.buffer.iter().position(|&b| b == ETX) else {
                // No terminator yet. Give up on a runaway start byte so a
                // corrupt stream cannot pin the buffer forever.
                if self.buffer.len() > MAX_FRAME_LEN {
                    self.buffer.drain(..1);
                    self.invalid_frames += 1;
                    continue;
                }
                break;
            };

            let escaped_body: Vec<u8> = self.buffer[1..etx_pos].to_vec();
            self.buffer.drain(..=etx_pos);
            out.push(Self::decode_body(&escaped_body, &mut self.invalid_frames));
        }

        out
    }

    fn decode_body(escaped: &[u8], invalid_frames: &mut u64) -> Deframed {
        let mut body = Vec::with_capacity(escaped.len());
        let mut iter = escaped.iter();
        while let Some(&byte) = iter.next() {
            if byte == ESC {
                match iter.next() {
                    Some(&next) => body.push(next ^ ESC_XOR),
                    None => {
                        // Orphan escape at the end of the body.
                        *invalid_frames += 1;
                        return Deframed::Malformed { cpu_id: None };
                    }
                }
            } else {
                body.push(byte);
            }
        }

        // msg_id, cpu_id and the CRC are the smallest possible body.
        if body.len() < 3 {
            let cpu_id = body.get(1).copied();
            if cpu_id.is_none() {
                *invalid_frames += 1;
            }
            return Deframed::Malformed { cpu_id };
        }

        let (content, crc) = body.split_at(body.len() - 1);
        if FRAME_CRC.checksum(content) != crc[0] {
            log::debug!("dropping frame with bad crc (cpu id {})", content[1]);
            return Deframed::Malformed {
                cpu_id: Some(content[1]),
            };
        }

        Deframed::Frame(Frame {
            msg_id: content[0],
            cpu_id: content[1],
            payload: content[2..].to_vec(),
        })
    }
}
