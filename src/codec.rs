//! Scalar wire helpers shared by the transport and presentation layers.
//!
//! Everything on the debug bus is little-endian. The control byte packs a
//! register's direction, source and dereference depth into a single byte:
//! bit 7 is the direction (1 = write), bits 6–4 the source, bits 3–0 the
//! deref depth.

use byteorder::{ByteOrder, LittleEndian};

use crate::register::{Direction, Source};

/// Build a control byte from a register's addressing attributes.
pub fn encode_control(direction: Direction, source: Source, deref_depth: u8) -> u8 {
    let dir = match direction {
        Direction::Write => 0x80,
        Direction::Read | Direction::Unknown => 0x00,
    };
    dir | source.bits() | (deref_depth & 0x0F)
}

pub fn direction_from_control(ctrl: u8) -> Direction {
    if ctrl & 0x80 != 0 {
        Direction::Write
    } else {
        Direction::Read
    }
}

pub fn source_from_control(ctrl: u8) -> Source {
    Source::from_bits(ctrl)
}

pub fn deref_depth_from_control(ctrl: u8) -> u8 {
    ctrl & 0x0F
}

/// Render a 4-byte version quad the way CPUs report it, e.g. `"0.1.2.3"`.
pub fn version_string(quad: [u8; 4]) -> String {
    format!("{}.{}.{}.{}", quad[0], quad[1], quad[2], quad[3])
}

pub(crate) fn read_u32_le(bytes: &[u8]) -> u32 {
    LittleEndian::read_u32(bytes)
}

pub(crate) fn read_u16_le(bytes: &[u8]) -> u16 {
    LittleEndian::read_u16(bytes)
}

/// Channel-data frames carry a 3-byte sample time; it is zero-extended here
/// and again when widened to the CPU's timestamp width.
pub(crate) fn read_u24_le(bytes: &[u8]) -> u32 {
    LittleEndian::read_u24(bytes)
}

pub(crate) fn push_u32_le(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}
