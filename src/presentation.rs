//! The presentation layer: command payloads in, typed events out, and the
//! encoders for every command the host can send.
//!
//! A payload's first byte selects the command; the codes are ASCII mnemonics
//! and, like the framing constants, fixed by the target firmware. Everything
//! here is a pure codec: parsing never touches client state, so malformed
//! input is reported to the caller, which owns the invalid-message counters.

use crate::codec;
use crate::register::ChannelMode;
use crate::value::VariableType;

pub(crate) mod command {
    pub const GET_VERSION: u8 = b'V';
    pub const GET_INFO: u8 = b'I';
    pub const WRITE_REGISTER: u8 = b'W';
    pub const QUERY_REGISTER: u8 = b'Q';
    pub const CONFIG_CHANNEL: u8 = b'C';
    pub const DECIMATION: u8 = b'D';
    pub const RESET_TIME: u8 = b'T';
    pub const READ_CHANNEL_DATA: u8 = b'R';
    pub const DEBUG_STRING: u8 = b'S';
}

/// Record separator inside GetInfo replies.
pub(crate) const RS: u8 = 0x1E;

/// Identity a CPU announces in its GetVersion reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub protocol_version: [u8; 4],
    pub application_version: [u8; 4],
    pub name: String,
    pub serial_number: String,
}

/// Result byte of a write acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Ok,
    InvalidAddress,
    NullPointerDereference,
    Unknown(u8),
}

impl WriteStatus {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0x00 => WriteStatus::Ok,
            0x01 => WriteStatus::InvalidAddress,
            0x02 => WriteStatus::NullPointerDereference,
            other => WriteStatus::Unknown(other),
        }
    }
}

/// A decoded inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    Version(VersionInfo),
    /// Type-size records. `malformed_records` counts records that had to be
    /// skipped; the surviving entries are still applied.
    TypeInfo {
        entries: Vec<(VariableType, u32)>,
        malformed_records: usize,
    },
    WriteStatus(WriteStatus),
    QueryValue {
        offset: u32,
        ctrl: u8,
        value: Vec<u8>,
    },
    ChannelData {
        /// 24-bit sample time, zero-extended.
        time: u32,
        mask: u16,
        values: Vec<u8>,
    },
    Decimation(Option<u8>),
    DebugString(String),
    /// A command byte this protocol version does not know. Counted but not
    /// treated as malformed.
    Unhandled(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParseError {
    Empty,
    Malformed(&'static str),
}

pub(crate) fn parse(payload: &[u8]) -> Result<Inbound, ParseError> {
    let (&cmd, data) = payload.split_first().ok_or(ParseError::Empty)?;
    match cmd {
        command::GET_VERSION => parse_version(data),
        command::GET_INFO => parse_type_info(data),
        command::WRITE_REGISTER => {
            if data.len() != 1 {
                return Err(ParseError::Malformed("write ack must be one status byte"));
            }
            Ok(Inbound::WriteStatus(WriteStatus::from_u8(data[0])))
        }
        command::QUERY_REGISTER => parse_query_value(data),
        command::READ_CHANNEL_DATA => parse_channel_data(data),
        command::DECIMATION => Ok(Inbound::Decimation(if data.len() == 1 {
            Some(data[0])
        } else {
            None
        })),
        command::DEBUG_STRING => Ok(Inbound::DebugString(
            String::from_utf8_lossy(data).into_owned(),
        )),
        other => Ok(Inbound::Unhandled(other)),
    }
}

fn parse_version(data: &[u8]) -> Result<Inbound, ParseError> {
    if data.len() < 9 {
        return Err(ParseError::Malformed("version reply shorter than 9 bytes"));
    }
    let name_len = data[8] as usize;
    let serial_len_pos = 9 + name_len;
    if serial_len_pos >= data.len() {
        return Err(ParseError::Malformed("version reply truncates the name"));
    }
    let serial_len = data[serial_len_pos] as usize;
    let serial_end = serial_len_pos + 1 + serial_len;
    if serial_end > data.len() {
        return Err(ParseError::Malformed(
            "version reply truncates the serial number",
        ));
    }

    Ok(Inbound::Version(VersionInfo {
        protocol_version: [data[0], data[1], data[2], data[3]],
        application_version: [data[4], data[5], data[6], data[7]],
        name: String::from_utf8_lossy(&data[9..serial_len_pos]).into_owned(),
        serial_number: String::from_utf8_lossy(&data[serial_len_pos + 1..serial_end]).into_owned(),
    }))
}

fn parse_type_info(data: &[u8]) -> Result<Inbound, ParseError> {
    if data.len() < 2 {
        return Err(ParseError::Malformed("type info shorter than one record"));
    }
    let mut entries = Vec::new();
    let mut malformed_records = 0;
    // Records are RS-separated; the last one ends at the end of the payload.
    for record in data.split(|&b| b == RS) {
        if record.is_empty() {
            continue;
        }
        let var_type = VariableType::from_tag(record[0]);
        // The timestamp record carries a 4-byte size (microseconds per
        // tick); every other record a 1-byte size.
        let size = if var_type == VariableType::TimeStamp {
            if record.len() < 5 {
                malformed_records += 1;
                continue;
            }
            codec::read_u32_le(&record[1..5])
        } else {
            if record.len() < 2 {
                malformed_records += 1;
                continue;
            }
            record[1] as u32
        };
        entries.push((var_type, size));
    }
    Ok(Inbound::TypeInfo {
        entries,
        malformed_records,
    })
}

fn parse_query_value(data: &[u8]) -> Result<Inbound, ParseError> {
    if data.len() < 7 {
        return Err(ParseError::Malformed("query reply shorter than 7 bytes"));
    }
    let offset = codec::read_u32_le(&data[..4]);
    let ctrl = data[4];
    let size = data[5] as usize;
    if data.len() < 6 + size {
        return Err(ParseError::Malformed("query reply truncates the value"));
    }
    Ok(Inbound::QueryValue {
        offset,
        ctrl,
        value: data[6..6 + size].to_vec(),
    })
}

fn parse_channel_data(data: &[u8]) -> Result<Inbound, ParseError> {
    if data.len() < 5 {
        return Err(ParseError::Malformed("channel data shorter than 5 bytes"));
    }
    Ok(Inbound::ChannelData {
        time: codec::read_u24_le(&data[..3]),
        mask: codec::read_u16_le(&data[3..5]),
        values: data[5..].to_vec(),
    })
}

// Outbound encoders. Each returns the command payload; the transport layer
// wraps it in framing.

pub(crate) fn encode_get_version() -> Vec<u8> {
    vec![command::GET_VERSION]
}

pub(crate) fn encode_get_info() -> Vec<u8> {
    vec![command::GET_INFO]
}

pub(crate) fn encode_query(offset: u32, ctrl: u8, size: u8) -> Vec<u8> {
    let mut out = vec![command::QUERY_REGISTER];
    codec::push_u32_le(&mut out, offset);
    out.push(ctrl);
    out.push(size);
    out
}

pub(crate) fn encode_write(offset: u32, ctrl: u8, size: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![command::WRITE_REGISTER];
    codec::push_u32_le(&mut out, offset);
    out.push(ctrl);
    out.push(size);
    out.extend_from_slice(value);
    out
}

pub(crate) fn encode_reset_time() -> Vec<u8> {
    vec![command::RESET_TIME]
}

/// Reconfigure a slot that already has a register bound to it.
pub(crate) fn encode_config_channel_mode(slot: u8, mode: ChannelMode) -> Vec<u8> {
    vec![command::CONFIG_CHANNEL, slot, mode.to_u8()]
}

/// Bind a register to a fresh slot and set its mode in one command.
pub(crate) fn encode_config_channel_full(
    slot: u8,
    mode: ChannelMode,
    offset: u32,
    ctrl: u8,
    size: u8,
) -> Vec<u8> {
    let mut out = vec![command::CONFIG_CHANNEL, slot, mode.to_u8()];
    codec::push_u32_le(&mut out, offset);
    out.push(ctrl);
    out.push(size);
    out
}

pub(crate) fn encode_get_decimation() -> Vec<u8> {
    vec![command::DECIMATION]
}

pub(crate) fn encode_set_decimation(decimation: u8) -> Vec<u8> {
    vec![command::DECIMATION, decimation]
}
