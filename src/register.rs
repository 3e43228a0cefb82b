use crate::cpu::CpuId;
use crate::value::{Value, VariableType};

/// Whether the host reads the location, writes it, or the catalog did not say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "Read",
            Direction::Write => "Write",
            Direction::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the target resolves a register's offset to an address.
///
/// The discriminants are the raw bits the source occupies in the control
/// byte (bits 6–4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    HandWrittenOffset,
    HandWrittenIndex,
    SimulinkCApiOffset,
    SimulinkCApiIndex,
    AbsoluteAddress,
    Unknown,
}

impl Source {
    /// The bits this source contributes to a control byte. `Unknown`
    /// encodes as zero.
    pub fn bits(self) -> u8 {
        match self {
            Source::HandWrittenOffset => 0x00,
            Source::HandWrittenIndex => 0x10,
            Source::SimulinkCApiOffset => 0x40,
            Source::SimulinkCApiIndex => 0x50,
            Source::AbsoluteAddress => 0x70,
            Source::Unknown => 0x00,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x70 {
            0x00 => Source::HandWrittenOffset,
            0x10 => Source::HandWrittenIndex,
            0x40 => Source::SimulinkCApiOffset,
            0x50 => Source::SimulinkCApiIndex,
            0x70 => Source::AbsoluteAddress,
            _ => Source::Unknown,
        }
    }
}

/// Streaming mode of a debug-channel slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelMode {
    Off,
    OnChange,
    LowSpeed,
    Once,
}

impl ChannelMode {
    pub fn to_u8(self) -> u8 {
        match self {
            ChannelMode::Off => 0,
            ChannelMode::OnChange => 1,
            ChannelMode::LowSpeed => 2,
            ChannelMode::Once => 3,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ChannelMode::Off),
            1 => Some(ChannelMode::OnChange),
            2 => Some(ChannelMode::LowSpeed),
            3 => Some(ChannelMode::Once),
            _ => None,
        }
    }
}

/// The key a register is addressed by: its owning CPU, its 32-bit offset and
/// its direction. Incoming values are matched against this exact triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterKey {
    pub cpu: CpuId,
    pub offset: u32,
    pub direction: Direction,
}

impl std::fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu {} offset {:#010x} {}",
            self.cpu, self.offset, self.direction
        )
    }
}

/// A named, typed memory location on one CPU.
#[derive(Debug, Clone)]
pub struct Register {
    id: u32,
    name: String,
    cpu: CpuId,
    direction: Direction,
    var_type: VariableType,
    source: Source,
    deref_depth: u8,
    offset: u32,
    channel_mode: ChannelMode,
    value: Option<Value>,
    timestamp: Option<u64>,
}

impl Register {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        name: String,
        cpu: CpuId,
        direction: Direction,
        var_type: VariableType,
        source: Source,
        deref_depth: u8,
        offset: u32,
    ) -> Self {
        Register {
            id,
            name,
            cpu,
            direction,
            var_type,
            source,
            deref_depth: deref_depth & 0x0F,
            offset,
            channel_mode: ChannelMode::Off,
            value: None,
            timestamp: None,
        }
    }

    pub fn key(&self) -> RegisterKey {
        RegisterKey {
            cpu: self.cpu,
            offset: self.offset,
            direction: self.direction,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn var_type(&self) -> VariableType {
        self.var_type
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn deref_depth(&self) -> u8 {
        self.deref_depth
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn channel_mode(&self) -> ChannelMode {
        self.channel_mode
    }

    /// The most recently received value, if any.
    pub fn value(&self) -> Option<Value> {
        self.value
    }

    /// Target time of the last streamed sample. Only channel data carries a
    /// time; plain query replies leave this untouched.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub(crate) fn set_channel_mode(&mut self, mode: ChannelMode) {
        self.channel_mode = mode;
    }

    /// Store a value the host is about to write, without treating it as a
    /// received sample.
    pub(crate) fn set_value(&mut self, value: Value) {
        self.value = Some(value);
    }

    /// Publish a received value. Returns true when the stored value actually
    /// changed; unchanged samples keep the previous timestamp.
    pub(crate) fn publish(&mut self, value: Value, timestamp: Option<u64>) -> bool {
        if self.value == Some(value) {
            return false;
        }
        self.value = Some(value);
        if timestamp.is_some() {
            self.timestamp = timestamp;
        }
        true
    }
}
