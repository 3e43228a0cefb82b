use crate::register::RegisterKey;
use crate::value::VariableType;

/// The number of debug-channel slots every CPU exposes.
pub const MAX_DEBUG_CHANNELS: usize = 16;

/// The 8-bit address of a node on the debug bus.
///
/// Valid node ids are 1–254. `0xFF` addresses every node at once and never
/// appears as a registry key; responders do not acknowledge messages sent
/// with msg_id 0, which is why the transport layer never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub u8);

impl CpuId {
    pub const BROADCAST: CpuId = CpuId(0xFF);

    pub fn is_broadcast(self) -> bool {
        self == CpuId::BROADCAST
    }
}

impl std::fmt::Display for CpuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the host knows about one embedded node: identity strings from
/// its GetVersion reply, the type-size table it reported via GetInfo, its
/// debug-channel slot assignments and its message counters.
#[derive(Debug, Clone)]
pub struct Cpu {
    id: CpuId,
    name: String,
    serial_number: String,
    protocol_version: String,
    application_version: String,
    decimation: u32,
    message_counter: u64,
    invalid_message_counter: u64,
    // Append-only within a session; lookups take the first match.
    type_sizes: Vec<(VariableType, u32)>,
    // Slot index == position. Allocation appends, removal collapses.
    debug_channels: Vec<RegisterKey>,
}

impl Cpu {
    pub(crate) fn new(
        id: CpuId,
        name: String,
        serial_number: String,
        protocol_version: String,
        application_version: String,
    ) -> Self {
        Cpu {
            id,
            name,
            serial_number,
            protocol_version,
            application_version,
            decimation: 0,
            message_counter: 0,
            invalid_message_counter: 0,
            type_sizes: Vec::new(),
            debug_channels: Vec::new(),
        }
    }

    pub fn id(&self) -> CpuId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn application_version(&self) -> &str {
        &self.application_version
    }

    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    pub(crate) fn set_decimation(&mut self, decimation: u32) {
        self.decimation = decimation;
    }

    /// Total frames received from this node, valid or not.
    pub fn message_counter(&self) -> u64 {
        self.message_counter
    }

    /// Frames from this node that were dropped as malformed.
    pub fn invalid_message_counter(&self) -> u64 {
        self.invalid_message_counter
    }

    pub(crate) fn record_message(&mut self) {
        self.message_counter += 1;
    }

    pub(crate) fn record_invalid(&mut self) {
        self.invalid_message_counter += 1;
    }

    /// The byte size this CPU reported for `var_type`, if it has reported one.
    /// For `TimeStamp` the value is the tick duration in microseconds rather
    /// than a width.
    pub fn type_size(&self, var_type: VariableType) -> Option<u32> {
        self.type_sizes
            .iter()
            .find(|(ty, _)| *ty == var_type)
            .map(|&(_, size)| size)
    }

    pub(crate) fn add_type_size(&mut self, var_type: VariableType, size: u32) {
        self.type_sizes.push((var_type, size));
    }

    /// The registers currently streaming, in slot order.
    pub fn debug_channels(&self) -> &[RegisterKey] {
        &self.debug_channels
    }

    pub fn max_debug_channels(&self) -> usize {
        MAX_DEBUG_CHANNELS
    }

    /// Slots are allocated densely at the end of the list.
    pub(crate) fn next_free_slot(&self) -> Option<usize> {
        if self.debug_channels.len() < MAX_DEBUG_CHANNELS {
            Some(self.debug_channels.len())
        } else {
            None
        }
    }

    pub(crate) fn channel_slot_of(&self, key: RegisterKey) -> Option<usize> {
        self.debug_channels.iter().position(|&k| k == key)
    }

    pub(crate) fn add_channel(&mut self, key: RegisterKey) {
        debug_assert!(self.debug_channels.len() < MAX_DEBUG_CHANNELS);
        self.debug_channels.push(key);
    }

    /// Removing a channel collapses the list, so later slots shift down and
    /// their indices are reused by the next allocation.
    pub(crate) fn remove_channel(&mut self, key: RegisterKey) {
        self.debug_channels.retain(|&k| k != key);
    }
}
