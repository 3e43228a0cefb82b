//! The application layer: the request API the rest of a debugger frontend
//! talks to, and the dispatch that turns inbound frames into registry,
//! catalog and event updates.

use std::collections::VecDeque;

use crate::catalog::CatalogLoader;
use crate::codec;
use crate::cpu::{Cpu, CpuId, MAX_DEBUG_CHANNELS};
use crate::error::DebugError;
use crate::events::{ErrorEvent, Event, EventBus};
use crate::presentation::{self, Inbound, WriteStatus};
use crate::register::{ChannelMode, Register, RegisterKey};
use crate::registry::{CpuRegistry, RegisterCatalog};
use crate::transport::{Deframed, Frame, Framer};
use crate::value::Value;

/// The debug-protocol engine.
///
/// One `DebugClient` owns all protocol state: the transport framer, the CPU
/// registry, the register catalog and the event bus. It is single-threaded
/// and push-based on both sides: the medium feeds received bytes into
/// [`receive_bytes`](DebugClient::receive_bytes) and drains queued frames
/// from [`take_outbound`](DebugClient::take_outbound); request methods queue
/// frames and return immediately, with results arriving as [`Event`]s.
///
/// Responses are correlated by command type and source CPU id, not by
/// msg_id, so a reply that never comes simply leaves state unchanged.
pub struct DebugClient {
    framer: Framer,
    cpus: CpuRegistry,
    registers: RegisterCatalog,
    events: EventBus,
    loader: Option<Box<dyn CatalogLoader>>,
    outbox: VecDeque<Vec<u8>>,
}

impl DebugClient {
    pub fn new() -> Self {
        DebugClient {
            framer: Framer::new(),
            cpus: CpuRegistry::new(),
            registers: RegisterCatalog::new(),
            events: EventBus::new(),
            loader: None,
            outbox: VecDeque::new(),
        }
    }

    pub fn with_catalog_loader(loader: Box<dyn CatalogLoader>) -> Self {
        let mut client = DebugClient::new();
        client.loader = Some(loader);
        client
    }

    /// Subscribe to protocol events. Any number of subscribers may exist;
    /// each receives every event in generation order.
    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn cpus(&self) -> &CpuRegistry {
        &self.cpus
    }

    pub fn registers(&self) -> &RegisterCatalog {
        &self.registers
    }

    /// Frames dropped without a CPU to charge them to.
    pub fn unattributed_invalid_frames(&self) -> u64 {
        self.framer.invalid_frames()
    }

    // --- Request API ---------------------------------------------------

    /// Ask every node on the bus to announce itself.
    pub fn scan(&mut self) {
        let payload = presentation::encode_get_version();
        self.queue(CpuId::BROADCAST, &payload);
    }

    /// Request the current value of a register. The reply arrives as a
    /// [`Event::ValueChanged`] if the value differs from the last known one.
    pub fn query(&mut self, key: RegisterKey) -> Result<(), DebugError> {
        let (offset, ctrl, size) = self.register_wire_params(key)?;
        let payload = presentation::encode_query(offset, ctrl, size);
        self.queue(key.cpu, &payload);
        Ok(())
    }

    /// Write a value to a register. The target's acknowledgement surfaces as
    /// an [`ErrorEvent::WriteStatus`] when it reports a failure.
    pub fn write(&mut self, key: RegisterKey, value: Value) -> Result<(), DebugError> {
        let (offset, ctrl, size) = self.register_wire_params(key)?;
        let bytes = value.encode_le(size as usize);
        let payload = presentation::encode_write(offset, ctrl, size, &bytes);
        if let Some(register) = self.registers.get_mut(key) {
            register.set_value(value);
        }
        self.queue(key.cpu, &payload);
        Ok(())
    }

    /// Reset a CPU's sample clock to zero.
    pub fn reset_time(&mut self, cpu: CpuId) -> Result<(), DebugError> {
        self.check_destination(cpu)?;
        let payload = presentation::encode_reset_time();
        self.queue(cpu, &payload);
        Ok(())
    }

    /// Configure a register as a debug channel, change its mode, or turn it
    /// off.
    ///
    /// Slots are allocated densely: a new channel takes the slot after the
    /// last active one, and turning a channel off collapses the list so its
    /// index is reused. With all slots taken this fails with
    /// [`DebugError::NoChannelSlot`] and changes nothing.
    pub fn configure_channel(
        &mut self,
        key: RegisterKey,
        mode: ChannelMode,
    ) -> Result<(), DebugError> {
        let cpu = self
            .cpus
            .get(key.cpu)
            .ok_or(DebugError::UnknownCpu(key.cpu))?;
        self.registers
            .get(key)
            .ok_or(DebugError::UnknownRegister(key))?;

        if let Some(slot) = cpu.channel_slot_of(key) {
            let payload = presentation::encode_config_channel_mode(slot as u8, mode);
            if let Some(register) = self.registers.get_mut(key) {
                register.set_channel_mode(mode);
            }
            if mode == ChannelMode::Off {
                if let Some(cpu) = self.cpus.get_mut(key.cpu) {
                    cpu.remove_channel(key);
                }
            }
            self.queue(key.cpu, &payload);
            return Ok(());
        }

        if mode == ChannelMode::Off {
            // Not a channel; there is nothing to turn off.
            return Ok(());
        }

        let slot = cpu.next_free_slot().ok_or(DebugError::NoChannelSlot {
            cpu: key.cpu,
            max: MAX_DEBUG_CHANNELS,
        })?;
        let (offset, ctrl, size) = self.register_wire_params(key)?;
        let payload =
            presentation::encode_config_channel_full(slot as u8, mode, offset, ctrl, size);
        if let Some(cpu) = self.cpus.get_mut(key.cpu) {
            cpu.add_channel(key);
        }
        if let Some(register) = self.registers.get_mut(key) {
            register.set_channel_mode(mode);
        }
        self.queue(key.cpu, &payload);
        Ok(())
    }

    /// Ask a CPU for its current decimation.
    pub fn get_decimation(&mut self, cpu: CpuId) -> Result<(), DebugError> {
        self.check_destination(cpu)?;
        let payload = presentation::encode_get_decimation();
        self.queue(cpu, &payload);
        Ok(())
    }

    /// Set the divisor controlling how often a CPU emits channel samples.
    pub fn set_decimation(&mut self, cpu: CpuId, decimation: u8) -> Result<(), DebugError> {
        self.check_destination(cpu)?;
        if let Some(cpu) = self.cpus.get_mut(cpu) {
            cpu.set_decimation(decimation as u32);
        }
        let payload = presentation::encode_set_decimation(decimation);
        self.queue(cpu, &payload);
        Ok(())
    }

    // --- Byte-stream plumbing ------------------------------------------

    /// Feed bytes received from the medium. Any complete frames they finish
    /// are dispatched before this returns; trailing partial input is kept
    /// for the next call.
    pub fn receive_bytes(&mut self, bytes: &[u8]) {
        for deframed in self.framer.push_bytes(bytes) {
            match deframed {
                Deframed::Frame(frame) => self.handle_frame(frame),
                Deframed::Malformed { cpu_id: Some(id) } => {
                    match self.cpus.get_mut(CpuId(id)) {
                        Some(cpu) => {
                            cpu.record_message();
                            cpu.record_invalid();
                        }
                        None => self.framer.record_unattributed(),
                    }
                }
                // Source unrecoverable; the framer counted it already.
                Deframed::Malformed { cpu_id: None } => {}
            }
        }
    }

    /// Take every frame queued for transmission, in emission order.
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        self.outbox.drain(..).collect()
    }

    /// Drop all session state: discovered CPUs, catalog registers, partial
    /// input and queued output. The msg_id sequence restarts at 1.
    pub(crate) fn reset(&mut self) {
        self.framer.reset();
        self.cpus.clear();
        self.registers.clear();
        self.outbox.clear();
    }

    // --- Inbound dispatch ----------------------------------------------

    fn handle_frame(&mut self, frame: Frame) {
        let src = CpuId(frame.cpu_id);
        if let Some(cpu) = self.cpus.get_mut(src) {
            cpu.record_message();
        }

        let inbound = match presentation::parse(&frame.payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                log::warn!("dropping malformed payload from cpu {src}: {err:?}");
                self.record_invalid(src);
                return;
            }
        };

        // Frames from nodes we never discovered are dropped; only a version
        // announcement can introduce a new node.
        if !matches!(inbound, Inbound::Version(_)) && !self.cpus.contains(src) {
            log::debug!("dropping frame from unknown cpu {src}");
            return;
        }

        match inbound {
            Inbound::Version(info) => self.handle_version(src, info),
            Inbound::TypeInfo {
                entries,
                malformed_records,
            } => {
                if let Some(cpu) = self.cpus.get_mut(src) {
                    for (var_type, size) in entries {
                        cpu.add_type_size(var_type, size);
                    }
                    if malformed_records > 0 {
                        log::warn!(
                            "cpu {src} sent {malformed_records} unusable type-size records"
                        );
                        cpu.record_invalid();
                    }
                }
            }
            Inbound::WriteStatus(status) => {
                if status != WriteStatus::Ok {
                    log::warn!("cpu {src} rejected a register write: {status:?}");
                    self.events
                        .emit(Event::Error(ErrorEvent::WriteStatus { cpu: src, status }));
                }
            }
            Inbound::QueryValue {
                offset,
                ctrl,
                value,
            } => self.handle_query_value(src, offset, ctrl, &value),
            Inbound::ChannelData { time, mask, values } => {
                self.handle_channel_data(src, time, mask, values)
            }
            Inbound::Decimation(Some(decimation)) => {
                if let Some(cpu) = self.cpus.get_mut(src) {
                    cpu.set_decimation(decimation as u32);
                }
            }
            Inbound::Decimation(None) => {
                log::debug!("cpu {src} sent a decimation reply without a value");
            }
            Inbound::DebugString(text) => {
                self.events.emit(Event::DebugString { cpu: src, text });
            }
            Inbound::Unhandled(cmd) => {
                log::debug!("ignoring unhandled command {cmd:#04x} from cpu {src}");
            }
        }
    }

    fn handle_version(&mut self, src: CpuId, info: presentation::VersionInfo) {
        if self.cpus.contains(src) {
            // A late reply to a repeated scan; the first announcement won.
            return;
        }
        if src.is_broadcast() {
            log::warn!("ignoring version announcement from the broadcast id");
            return;
        }

        let name = info.name.clone();
        let application_version = codec::version_string(info.application_version);
        let mut cpu = Cpu::new(
            src,
            info.name,
            info.serial_number,
            codec::version_string(info.protocol_version),
            application_version.clone(),
        );
        cpu.record_message();
        self.cpus.insert(cpu);
        self.events.emit(Event::CpuDiscovered(src));

        self.load_catalog(src, &name, &application_version);

        // Give the node a clean slate before subscribing to anything, then
        // learn its type sizes.
        for slot in 0..MAX_DEBUG_CHANNELS {
            let payload = presentation::encode_config_channel_mode(slot as u8, ChannelMode::Off);
            self.queue(src, &payload);
        }
        let payload = presentation::encode_get_info();
        self.queue(src, &payload);
    }

    fn load_catalog(&mut self, src: CpuId, name: &str, application_version: &str) {
        let result = match self.loader.as_deref() {
            Some(loader) => loader.load(name, application_version),
            None => return,
        };
        match result {
            Ok(defs) => {
                for def in defs {
                    let register = Register::new(
                        def.id,
                        def.name,
                        src,
                        def.direction,
                        def.var_type,
                        def.source,
                        def.deref_depth,
                        def.offset,
                    );
                    let key = register.key();
                    if self.registers.insert(register) {
                        self.events.emit(Event::RegisterAdded(key));
                    } else {
                        log::warn!("catalog for cpu {src} repeats register {key}");
                    }
                }
            }
            Err(err) => {
                log::warn!("no register catalog for cpu {src}: {err}");
                self.events.emit(Event::Error(ErrorEvent::LoadFailed {
                    cpu: src,
                    message: err.to_string(),
                }));
            }
        }
    }

    fn handle_query_value(&mut self, src: CpuId, offset: u32, ctrl: u8, value: &[u8]) {
        let key = RegisterKey {
            cpu: src,
            offset,
            direction: codec::direction_from_control(ctrl),
        };
        let Some(register) = self.registers.get_mut(key) else {
            log::warn!("query reply for unknown register ({key})");
            return;
        };
        let Some(decoded) = Value::decode(register.var_type(), value) else {
            log::warn!(
                "cannot decode {} bytes as {} for {key}",
                value.len(),
                register.var_type()
            );
            return;
        };
        // Query replies carry no sample time; the last streamed timestamp
        // stays in place.
        if register.publish(decoded, None) {
            self.events.emit(Event::ValueChanged {
                register: key,
                value: decoded,
                timestamp: None,
            });
        }
    }

    fn handle_channel_data(&mut self, src: CpuId, time: u32, mask: u16, values: Vec<u8>) {
        // Collect the active slots before touching any register, highest
        // slot first: the stream carries values in slot order, so the last
        // value in the payload belongs to the highest masked slot.
        let mut work = Vec::new();
        let mut undecodable_slot = None;
        {
            let Some(cpu) = self.cpus.get(src) else {
                return;
            };
            let channels = cpu.debug_channels();
            if (mask as usize) >> channels.len() != 0 {
                log::warn!(
                    "cpu {src} masked channels beyond its {} active slots",
                    channels.len()
                );
            }
            for slot in (0..channels.len()).rev() {
                if mask & (1u16 << slot) == 0 {
                    continue;
                }
                let key = channels[slot];
                let size = self
                    .registers
                    .get(key)
                    .and_then(|reg| cpu.type_size(reg.var_type()));
                match size {
                    Some(size) => work.push((key, size as usize)),
                    None => {
                        undecodable_slot = Some(slot);
                        break;
                    }
                }
            }
        }
        if let Some(slot) = undecodable_slot {
            log::warn!("no decodable size for channel {slot} of cpu {src}");
            self.record_invalid(src);
            return;
        }

        let mut remaining = values;
        let timestamp = Some(time as u64);
        for (key, size) in work {
            if remaining.len() < size {
                log::warn!("channel data from cpu {src} is shorter than its mask claims");
                self.record_invalid(src);
                return;
            }
            let value_bytes = remaining.split_off(remaining.len() - size);
            let Some(register) = self.registers.get_mut(key) else {
                continue;
            };
            let Some(decoded) = Value::decode(register.var_type(), &value_bytes) else {
                log::warn!("cannot decode channel sample for {key}");
                continue;
            };
            if register.publish(decoded, timestamp) {
                self.events.emit(Event::ValueChanged {
                    register: key,
                    value: decoded,
                    timestamp,
                });
            }
        }
    }

    // --- Helpers --------------------------------------------------------

    fn queue(&mut self, destination: CpuId, payload: &[u8]) {
        let frame = self.framer.encode_frame(destination.0, payload);
        self.outbox.push_back(frame);
    }

    fn check_destination(&self, cpu: CpuId) -> Result<(), DebugError> {
        if cpu.is_broadcast() || self.cpus.contains(cpu) {
            Ok(())
        } else {
            Err(DebugError::UnknownCpu(cpu))
        }
    }

    /// Wire parameters of a register: offset, control byte and the value
    /// width its CPU reported for the register's type.
    fn register_wire_params(&self, key: RegisterKey) -> Result<(u32, u8, u8), DebugError> {
        let register = self
            .registers
            .get(key)
            .ok_or(DebugError::UnknownRegister(key))?;
        let cpu = self
            .cpus
            .get(key.cpu)
            .ok_or(DebugError::UnknownCpu(key.cpu))?;
        let size = cpu
            .type_size(register.var_type())
            .ok_or(DebugError::UnknownTypeSize {
                cpu: key.cpu,
                var_type: register.var_type(),
            })?;
        let ctrl = codec::encode_control(
            register.direction(),
            register.source(),
            register.deref_depth(),
        );
        Ok((register.offset(), ctrl, size.min(u8::MAX as u32) as u8))
    }

    fn record_invalid(&mut self, src: CpuId) {
        match self.cpus.get_mut(src) {
            Some(cpu) => cpu.record_invalid(),
            None => self.framer.record_unattributed(),
        }
    }
}

impl Default for DebugClient {
    fn default() -> Self {
        DebugClient::new()
    }
}
