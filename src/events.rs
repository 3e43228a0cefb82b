//! Fan-out of protocol happenings to whoever is listening.
//!
//! Subscribers hold the receiving half of an unbounded channel. The engine
//! runs on a single thread, so events generated by one inbound frame arrive
//! at every subscriber in the order they were generated. A subscriber that
//! dropped its receiver is pruned on the next broadcast.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::cpu::CpuId;
use crate::presentation::WriteStatus;
use crate::register::RegisterKey;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A GetVersion reply arrived from an id the registry did not know.
    CpuDiscovered(CpuId),
    /// The catalog loader produced a register for a freshly discovered CPU.
    RegisterAdded(RegisterKey),
    /// A query reply or channel sample changed a register's value. The
    /// timestamp is present only for streamed samples.
    ValueChanged {
        register: RegisterKey,
        value: Value,
        timestamp: Option<u64>,
    },
    /// Free-form text pushed by a target.
    DebugString { cpu: CpuId, text: String },
    Error(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorEvent {
    /// A write was acknowledged with a non-ok status.
    WriteStatus { cpu: CpuId, status: WriteStatus },
    /// The register catalog for a discovered CPU could not be loaded. The
    /// CPU stays usable for raw queries.
    LoadFailed { cpu: CpuId, message: String },
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe(&mut self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, event: Event) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
