use thiserror::Error;

use crate::cpu::CpuId;
use crate::register::RegisterKey;
use crate::value::VariableType;

/// The error type for request-side operations.
///
/// Inbound problems (malformed frames, unknown registers, write failures)
/// never surface here; they are counted, logged or published as events, and
/// the stream keeps flowing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DebugError {
    #[error("not connected")]
    NotConnected,

    #[error("no cpu with id {0} has been discovered")]
    UnknownCpu(CpuId),

    #[error("no register known for {0}")]
    UnknownRegister(RegisterKey),

    #[error("cpu {cpu} has not reported a size for {var_type}")]
    UnknownTypeSize { cpu: CpuId, var_type: VariableType },

    #[error("all {max} debug-channel slots of cpu {cpu} are taken")]
    NoChannelSlot { cpu: CpuId, max: usize },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
