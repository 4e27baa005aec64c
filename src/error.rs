//! Error taxonomy.
//!
//! Construction errors (§7.1 of the design notes) surface as plain
//! `std::io::Error` from the constructor that failed, matching
//! `mio::deprecated::EventLoop::configured` returning `io::Result`. Everything
//! past construction — system-call failures on an attached handle,
//! protocol violations in the inbound parser, and registry conflicts —
//! is collected here so the subagent engine can log-and-edge instead of
//! unwinding.

use std::io;

use crate::agentx::oid::Oid;

/// Top-level error type for operations above the reactor's own
/// construction calls.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors from parsing or dispatching AgentX frames (§7.3).
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown pdu type code {0}")]
    UnknownPduType(u8),

    #[error("response packet_id {0:#x} does not match any outstanding request")]
    UnmatchedResponse(u32),

    #[error("payload length {declared} exceeds maximum frame size {max}")]
    PayloadTooLarge { declared: u32, max: u32 },

    #[error("truncated frame: need at least {need} bytes, got {have}")]
    Truncated { need: usize, have: usize },

    #[error("non-default context is not supported")]
    UnsupportedContext,

    #[error("master returned error code {0} for transaction {1}")]
    MasterError(u16, u32),
}

/// Errors from mutating the OID registry (§7.4). A lookup miss is *not*
/// an error — see `agentx::registry::Registry::lookup`.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate oid registration: {0:?}")]
    DuplicateOid(Oid),
}
