//! The subagent protocol engine: framed wire protocol, OID registry, and
//! `Get`/`GetNext` dispatch.
//!
//! Grounded in `original_source/snmpagent/*`: `snmp_agent.{h,cpp}` (the
//! `SnmpAgent` connection lifecycle), `snmp_pdu.{h,cpp}` (header framing),
//! `snmp_value.{h,cpp}`/`val_integer64.h`/`val_string.h` (typed values),
//! and `stats_table.{h,cpp}` (the table-registration helper generalized
//! here as [`registry::TableBinder`]).

pub mod engine;
pub mod oid;
pub mod pdu;
pub mod registry;
pub mod value;
pub mod wire;

pub use engine::{AgentxConfig, CloseReason, CounterSource, Engine};
pub use oid::Oid;
pub use registry::{Registry, TableBinder};
pub use value::{OidValue, ValueSource, VariantKind};
pub use wire::PduHeader;
