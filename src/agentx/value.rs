//! Typed OID values and their wire serialization.
//!
//! Grounded in `original_source/snmpagent/snmp_value.{h,cpp}`,
//! `val_integer64.h` (the `Counter64`/`Gauge32` style wrapper around a
//! polled numeric getter) and `val_string.h` (the `OctetString` wrapper).
//! The original's `SnmpValInf::IsDataReady` always returns `true` in
//! compiled code, with an asynchronous "data becomes ready later" branch
//! present but disabled (this module, Open Questions) — `OidValue` keeps
//! that shape: [`OidValue::is_ready`] always answers `true` here.

use std::sync::{Arc, Weak};

use super::oid::Oid;

pub const TYPE_INTEGER: u16 = 2;
pub const TYPE_OCTET_STRING: u16 = 4;
pub const TYPE_COUNTER32: u16 = 65;
pub const TYPE_GAUGE32: u16 = 66;
pub const TYPE_COUNTER64: u16 = 70;
pub const TYPE_NO_SUCH_OBJECT: u16 = 128;
pub const TYPE_END_OF_MIB_VIEW: u16 = 130;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariantKind {
    Integer,
    OctetString,
    Counter32,
    Gauge32,
    Counter64,
}

impl VariantKind {
    pub fn type_tag(self) -> u16 {
        match self {
            VariantKind::Integer => TYPE_INTEGER,
            VariantKind::OctetString => TYPE_OCTET_STRING,
            VariantKind::Counter32 => TYPE_COUNTER32,
            VariantKind::Gauge32 => TYPE_GAUGE32,
            VariantKind::Counter64 => TYPE_COUNTER64,
        }
    }
}

/// Where an [`OidValue`] reads its live content at serialization time
/// ("both are polled at serialization time; no callback
/// channel is required").
pub enum ValueSource {
    /// `CounterSource::get_named_counter(name)`.
    Named(String),
    /// `CounterSource::get_tick(id)`.
    Tick(u32),
    /// A constant, for values that aren't backed by the storage engine
    /// (e.g. the subagent's own uptime-independent identity strings).
    Fixed(Vec<u8>),
}

/// The narrow interface to the embedded storage engine.
pub trait CounterSource: Send + Sync {
    fn get_named_counter(&self, name: &str) -> Option<u64>;
    fn get_tick(&self, id: u32) -> Option<u64>;
}

/// A typed value identified by `prefix ++ suffix`.
pub struct OidValue {
    suffix: Oid,
    kind: VariantKind,
    source: ValueSource,
    counter_source: Weak<dyn CounterSource>,
}

impl OidValue {
    pub fn new(suffix: Oid, kind: VariantKind, source: ValueSource, counter_source: &Arc<dyn CounterSource>) -> Self {
        OidValue { suffix, kind, source, counter_source: Arc::downgrade(counter_source) }
    }

    /// A value with no storage-engine backing at all, for constants.
    pub fn fixed(suffix: Oid, kind: VariantKind, bytes: Vec<u8>) -> Self {
        OidValue { suffix, kind, source: ValueSource::Fixed(bytes), counter_source: Weak::new() }
    }

    pub fn suffix(&self) -> &Oid {
        &self.suffix
    }

    pub fn kind(&self) -> VariantKind {
        self.kind
    }

    /// Always `true` in this crate's MVP profile; see the module docs.
    pub fn is_ready(&self) -> bool {
        true
    }

    fn current_u64(&self) -> Option<u64> {
        match &self.source {
            ValueSource::Named(name) => {
                self.counter_source.upgrade().and_then(|s| s.get_named_counter(name))
            }
            ValueSource::Tick(id) => self.counter_source.upgrade().and_then(|s| s.get_tick(*id)),
            ValueSource::Fixed(_) => None,
        }
    }

    /// Serialize a variable binding: `u16 type, u16 reserved, OID wire
    /// form(prefix ++ suffix), then type-specific value`. A
    /// counter source that has been dropped, or a named/tick lookup miss,
    /// degrades to `noSuchObject` rather than a zero value — matching
    /// this crate's "lookup miss is not an error" philosophy extended to
    /// a stale value.
    pub fn serialize(&self, prefix: &Oid, out: &mut Vec<u8>) {
        let oid = Oid::joined(prefix, &self.suffix.0);
        match &self.source {
            ValueSource::Fixed(bytes) => self.serialize_with(&oid, bytes.clone(), out),
            _ => match self.current_u64() {
                Some(v) => {
                    let bytes = match self.kind {
                        VariantKind::Integer | VariantKind::Counter32 | VariantKind::Gauge32 => {
                            (v as u32).to_le_bytes().to_vec()
                        }
                        VariantKind::Counter64 => v.to_le_bytes().to_vec(),
                        VariantKind::OctetString => v.to_string().into_bytes(),
                    };
                    self.serialize_with(&oid, bytes, out)
                }
                None => serialize_sentinel(&oid, TYPE_NO_SUCH_OBJECT, out),
            },
        }
    }

    fn serialize_with(&self, oid: &Oid, value_bytes: Vec<u8>, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.kind.type_tag().to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        oid.encode(false, out);
        match self.kind {
            VariantKind::OctetString => super::wire::encode_string(&value_bytes, out),
            VariantKind::Counter64 => {
                out.extend_from_slice(&value_bytes);
            }
            _ => out.extend_from_slice(&value_bytes),
        }
    }
}

/// Serialize a `noSuchObject`/`endOfMibView` sentinel binding: the type
/// tag plus the identifier OID and no value bytes ("append
/// a `noSuchObject` variable binding with `start`'s identifier").
pub fn serialize_sentinel(oid: &Oid, type_tag: u16, out: &mut Vec<u8>) {
    out.extend_from_slice(&type_tag.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    oid.encode(false, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource;
    impl CounterSource for FakeSource {
        fn get_named_counter(&self, name: &str) -> Option<u64> {
            (name == "keys.read").then_some(42)
        }
        fn get_tick(&self, id: u32) -> Option<u64> {
            (id == 7).then_some(99)
        }
    }

    #[test]
    fn named_counter_serializes_as_counter64() {
        let source: Arc<dyn CounterSource> = Arc::new(FakeSource);
        let value = OidValue::new(
            Oid::from([1, 1]),
            VariantKind::Counter64,
            ValueSource::Named("keys.read".into()),
            &source,
        );
        let prefix = Oid::from([1, 3, 6, 1, 4, 1, 38693]);
        let mut out = Vec::new();
        value.serialize(&prefix, &mut out);
        assert_eq!(u16::from_le_bytes(out[0..2].try_into().unwrap()), TYPE_COUNTER64);
        let (oid, _, consumed) = Oid::decode(&out[4..]).unwrap();
        assert_eq!(oid, Oid::from([1, 3, 6, 1, 4, 1, 38693, 1, 1]));
        let value_bytes = &out[4 + consumed..];
        assert_eq!(u64::from_le_bytes(value_bytes.try_into().unwrap()), 42);
    }

    #[test]
    fn dropped_counter_source_degrades_to_no_such_object() {
        let source: Arc<dyn CounterSource> = Arc::new(FakeSource);
        let value = OidValue::new(Oid::from([1, 2]), VariantKind::Counter32, ValueSource::Tick(7), &source);
        drop(source);
        let mut out = Vec::new();
        value.serialize(&Oid::from([1]), &mut out);
        assert_eq!(u16::from_le_bytes(out[0..2].try_into().unwrap()), TYPE_NO_SUCH_OBJECT);
    }
}
