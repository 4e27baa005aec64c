//! Lexicographically ordered OID → value registry.
//!
//! Grounded in `original_source/snmpagent/snmp_agent.cpp`'s value set
//! (a `std::map<OID, SnmpValInf*>`) and `stats_table.cpp`'s
//! `StatsTable::AddTable` overloads, generalized here as
//! [`TableBinder`].

use std::collections::BTreeMap;
use std::sync::Arc;

use super::oid::Oid;
use super::value::{CounterSource, OidValue, ValueSource, VariantKind};
use crate::error::RegistryError;

/// Ordered set of registered values, keyed by the value's *full* OID
/// (`prefix ++ suffix`). Invariant: once registered, an OID is immutable
/// and two distinct values never share one.
#[derive(Default)]
pub struct Registry {
    values: BTreeMap<Oid, OidValue>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// `register(value)`: first-registered value wins on conflict
    /// ; the caller learns of the conflict via the
    /// returned `Err`, and it is also logged.
    pub fn register(&mut self, prefix: &Oid, value: OidValue) -> Result<(), RegistryError> {
        let full = Oid::joined(prefix, value.suffix().components());
        if self.values.contains_key(&full) {
            log::error!("duplicate oid registration: {full:?}");
            return Err(RegistryError::DuplicateOid(full));
        }
        self.values.insert(full, value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `Get`: exact match, else the caller sends `noSuchObject` (this crate
    /// §4.7).
    pub fn get(&self, oid: &Oid) -> Option<&OidValue> {
        self.values.get(oid)
    }

    /// `GetNext`: the strict upper bound under lexicographic order, else
    /// the caller sends `endOfMibView` (this module universal
    /// invariant: "the unique OID `b` with `a < b` and no `c` strictly
    /// between").
    pub fn get_next(&self, oid: &Oid) -> Option<(&Oid, &OidValue)> {
        use std::ops::Bound::Excluded;
        self.values.range((Excluded(oid.clone()), std::ops::Bound::Unbounded)).next()
    }
}

/// Walks a caller-supplied list of `(name, counter_kind)` pairs and
/// registers one [`OidValue`] per entry under a per-table sub-OID, so
/// this crate stays agnostic of any specific storage engine's counter
/// names (generalizing `StatsTable::AddTable`).
pub struct TableBinder<'a> {
    registry: &'a mut Registry,
    prefix: &'a Oid,
    table_suffix: Vec<u32>,
    source: Arc<dyn CounterSource>,
}

impl<'a> TableBinder<'a> {
    pub fn new(
        registry: &'a mut Registry,
        prefix: &'a Oid,
        table_suffix: impl Into<Vec<u32>>,
        source: Arc<dyn CounterSource>,
    ) -> Self {
        TableBinder { registry, prefix, table_suffix: table_suffix.into(), source }
    }

    /// Register `(name, index, kind)` triples, one value per entry, at
    /// `prefix ++ table_suffix ++ [index]`, reading the live value from
    /// `CounterSource::get_named_counter(name)`.
    pub fn bind_named(
        &mut self,
        entries: impl IntoIterator<Item = (&'static str, u32, VariantKind)>,
    ) -> Result<(), RegistryError> {
        for (name, index, kind) in entries {
            let mut suffix = self.table_suffix.clone();
            suffix.push(index);
            let value = OidValue::new(Oid::from(suffix), kind, ValueSource::Named(name.into()), &self.source);
            self.registry.register(self.prefix, value)?;
        }
        Ok(())
    }

    /// Register `(ticker_id, index, kind)` triples, reading the live
    /// value from `CounterSource::get_tick(id)`.
    pub fn bind_ticks(
        &mut self,
        entries: impl IntoIterator<Item = (u32, u32, VariantKind)>,
    ) -> Result<(), RegistryError> {
        for (ticker_id, index, kind) in entries {
            let mut suffix = self.table_suffix.clone();
            suffix.push(index);
            let value = OidValue::new(Oid::from(suffix), kind, ValueSource::Tick(ticker_id), &self.source);
            self.registry.register(self.prefix, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentx::value::VariantKind;

    struct FakeSource;
    impl CounterSource for FakeSource {
        fn get_named_counter(&self, _name: &str) -> Option<u64> {
            Some(1)
        }
        fn get_tick(&self, _id: u32) -> Option<u64> {
            Some(2)
        }
    }

    #[test]
    fn get_next_finds_strict_upper_bound() {
        let mut registry = Registry::new();
        let source: Arc<dyn CounterSource> = Arc::new(FakeSource);
        let prefix = Oid::from([1, 3, 6, 1, 4, 1, 38693, 5]);
        registry
            .register(
                &prefix,
                OidValue::new(Oid::from([1, 1]), VariantKind::Counter64, ValueSource::Named("a".into()), &source),
            )
            .unwrap();
        registry
            .register(
                &prefix,
                OidValue::new(Oid::from([1, 2]), VariantKind::OctetString, ValueSource::Named("b".into()), &source),
            )
            .unwrap();

        let start = Oid::joined(&prefix, &[1, 1]);
        let (next_oid, _) = registry.get_next(&start).expect("next exists");
        assert_eq!(*next_oid, Oid::joined(&prefix, &[1, 2]));

        let last = Oid::joined(&prefix, &[1, 2]);
        assert!(registry.get_next(&last).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = Registry::new();
        let source: Arc<dyn CounterSource> = Arc::new(FakeSource);
        let prefix = Oid::from([1]);
        let v1 = OidValue::new(Oid::from([1]), VariantKind::Integer, ValueSource::Named("a".into()), &source);
        let v2 = OidValue::new(Oid::from([1]), VariantKind::Integer, ValueSource::Named("a".into()), &source);
        registry.register(&prefix, v1).unwrap();
        assert!(registry.register(&prefix, v2).is_err());
        assert_eq!(registry.len(), 1);
    }
}
