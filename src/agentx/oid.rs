//! OID: ordered sequence of sub-identifiers.
//!
//! Grounded in `original_source/snmpagent/snmp_value.h`'s `OID` struct
//! (`nSubid`/`prefix`/`include`/`reserved` header plus a `u32` array) and
//! `snmp_pdu.cpp`'s OID (de)serialization.

/// `Vec<u32>` component vector; total order is the lexicographic order
/// over components.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(pub Vec<u32>);

impl Oid {
    pub fn new(components: impl Into<Vec<u32>>) -> Self {
        Oid(components.into())
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// The zero-length OID used as a range's `end` to mean "single OID
    /// lookup".
    pub fn empty() -> Self {
        Oid(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `prefix ++ suffix`, e.g. the agent's registered prefix followed by
    /// a value's own suffix ("OID = prefix vector ... ++
    /// value-specific suffix").
    pub fn joined(prefix: &Oid, suffix: &[u32]) -> Self {
        let mut v = prefix.0.clone();
        v.extend_from_slice(suffix);
        Oid(v)
    }

    /// Wire form: `u8 n_subids, u8 prefix_hint, u8 include, u8 reserved`,
    /// then `n_subids` little-endian `u32`s.
    /// `prefix_hint` is always written as `4` by this crate: the RFC 2741
    /// OID-compression convention where `4` means "the OID begins with
    /// the implied `1.3.6.1.4` enterprise branch, and the subid array
    /// that follows is everything after it" — exactly how this
    /// subagent's stored `agent_prefix` values are shaped.
    pub fn encode(&self, include: bool, out: &mut Vec<u8>) {
        out.push(self.0.len() as u8);
        out.push(4); // prefix_hint
        out.push(include as u8);
        out.push(0); // reserved
        for sub in &self.0 {
            out.extend_from_slice(&sub.to_le_bytes());
        }
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.0.len() * 4
    }

    /// Decode a wire-form OID from `data`, returning `(oid, include,
    /// bytes_consumed)`.
    pub fn decode(data: &[u8]) -> Option<(Oid, bool, usize)> {
        if data.len() < 4 {
            return None;
        }
        let n_subids = data[0] as usize;
        let include = data[2] != 0;
        let needed = 4 + n_subids * 4;
        if data.len() < needed {
            return None;
        }
        let mut components = Vec::with_capacity(n_subids);
        for i in 0..n_subids {
            let off = 4 + i * 4;
            components.push(u32::from_le_bytes(data[off..off + 4].try_into().unwrap()));
        }
        Some((Oid(components), include, needed))
    }
}

impl std::fmt::Debug for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "]")
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl From<Vec<u32>> for Oid {
    fn from(v: Vec<u32>) -> Self {
        Oid(v)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(v: [u32; N]) -> Self {
        Oid(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicographic_order_matches_components() {
        let a = Oid::from([1, 3, 6, 1]);
        let b = Oid::from([1, 3, 6, 2]);
        let c = Oid::from([1, 3, 6, 1, 0]);
        assert!(a < b);
        assert!(a < c); // shorter prefix sorts first, same as Vec<u32>'s Ord
    }

    #[test]
    fn round_trips_through_wire_form() {
        let oid = Oid::from([1, 3, 6, 1, 4, 1, 38693, 5, 1, 1]);
        let mut out = Vec::new();
        oid.encode(true, &mut out);
        assert_eq!(out.len(), oid.encoded_len());
        let (decoded, include, consumed) = Oid::decode(&out).expect("decode");
        assert_eq!(decoded, oid);
        assert!(include);
        assert_eq!(consumed, out.len());
    }
}
