//! Packet builders and the handshake request/response buffer.
//!
//! Grounded in `original_source/snmpagent/snmp_openpdu.cpp`,
//! `snmp_registerpdu.cpp`, `snmp_closepdu.cpp`, and
//! `snmp_getresponse.cpp`/`snmp_responsepdu.h` for the payload shapes,
//! and `snmp_pdu.cpp`'s `PduInboundBuf` for the two-phase header-then-
//! payload growth wrapped here as [`FramedFrame`].

use std::io;

use crate::io::{adjust_iovecs, FramedReadBuf, ReadBuf, WriteBuf};
use crate::rr::RequestBuf;

use super::oid::Oid;
use super::value::{serialize_sentinel, OidValue, TYPE_END_OF_MIB_VIEW, TYPE_NO_SUCH_OBJECT};
use super::wire::{self, PduHeader, HEADER_LEN};

/// Wraps [`FramedReadBuf`] with the header-reveals-payload-length growth
/// this module describes, kept out of `io` because it is specific to
/// this wire format's header layout.
pub struct FramedFrame {
    inner: FramedReadBuf,
}

impl FramedFrame {
    pub fn new() -> Self {
        FramedFrame { inner: FramedReadBuf::new(HEADER_LEN) }
    }

    pub fn header(&self) -> Option<PduHeader> {
        self.inner.is_header_complete().then(|| PduHeader::decode(self.inner.header())).flatten()
    }

    pub fn payload(&self) -> &[u8] {
        self.inner.payload()
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl Default for FramedFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadBuf for FramedFrame {
    fn read_iovecs(&mut self) -> Vec<libc::iovec> {
        self.inner.read_iovecs()
    }

    fn bytes_read(&self) -> usize {
        self.inner.bytes_read()
    }

    fn mark_read(&mut self, n: usize) {
        self.inner.mark_read(n);
        if let Some(header) = self.header() {
            self.inner.set_payload_len(header.payload_len as usize);
        }
    }

    fn required_minimum(&self) -> usize {
        self.inner.required_minimum()
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// The Open/Register/Close handshake buffer: written out once, then
/// reused in place as the response read buffer — request and response
/// share one buffer.
pub struct Frame {
    out: Vec<u8>,
    sent: usize,
    inbound: FramedFrame,
}

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Frame { out: bytes, sent: 0, inbound: FramedFrame::new() }
    }

    pub fn response_header(&self) -> Option<PduHeader> {
        self.inbound.header()
    }

    pub fn response_payload(&self) -> &[u8] {
        self.inbound.payload()
    }
}

impl WriteBuf for Frame {
    fn write_iovecs(&mut self) -> Vec<libc::iovec> {
        let mut v = vec![libc::iovec { iov_base: self.out.as_mut_ptr().cast(), iov_len: self.out.len() }];
        adjust_iovecs(&mut v, self.sent);
        v
    }

    fn bytes_written(&self) -> usize {
        self.sent
    }

    fn mark_written(&mut self, n: usize) {
        self.sent += n;
    }

    fn target_end(&self) -> usize {
        self.out.len()
    }
}

impl ReadBuf for Frame {
    fn read_iovecs(&mut self) -> Vec<libc::iovec> {
        self.inbound.read_iovecs()
    }

    fn bytes_read(&self) -> usize {
        self.inbound.bytes_read()
    }

    fn mark_read(&mut self, n: usize) {
        self.inbound.mark_read(n);
    }

    fn required_minimum(&self) -> usize {
        self.inbound.required_minimum()
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl RequestBuf for Frame {
    fn reset_for_response(&mut self) {
        self.inbound.reset();
    }
}

fn frame_bytes(header: PduHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = header.encode_vec();
    out.extend_from_slice(payload);
    out
}

/// `Open` payload: `(timeout=0, priority=0, range-subid=0, reserved=0) +
/// OID(agent_prefix) + length-prefixed(agent_name, padded)`.
pub fn build_open(prefix: &Oid, agent_name: &str, transaction_id: u32, packet_id: u32) -> Frame {
    let mut payload = vec![0u8, 0u8, 0u8, 0u8]; // timeout, priority, range_subid, reserved
    prefix.encode(false, &mut payload);
    wire::encode_string(agent_name.as_bytes(), &mut payload);

    let header = PduHeader {
        version: 1,
        pdu_type: wire::PDU_OPEN,
        flags: 0,
        reserved: 0,
        session_id: 0,
        transaction_id,
        packet_id,
        payload_len: payload.len() as u32,
    }
    .with_request_tag(wire::PDU_OPEN);

    Frame::new(frame_bytes(header, &payload))
}

/// `Register` payload: same `(timeout, priority, range_subid, reserved)
/// + OID` shape as `Open`, addressed with the session id the `Open`
/// response returned.
pub fn build_register(prefix: &Oid, session_id: u32, transaction_id: u32, packet_id: u32) -> Frame {
    let mut payload = vec![0u8, 0u8, 0u8, 0u8];
    prefix.encode(false, &mut payload);

    let header = PduHeader {
        version: 1,
        pdu_type: wire::PDU_REGISTER,
        flags: 0,
        reserved: 0,
        session_id,
        transaction_id,
        packet_id,
        payload_len: payload.len() as u32,
    }
    .with_request_tag(wire::PDU_REGISTER);

    Frame::new(frame_bytes(header, &payload))
}

/// `Close` payload: a single reason byte (grounded in
/// `snmp_closepdu.cpp`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseReason {
    Other = 1,
    ParseError = 2,
    ProtocolError = 3,
    Timeouts = 4,
    Shutdown = 5,
}

pub fn build_close(session_id: u32, transaction_id: u32, packet_id: u32, reason: CloseReason) -> Vec<u8> {
    let payload = vec![reason as u8, 0, 0, 0];
    let header = PduHeader {
        version: 1,
        pdu_type: wire::PDU_CLOSE,
        flags: 0,
        reserved: 0,
        session_id,
        transaction_id,
        packet_id,
        payload_len: payload.len() as u32,
    }
    .with_request_tag(wire::PDU_CLOSE);
    frame_bytes(header, &payload)
}

/// One `(start, end)` OID range from an inbound `Get`/`GetNext` payload;
/// `end` is the empty OID meaning "single OID lookup".
pub struct OidRange {
    pub start: Oid,
    pub end: Oid,
}

/// Parse every OID range out of a `Get`/`GetNext` payload (the AgentX
/// SearchRange list: a 4-byte non-default-context-free prefix this crate
/// always treats as absent, per this crate's non-goals, followed by pairs
/// of wire-form OIDs).
pub fn parse_ranges(payload: &[u8]) -> io::Result<Vec<OidRange>> {
    let mut ranges = Vec::new();
    let mut offset = 0;
    while offset < payload.len() {
        let (start, _include, n) = Oid::decode(&payload[offset..])
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "truncated search range start"))?;
        offset += n;
        let (end, _include, n) = Oid::decode(&payload[offset..])
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "truncated search range end"))?;
        offset += n;
        ranges.push(OidRange { start, end });
    }
    Ok(ranges)
}

/// Build a `Response` packet answering `Get`/`GetNext` ranges against
/// `registry`, per this crate's per-range dispatch rules.
pub fn build_response(
    header: &PduHeader,
    is_get_next: bool,
    ranges: &[OidRange],
    prefix: &Oid,
    registry: &super::registry::Registry,
) -> Vec<u8> {
    let mut bindings = Vec::new();
    for range in ranges {
        if is_get_next {
            match registry.get_next(&range.start) {
                Some((_, value)) => value.serialize(prefix, &mut bindings),
                None => serialize_sentinel(&range.start, TYPE_END_OF_MIB_VIEW, &mut bindings),
            }
        } else {
            match registry.get(&range.start) {
                Some(value) => value.serialize(prefix, &mut bindings),
                None => serialize_sentinel(&range.start, TYPE_NO_SUCH_OBJECT, &mut bindings),
            }
        }
    }

    let response_header = PduHeader {
        version: header.version,
        pdu_type: wire::PDU_RESPONSE,
        flags: header.flags,
        reserved: 0,
        session_id: header.session_id,
        transaction_id: header.transaction_id,
        packet_id: header.packet_id,
        payload_len: (8 + bindings.len()) as u32,
    };

    let mut out = response_header.encode_vec();
    // Response-specific prefix: sysUpTime (u32, always 0 — this subagent
    // does not track agent uptime) + error (u16) + error_index (u16),
    // per `snmp_responsepdu.h`.
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&wire::ERROR_NO_ERROR.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&bindings);
    out
}

/// A bare `Response` header + empty-body for `unsupportedContext`
/// ("Flag bit 3 set on a request means 'non-default
/// context'... must be answered with `unsupportedContext`").
pub fn build_unsupported_context_response(header: &PduHeader) -> Vec<u8> {
    let response_header = PduHeader {
        version: header.version,
        pdu_type: wire::PDU_RESPONSE,
        flags: header.flags,
        reserved: 0,
        session_id: header.session_id,
        transaction_id: header.transaction_id,
        packet_id: header.packet_id,
        payload_len: 8,
    };
    let mut out = response_header.encode_vec();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&wire::ERROR_UNSUPPORTED_CONTEXT.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentx::registry::Registry;
    use crate::agentx::value::{CounterSource, ValueSource, VariantKind};
    use std::sync::Arc;

    struct FakeSource;
    impl CounterSource for FakeSource {
        fn get_named_counter(&self, _name: &str) -> Option<u64> {
            Some(7)
        }
        fn get_tick(&self, _id: u32) -> Option<u64> {
            None
        }
    }

    #[test]
    fn build_open_matches_scenario_4_shape() {
        let prefix = Oid::from([1, 38693, 1, 3]);
        let frame = build_open(&prefix, "Tester", 1, 0x00_00_00_05);
        let header = PduHeader::decode(&frame.out).unwrap();
        assert_eq!(header.pdu_type, wire::PDU_OPEN);
        assert_eq!(header.session_id, 0);
        assert_eq!(header.request_tag(), wire::PDU_OPEN);

        let payload = &frame.out[HEADER_LEN..];
        assert_eq!(payload[0..4], [0, 0, 0, 0]);
        assert_eq!(payload[4 + 1], 4, "prefix_hint must mark the enterprise-OID compression");
        let (oid, _, n) = Oid::decode(&payload[4..]).unwrap();
        assert_eq!(oid, prefix);
        let (name, _) = wire::decode_string(&payload[4 + n..]).unwrap();
        assert_eq!(name, b"Tester");
    }

    #[test]
    fn get_next_at_edge_matches_scenario_5() {
        let mut registry = Registry::new();
        let source: Arc<dyn CounterSource> = Arc::new(FakeSource);
        let prefix = Oid::from([1, 3, 6, 1, 4, 1, 38693, 5, 1]);
        registry
            .register(
                &prefix,
                OidValue::new(Oid::from([1]), VariantKind::Counter64, ValueSource::Named("a".into()), &source),
            )
            .unwrap();
        registry
            .register(
                &prefix,
                OidValue::fixed(Oid::from([2]), VariantKind::OctetString, b"x".to_vec()),
            )
            .unwrap();

        let header = PduHeader {
            version: 1,
            pdu_type: wire::PDU_GET_NEXT,
            flags: 0,
            reserved: 0,
            session_id: 42,
            transaction_id: 1,
            packet_id: 1,
            payload_len: 0,
        };
        let start = Oid::from([1, 3, 6, 1, 4, 1, 38693, 5, 1, 1]);
        let ranges = vec![OidRange { start, end: Oid::empty() }];
        let response = build_response(&header, true, &ranges, &prefix, &registry);

        let response_payload = &response[HEADER_LEN + 8..];
        assert_eq!(u16::from_le_bytes(response_payload[0..2].try_into().unwrap()), super::super::value::TYPE_OCTET_STRING);
    }
}
