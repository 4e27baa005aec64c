//! End-to-end subagent handshake and steady-state dispatch, this module
//! scenarios 4 and 5, driven against a real loopback socket standing in
//! for the master agent.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use agentx_kvstats::agentx::value::TYPE_COUNTER64;
use agentx_kvstats::agentx::{wire, AgentxConfig, CounterSource, Engine, Oid, OidValue, Registry, ValueSource, VariantKind};
use agentx_kvstats::reactor::Reactor;

struct FixedSource;

impl CounterSource for FixedSource {
    fn get_named_counter(&self, name: &str) -> Option<u64> {
        (name == "keys.read").then_some(7)
    }
    fn get_tick(&self, _id: u32) -> Option<u64> {
        None
    }
}

fn read_frame(stream: &mut TcpStream) -> (wire::PduHeader, Vec<u8>) {
    let mut header_bytes = [0u8; wire::HEADER_LEN];
    stream.read_exact(&mut header_bytes).expect("header arrives");
    let header = wire::PduHeader::decode(&header_bytes).expect("header decodes");
    let mut payload = vec![0u8; header.payload_len as usize];
    if !payload.is_empty() {
        stream.read_exact(&mut payload).expect("payload arrives");
    }
    (header, payload)
}

/// A bare `(sysUpTime=0, error=0, error_index=0)` response body, echoing
/// the request's `transaction_id`/`packet_id` (and so its request-tag
/// byte) the way a real AgentX master does.
fn write_handshake_response(stream: &mut TcpStream, request: &wire::PduHeader, session_id: u32) {
    let response_header = wire::PduHeader {
        version: 1,
        pdu_type: wire::PDU_RESPONSE,
        flags: 0,
        reserved: 0,
        session_id,
        transaction_id: request.transaction_id,
        packet_id: request.packet_id,
        payload_len: 8,
    };
    let mut bytes = response_header.encode_vec();
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&wire::ERROR_NO_ERROR.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    stream.write_all(&bytes).expect("write handshake response");
}

#[test]
fn subagent_handshake_then_get_next_at_the_edge() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().unwrap();

    let prefix = Oid::from([1, 3, 6, 1, 4, 1, 38693u32, 5, 1]);
    let source: Arc<dyn CounterSource> = Arc::new(FixedSource);
    let mut registry = Registry::new();
    registry
        .register(
            &prefix,
            OidValue::new(Oid::from([1]), VariantKind::Counter64, ValueSource::Named("keys.read".into()), &source),
        )
        .expect("first registration on an empty registry cannot collide");

    let mut config = AgentxConfig::new(prefix.clone(), "Tester");
    config.master_addr = addr;
    let engine = Engine::new(config, registry);

    let mut reactor = Reactor::new().expect("reactor");
    reactor.attach(Box::new(engine));
    let handle = reactor.handle().expect("handle");
    let worker = reactor.run_threaded();

    let (mut stream, _) = listener.accept().expect("accept");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    // Scenario 4: the exact Open packet shape, byte for byte.
    let (open_header, open_payload) = read_frame(&mut stream);
    assert_eq!(open_header.pdu_type, wire::PDU_OPEN);
    assert_eq!(open_header.session_id, 0);
    assert_eq!(open_header.request_tag(), wire::PDU_OPEN);
    assert_eq!(&open_payload[0..4], &[0, 0, 0, 0]);
    let (oid, _, n) = Oid::decode(&open_payload[4..]).expect("oid decodes");
    assert_eq!(oid, prefix);
    let (name, _) = wire::decode_string(&open_payload[4 + n..]).expect("name decodes");
    assert_eq!(name, b"Tester");

    // Crafted Open Response with session_id 42, per scenario 4.
    write_handshake_response(&mut stream, &open_header, 42);

    // The engine answers with Register under the newly assigned session.
    let (register_header, register_payload) = read_frame(&mut stream);
    assert_eq!(register_header.pdu_type, wire::PDU_REGISTER);
    assert_eq!(register_header.session_id, 42);
    assert_eq!(register_header.request_tag(), wire::PDU_REGISTER);
    let (register_oid, _, _) = Oid::decode(&register_payload[4..]).expect("oid decodes");
    assert_eq!(register_oid, prefix);

    write_handshake_response(&mut stream, &register_header, 42);

    // Scenario 5: GetNext one past the registry's sole entry, landing
    // exactly on it (the "strict upper bound, at the edge" case).
    let mut request_payload = Vec::new();
    Oid::joined(&prefix, &[0]).encode(false, &mut request_payload);
    Oid::empty().encode(false, &mut request_payload);
    let request_header = wire::PduHeader {
        version: 1,
        pdu_type: wire::PDU_GET_NEXT,
        flags: 0,
        reserved: 0,
        session_id: 42,
        transaction_id: 99,
        packet_id: 7,
        payload_len: request_payload.len() as u32,
    };
    let mut request_bytes = request_header.encode_vec();
    request_bytes.extend_from_slice(&request_payload);
    stream.write_all(&request_bytes).expect("write GetNext request");

    let (response_header, response_payload) = read_frame(&mut stream);
    assert_eq!(response_header.pdu_type, wire::PDU_RESPONSE);
    assert_eq!(response_header.session_id, 42);
    assert_eq!(response_header.transaction_id, 99);
    assert_eq!(response_header.packet_id, 7);

    let bindings = &response_payload[8..];
    let type_tag = u16::from_le_bytes(bindings[0..2].try_into().unwrap());
    assert_eq!(type_tag, TYPE_COUNTER64);
    let (binding_oid, _, consumed) = Oid::decode(&bindings[4..]).expect("oid decodes");
    assert_eq!(binding_oid, Oid::joined(&prefix, &[1]));
    let value_bytes = &bindings[4 + consumed..4 + consumed + 8];
    assert_eq!(u64::from_le_bytes(value_bytes.try_into().unwrap()), 7);

    let _ = handle.stop();
    assert!(worker.join().unwrap_or(false));
}
