//! The 20-byte frame header.
//!
//! Grounded in `original_source/snmpagent/snmp_pdu.h`/`snmp_pdu.cpp`'s
//! header struct and its `Serialize`/`Parse` pair.

pub const HEADER_LEN: usize = 20;

pub const PDU_OPEN: u8 = 1;
pub const PDU_CLOSE: u8 = 2;
pub const PDU_REGISTER: u8 = 3;
pub const PDU_GET: u8 = 5;
pub const PDU_GET_NEXT: u8 = 6;
pub const PDU_RESPONSE: u8 = 18;

pub const ERROR_NO_ERROR: u16 = 0x0000;
pub const ERROR_UNSUPPORTED_CONTEXT: u16 = 0x0106;

/// Flag bit 3: "non-default context".
pub const FLAG_NON_DEFAULT_CONTEXT: u8 = 0b0000_1000;

/// `u8 version, u8 pdu_type, u8 flags, u8 reserved, u32 session_id, u32
/// transaction_id, u32 packet_id, u32 payload_length`, little-endian
/// . The top byte of `packet_id` is repurposed by this
/// subagent as the echoed request-type tag (this module, "Response
/// dispatch").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PduHeader {
    pub version: u8,
    pub pdu_type: u8,
    pub flags: u8,
    pub reserved: u8,
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    pub payload_len: u32,
}

impl PduHeader {
    /// The request-type tag this subagent stashes in `packet_id`'s top
    /// byte so a later `Response` can be demultiplexed without tracking
    /// outstanding requests separately.
    pub fn with_request_tag(mut self, tag: u8) -> Self {
        self.packet_id = (self.packet_id & 0x00FF_FFFF) | ((tag as u32) << 24);
        self
    }

    pub fn request_tag(&self) -> u8 {
        (self.packet_id >> 24) as u8
    }

    pub fn packet_id_low(&self) -> u32 {
        self.packet_id & 0x00FF_FFFF
    }

    pub fn is_non_default_context(&self) -> bool {
        self.flags & FLAG_NON_DEFAULT_CONTEXT != 0
    }

    pub fn encode(&self, out: &mut [u8; HEADER_LEN]) {
        out[0] = self.version;
        out[1] = self.pdu_type;
        out[2] = self.flags;
        out[3] = self.reserved;
        out[4..8].copy_from_slice(&self.session_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.transaction_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.packet_id.to_le_bytes());
        out[16..20].copy_from_slice(&self.payload_len.to_le_bytes());
    }

    pub fn encode_vec(&self) -> Vec<u8> {
        let mut out = [0u8; HEADER_LEN];
        self.encode(&mut out);
        out.to_vec()
    }

    pub fn decode(data: &[u8]) -> Option<PduHeader> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(PduHeader {
            version: data[0],
            pdu_type: data[1],
            flags: data[2],
            reserved: data[3],
            session_id: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            transaction_id: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            packet_id: u32::from_le_bytes(data[12..16].try_into().unwrap()),
            payload_len: u32::from_le_bytes(data[16..20].try_into().unwrap()),
        })
    }
}

/// Pad `len` up to the next multiple of 4 ("all packets pad
/// to a 4-byte boundary").
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

pub fn push_padding(out: &mut Vec<u8>, unpadded_len: usize) {
    let pad = padded_len(unpadded_len) - unpadded_len;
    out.extend(std::iter::repeat(0u8).take(pad));
}

/// Length-prefixed string: `u32 len`, bytes, 0–3 zero pad bytes (this crate
/// §3).
pub fn encode_string(s: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s);
    push_padding(out, s.len());
}

pub fn decode_string(data: &[u8]) -> Option<(Vec<u8>, usize)> {
    if data.len() < 4 {
        return None;
    }
    let len = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let total = 4 + padded_len(len);
    if data.len() < total {
        return None;
    }
    Some((data[4..4 + len].to_vec(), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = PduHeader {
            version: 1,
            pdu_type: PDU_OPEN,
            flags: 0,
            reserved: 0,
            session_id: 0,
            transaction_id: 1,
            packet_id: 7,
            payload_len: 42,
        }
        .with_request_tag(PDU_OPEN);
        let bytes = h.encode_vec();
        assert_eq!(bytes.len(), HEADER_LEN);
        let back = PduHeader::decode(&bytes).unwrap();
        assert_eq!(back, h);
        assert_eq!(back.request_tag(), PDU_OPEN);
        assert_eq!(back.packet_id_low(), 7);
    }

    #[test]
    fn string_round_trips_with_padding() {
        let mut out = Vec::new();
        encode_string(b"Tester", &mut out);
        // "Tester" is 6 bytes -> padded to 8 -> 4 (len) + 8 = 12 total.
        assert_eq!(out.len(), 12);
        let (s, consumed) = decode_string(&out).unwrap();
        assert_eq!(s, b"Tester");
        assert_eq!(consumed, 12);
    }
}
