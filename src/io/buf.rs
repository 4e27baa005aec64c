//! The `ReadBuf`/`WriteBuf` scatter/gather contracts (this module, "Reader/Writer
//! buffer") plus the handful of concrete buffers every layer above `io`
//! needs.
//!
//! Grounded in `original_source/libmevent/reader_writer.h`'s
//! `ReaderWriterBuf` (`ReadIovec`/`ReadLen`/`ReadMinimum`/`WriteIovec`/
//! `WriteLen`/`WriteEnd`/`IsDataReady`) and its `AdjustIovec` helper,
//! which trims a `struct iovec` array in place by however many bytes a
//! previous partial `readv`/`writev` already consumed. `adjust_iovecs`
//! below is that helper, unchanged in behavior.

use std::collections::VecDeque;

/// Contract for data flowing out through a [`super::ReaderWriter`]
/// (this module, "Write side"). A concrete buffer controls its own
/// backing storage; the reader/writer only ever asks for iovecs and
/// reports back how many bytes actually went out.
pub trait WriteBuf: Send {
    /// Iovecs covering the bytes not yet written, adjusted for
    /// `bytes_written` (`ReaderWriterBuf::WriteIovec`, which calls
    /// `AdjustIovec` internally — see [`adjust_iovecs`]).
    fn write_iovecs(&mut self) -> Vec<libc::iovec>;

    fn bytes_written(&self) -> usize;

    /// Record that `n` more bytes were accepted by the kernel.
    fn mark_written(&mut self, n: usize);

    /// Total byte count this buffer will have sent once exhausted.
    fn target_end(&self) -> usize;

    /// Whether this buffer's content is finished and ready to go out
    /// now. A buffer that is not yet ready queues in
    /// [`super::ReaderWriter`]'s pending-write FIFO until it is.
    fn is_data_ready(&self) -> bool {
        true
    }

    /// Register a one-shot callback fired the first time
    /// [`WriteBuf::is_data_ready`] would flip from false to true. The
    /// default no-op is correct for every buffer in this crate's MVP
    /// profile ("the ready predicate is always true; the
    /// asynchronous path is a reserved extension") — only
    /// [`crate::agentx::value::OidValue`]'s reserved async path
    /// overrides it.
    fn add_ready_watcher(&mut self, _watcher: Box<dyn FnOnce() + Send>) {}
}

/// Contract for data flowing in through a [`super::ReaderWriter`]
/// (this module, "Read side"). `'static` so a caller that stashed a
/// concrete buffer behind `Box<dyn ReadBuf>` (e.g. a long-lived
/// [`crate::agentx::pdu::FramedFrame`] the subagent engine re-uses frame
/// after frame) can get it back with [`ReadBuf::as_any_mut`] instead of
/// taking and rebuilding a fresh buffer on every completed frame.
pub trait ReadBuf: Send + 'static {
    /// Iovecs to fill, adjusted for `bytes_read`. May grow the backing
    /// storage on demand (`PduInboundBuf::ReadIovec` in `snmp_pdu.cpp`,
    /// which resizes once the header reveals `payload_length`).
    fn read_iovecs(&mut self) -> Vec<libc::iovec>;

    fn bytes_read(&self) -> usize;

    fn mark_read(&mut self, n: usize);

    /// Bytes needed before the reader/writer emits `READ_DONE`. May grow
    /// as more of the message is parsed (e.g. once a 20-byte header
    /// reveals `payload_length`, `required_minimum` becomes `20 +
    /// payload_length`).
    fn required_minimum(&self) -> usize;

    /// Downcast helper so an owner that knows the concrete type it
    /// installed can recover it from a `Box<dyn ReadBuf>` (see
    /// `agentx::engine`'s steady-state inbound reader).
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Trim `vecs` in place so that, read left to right, the first
/// `processed` bytes they used to describe are skipped. Iovecs fully
/// consumed are left zero-length rather than removed, matching
/// `reader_writer.cpp`'s `AdjustIovec`, so callers that keep a
/// fixed-size iovec array don't need to reallocate.
pub fn adjust_iovecs(vecs: &mut [libc::iovec], mut processed: usize) {
    for vec in vecs.iter_mut() {
        if processed == 0 {
            break;
        }
        if processed < vec.iov_len {
            // SAFETY: the new base stays within the same allocation as
            // the original `iov_base`/`iov_len` pair the caller built.
            vec.iov_base = unsafe { vec.iov_base.add(processed) };
            vec.iov_len -= processed;
            processed = 0;
        } else {
            processed -= vec.iov_len;
            vec.iov_len = 0;
        }
    }
}

/// A write buffer whose entire contents are known up front and
/// immediately ready — the common case for every outbound AgentX packet
/// this crate builds (`Open`/`Register`/`Close`/`Response`). Grounded in
/// how `OpenPDU`/`RegisterPDU`/`ClosePDU` each serialize eagerly in their
/// constructor and only track `m_*Sent` afterward.
pub struct OwnedWriteBuf {
    data: Vec<u8>,
    sent: usize,
}

impl OwnedWriteBuf {
    pub fn new(data: Vec<u8>) -> Self {
        OwnedWriteBuf { data, sent: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl WriteBuf for OwnedWriteBuf {
    fn write_iovecs(&mut self) -> Vec<libc::iovec> {
        let mut vecs = vec![libc::iovec {
            iov_base: self.data.as_mut_ptr().cast(),
            iov_len: self.data.len(),
        }];
        adjust_iovecs(&mut vecs, self.sent);
        vecs
    }

    fn bytes_written(&self) -> usize {
        self.sent
    }

    fn mark_written(&mut self, n: usize) {
        self.sent += n;
    }

    fn target_end(&self) -> usize {
        self.data.len()
    }
}

/// A growable read buffer for a fixed-size header followed by a
/// variable-length payload whose length the header itself declares.
/// Grounded in `PduInboundBuf`: `required_minimum` starts at the header
/// size and grows to `header_size + payload_length` once the header has
/// arrived (this module, "Header parser").
pub struct FramedReadBuf {
    header: Vec<u8>,
    payload: Vec<u8>,
    received: usize,
    payload_len: Option<usize>,
    header_len: usize,
}

impl FramedReadBuf {
    pub fn new(header_len: usize) -> Self {
        FramedReadBuf {
            header: vec![0u8; header_len],
            payload: Vec::new(),
            received: 0,
            payload_len: None,
            header_len,
        }
    }

    /// Reset to await a fresh frame, reusing the allocation
    /// (`PduInboundBuf::Reset` in `snmp_pdu.cpp`).
    pub fn reset(&mut self) {
        self.received = 0;
        self.payload_len = None;
        self.payload.clear();
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len.unwrap_or(0)]
    }

    /// Called once the header is fully received, to declare how long
    /// the payload is; subsequent [`ReadBuf::read_iovecs`] calls grow
    /// the payload storage to match.
    pub fn set_payload_len(&mut self, len: usize) {
        self.payload_len = Some(len);
        if self.payload.len() < len {
            self.payload.resize(len, 0);
        }
    }

    pub fn is_header_complete(&self) -> bool {
        self.received >= self.header_len
    }
}

impl ReadBuf for FramedReadBuf {
    fn read_iovecs(&mut self) -> Vec<libc::iovec> {
        let payload_len = self.payload_len.unwrap_or(0);
        if self.payload.len() < payload_len {
            self.payload.resize(payload_len, 0);
        }
        let mut vecs = vec![
            libc::iovec { iov_base: self.header.as_mut_ptr().cast(), iov_len: self.header.len() },
            libc::iovec { iov_base: self.payload.as_mut_ptr().cast(), iov_len: payload_len },
        ];
        adjust_iovecs(&mut vecs, self.received);
        vecs
    }

    fn bytes_read(&self) -> usize {
        self.received
    }

    fn mark_read(&mut self, n: usize) {
        self.received += n;
    }

    fn required_minimum(&self) -> usize {
        match self.payload_len {
            Some(len) => self.header_len + len,
            None => self.header_len,
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// FIFO of boxed write buffers awaiting their turn, used by
/// [`super::ReaderWriter`]'s pending-write queue ("additional
/// writes queue FIFO").
pub type PendingQueue = VecDeque<Box<dyn WriteBuf>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_iovecs_skips_whole_segments_then_partial() {
        let a = [0u8; 4];
        let b = [0u8; 4];
        let mut vecs = vec![
            libc::iovec { iov_base: a.as_ptr() as *mut _, iov_len: 4 },
            libc::iovec { iov_base: b.as_ptr() as *mut _, iov_len: 4 },
        ];
        adjust_iovecs(&mut vecs, 6);
        assert_eq!(vecs[0].iov_len, 0);
        assert_eq!(vecs[1].iov_len, 2);
        assert_eq!(vecs[1].iov_base, unsafe { b.as_ptr().add(2) as *mut _ });
    }

    #[test]
    fn owned_write_buf_tracks_progress() {
        let mut buf = OwnedWriteBuf::new(vec![1, 2, 3, 4]);
        assert_eq!(buf.target_end(), 4);
        buf.mark_written(2);
        let vecs = buf.write_iovecs();
        assert_eq!(vecs[0].iov_len, 2);
    }

    #[test]
    fn framed_read_buf_grows_after_header() {
        let mut buf = FramedReadBuf::new(4);
        assert_eq!(buf.required_minimum(), 4);
        buf.mark_read(4);
        assert!(buf.is_header_complete());
        buf.set_payload_len(10);
        assert_eq!(buf.required_minimum(), 14);
        let vecs = buf.read_iovecs();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[1].iov_len, 10);
    }
}
