//! Buffered scatter/gather read and write over a non-blocking handle,
//! with a pending-write queue.
//!
//! Grounded in `original_source/libmevent/reader_writer.{h,cpp}`'s
//! `ReaderWriter`, which layers directly on `MEventObj`/`StateMachine`.
//! This crate keeps that shape but, per the capability-stack design note
//! in this module, as composition rather than inheritance: `ReaderWriter`
//! does not itself implement [`crate::handler::Handler`] or own a
//! [`crate::handler::HandlerBase`] — its owner ([`crate::net::TcpClient`])
//! does, and forwards `on_readable`/`on_writable`/`on_error`/`on_hangup`
//! into the methods below, passing its own id/base/reactor through. This
//! is the same "delegate through a small trait-like interface" pattern
//! this module prescribes for the whole stack.

pub mod buf;

use std::io;
use std::os::fd::RawFd;

pub use buf::{adjust_iovecs, FramedReadBuf, OwnedWriteBuf, PendingQueue, ReadBuf, WriteBuf};

use crate::handler::HandlerBase;
use crate::reactor::{HandlerId, Reactor};
use crate::statemachine::{Edge, StateMachine};

/// Node values for the reader/writer's own state machine./// `Open` is the quiescent state reached once a handle is assigned but
/// no read or write is outstanding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Node {
    #[default]
    Closed,
    Open,
    Reading,
    Writing,
    ReadWrite,
}

/// Buffered scatter/gather read/write layer. See the module docs.
pub struct ReaderWriter {
    sm: StateMachine<Node>,
    read_buf: Option<Box<dyn ReadBuf>>,
    write_buf: Option<Box<dyn WriteBuf>>,
    pending: PendingQueue,
    /// If set, a completed-but-unsatisfied read is re-requested
    /// automatically instead of waiting for an explicit `read()` call
    /// (this module, "if `auto_read` is set... request read").
    auto_read: bool,
    read_zero_seen: bool,
}

impl Default for ReaderWriter {
    fn default() -> Self {
        ReaderWriter {
            sm: StateMachine::new(),
            read_buf: None,
            write_buf: None,
            pending: PendingQueue::new(),
            auto_read: false,
            read_zero_seen: false,
        }
    }
}

impl ReaderWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Node {
        self.sm.state()
    }

    pub fn set_auto_read(&mut self, auto_read: bool) {
        self.auto_read = auto_read;
    }

    pub fn add_completion(
        &mut self,
        watcher: impl FnMut(Edge) + Send + 'static,
    ) -> crate::statemachine::WatcherId {
        self.sm.add_completion(watcher)
    }

    pub fn remove_completion(&mut self, id: crate::statemachine::WatcherId) {
        self.sm.remove_completion(id);
    }

    /// Called once the owning layer has a live fd and wants a quiescent
    /// reader/writer ready to accept `read`/`write` calls.
    pub fn open(&mut self) {
        self.sm.set_state(Node::Open);
    }

    fn set_node(&mut self) {
        let node = match (self.read_buf.is_some(), self.write_buf.is_some()) {
            (true, true) => Node::ReadWrite,
            (true, false) => Node::Reading,
            (false, true) => Node::Writing,
            (false, false) => Node::Open,
        };
        self.sm.set_state(node);
    }

    /// this module write path: installs `buf` as current and drives it
    /// synchronously if the reader/writer is idle on the write side and
    /// `buf` is already data-ready; otherwise queues it FIFO.
    pub fn write(
        &mut self,
        id: HandlerId,
        base: &mut HandlerBase,
        reactor: &mut Reactor,
        buf: Box<dyn WriteBuf>,
    ) -> io::Result<()> {
        if self.write_buf.is_none() && self.pending.is_empty() && buf.is_data_ready() {
            self.write_buf = Some(buf);
            self.set_node();
            self.drive_writable(id, base, reactor)
        } else {
            self.pending.push_back(buf);
            Ok(())
        }
    }

    /// this module read path: installs `buf` as the current read buffer
    /// and immediately drives it.
    pub fn read(
        &mut self,
        id: HandlerId,
        base: &mut HandlerBase,
        reactor: &mut Reactor,
        buf: Box<dyn ReadBuf>,
    ) -> io::Result<()> {
        self.read_buf = Some(buf);
        self.read_zero_seen = false;
        self.set_node();
        self.drive_readable(id, base, reactor)
    }

    /// Take back ownership of a finished read buffer, e.g. once
    /// `READ_DONE` fired and the caller wants to parse it.
    pub fn take_read_buf(&mut self) -> Option<Box<dyn ReadBuf>> {
        self.read_buf.take()
    }

    /// Peek at the installed read buffer without taking it, so a caller
    /// driving a long-lived read across many frames can check whether
    /// the current one is complete before deciding to `take_read_buf`
    /// (`agentx::engine`'s steady-state inbound reader).
    pub fn read_buf(&self) -> Option<&dyn ReadBuf> {
        self.read_buf.as_deref()
    }

    fn drive_writable(
        &mut self,
        id: HandlerId,
        base: &mut HandlerBase,
        reactor: &mut Reactor,
    ) -> io::Result<()> {
        let Some(fd) = base.fd() else { return Ok(()) };
        loop {
            let Some(buf) = self.write_buf.as_deref_mut() else { break };
            let mut iovecs = buf.write_iovecs();
            if iovecs.iter().all(|v| v.iov_len == 0) {
                break;
            }
            match writev(fd, &mut iovecs) {
                Ok(0) => break,
                Ok(n) => {
                    buf.mark_written(n);
                    if buf.bytes_written() >= buf.target_end() {
                        self.write_buf = None;
                        self.sm.send_completion(Edge::WriteDone);
                        if let Some(front) = self.pending.front() {
                            if front.is_data_ready() {
                                self.write_buf = self.pending.pop_front();
                                continue;
                            }
                        }
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("writev on fd {fd} failed: {e}");
                    self.write_buf = None;
                    self.sm.send_completion(Edge::Error);
                    self.close(id, base, reactor);
                    return Ok(());
                }
            }
        }

        if self.write_buf.is_none() && self.read_buf.is_none() {
            // Nothing installed but the kernel just told us we could
            // write (e.g. right after connect): surface it once, then
            // stop asking (this module, "emit WRITABLE and drop write
            // interest").
            self.sm.send_completion(Edge::Writable);
        }
        self.set_node();
        let want_write = self.write_buf.is_some();
        let want_read = self.read_buf.is_some();
        reactor.set_interest(id, base, want_read, want_write)
    }

    fn drive_readable(
        &mut self,
        id: HandlerId,
        base: &mut HandlerBase,
        reactor: &mut Reactor,
    ) -> io::Result<()> {
        let Some(fd) = base.fd() else { return Ok(()) };
        loop {
            let Some(buf) = self.read_buf.as_deref_mut() else { break };
            if buf.bytes_read() >= buf.required_minimum() {
                break;
            }
            let mut iovecs = buf.read_iovecs();
            match readv(fd, &mut iovecs) {
                Ok(0) => {
                    self.read_zero_seen = true;
                    break;
                }
                Ok(n) => {
                    buf.mark_read(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("readv on fd {fd} failed: {e}");
                    self.read_buf = None;
                    self.sm.send_completion(Edge::Error);
                    self.close(id, base, reactor);
                    return Ok(());
                }
            }
        }

        let satisfied = self
            .read_buf
            .as_deref()
            .map(|b| b.bytes_read() >= b.required_minimum())
            .unwrap_or(false)
            || self.read_zero_seen;

        if satisfied {
            self.sm.send_completion(Edge::ReadDone);
        }

        let want_read = if satisfied {
            self.auto_read && !self.read_zero_seen
        } else {
            true
        };
        self.set_node();
        let want_write = self.write_buf.is_some();
        reactor.set_interest(id, base, want_read, want_write)
    }

    pub fn on_readable(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        let _ = self.drive_readable(id, base, reactor);
        true
    }

    pub fn on_writable(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        let _ = self.drive_writable(id, base, reactor);
        true
    }

    /// Self-sourced `ERROR` and `TIMEOUT` both close (this module,
    /// "Edge handling").
    pub fn on_timer_or_error(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        self.close(id, base, reactor);
    }

    /// Tears down buffers and interest, transitions to `Closed`. Does
    /// NOT emit `Close` ("self-referential notification at
    /// destruction is prohibited"). Does not close `base`'s fd — that is
    /// the owning layer's responsibility (the TCP client
    /// issues the linger/shutdown before delegating here).
    pub fn close(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        self.read_buf = None;
        self.write_buf = None;
        self.pending.clear();
        let _ = reactor.set_interest(id, base, false, false);
        self.sm.set_state(Node::Closed);
    }
}

pub(crate) fn writev(fd: RawFd, iovecs: &mut [libc::iovec]) -> io::Result<usize> {
    // SAFETY: `iovecs` point into buffers owned by the `WriteBuf` this
    // call borrowed from, valid for the duration of this call.
    let n = unsafe { libc::writev(fd, iovecs.as_ptr(), iovecs.len() as i32) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

pub(crate) fn readv(fd: RawFd, iovecs: &mut [libc::iovec]) -> io::Result<usize> {
    // SAFETY: `iovecs` point into buffers owned by the `ReadBuf` this
    // call borrowed from, valid and writable for the duration of this
    // call.
    let n = unsafe { libc::readv(fd, iovecs.as_ptr(), iovecs.len() as i32) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}
