//! In-order request queue → wire → response buffer → completion fan-out.
//!
//! Grounded in `original_source/libmevent/request_response.{h,cpp}`'s
//! `RequestResponse`, which layers on `TcpEventSocket` the same
//! composition-not-inheritance way [`crate::net::TcpClient`] layers on
//! [`crate::io::ReaderWriter`].
//!
//! One design departure from [`crate::io::ReaderWriter`]: that module
//! stores its current buffer as `Box<dyn WriteBuf>`/`Box<dyn ReadBuf>`,
//! which is fine when a buffer plays only one role. Here the *same*
//! buffer value must serve as the write buffer and then, in place, the
//! read buffer ("request/response buffers serve both
//! roles") — a reused trait object can't be "handed back" from a
//! `Box<dyn WriteBuf>` as a `Box<dyn ReadBuf>` without an unsafe
//! downcast. `RequestResponse<B>` sidesteps that by being generic over
//! one concrete buffer type (this crate's only instantiation is
//! [`crate::agentx::pdu::Frame`]) and driving its own `writev`/`readv`
//! loop directly, duplicating a little of `ReaderWriter`'s loop shape
//! rather than fighting its ownership model. See `DESIGN.md`.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use crate::handler::HandlerBase;
use crate::io::{adjust_iovecs, readv, writev, ReadBuf, WriteBuf};
use crate::net::TcpClient;
use crate::reactor::{HandlerId, Reactor};
use crate::statemachine::{Edge, StateMachine, WatcherId};

/// A buffer that is both the request written out and the response read
/// back.
pub trait RequestBuf: WriteBuf + ReadBuf {
    /// Called once the request has fully drained, before the same value
    /// starts serving as the read buffer for the response.
    fn reset_for_response(&mut self);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Node {
    #[default]
    Idle,
    Writing,
    Reading,
}

/// FIFO request/response queue. See module docs for why this is generic
/// over `B` rather than `Box<dyn RequestBuf>`.
pub struct RequestResponse<B: RequestBuf> {
    sm: StateMachine<Node>,
    client: TcpClient,
    requests: VecDeque<B>,
    notifications: VecDeque<B>,
    current: Option<B>,
    /// Re-entrance guard for [`RequestResponse::drain_notifications`]
    /// ("guarded by a re-entrance flag").
    draining: bool,
    target: Option<SocketAddr>,
}

impl<B: RequestBuf> Default for RequestResponse<B> {
    fn default() -> Self {
        RequestResponse {
            sm: StateMachine::new(),
            client: TcpClient::default(),
            requests: VecDeque::new(),
            notifications: VecDeque::new(),
            current: None,
            draining: false,
            target: None,
        }
    }
}

impl<B: RequestBuf> RequestResponse<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> &TcpClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut TcpClient {
        &mut self.client
    }

    pub fn set_target(&mut self, target: SocketAddr) {
        self.target = Some(target);
        self.client.set_target(target);
    }

    pub fn add_completion(&mut self, watcher: impl FnMut(Edge) + Send + 'static) -> WatcherId {
        self.sm.add_completion(watcher)
    }

    pub fn remove_completion(&mut self, id: WatcherId) {
        self.sm.remove_completion(id);
    }

    pub fn thread_init(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        self.client.thread_init(id, base, reactor);
    }

    pub fn notifications_len(&self) -> usize {
        self.notifications.len()
    }

    pub fn pop_notification(&mut self) -> Option<B> {
        self.notifications.pop_front()
    }

    /// `enqueue(buf)`: drive synchronously if idle and already
    /// connected, otherwise queue and kick off a connect if needed.
    pub fn enqueue(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor, buf: B) {
        if self.current.is_none() && self.client.is_established() {
            self.current = Some(buf);
            self.sm.set_state(Node::Writing);
            self.drive_write(id, base, reactor);
        } else {
            self.requests.push_back(buf);
            if !self.client.is_established() {
                if let Some(target) = self.target {
                    self.client.connect(id, base, reactor, target);
                }
            }
        }
    }

    fn drive_write(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        let Some(fd) = base.fd() else { return };
        loop {
            let Some(buf) = self.current.as_mut() else { break };
            let mut iovecs = buf.write_iovecs();
            match writev(fd, &mut iovecs) {
                Ok(0) => break,
                Ok(n) => {
                    buf.mark_written(n);
                    if buf.bytes_written() >= buf.target_end() {
                        self.on_write_done(id, base, reactor);
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("request write on fd {fd} failed: {e}");
                    self.current = None;
                    self.sm.send_completion(Edge::Error);
                    return;
                }
            }
        }
        let _ = reactor.set_interest(id, base, false, true);
    }

    /// On `WRITE_DONE`, the same buffer becomes the current read buffer.
    fn on_write_done(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        if let Some(buf) = self.current.as_mut() {
            buf.reset_for_response();
        }
        self.sm.set_state(Node::Reading);
        self.drive_read(id, base, reactor);
    }

    fn drive_read(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        let Some(fd) = base.fd() else { return };
        loop {
            let Some(buf) = self.current.as_mut() else { break };
            if buf.bytes_read() >= buf.required_minimum() {
                break;
            }
            let mut iovecs = buf.read_iovecs();
            match readv(fd, &mut iovecs) {
                Ok(0) => break,
                Ok(n) => buf.mark_read(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("request read on fd {fd} failed: {e}");
                    self.current = None;
                    self.sm.send_completion(Edge::Error);
                    return;
                }
            }
        }

        let done = self.current.as_ref().map(|b| b.bytes_read() >= b.required_minimum()).unwrap_or(false);
        if done {
            self.on_read_done(id, base, reactor);
        } else {
            let _ = reactor.set_interest(id, base, true, false);
        }
    }

    /// "move the buffer to a notification FIFO, clear the current
    /// request, then drain".
    fn on_read_done(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        if let Some(buf) = self.current.take() {
            self.notifications.push_back(buf);
        }
        self.sm.set_state(Node::Idle);
        if let Some(next) = self.requests.pop_front() {
            self.current = Some(next);
            self.sm.set_state(Node::Writing);
            self.drive_write(id, base, reactor);
        }
        self.drain_notifications();
    }

    /// Re-entrance-guarded drain: "the first call takes the flag and
    /// loops to completion; re-entrant calls return immediately" (this crate
    /// §4.6). A watcher invoked from inside `send_completion` below that
    /// synchronously calls back into `enqueue` observes `draining ==
    /// true` and returns without recursing.
    ///
    /// This only *announces* completions: it fires one `ReadDone` per
    /// buffer sitting in `notifications` without removing anything. The
    /// buffers themselves stay queued for the owner to retrieve with
    /// [`RequestResponse::pop_notification`] — a watcher closure
    /// registered via `add_completion` cannot borrow the owning
    /// `RequestResponse` (or whatever owns it) to pull a buffer out
    /// mid-callback, so retrieval is always a separate, explicit step the
    /// owner takes after driving (see `agentx::engine`, which polls
    /// `notifications_len()` synchronously rather than wiring a watcher).
    fn drain_notifications(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        let mut notified = 0;
        while notified < self.notifications.len() {
            self.sm.send_completion(Edge::ReadDone);
            notified += 1;
        }
        self.draining = false;
    }

    pub fn on_readable(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        self.client.on_readable(id, base, reactor);
        if self.sm.state() == Node::Reading {
            self.drive_read(id, base, reactor);
        }
        true
    }

    pub fn on_writable(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        self.client.on_writable(id, base, reactor);
        if self.sm.state() == Node::Writing {
            self.drive_write(id, base, reactor);
        }
        true
    }

    pub fn on_error(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        self.client.on_error(id, base, reactor);
        self.clear_on_close();
        true
    }

    pub fn on_hangup(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        self.client.on_hangup(id, base, reactor);
        self.clear_on_close();
        true
    }

    pub fn on_timer(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        self.client.on_timer(id, base, reactor);
        if self.client.state() == crate::net::tcp_client::Node::Closed {
            self.clear_on_close();
        }
    }

    /// "On CLOSE, the input queue, current request, and notification
    /// queue are all cleared".
    fn clear_on_close(&mut self) {
        self.requests.clear();
        self.notifications.clear();
        self.current = None;
        self.draining = false;
        self.sm.set_state(Node::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FramedReadBuf;

    struct EchoBuf {
        out: Vec<u8>,
        sent: usize,
        inbound: FramedReadBuf,
    }

    impl EchoBuf {
        fn new(payload: Vec<u8>) -> Self {
            EchoBuf { out: payload, sent: 0, inbound: FramedReadBuf::new(0) }
        }
    }

    impl WriteBuf for EchoBuf {
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

    impl ReadBuf for EchoBuf {
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

    impl RequestBuf for EchoBuf {
        fn reset_for_response(&mut self) {
            self.inbound = FramedReadBuf::new(self.out.len());
        }
    }

    #[test]
    fn notification_drain_is_reentrance_safe() {
        // Exercises `drain_notifications`'s guard directly: a watcher
        // that calls back into the same `RequestResponse` synchronously
        // must not recurse (this module scenario 6).
        let mut rr: RequestResponse<EchoBuf> = RequestResponse::new();
        rr.notifications.push_back(EchoBuf::new(vec![1]));
        rr.notifications.push_back(EchoBuf::new(vec![2]));

        // send_completion has no access to `self` recursively here since
        // closures can't borrow `rr` while `rr` drives them; this test
        // instead checks the flag discipline directly.
        rr.draining = true;
        rr.drain_notifications(); // must return immediately, queue untouched
        assert_eq!(rr.notifications.len(), 2);
        rr.draining = false;
        rr.drain_notifications(); // announces, but does not consume
        assert_eq!(rr.notifications.len(), 2);
        assert!(rr.pop_notification().is_some());
        assert!(rr.pop_notification().is_some());
        assert!(rr.pop_notification().is_none());
    }
}
