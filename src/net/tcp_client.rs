//! TCP connect state machine.
//!
//! Grounded in `original_source/libmevent/tcp_event.cpp`'s
//! `TcpEventSocket`, which itself layers on `ReaderWriter` the same way
//! this module layers on [`crate::io::ReaderWriter`]: by embedding it and
//! forwarding callbacks, not by inheriting. Like [`crate::io::ReaderWriter`]
//! this type does not own a [`HandlerBase`] of its own — the single
//! socket fd and its interest/timer bookkeeping belong to whichever
//! object is actually attached to the reactor (the subagent engine), and
//! every method here takes that object's id/base/reactor through.

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::handler::HandlerBase;
use crate::io::{ReadBuf, ReaderWriter, WriteBuf};
use crate::reactor::{HandlerId, Reactor};
use crate::statemachine::{Edge, StateMachine, WatcherId};

/// Default connect timeout, shared with the subagent's reconnect
/// interval constant.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Node {
    #[default]
    Closed,
    Connecting,
    Established,
    Reading,
    Writing,
    ReadWrite,
}

#[derive(Clone, Debug)]
pub struct TcpClientConfig {
    pub connect_timeout: Duration,
    /// Issue `SO_LINGER` with a zero timeout (RST-on-close) before
    /// shutdown, matching `tcp_event.cpp`'s `Close()`. Default `false`:
    /// an AgentX subagent normally wants a clean FIN to the master.
    pub reset_on_close: bool,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        TcpClientConfig { connect_timeout: DEFAULT_CONNECT_TIMEOUT, reset_on_close: false }
    }
}

/// See the module docs for why this owns no `HandlerBase`.
pub struct TcpClient {
    sm: StateMachine<Node>,
    rw: ReaderWriter,
    target: Option<SocketAddr>,
    config: TcpClientConfig,
}

impl Default for TcpClient {
    fn default() -> Self {
        TcpClient { sm: StateMachine::new(), rw: ReaderWriter::new(), target: None, config: TcpClientConfig::default() }
    }
}

impl TcpClient {
    pub fn new(config: TcpClientConfig) -> Self {
        TcpClient { config, ..Default::default() }
    }

    pub fn state(&self) -> Node {
        self.sm.state()
    }

    pub fn is_established(&self) -> bool {
        matches!(
            self.sm.state(),
            Node::Established | Node::Reading | Node::Writing | Node::ReadWrite
        )
    }

    pub fn add_completion(&mut self, watcher: impl FnMut(Edge) + Send + 'static) -> WatcherId {
        self.sm.add_completion(watcher)
    }

    pub fn remove_completion(&mut self, id: WatcherId) {
        self.sm.remove_completion(id);
    }

    pub fn set_target(&mut self, target: SocketAddr) {
        self.target = Some(target);
    }

    /// `thread_init`: "if a non-zero (ip, port) pair is set, emit
    /// `IP_GIVEN`".
    pub fn thread_init(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        if self.target.is_some() {
            self.sm.send_completion(Edge::IpGiven);
            self.connect_begin(id, base, reactor);
        }
    }

    /// Explicit connect, e.g. the subagent's reconnect timer calling
    /// back in after a prior close ("repeated connection
    /// attempts against the same endpoint are supported and reset all
    /// buffers").
    pub fn connect(
        &mut self,
        id: HandlerId,
        base: &mut HandlerBase,
        reactor: &mut Reactor,
        target: SocketAddr,
    ) {
        self.target = Some(target);
        self.connect_begin(id, base, reactor);
    }

    fn connect_begin(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        let Some(target) = self.target else { return };
        match open_nonblocking_connect(target) {
            Ok((fd, ConnectResult::InProgress)) => {
                base.set_fd(Some(fd));
                self.rw = ReaderWriter::new();
                self.rw.open();
                base.set_interval(Some(self.config.connect_timeout));
                reactor.schedule(id, base);
                let _ = reactor.set_interest(id, base, false, true);
                self.sm.set_state(Node::Connecting);
                self.sm.send_completion(Edge::WriteWait);
            }
            Ok((fd, ConnectResult::Connected)) => {
                base.set_fd(Some(fd));
                self.rw = ReaderWriter::new();
                self.rw.open();
                base.set_interval(None);
                self.sm.set_state(Node::Established);
                self.sm.send_completion(Edge::Connected);
            }
            Err(e) => {
                log::warn!("connect to {target} failed: {e}");
                self.sm.send_completion(Edge::Error);
                self.close(id, base, reactor);
            }
        }
    }

    pub fn write(
        &mut self,
        id: HandlerId,
        base: &mut HandlerBase,
        reactor: &mut Reactor,
        buf: Box<dyn WriteBuf>,
    ) -> io::Result<()> {
        self.rw.write(id, base, reactor, buf)
    }

    pub fn read(
        &mut self,
        id: HandlerId,
        base: &mut HandlerBase,
        reactor: &mut Reactor,
        buf: Box<dyn ReadBuf>,
    ) -> io::Result<()> {
        self.rw.read(id, base, reactor, buf)
    }

    pub fn take_read_buf(&mut self) -> Option<Box<dyn ReadBuf>> {
        self.rw.take_read_buf()
    }

    pub fn read_buf(&self) -> Option<&dyn ReadBuf> {
        self.rw.read_buf()
    }

    pub fn reader_writer_completion(&mut self, watcher: impl FnMut(Edge) + Send + 'static) -> WatcherId {
        self.rw.add_completion(watcher)
    }

    pub fn on_readable(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        self.rw.on_readable(id, base, reactor);
        self.sync_node();
        true
    }

    /// First writable while `CONNECTING` means the non-blocking connect
    /// resolved: emit `CONNECTED` and move to `ESTABLISHED`; later
    /// writables pass straight through to the reader/writer (this crate
    /// §4.5: "subsequent writables pass through as ordinary WRITABLE").
    pub fn on_writable(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        if self.sm.state() == Node::Connecting {
            match connect_error(base.fd()) {
                Ok(()) => {
                    base.set_interval(None);
                    self.sm.set_state(Node::Established);
                    self.sm.send_completion(Edge::Connected);
                }
                Err(e) => {
                    log::warn!("deferred connect failed: {e}");
                    self.sm.send_completion(Edge::Error);
                    self.close(id, base, reactor);
                    return true;
                }
            }
        }
        self.rw.on_writable(id, base, reactor);
        self.sync_node();
        true
    }

    pub fn on_error(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        self.sm.send_completion(Edge::Error);
        self.sm.send_completion(Edge::CloseRequest);
        self.close(id, base, reactor);
        true
    }

    pub fn on_hangup(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) -> bool {
        self.on_error(id, base, reactor)
    }

    /// Connect-timeout or any other owner-driven timer fire while not yet
    /// `ESTABLISHED` maps to `TIMEOUT` → `ERROR` → `CLOSE_REQUEST`.
    pub fn on_timer(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        if !self.is_established() {
            self.sm.send_completion(Edge::Timeout);
            self.sm.send_completion(Edge::CloseRequest);
            self.close(id, base, reactor);
        }
    }

    fn sync_node(&mut self) {
        if self.is_established() {
            self.sm.set_state(match self.rw.state() {
                crate::io::Node::Reading => Node::Reading,
                crate::io::Node::Writing => Node::Writing,
                crate::io::Node::ReadWrite => Node::ReadWrite,
                _ => Node::Established,
            });
        }
    }

    /// this module: "optionally issues a linger-reset option, performs a
    /// bidirectional shutdown, and delegates to the reader/writer close."
    pub fn close(&mut self, id: HandlerId, base: &mut HandlerBase, reactor: &mut Reactor) {
        if let Some(fd) = base.fd() {
            if self.config.reset_on_close {
                set_linger_reset(fd);
            }
            unsafe {
                libc::shutdown(fd, libc::SHUT_RDWR);
                libc::close(fd);
            }
            base.set_fd(None);
        }
        base.set_interval(None);
        self.rw.close(id, base, reactor);
        self.sm.set_state(Node::Closed);
    }
}

enum ConnectResult {
    InProgress,
    Connected,
}

fn open_nonblocking_connect(target: SocketAddr) -> io::Result<(RawFd, ConnectResult)> {
    let domain = if target.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let (addr, addr_len) = sockaddr_of(target);
    let rc = unsafe { libc::connect(fd, addr.as_ptr().cast(), addr_len) };
    if rc == 0 {
        return Ok((fd, ConnectResult::Connected));
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS) {
        Ok((fd, ConnectResult::InProgress))
    } else {
        unsafe { libc::close(fd) };
        Err(err)
    }
}

fn connect_error(fd: Option<RawFd>) -> io::Result<()> {
    let Some(fd) = fd else { return Err(io::Error::from(io::ErrorKind::NotConnected)) };
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&mut err as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    if err == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(err))
    }
}

fn set_linger_reset(fd: RawFd) {
    let linger = libc::linger { l_onoff: 1, l_linger: 0 };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            (&linger as *const libc::linger).cast(),
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        log::warn!("failed to set SO_LINGER on fd {fd}: {}", io::Error::last_os_error());
    }
}

fn sockaddr_of(target: SocketAddr) -> (Vec<u8>, libc::socklen_t) {
    match target {
        SocketAddr::V4(v4) => {
            let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    (&sin as *const libc::sockaddr_in).cast::<u8>(),
                    std::mem::size_of::<libc::sockaddr_in>(),
                )
            };
            (bytes.to_vec(), std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    (&sin6 as *const libc::sockaddr_in6).cast::<u8>(),
                    std::mem::size_of::<libc::sockaddr_in6>(),
                )
            };
            (bytes.to_vec(), std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn connect_refused_yields_error_edge() {
        // Bind then drop immediately to get a port nothing is listening
        // on, matching this module scenario 1 ("connect-and-close").
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut reactor = Reactor::new().expect("reactor");
        let id = crate::reactor::event::HandlerId(0);
        let mut base = HandlerBase::default();
        let mut client = TcpClient::new(TcpClientConfig::default());

        let errors = Arc::new(AtomicUsize::new(0));
        let errors_watch = errors.clone();
        client.add_completion(move |edge| {
            if edge == Edge::Error {
                errors_watch.fetch_add(1, Ordering::SeqCst);
            }
        });

        client.connect(id, &mut base, &mut reactor, addr);
        // A refused connect is detected asynchronously via SO_ERROR once
        // writable; poll until the reactor reports it or the connect
        // timeout (irrelevant here; we drive directly).
        for _ in 0..200 {
            if client.state() != Node::Connecting {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
            client.on_writable(id, &mut base, &mut reactor);
        }
        assert_eq!(client.state(), Node::Closed);
        assert!(errors.load(Ordering::SeqCst) >= 1);
    }
}
