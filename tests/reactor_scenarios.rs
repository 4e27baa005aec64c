//! End-to-end reactor scenarios driven entirely through the crate's
//! public API (no `pub(crate)` shortcuts), the way mio's own `tests/`
//! directory drives real sockets rather than reaching into its
//! internals.

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use agentx_kvstats::handler::{Handler, HandlerBase, HangupFlags};
use agentx_kvstats::io::{FramedReadBuf, OwnedWriteBuf, ReaderWriter};
use agentx_kvstats::net::{TcpClient, TcpClientConfig};
use agentx_kvstats::reactor::{Reactor, ReactorHandle};
use agentx_kvstats::statemachine::Edge;

/// Scenario 1: "Connect-and-close". A `TcpClient` wrapped in the
/// smallest possible `Handler` targets a port nothing listens on.
/// Expected edge sequence includes `IpGiven` then eventually `Error`,
/// and the client settles in `Closed` (this module scenario 1).
struct ConnectProbe {
    base: HandlerBase,
    client: TcpClient,
    target: std::net::SocketAddr,
}

impl Handler for ConnectProbe {
    fn base(&self) -> &HandlerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut HandlerBase {
        &mut self.base
    }
    fn thread_init(&mut self, reactor: &mut Reactor) {
        let id = self.base.id().expect("attached before thread_init");
        self.client.set_target(self.target);
        self.client.thread_init(id, &mut self.base, reactor);
    }
    fn on_writable(&mut self, reactor: &mut Reactor) -> bool {
        let id = self.base.id().unwrap();
        self.client.on_writable(id, &mut self.base, reactor);
        true
    }
    fn on_readable(&mut self, reactor: &mut Reactor) -> bool {
        let id = self.base.id().unwrap();
        self.client.on_readable(id, &mut self.base, reactor);
        true
    }
    fn on_error(&mut self, reactor: &mut Reactor) -> bool {
        let id = self.base.id().unwrap();
        self.client.on_error(id, &mut self.base, reactor);
        true
    }
    fn on_hangup(&mut self, reactor: &mut Reactor, _flags: HangupFlags) -> bool {
        let id = self.base.id().unwrap();
        self.client.on_hangup(id, &mut self.base, reactor);
        true
    }
}

#[test]
fn connect_and_close() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().unwrap();
    drop(listener); // nothing is listening on `addr` from here on

    let edges: Arc<Mutex<Vec<Edge>>> = Arc::new(Mutex::new(Vec::new()));
    let edges_watch = edges.clone();

    let mut client = TcpClient::new(TcpClientConfig::default());
    client.add_completion(move |edge| edges_watch.lock().unwrap().push(edge));

    let probe = ConnectProbe { base: HandlerBase::default(), client, target: addr };

    let mut reactor = Reactor::new().expect("reactor");
    reactor.attach(Box::new(probe));
    let handle = reactor.handle().expect("handle");

    let worker = reactor.run_threaded();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !edges.lock().unwrap().contains(&Edge::Error) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let _ = handle.stop();
    worker.join().expect("worker thread did not panic");

    let seen = edges.lock().unwrap().clone();
    assert!(seen.contains(&Edge::IpGiven), "expected IP_GIVEN, got {seen:?}");
    assert!(seen.contains(&Edge::Error), "expected ERROR on a refused connect, got {seen:?}");
}

/// Scenario 2: "Pipe pump". Two handlers share a non-blocking pipe;
/// sender pushes 48 x 1,024-byte chunks, receiver accumulates every
/// byte (this module scenario 2).
struct PipeWriter {
    base: HandlerBase,
    rw: ReaderWriter,
    remaining: usize,
    sent: Arc<AtomicUsize>,
}

impl Handler for PipeWriter {
    fn base(&self) -> &HandlerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut HandlerBase {
        &mut self.base
    }
    fn thread_init(&mut self, reactor: &mut Reactor) {
        let id = self.base.id().unwrap();
        self.rw.open();
        let sent = self.sent.clone();
        self.rw.add_completion(move |edge| {
            if edge == Edge::WriteDone {
                sent.fetch_add(1024, Ordering::SeqCst);
            }
        });
        while self.remaining > 0 {
            self.remaining -= 1;
            let _ = self.rw.write(id, &mut self.base, reactor, Box::new(OwnedWriteBuf::new(vec![7u8; 1024])));
        }
    }
    fn on_writable(&mut self, reactor: &mut Reactor) -> bool {
        let id = self.base.id().unwrap();
        self.rw.on_writable(id, &mut self.base, reactor);
        true
    }
}

struct PipeReader {
    base: HandlerBase,
    rw: ReaderWriter,
    received: Arc<AtomicUsize>,
}

impl Handler for PipeReader {
    fn base(&self) -> &HandlerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut HandlerBase {
        &mut self.base
    }
    fn thread_init(&mut self, reactor: &mut Reactor) {
        let id = self.base.id().unwrap();
        self.rw.open();
        let _ = self.rw.read(id, &mut self.base, reactor, Box::new(FramedReadBuf::new(48 * 1024)));
    }
    fn on_readable(&mut self, reactor: &mut Reactor) -> bool {
        let id = self.base.id().unwrap();
        self.rw.on_readable(id, &mut self.base, reactor);
        if let Some(buf) = self.rw.take_read_buf() {
            self.received.store(buf.bytes_read(), Ordering::SeqCst);
        } else if let Some(buf) = self.rw.read_buf() {
            self.received.store(buf.bytes_read(), Ordering::SeqCst);
        }
        true
    }
}

#[test]
fn pipe_pump_transfers_all_bytes() {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK) };
    assert_eq!(rc, 0);
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let sent = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(AtomicUsize::new(0));

    let writer = PipeWriter { base: HandlerBase::new(Some(write_fd)), rw: ReaderWriter::new(), remaining: 48, sent: sent.clone() };
    let reader = PipeReader { base: HandlerBase::new(Some(read_fd)), rw: ReaderWriter::new(), received: received.clone() };

    let mut reactor = Reactor::new().expect("reactor");
    reactor.attach(Box::new(writer));
    reactor.attach(Box::new(reader));
    let handle = reactor.handle().expect("handle");

    let worker = reactor.run_threaded();

    let deadline = Instant::now() + Duration::from_secs(5);
    while received.load(Ordering::SeqCst) < 48 * 1024 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let _ = handle.stop();
    assert!(worker.join().unwrap_or(false));

    assert_eq!(sent.load(Ordering::SeqCst), 48 * 1024);
    assert_eq!(received.load(Ordering::SeqCst), 48 * 1024);

    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

/// Scenario 3: "Deadline ordering". Two periodic handlers at 2,000 ms
/// and 10,000 ms; the faster handler's first `on_timer` fires within a
/// tolerance window of attach and `last_fire` is recorded, while the
/// slower handler has not fired at all (this module scenario 3).
struct PeriodicHandler {
    base: HandlerBase,
    interval: Duration,
    attached_at: Arc<Mutex<Option<Instant>>>,
    first_fire_elapsed: Arc<Mutex<Option<Duration>>>,
    stop_on_fire: Option<ReactorHandle>,
}

impl Handler for PeriodicHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut HandlerBase {
        &mut self.base
    }
    fn thread_init(&mut self, reactor: &mut Reactor) {
        let id = self.base.id().unwrap();
        *self.attached_at.lock().unwrap() = Some(Instant::now());
        self.base.set_interval(Some(self.interval));
        reactor.schedule(id, &mut self.base);
    }
    fn on_timer(&mut self, _reactor: &mut Reactor) {
        let mut slot = self.first_fire_elapsed.lock().unwrap();
        if slot.is_none() {
            let started = self.attached_at.lock().unwrap().unwrap();
            *slot = Some(started.elapsed());
            assert!(self.base.last_fire().is_some());
            if let Some(handle) = &self.stop_on_fire {
                let _ = handle.stop();
            }
        }
    }
}

#[test]
fn deadline_ordering_fires_fast_timer_on_schedule() {
    let mut reactor = Reactor::new().expect("reactor");
    let handle = reactor.handle().expect("handle");

    let fast_elapsed = Arc::new(Mutex::new(None));
    let slow_elapsed = Arc::new(Mutex::new(None));

    let fast = PeriodicHandler {
        base: HandlerBase::default(),
        interval: Duration::from_millis(2000),
        attached_at: Arc::new(Mutex::new(None)),
        first_fire_elapsed: fast_elapsed.clone(),
        stop_on_fire: Some(handle.clone()),
    };
    let slow = PeriodicHandler {
        base: HandlerBase::default(),
        interval: Duration::from_millis(10_000),
        attached_at: Arc::new(Mutex::new(None)),
        first_fire_elapsed: slow_elapsed.clone(),
        stop_on_fire: None,
    };

    reactor.attach(Box::new(fast));
    reactor.attach(Box::new(slow));

    let worker = reactor.run_threaded();
    let end_status = worker.join().unwrap_or(false);
    assert!(end_status);

    let elapsed = fast_elapsed.lock().unwrap().expect("fast handler's on_timer fired");
    assert!(elapsed >= Duration::from_millis(1950), "fired too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2500), "fired too late: {elapsed:?}");
    assert!(slow_elapsed.lock().unwrap().is_none(), "slow handler must not have fired yet");
}
