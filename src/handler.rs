//! The handler base: the unit the reactor schedules.
//!
//! One handle + one timer + read/write interest bits + lifecycle
//! callbacks. Grounded in `mio::deprecated::Handler`
//! (`ready`/`notify`/`timeout`/`interrupted`/`tick`), generalized
//! from mio's single `Token`-keyed `ready(events)` callback into
//! the fixed `error -> readable -> writable -> hangup` dispatch order
//! this crate requires, and extended with `thread_init` for one-time
//! setup the first time a handler is attached (mio's `Handler` has no
//! equivalent; it's recovered from `original_source/libmevent/meventobj.h`'s
//! `ThreadInit`).

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::reactor::{HandlerId, Interest, Reactor};

/// Bits describing which half of a connection hung up, passed to
/// [`Handler::on_hangup`]. Mirrors the `EPOLLHUP`/`EPOLLRDHUP` split the
/// poller already decodes in [`crate::reactor::poller`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HangupFlags {
    pub read_closed: bool,
    pub write_closed: bool,
}

/// Embedded state every [`Handler`] implementor carries. Owned by the
/// implementor, read and written by the [`Reactor`] it is attached to.
///
/// Invariant : a `HandlerBase` is either unowned (`id ==
/// None`) or a member of exactly one reactor's handler set.
pub struct HandlerBase {
    pub(crate) id: Option<HandlerId>,
    fd: Option<RawFd>,
    pub(crate) interest: Interest,
    pub(crate) interval: Option<Duration>,
    pub(crate) next_fire: Option<Instant>,
    pub(crate) last_fire: Option<Instant>,
}

impl Default for HandlerBase {
    fn default() -> Self {
        HandlerBase {
            id: None,
            fd: None,
            interest: Interest::NONE,
            interval: None,
            next_fire: None,
            last_fire: None,
        }
    }
}

impl HandlerBase {
    pub fn new(fd: Option<RawFd>) -> Self {
        HandlerBase { fd, ..Default::default() }
    }

    pub fn id(&self) -> Option<HandlerId> {
        self.id
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    pub fn set_fd(&mut self, fd: Option<RawFd>) {
        self.fd = fd;
    }

    pub fn is_attached(&self) -> bool {
        self.id.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Option<Duration>) {
        self.interval = interval;
    }

    pub fn next_fire(&self) -> Option<Instant> {
        self.next_fire
    }

    pub fn last_fire(&self) -> Option<Instant> {
        self.last_fire
    }
}

/// The callback interface a layer implements to receive reactor events.
/// Every callback that returns `bool` follows this module: returning
/// `false` suppresses the remaining callbacks for the current readiness
/// event (so an `on_error` that closes the handle can skip the
/// now-meaningless `on_readable`/`on_writable`/`on_hangup` that would
/// otherwise follow in the same wake).
#[allow(unused_variables)]
pub trait Handler {
    fn base(&self) -> &HandlerBase;
    fn base_mut(&mut self) -> &mut HandlerBase;

    fn on_readable(&mut self, reactor: &mut Reactor) -> bool {
        true
    }

    fn on_writable(&mut self, reactor: &mut Reactor) -> bool {
        true
    }

    fn on_error(&mut self, reactor: &mut Reactor) -> bool {
        true
    }

    fn on_hangup(&mut self, reactor: &mut Reactor, flags: HangupFlags) -> bool {
        true
    }

    fn on_timer(&mut self, reactor: &mut Reactor) {}

    /// Invoked exactly once, the first time this handler is attached to
    /// a reactor, so it can set its own interests (this module, step 1
    /// of the control-byte `'a'` handling).
    fn thread_init(&mut self, reactor: &mut Reactor) {}

    /// Closes the handle, clears interests via the reactor, and drops
    /// the reactor reference. The default implementation does the
    /// reactor-side bookkeeping; implementors that own a socket/fd
    /// should override to also close it, then call
    /// `Handler::release(self, reactor)` or reimplement equivalently.
    ///
    /// Safe to call on `self` from inside any of the callbacks above
    /// ("a handler requesting its own removal", this module): this passes
    /// `self.base_mut()` straight through rather than asking the reactor
    /// to look the handler back up by id, so there is no self-referential
    /// relookup to deadlock or panic on.
    fn release(&mut self, reactor: &mut Reactor) {
        if let Some(id) = self.base().id() {
            reactor.release(id, self.base_mut());
        }
    }
}

/// Ownership of an attached handler. Once handed to [`Reactor::attach`]
/// the reactor is the sole owner — a plain `Box<dyn Handler + Send>`,
/// taken out of the handler table for the duration of each callback and
/// put back (or dropped, if the callback released it) when the callback
/// returns; see [`Reactor`]'s dispatch helper.
///
/// Handler ownership is conceptually shared ("the reactor holds
/// one reference, the creator typically holds another"). That describes
/// a *conceptual* second owner — whoever assembles an engine/TCP client
/// before attaching it, or routes further interaction back through the
/// wire protocol afterwards — not a second live mutable pointer: every
/// actual mutation of handler state happens either before `attach`
/// (ordinary ownership) or from inside a callback the reactor itself is
/// already driving (ordinary `&mut self`, no relocking required). An
/// earlier `Arc<Mutex<dyn Handler + Send>>` attempt at this type hit
/// exactly the failure mode that design avoids: a handler calling
/// `release`/`set_interest` on itself mid-callback deadlocked on its own
/// mutex. See `DESIGN.md` for the writeup. `Send` is required only
/// because `attach` may cross the foreign-thread boundary;
/// actual access stays reactor-thread-confined in practice.
pub type HandlerRef = Box<dyn Handler + Send>;
