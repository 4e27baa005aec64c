//! The reactor: single-threaded readiness-driven I/O loop.
//!
//! Grounded in `mio::deprecated::EventLoop` (`src/deprecated/event_loop.rs`):
//! a `Poll` + `Events` pair, a `Timer`, and a notify channel registered
//! under reserved tokens, driven by `run`/`run_once`. This module keeps
//! that shape — reserved wakeup token, dispatch-then-timers-then-block
//! loop body, `Sender`-style foreign-thread handoff — but swaps the
//! generic `Handler<Message, Timeout>` for the fixed
//! `error -> readable -> writable -> hangup -> timer` callback set
//! this crate mandates, and the notify channel's arbitrary messages for
//! a two-control-byte protocol (`'a'`/`'x'`).

use std::io;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::handler::{Handler, HandlerBase, HandlerRef};

use super::event::{HandlerId, Interest};
use super::poller::Poller;
use super::timer::TimerWheel;
use super::wakeup::{Wakeup, WakeupWriter, CONTROL_ATTACH, CONTROL_STOP};

/// Reserved id for the wakeup channel's read end. Handler ids allocated
/// from the handler table start at 0 and are never equal to `usize::MAX`
/// in any run that attaches fewer than `usize::MAX` handlers, matching
/// mio's `NOTIFY`/`TIMER` reserved `Token` constants.
const WAKEUP_ID: HandlerId = HandlerId(usize::MAX);

/// Tunables for a [`Reactor`], grounded in mio's `EventLoopBuilder`.
#[derive(Clone, Debug)]
pub struct ReactorConfig {
    /// `epoll_wait` batch size, i.e. `Events::with_capacity` in mio.
    pub events_capacity: usize,
    /// Soft cap on live timer entries; exceeding it only logs a warning
    /// (this crate places no hard limit on timer count).
    pub max_timer_entries: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        ReactorConfig { events_capacity: 1024, max_timer_entries: 65_536 }
    }
}

#[derive(Clone, Default)]
pub struct ReactorBuilder {
    config: ReactorConfig,
}

impl ReactorBuilder {
    pub fn new() -> Self {
        ReactorBuilder::default()
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.config.events_capacity = capacity;
        self
    }

    pub fn max_timer_entries(mut self, max: usize) -> Self {
        self.config.max_timer_entries = max;
        self
    }

    pub fn build(self) -> io::Result<Reactor> {
        Reactor::configured(self.config)
    }
}

/// Single-threaded IO event loop. See the module docs and this module.
pub struct Reactor {
    poller: Poller,
    wakeup: Wakeup,
    /// `None` at a vacant index (on the free list) or while that index's
    /// handler is on loan to a callback (see [`Reactor::with_handler`]).
    slots: Vec<Option<HandlerRef>>,
    free_list: Vec<usize>,
    timers: TimerWheel,
    pending_attach: Arc<Mutex<Vec<HandlerRef>>>,
    running: bool,
    end_status: bool,
    config: ReactorConfig,
    /// Events collected by the previous `epoll_wait`, dispatched at the
    /// top of the *next* iteration (this module step 1 runs against
    /// "events collected in the previous iteration").
    pending_events: Vec<super::poller::RawEvent>,
}

/// A cheap, cloneable, foreign-thread-safe handle used to `attach` new
/// handlers and to `stop`/`join` the reactor from any thread, without
/// needing access to the `Reactor` value itself (which lives on the
/// worker thread once `run_threaded` starts it).
#[derive(Clone)]
pub struct ReactorHandle {
    pending_attach: Arc<Mutex<Vec<HandlerRef>>>,
    wakeup: Arc<WakeupWriter>,
}

impl ReactorHandle {
    /// Foreign-thread-safe: append to the pending list, then wake the
    /// reactor with a single `'a'` control byte (this module/§5).
    pub fn attach(&self, handler: HandlerRef) -> io::Result<()> {
        self.pending_attach.lock().unwrap_or_else(|p| p.into_inner()).push(handler);
        self.wakeup.push_control(CONTROL_ATTACH)
    }

    /// Foreign-thread-safe, idempotent: writes the `'x'` control byte.
    /// Repeated calls are harmless — the reactor only reads `running`
    /// once per iteration and the pipe tolerates extra bytes.
    pub fn stop(&self) -> io::Result<()> {
        self.wakeup.push_control(CONTROL_STOP)
    }
}

impl Reactor {
    pub fn new() -> io::Result<Reactor> {
        ReactorBuilder::new().build()
    }

    fn configured(config: ReactorConfig) -> io::Result<Reactor> {
        let poller = Poller::new(config.events_capacity)?;
        let wakeup = Wakeup::new()?;
        poller.add(wakeup.as_raw_fd(), WAKEUP_ID, Interest::READABLE)?;

        Ok(Reactor {
            poller,
            wakeup,
            slots: Vec::new(),
            free_list: Vec::new(),
            timers: TimerWheel::new(),
            pending_attach: Arc::new(Mutex::new(Vec::new())),
            running: true,
            end_status: true,
            config,
            pending_events: Vec::new(),
        })
    }

    /// A handle safe to clone and hand to other threads for `attach` and
    /// `stop`. `join` is a plain function of the `JoinHandle` returned by
    /// [`Reactor::run_threaded`], not of this handle.
    pub fn handle(&self) -> io::Result<ReactorHandle> {
        Ok(ReactorHandle {
            pending_attach: self.pending_attach.clone(),
            wakeup: Arc::new(self.wakeup.writer()?),
        })
    }

    fn alloc_slot(&mut self) -> HandlerId {
        if let Some(index) = self.free_list.pop() {
            HandlerId(index)
        } else {
            let index = self.slots.len();
            self.slots.push(None);
            HandlerId(index)
        }
    }

    /// Foreign-thread-safe in spirit (matches this crate's `attach`), but
    /// also callable directly on the reactor thread (e.g. from a
    /// handler's own callback wanting to attach a child handler).
    pub fn attach(&mut self, handler: HandlerRef) {
        self.pending_attach.lock().unwrap_or_else(|p| p.into_inner()).push(handler);
        let _ = self.wakeup.push_control(CONTROL_ATTACH);
    }

    /// Runs `f` with temporary, exclusive ownership of the handler at
    /// `id`: taken out of the table (so `self` is simultaneously
    /// available to `f` without aliasing its own storage), handed back
    /// afterwards unless `f` detached it (`base().id()` no longer equal
    /// to `id`, e.g. via [`Reactor::release`]), in which case the slot is
    /// freed instead. Returns `None` if `id` is vacant or already on loan
    /// (e.g. a second `with_handler` call for the same id nested inside
    /// the first — such a call has no handler to run `f` against, so it
    /// is simply skipped rather than deadlocking or panicking).
    fn with_handler<R>(
        &mut self,
        id: HandlerId,
        f: impl FnOnce(&mut dyn Handler, &mut Reactor) -> R,
    ) -> Option<R> {
        let mut handler = self.slots.get_mut(id.0)?.take()?;
        let result = f(handler.as_mut(), self);
        if handler.base().id() == Some(id) {
            if let Some(slot) = self.slots.get_mut(id.0) {
                *slot = Some(handler);
            }
        } else {
            self.free_list.push(id.0);
        }
        Some(result)
    }

    /// Reactor-thread-only. Diffs `want_read`/`want_write` against
    /// `base`'s current interest and issues `add`/`modify`/`remove`
    /// against the poller, per this module. Takes the handler's own
    /// `HandlerBase` rather than an id lookup so it is safe to call from
    /// inside that same handler's own callback.
    pub fn set_interest(
        &mut self,
        id: HandlerId,
        base: &mut HandlerBase,
        want_read: bool,
        want_write: bool,
    ) -> io::Result<()> {
        let new_interest = Interest { read: want_read, write: want_write };
        let old_interest = base.interest;
        if old_interest == new_interest {
            return Ok(());
        }
        let Some(fd) = base.fd() else { return Ok(()) };

        if old_interest.is_none() && !new_interest.is_none() {
            set_nonblocking(fd)?;
            self.poller.add(fd, id, new_interest)?;
        } else if !old_interest.is_none() && new_interest.is_none() {
            self.poller.remove(fd)?;
        } else {
            self.poller.modify(fd, id, new_interest)?;
        }

        base.interest = new_interest;
        Ok(())
    }

    /// `schedule`: `(now + interval, handler)`. See [`Reactor::set_interest`]
    /// for why this takes `base` directly.
    pub fn schedule(&mut self, id: HandlerId, base: &mut HandlerBase) {
        let Some(interval) = base.interval() else { return };
        let deadline = Instant::now() + interval;
        base.next_fire = Some(deadline);
        self.timers.insert(deadline, id);
        self.warn_if_over_capacity();
    }

    /// `reschedule`: `(previous_next_fire + interval, handler)`.
    pub fn reschedule(&mut self, id: HandlerId, base: &mut HandlerBase) {
        let Some(interval) = base.interval() else { return };
        let start = base.next_fire().unwrap_or_else(Instant::now);
        let deadline = start + interval;
        base.next_fire = Some(deadline);
        self.timers.insert(deadline, id);
        self.warn_if_over_capacity();
    }

    fn warn_if_over_capacity(&self) {
        let len = self.timers.len();
        if len > self.config.max_timer_entries {
            log::warn!(
                "reactor timer wheel has {len} entries, exceeding the configured soft cap of {}",
                self.config.max_timer_entries
            );
        }
    }

    /// `release`: clears multiplexer interest, drops queued timer
    /// entries, and marks `base` detached. Idempotent (a second call
    /// against an already-detached `base` is a no-op). Does not by
    /// itself free the handler's slab slot — the caller that actually
    /// owns the `Box` at the time (either [`Reactor::with_handler`]'s
    /// dispatch wrapper, or [`Reactor::drain_pending_attach`]) notices
    /// `base.id()` went to `None` and frees the slot then. This split is
    /// what lets a handler call `release` on itself from inside its own
    /// callback: at that point the slab slot is already on loan to the
    /// very callback doing the releasing.
    pub fn release(&mut self, id: HandlerId, base: &mut HandlerBase) {
        if base.id != Some(id) {
            return;
        }
        if let Some(fd) = base.fd() {
            let _ = self.poller.remove(fd);
        }
        self.timers.remove_all(id);
        base.id = None;
    }

    /// Drive the loop on the caller's thread until `stop()` is observed.
    pub fn run_single(&mut self) -> io::Result<bool> {
        self.running = true;
        while self.running {
            self.tick()?;
        }
        Ok(self.end_status)
    }

    fn tick(&mut self) -> io::Result<()> {
        // Step 1: dispatch events collected on the previous iteration's wait.
        let events = std::mem::take(&mut self.pending_events);
        for event in events {
            if event.id == WAKEUP_ID {
                self.dispatch_wakeup();
            } else {
                self.dispatch_handler_event(event);
            }
        }

        // Step 2: pop and fire every timer whose deadline has elapsed.
        let now = Instant::now();
        for (deadline, id) in self.timers.pop_ready(now) {
            self.with_handler(id, |handler, reactor| {
                if handler.base().next_fire() != Some(deadline) {
                    return; // stale entry, superseded by a later reschedule
                }
                handler.base_mut().last_fire = Some(now);
                handler.on_timer(reactor);
            });
        }

        // Step 3: compute the sleep bound.
        let timeout = self.timers.next_deadline().map(|deadline| {
            let now = Instant::now();
            if deadline > now { deadline - now } else { Duration::ZERO }
        });

        // Step 4: block in the multiplexer.
        match self.poller.wait(timeout) {
            Ok(events) => self.pending_events = events,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                self.pending_events = Vec::new();
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn dispatch_wakeup(&mut self) {
        let mut fatal = false;
        let mut drained = Vec::new();
        self.wakeup.drain(|byte| drained.push(byte));
        for byte in drained {
            match byte {
                CONTROL_ATTACH => self.drain_pending_attach(),
                CONTROL_STOP => self.running = false,
                other => {
                    log::error!("reactor wakeup channel received unknown control byte {other:#x}");
                    fatal = true;
                }
            }
        }
        if fatal {
            self.running = false;
            self.end_status = false;
        }
    }

    fn drain_pending_attach(&mut self) {
        let newly_attached: Vec<HandlerRef> =
            std::mem::take(&mut *self.pending_attach.lock().unwrap_or_else(|p| p.into_inner()));
        for mut handler in newly_attached {
            let id = self.alloc_slot();
            handler.base_mut().id = Some(id);
            self.slots[id.0] = Some(handler);
            self.with_handler(id, |handler, reactor| handler.thread_init(reactor));
        }
    }

    fn dispatch_handler_event(&mut self, event: super::poller::RawEvent) {
        let r = event.readiness;

        if r.error {
            let keep = self.with_handler(event.id, |h, reactor| h.on_error(reactor)).unwrap_or(false);
            if !keep {
                return;
            }
        }
        if r.readable {
            let keep =
                self.with_handler(event.id, |h, reactor| h.on_readable(reactor)).unwrap_or(false);
            if !keep {
                return;
            }
        }
        if r.writable {
            let keep =
                self.with_handler(event.id, |h, reactor| h.on_writable(reactor)).unwrap_or(false);
            if !keep {
                return;
            }
        }
        if r.hangup {
            let flags = crate::handler::HangupFlags { read_closed: true, write_closed: true };
            self.with_handler(event.id, |h, reactor| h.on_hangup(reactor, flags));
        }
    }

    /// Spawn a worker thread that calls [`Reactor::run_single`].
    pub fn run_threaded(mut self) -> JoinHandle<bool> {
        thread::spawn(move || self.run_single().unwrap_or(false))
    }

    /// Idempotent; may be called from any thread via [`Reactor::handle`].
    /// Calling it on the reactor's own thread (e.g. from inside a
    /// callback) is also safe — it only queues the `'x'` control byte.
    pub fn stop(&mut self) {
        self.running = false;
        let _ = self.wakeup.push_control(CONTROL_STOP);
    }
}

fn set_nonblocking(fd: std::os::fd::RawFd) -> io::Result<()> {
    // SAFETY: `fd` is a valid, open descriptor owned by the caller for
    // the duration of this call.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
