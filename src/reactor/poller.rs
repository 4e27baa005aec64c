//! Thin wrapper over `epoll(7)`.
//!
//! Grounded in mio's `src/sys/unix/selector/epoll.rs` (the `Selector`
//! type backing `mio::Poll` on Linux): `epoll_create1` at construction,
//! `epoll_ctl` for `add`/`modify`/`remove`, `epoll_wait` for the
//! blocking collect step. Edge-triggered (`EPOLLET`) throughout,
//! matching mio's default and this crate's single-shot readable/writable
//! dispatch per wake.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP};

use super::event::{HandlerId, Interest, Readiness};

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn interest_to_mask(interest: Interest) -> u32 {
    let mut mask = EPOLLET;
    if interest.read {
        mask |= EPOLLIN | EPOLLRDHUP;
    }
    if interest.write {
        mask |= EPOLLOUT;
    }
    mask as u32
}

/// One readiness event returned from a `epoll_wait` pass, already
/// decoded into this crate's [`HandlerId`]/[`Readiness`] types.
#[derive(Debug, Clone, Copy)]
pub struct RawEvent {
    pub id: HandlerId,
    pub readiness: Readiness,
}

pub struct Poller {
    epoll_fd: OwnedFd,
    raw_events: Vec<libc::epoll_event>,
}

impl Poller {
    pub fn new(capacity: usize) -> io::Result<Poller> {
        // SAFETY: epoll_create1 either returns a valid owned fd or -1.
        let fd = unsafe { cvt(libc::epoll_create1(libc::EPOLL_CLOEXEC))? };
        let epoll_fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Poller { epoll_fd, raw_events: vec![unsafe { std::mem::zeroed() }; capacity] })
    }

    pub fn add(&self, fd: RawFd, id: HandlerId, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event { events: interest_to_mask(interest), u64: id.0 as u64 };
        cvt(unsafe {
            libc::epoll_ctl(self.epoll_fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        })?;
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, id: HandlerId, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event { events: interest_to_mask(interest), u64: id.0 as u64 };
        cvt(unsafe {
            libc::epoll_ctl(self.epoll_fd.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event)
        })?;
        Ok(())
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        cvt(unsafe {
            libc::epoll_ctl(
                self.epoll_fd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        })?;
        Ok(())
    }

    /// Block for up to `timeout` (indefinitely if `None`) and return the
    /// readiness events collected. Interrupted waits (`EINTR`) are
    /// surfaced as `io::ErrorKind::Interrupted` so the reactor loop can
    /// retry, matching `mio::deprecated::EventLoop::run_once`'s handling
    /// of `ErrorKind::Interrupted`.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<RawEvent>> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };

        let n = cvt(unsafe {
            libc::epoll_wait(
                self.epoll_fd.as_raw_fd(),
                self.raw_events.as_mut_ptr(),
                self.raw_events.len() as libc::c_int,
                timeout_ms,
            )
        })?;

        let mut out = Vec::with_capacity(n as usize);
        for raw in &self.raw_events[..n as usize] {
            let events = raw.events as libc::c_int;
            out.push(RawEvent {
                id: HandlerId(raw.u64 as usize),
                readiness: Readiness {
                    readable: events & (EPOLLIN | libc::EPOLLPRI) != 0,
                    writable: events & EPOLLOUT != 0,
                    error: events & EPOLLERR != 0,
                    hangup: events & (EPOLLHUP | EPOLLRDHUP) != 0,
                },
            });
        }
        Ok(out)
    }
}

impl AsRawFd for Poller {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll_fd.as_raw_fd()
    }
}
