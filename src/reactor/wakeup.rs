//! Cross-thread wakeup channel.
//!
//! Grounded in mio's `sys/unix/awakener.rs` pipe-backed `Awakener`: a
//! non-blocking `pipe(2)` whose read end is registered with the
//! reactor's poller like any other handler. Unlike that `Awakener`,
//! which only carries an opaque wakeup signal, bytes written here *are*
//! the message: a one-byte control protocol, `'a'` ("drain the
//! pending-attach list") and `'x'` ("stop running"), rides directly on
//! the pipe payload.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

pub const CONTROL_ATTACH: u8 = b'a';
pub const CONTROL_STOP: u8 = b'x';

fn push_byte(fd: RawFd, byte: u8) -> io::Result<()> {
    // SAFETY: `fd` is a valid open descriptor for the duration of this call.
    let rc = unsafe { libc::write(fd, [byte].as_ptr().cast(), 1) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

/// The write end of a [`Wakeup`] pipe, cloneable and `Send`, handed to
/// foreign threads via [`super::core::ReactorHandle`] so `attach`/`stop`
/// can push a control byte without touching the reactor-owned read end.
pub struct WakeupWriter {
    fd: OwnedFd,
}

impl WakeupWriter {
    pub fn push_control(&self, byte: u8) -> io::Result<()> {
        push_byte(self.fd.as_raw_fd(), byte)
    }
}

pub struct Wakeup {
    reader: OwnedFd,
    writer: OwnedFd,
}

impl Wakeup {
    pub fn new() -> io::Result<Wakeup> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: pipe2 populates `fds` with two valid descriptors or
        // returns -1 and populates neither.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Wakeup {
            reader: unsafe { OwnedFd::from_raw_fd(fds[0]) },
            writer: unsafe { OwnedFd::from_raw_fd(fds[1]) },
        })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub fn push_control(&self, byte: u8) -> io::Result<()> {
        push_byte(self.writer.as_raw_fd(), byte)
    }

    /// `dup(2)`s the write end so a [`WakeupWriter`] can be handed to
    /// another thread while the reactor keeps both original fds.
    pub fn writer(&self) -> io::Result<WakeupWriter> {
        // SAFETY: dup(2) on a valid fd either returns a new valid fd or -1.
        let dup = unsafe { libc::dup(self.writer.as_raw_fd()) };
        if dup < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(WakeupWriter { fd: unsafe { OwnedFd::from_raw_fd(dup) } })
    }

    /// Drain every pending control byte, invoking `on_byte` for each in
    /// the order written. Only ever called from the reactor thread.
    pub fn drain(&self, mut on_byte: impl FnMut(u8)) {
        let mut buf = [0u8; 128];
        loop {
            // SAFETY: `buf` is a valid, appropriately-sized write target
            // for the duration of the call.
            let n = unsafe {
                libc::read(self.reader.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
            };
            if n <= 0 {
                return;
            }
            for &b in &buf[..n as usize] {
                on_byte(b);
            }
        }
    }
}
