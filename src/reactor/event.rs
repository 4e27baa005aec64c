//! Readiness tokens and interest bits.
//!
//! Grounded in mio's `interests.rs`/`token.rs` (a `Token(usize)` opaque
//! handle plus an `Interest`/`Ready` bitset); narrowed here to the
//! single `epoll` backend this crate targets.

use std::fmt;

/// Identifies a handler inside a [`super::core::Reactor`]'s handler slab.
/// Equivalent to `mio::Token`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) usize);

impl fmt::Debug for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerId({})", self.0)
    }
}

/// Readiness reported by `epoll_wait` for one handler on one wake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

/// The read/write interest bits a handler currently has registered with
/// the reactor's multiplexer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest { read: false, write: false };
    pub const READABLE: Interest = Interest { read: true, write: false };
    pub const WRITABLE: Interest = Interest { read: false, write: true };
    pub const READ_WRITE: Interest = Interest { read: true, write: true };

    pub fn is_none(self) -> bool {
        !self.read && !self.write
    }
}
