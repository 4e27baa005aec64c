//! The reactor layer. See [`core::Reactor`] for the event
//! loop itself.

pub mod core;
pub mod event;
pub mod poller;
pub mod timer;
pub mod wakeup;

pub use core::{Reactor, ReactorBuilder, ReactorConfig, ReactorHandle};
pub use event::{HandlerId, Interest, Readiness};
