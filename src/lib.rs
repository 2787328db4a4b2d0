//! The connection layer of an X11 status bar.
//!
//! One wire connection to the X server is shared by every logical
//! subsystem of the bar. This crate provides the pieces that make that
//! workable:
//!
//! - a [connection core](x::XCore) that owns the transport, composes
//!   an arbitrary set of protocol extensions, and intercepts
//!   asynchronous errors on every blocking receive;
//! - a [registry](x::Registry) that multiplexes the inbound event
//!   stream to independently attached sinks in priority order;
//! - a [facade](x::Connection) with the protocol-independent
//!   conveniences the bar needs: batched atom preloading, visual
//!   resolution, client messages, event-mask helpers;
//! - the [`ipc`] module backing the `xbar-msg` broadcast tool.
//!
//! The whole layer assumes a single-threaded event loop; see
//! [`x::connection`] for the threading contract.

pub mod ipc;
pub mod x;

pub use crate::x::core::{Result, XError};
pub use crate::x::Connection;

use std::rc::Rc;

/// Convenience function: initialize (or fetch) the process-wide
/// connection on the default display.
pub fn connect() -> Result<Rc<Connection>> {
    Connection::init(None)
}
