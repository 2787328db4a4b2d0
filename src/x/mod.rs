//! Types providing the bar's interface with the X server.
//!
//! The heart of this module is the [`Connection`] facade: a single
//! long-lived handle to the server that composes the protocol
//! extensions the bar uses, fans the inbound event stream out to any
//! number of prioritized [sinks](registry::EventSink), and routes
//! asynchronous protocol errors to the extension that owns the failing
//! opcode instead of a generic handler.
//!
//! Data flows transport → [`XCore`]'s blocking receive → extension
//! error interception → [`Connection::dispatch_event`] → registry →
//! each attached sink in ascending priority order.

pub mod atom;
pub mod connection;
pub mod core;
pub mod ext;
pub mod registry;

#[doc(inline)]
pub use self::atom::{Atom, Atoms};
#[doc(inline)]
pub use self::connection::{Connection, SEND_EVENT_ANY_MASK};
#[doc(inline)]
pub use self::core::{error_str, Result, XAtom, XCore, XError, XWindowID};
#[doc(inline)]
pub use self::ext::Extension;
#[doc(inline)]
pub use self::registry::{EventSink, Priority, Registry, SinkId};

pub use x11rb::protocol::Event;
