//! The core of the X connection: transport ownership, extension
//! composition, and the blocking receive operations with asynchronous
//! error interception wrapped around them.

use std::io;

use thiserror::Error;

use x11rb::connection::Connection as _;
use x11rb::errors;
use x11rb::protocol::xproto::{ConnectionExt as _, Screen};
use x11rb::protocol::Event;
use x11rb::rust_connection::{PollMode, RustConnection, Stream as _};
use x11rb::x11_utils::X11Error;

use tracing::{debug, trace};

use super::ext::{self, Extension};

/// An X window ID.
pub type XWindowID = x11rb::protocol::xproto::Window;
/// A server-side atom, as opposed to [`Atom`](crate::x::Atom),
/// the crate's own inventory of known atom names.
pub type XAtom = x11rb::protocol::xproto::Atom;

pub type Result<T> = ::std::result::Result<T, XError>;

/// Any error that can occur while talking to the X server.
#[derive(Debug, Error, Clone)]
pub enum XError {
    /// Could not establish a connection to the server.
    #[error("Could not connect to the X server: {0}")]
    Connect(String),

    /// The connection itself is unusable. Never suppressed or retried.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection was shut down with an xcb-style shutdown code.
    #[error("Connection closed: {}", error_str(*.0))]
    Shutdown(i32),

    /// An asynchronous protocol error claimed by one of the composed
    /// extensions.
    #[error("{name} error {error_code} (sequence {sequence})")]
    Extension {
        name: &'static str,
        error_code: u8,
        sequence: u16,
    },

    /// An asynchronous protocol error that no composed extension
    /// recognized as its own.
    #[error("Unclassified X error {error_code} from opcode {major_opcode} (sequence {sequence})")]
    Unclassified {
        error_code: u8,
        major_opcode: u8,
        sequence: u16,
    },

    /// No TrueColor visual is available at the requested depth.
    #[error("No TrueColor visual with depth {0}")]
    NoVisual(u8),

    /// The preferred screen reported at connect time does not exist.
    #[error("Invalid screen")]
    InvalidScreen,

    /// Any other protocol-level failure from a request/reply pair.
    #[error("X protocol error: {0}")]
    Protocol(String),
}

/// Translate an xcb shutdown code into a human-readable string.
pub fn error_str(error_code: i32) -> &'static str {
    match error_code {
        1 => "Socket, pipe or stream error",
        2 => "Unsupported extension",
        3 => "Not enough memory",
        4 => "Request length exceeded",
        5 => "Can't parse display string",
        6 => "Invalid screen",
        7 => "Failed to pass FD",
        _ => "Unknown error",
    }
}

/// The owned transport handle, composed with every compiled-in
/// protocol extension.
///
/// Exactly one of these should exist per process, owned by the
/// [`Connection`](super::connection::Connection) facade. All blocking
/// receives pass incoming asynchronous errors through the extension
/// list, in declared order, before surfacing them to the caller.
pub struct XCore {
    conn: RustConnection,
    idx: usize,
    root: XWindowID,
    extensions: Vec<Box<dyn Extension>>,
}

impl XCore {
    /// Connects to the X server and probes every compiled-in extension.
    ///
    /// Extensions are constructed and probed in declared order; a failed
    /// probe marks the extension as absent but is not fatal.
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let (conn, idx) = x11rb::connect(display)?;
        trace!("Connected to X server, got preferred screen {}", idx);

        let root = match conn.setup().roots.get(idx) {
            Some(screen) => screen.root,
            None => return Err(XError::InvalidScreen),
        };

        let mut extensions = ext::all();
        for extension in &mut extensions {
            if let Err(e) = extension.query(&conn) {
                debug!("Could not probe {}: {}", extension.name(), e);
            }
            debug!(
                "Extension {}: {}",
                extension.name(),
                if extension.present() { "present" } else { "absent" }
            );
        }

        Ok(Self {
            conn,
            idx,
            root,
            extensions,
        })
    }

    /// Exposes the underlying x11rb connection.
    pub fn conn(&self) -> &RustConnection {
        &self.conn
    }

    /// The root window of the preferred screen.
    pub fn root(&self) -> XWindowID {
        self.root
    }

    /// The index of the preferred screen.
    pub fn screen_idx(&self) -> usize {
        self.idx
    }

    /// The preferred screen.
    pub fn screen(&self) -> &Screen {
        &self.conn.setup().roots[self.idx]
    }

    /// Looks up a composed extension by name.
    pub fn extension(&self, name: &str) -> Option<&dyn Extension> {
        self.extensions
            .iter()
            .find(|e| e.name() == name)
            .map(|e| e.as_ref())
    }

    /// Blocks until the next event arrives.
    ///
    /// An asynchronous error on the wire is offered to every composed
    /// extension in declared order; the first one to claim it decides
    /// the returned [`XError::Extension`]. Unclaimed errors come back
    /// as [`XError::Unclassified`].
    pub fn wait_for_event(&self) -> Result<Event> {
        match self.conn.wait_for_event()? {
            Event::Error(error) => Err(self.route_error(&error)),
            event => Ok(event),
        }
    }

    /// Blocks until an event of the given response type satisfies the
    /// predicate, discarding everything else.
    ///
    /// There is no timeout; the loop only ends when a match is found or
    /// the connection enters a fatal error state. Asynchronous errors
    /// short-circuit the wait exactly as in [`wait_for_event`].
    ///
    /// [`wait_for_event`]: XCore::wait_for_event
    pub fn wait_for_response<F>(&self, response_type: u8, mut check_event: F) -> Result<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        loop {
            self.conn.stream().poll(PollMode::Readable)?;
            match self.conn.poll_for_event()? {
                None => continue,
                Some(Event::Error(error)) => return Err(self.route_error(&error)),
                Some(event) if event.response_type() != response_type => continue,
                Some(event) if check_event(&event) => return Ok(event),
                Some(_) => continue,
            }
        }
    }

    /// Flushes all buffered requests to the server.
    pub fn flush(&self) -> Result<()> {
        Ok(self.conn.flush()?)
    }

    /// Interns a single atom by name.
    pub fn intern_atom(&self, name: &str) -> Result<XAtom> {
        Ok(self.conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }

    fn route_error(&self, error: &X11Error) -> XError {
        ext::route_error(&self.extensions, error)
    }
}

impl From<io::Error> for XError {
    fn from(e: io::Error) -> XError {
        XError::Connection(e.to_string())
    }
}

impl From<errors::ConnectError> for XError {
    fn from(e: errors::ConnectError) -> XError {
        use errors::ConnectError::*;
        match e {
            DisplayParsingError(_) => XError::Shutdown(5),
            InvalidScreen => XError::Shutdown(6),
            other => XError::Connect(other.to_string()),
        }
    }
}

impl From<errors::ConnectionError> for XError {
    fn from(e: errors::ConnectionError) -> XError {
        use errors::ConnectionError::*;
        match e {
            UnsupportedExtension => XError::Shutdown(2),
            InsufficientMemory => XError::Shutdown(3),
            MaximumRequestLengthExceeded => XError::Shutdown(4),
            FdPassingFailed => XError::Shutdown(7),
            IoError(e) => XError::Connection(e.to_string()),
            UnknownError => XError::Connection("unknown connection error".into()),
            other => XError::Protocol(other.to_string()),
        }
    }
}

impl From<errors::ReplyError> for XError {
    fn from(e: errors::ReplyError) -> XError {
        match e {
            errors::ReplyError::ConnectionError(e) => e.into(),
            errors::ReplyError::X11Error(e) => XError::Unclassified {
                error_code: e.error_code,
                major_opcode: e.major_opcode,
                sequence: e.sequence,
            },
        }
    }
}

impl From<errors::ReplyOrIdError> for XError {
    fn from(e: errors::ReplyOrIdError) -> XError {
        match e {
            errors::ReplyOrIdError::ConnectionError(e) => e.into(),
            errors::ReplyOrIdError::X11Error(e) => errors::ReplyError::X11Error(e).into(),
            other => XError::Protocol(other.to_string()),
        }
    }
}
