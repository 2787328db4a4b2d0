//! Protocol extension composition.
//!
//! Every extension the bar can make use of is modeled as an object
//! implementing [`Extension`]: it probes its own presence on the server
//! and decides whether an incoming asynchronous error belongs to its
//! opcode/error-code namespace. Which extensions get compiled in is
//! controlled through cargo features, one per extension.
//!
//! A single wire connection carries the traffic of every extension at
//! once, so ownership of an error cannot be read off the error alone;
//! the connection core walks the composed list in declared order and
//! the first extension to claim the error ends the walk.

use tracing::{debug, error};

use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;
use x11rb::x11_utils::X11Error;

use super::core::{Result, XError};

/// The capability contract every composed extension satisfies.
pub trait Extension {
    /// The protocol name of this extension.
    fn name(&self) -> &'static str;

    /// Probes the server for support and records the assigned opcode
    /// and event/error base codes. Absence is recorded, not an error.
    fn query(&mut self, conn: &RustConnection) -> Result<()>;

    /// Whether the probe found the extension on the server.
    fn present(&self) -> bool;

    /// The major opcode assigned to this extension by the server.
    fn major_opcode(&self) -> u8;

    /// The first event code assigned to this extension by the server.
    fn first_event(&self) -> u8;

    /// Given an asynchronous error, returns whether this extension
    /// recognizes it as its own and has handled it. If not, the caller
    /// must offer the error to the next extension.
    fn handle_error(&self, error: &X11Error) -> bool;

    /// Optional event interception before generic dispatch.
    ///
    /// Event delivery to sinks is uniform, so the default claims
    /// nothing.
    fn handle_event(&self, _event: &x11rb::protocol::Event) -> bool {
        false
    }
}

/// Walks the composed extension list in declared order and classifies
/// the error by the first extension that claims it.
pub(crate) fn route_error(extensions: &[Box<dyn Extension>], error: &X11Error) -> XError {
    for extension in extensions {
        if extension.handle_error(error) {
            return XError::Extension {
                name: extension.name(),
                error_code: error.error_code,
                sequence: error.sequence,
            };
        }
    }
    XError::Unclassified {
        error_code: error.error_code,
        major_opcode: error.major_opcode,
        sequence: error.sequence,
    }
}

/// Builds the full extension set, in the fixed declared order that
/// error routing walks.
pub(crate) fn all() -> Vec<Box<dyn Extension>> {
    #[allow(unused_mut)]
    let mut extensions: Vec<Box<dyn Extension>> = Vec::new();
    #[cfg(feature = "damage")]
    extensions.push(Box::new(Damage::new()));
    #[cfg(feature = "render")]
    extensions.push(Box::new(Render::new()));
    #[cfg(feature = "randr")]
    extensions.push(Box::new(Randr::new()));
    #[cfg(feature = "sync")]
    extensions.push(Box::new(XSync::new()));
    #[cfg(feature = "composite")]
    extensions.push(Box::new(Composite::new()));
    #[cfg(feature = "xkb")]
    extensions.push(Box::new(Xkb::new()));
    extensions
}

/// Presence data recorded by a successful probe.
#[derive(Debug, Default, Clone, Copy)]
struct ExtensionData {
    present: bool,
    major_opcode: u8,
    first_event: u8,
    first_error: u8,
}

impl ExtensionData {
    fn query(conn: &RustConnection, name: &str) -> Result<Self> {
        let reply = conn.query_extension(name.as_bytes())?.reply()?;
        Ok(Self {
            present: reply.present,
            major_opcode: reply.major_opcode,
            first_event: reply.first_event,
            first_error: reply.first_error,
        })
    }

    /// Whether the error code lies in this extension's claimed range.
    fn claims(&self, error: &X11Error, error_count: u8) -> bool {
        self.present
            && error_count > 0
            && error.error_code >= self.first_error
            && u16::from(error.error_code) < u16::from(self.first_error) + u16::from(error_count)
    }
}

macro_rules! extension_impl {
    ($ty:ident, $name:expr, $errors:expr) => {
        impl $ty {
            /// Number of error codes this extension defines.
            const ERROR_COUNT: u8 = $errors;

            pub fn new() -> Self {
                Self {
                    data: ExtensionData::default(),
                }
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Extension for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn query(&mut self, conn: &RustConnection) -> Result<()> {
                self.data = ExtensionData::query(conn, $name)?;
                Ok(())
            }

            fn present(&self) -> bool {
                self.data.present
            }

            fn major_opcode(&self) -> u8 {
                self.data.major_opcode
            }

            fn first_event(&self) -> u8 {
                self.data.first_event
            }

            fn handle_error(&self, err: &X11Error) -> bool {
                if self.data.claims(err, Self::ERROR_COUNT) {
                    error!(
                        "{} error {} on sequence {}",
                        $name, err.error_code, err.sequence
                    );
                    true
                } else {
                    false
                }
            }
        }
    };
}

#[cfg(feature = "damage")]
pub struct Damage {
    data: ExtensionData,
}
#[cfg(feature = "damage")]
extension_impl!(Damage, x11rb::protocol::damage::X11_EXTENSION_NAME, 1);

#[cfg(feature = "render")]
pub struct Render {
    data: ExtensionData,
}
#[cfg(feature = "render")]
extension_impl!(Render, x11rb::protocol::render::X11_EXTENSION_NAME, 5);

#[cfg(feature = "sync")]
pub struct XSync {
    data: ExtensionData,
}
#[cfg(feature = "sync")]
extension_impl!(XSync, x11rb::protocol::sync::X11_EXTENSION_NAME, 2);

#[cfg(feature = "composite")]
pub struct Composite {
    data: ExtensionData,
}
#[cfg(feature = "composite")]
extension_impl!(Composite, x11rb::protocol::composite::X11_EXTENSION_NAME, 0);

#[cfg(feature = "xkb")]
pub struct Xkb {
    data: ExtensionData,
}
#[cfg(feature = "xkb")]
extension_impl!(Xkb, x11rb::protocol::xkb::X11_EXTENSION_NAME, 1);

/// The RandR extension. On top of the presence probe, it validates
/// the server speaks a recent enough protocol version; an older server
/// is treated as not having the extension at all.
#[cfg(feature = "randr")]
pub struct Randr {
    data: ExtensionData,
}

#[cfg(feature = "randr")]
const RANDR_MAJ: u32 = 1;
#[cfg(feature = "randr")]
const RANDR_MIN: u32 = 2;

#[cfg(feature = "randr")]
impl Randr {
    const ERROR_COUNT: u8 = 4;

    pub fn new() -> Self {
        Self {
            data: ExtensionData::default(),
        }
    }
}

#[cfg(feature = "randr")]
impl Default for Randr {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "randr")]
impl Extension for Randr {
    fn name(&self) -> &'static str {
        x11rb::protocol::randr::X11_EXTENSION_NAME
    }

    fn query(&mut self, conn: &RustConnection) -> Result<()> {
        use x11rb::protocol::randr::ConnectionExt as _;

        self.data = ExtensionData::query(conn, self.name())?;
        if !self.data.present {
            return Ok(());
        }

        let version = conn.randr_query_version(RANDR_MAJ, RANDR_MIN)?.reply()?;
        let (maj, min) = (version.major_version, version.minor_version);
        if maj != RANDR_MAJ || min < RANDR_MIN {
            debug!(
                "Server randr version {}.{} below required {}.{}",
                maj, min, RANDR_MAJ, RANDR_MIN
            );
            self.data.present = false;
        }
        Ok(())
    }

    fn present(&self) -> bool {
        self.data.present
    }

    fn major_opcode(&self) -> u8 {
        self.data.major_opcode
    }

    fn first_event(&self) -> u8 {
        self.data.first_event
    }

    fn handle_error(&self, err: &X11Error) -> bool {
        if self.data.claims(err, Self::ERROR_COUNT) {
            error!(
                "randr error {} on sequence {}",
                err.error_code, err.sequence
            );
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::ErrorKind;

    /// An extension with a fixed error-code range, standing in for a
    /// probed one.
    struct Ranged {
        name: &'static str,
        first_error: u8,
        error_count: u8,
    }

    impl Extension for Ranged {
        fn name(&self) -> &'static str {
            self.name
        }

        fn query(&mut self, _: &RustConnection) -> Result<()> {
            Ok(())
        }

        fn present(&self) -> bool {
            true
        }

        fn major_opcode(&self) -> u8 {
            0
        }

        fn first_event(&self) -> u8 {
            0
        }

        fn handle_error(&self, err: &X11Error) -> bool {
            err.error_code >= self.first_error
                && u16::from(err.error_code)
                    < u16::from(self.first_error) + u16::from(self.error_count)
        }
    }

    fn x11_error(error_code: u8) -> X11Error {
        X11Error {
            error_kind: ErrorKind::Unknown(error_code),
            error_code,
            sequence: 42,
            bad_value: 0,
            minor_opcode: 0,
            major_opcode: 140,
            extension_name: None,
            request_name: None,
        }
    }

    fn composed() -> Vec<Box<dyn Extension>> {
        vec![
            Box::new(Ranged {
                name: "first",
                first_error: 150,
                error_count: 3,
            }),
            Box::new(Ranged {
                name: "second",
                first_error: 160,
                error_count: 2,
            }),
        ]
    }

    #[test]
    fn error_in_first_range_is_claimed_by_first() {
        let err = route_error(&composed(), &x11_error(151));
        match err {
            XError::Extension { name, error_code, sequence } => {
                assert_eq!(name, "first");
                assert_eq!(error_code, 151);
                assert_eq!(sequence, 42);
            }
            other => panic!("expected Extension error, got {:?}", other),
        }
    }

    #[test]
    fn error_in_second_range_skips_first() {
        let err = route_error(&composed(), &x11_error(160));
        match err {
            XError::Extension { name, .. } => assert_eq!(name, "second"),
            other => panic!("expected Extension error, got {:?}", other),
        }
    }

    #[test]
    fn error_in_no_range_propagates_unclassified() {
        let err = route_error(&composed(), &x11_error(200));
        match err {
            XError::Unclassified { error_code, major_opcode, sequence } => {
                assert_eq!(error_code, 200);
                assert_eq!(major_opcode, 140);
                assert_eq!(sequence, 42);
            }
            other => panic!("expected Unclassified error, got {:?}", other),
        }
    }

    #[test]
    fn range_boundaries_are_half_open() {
        let exts = composed();
        assert!(matches!(
            route_error(&exts, &x11_error(150)),
            XError::Extension { name: "first", .. }
        ));
        assert!(matches!(
            route_error(&exts, &x11_error(152)),
            XError::Extension { name: "first", .. }
        ));
        assert!(matches!(
            route_error(&exts, &x11_error(153)),
            XError::Unclassified { .. }
        ));
    }

    #[test]
    fn zero_error_extension_never_claims() {
        let data = ExtensionData {
            present: true,
            major_opcode: 142,
            first_event: 0,
            first_error: 0,
        };
        // a zero-length range must not claim error code 0
        assert!(!data.claims(&x11_error(0), 0));
    }

    #[test]
    #[cfg(feature = "damage")]
    fn extensions_expose_probed_opcode_and_event_base() {
        let ext = Damage {
            data: ExtensionData {
                present: true,
                major_opcode: 143,
                first_event: 91,
                first_error: 152,
            },
        };
        assert!(ext.present());
        assert_eq!(ext.major_opcode(), 143);
        assert_eq!(ext.first_event(), 91);
    }

    #[test]
    fn absent_extension_never_claims() {
        let data = ExtensionData {
            present: false,
            major_opcode: 140,
            first_event: 89,
            first_error: 147,
        };
        assert!(!data.claims(&x11_error(147), 4));
    }
}
