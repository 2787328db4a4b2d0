//! The application-facing connection facade.
//!
//! [`Connection`] owns the [`XCore`] plus everything protocol-independent
//! the bar needs around it: the preloaded atom cache, the visual cache,
//! client-message construction, and the sink registry that fans received
//! events out to the rest of the application.
//!
//! # Threading
//!
//! The whole connection layer assumes a single-threaded event loop.
//! The process-wide instance lives in a thread local, which makes the
//! precondition structural: other threads simply do not see it. There
//! is no internal locking.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use strum::IntoEnumIterator;

use x11rb::protocol::xproto::{
    ChangeWindowAttributesAux, ClientMessageEvent, ConnectionExt as _, Depth, EventMask, Screen,
    VisualClass, Visualtype, CLIENT_MESSAGE_EVENT,
};
use x11rb::protocol::Event;

use super::atom::{Atom, Atoms};
use super::core::{Result, XAtom, XCore, XWindowID};
use super::ext::Extension;
use super::registry::{EventSink, Priority, Registry, SinkId};

thread_local! {
    static INSTANCE: RefCell<Option<Rc<Connection>>> = RefCell::new(None);
}

/// The event mask that delivers a sent event to every interested
/// client, the protocol's 24-bit all-bits-set mask.
pub const SEND_EVENT_ANY_MASK: u32 = 0x00FF_FFFF;

/// The single process-wide X connection.
///
/// Constructed once through [`Connection::init`] and torn down with
/// [`Connection::shutdown`]; everything in between goes through the
/// same instance.
pub struct Connection {
    core: XCore,
    registry: RefCell<Registry>,
    visuals: RefCell<HashMap<u8, Visualtype>>,
    atoms: Atoms,
}

impl Connection {
    /// Initializes the process-wide connection, or returns the existing
    /// instance if one was already initialized on this thread.
    pub fn init(display: Option<&str>) -> Result<Rc<Connection>> {
        INSTANCE.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(conn) = &*slot {
                return Ok(Rc::clone(conn));
            }
            let conn = Rc::new(Connection::connect(display)?);
            *slot = Some(Rc::clone(&conn));
            Ok(conn)
        })
    }

    /// The already-initialized process-wide connection, if any.
    pub fn instance() -> Option<Rc<Connection>> {
        INSTANCE.with(|slot| slot.borrow().clone())
    }

    /// Drops the process-wide instance. Outstanding `Rc` handles keep
    /// the connection alive until they are released.
    pub fn shutdown() {
        INSTANCE.with(|slot| slot.borrow_mut().take());
    }

    /// Connects and preloads every statically declared atom in one
    /// batched round: all intern requests are issued unchecked first,
    /// then all replies collected, so K atoms cost one round trip
    /// instead of K.
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let core = XCore::connect(display)?;

        let mut cookies = Vec::with_capacity(Atom::iter().count());
        for atom in Atom::iter() {
            cookies.push((
                atom,
                core.conn().intern_atom(false, atom.as_ref().as_bytes())?,
            ));
        }

        let mut atoms = Atoms::new();
        for (atom, cookie) in cookies {
            match cookie.reply() {
                Ok(reply) => atoms.insert(atom, reply.atom),
                Err(e) => debug!("Could not intern {}: {}", atom, e),
            }
        }

        Ok(Self {
            core,
            registry: RefCell::new(Registry::new()),
            visuals: RefCell::new(HashMap::new()),
            atoms,
        })
    }

    /// The underlying connection core.
    pub fn core(&self) -> &XCore {
        &self.core
    }

    /// The root window of the preferred screen.
    pub fn root(&self) -> XWindowID {
        self.core.root()
    }

    /// The preferred screen.
    pub fn screen(&self) -> &Screen {
        self.core.screen()
    }

    /// Looks up a composed extension by protocol name.
    pub fn extension(&self, name: &str) -> Option<&dyn Extension> {
        self.core.extension(name)
    }

    /// See [`XCore::wait_for_event`].
    pub fn wait_for_event(&self) -> Result<Event> {
        self.core.wait_for_event()
    }

    /// See [`XCore::wait_for_response`].
    pub fn wait_for_response<F>(&self, response_type: u8, check_event: F) -> Result<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        self.core.wait_for_response(response_type, check_event)
    }

    /// The server-side value of a preloaded atom.
    ///
    /// An atom whose intern reply failed at construction resolves to
    /// `NONE`, mirroring an unset atom on the server.
    pub fn atom(&self, atom: Atom) -> XAtom {
        self.atoms.retrieve(atom).unwrap_or(x11rb::NONE)
    }

    /// Reverse lookup of a server-side atom value against the
    /// preloaded inventory.
    pub fn atom_name(&self, val: XAtom) -> Option<Atom> {
        self.atoms.retrieve_by_value(val)
    }

    /// Formats a window ID the way it shows up in bar diagnostics.
    pub fn id(&self, win: XWindowID) -> String {
        format_id(win)
    }

    /// Returns a TrueColor visual for the requested color depth,
    /// cached for the connection's lifetime.
    ///
    /// A depth with no matching visual reports `XError::NoVisual`; the
    /// miss is not cached, so a later query asks the screen again.
    pub fn visual(&self, depth: u8) -> Result<Visualtype> {
        if let Some(visual) = self.visuals.borrow().get(&depth) {
            return Ok(*visual);
        }

        let found = self
            .screen()
            .allowed_depths
            .iter()
            .filter(|d| d.depth == depth)
            .flat_map(|d| d.visuals.iter())
            .find(|v| v.class == VisualClass::TRUE_COLOR)
            .copied();

        match found {
            Some(visual) => {
                trace!("Caching visual {} for depth {}", visual.visual_id, depth);
                self.visuals.borrow_mut().insert(depth, visual);
                Ok(visual)
            }
            None => Err(super::core::XError::NoVisual(depth)),
        }
    }

    /// Tries to find a visual type on the given screen matching the
    /// given depth.
    ///
    /// A nonzero depth with no matching depth group falls back once to
    /// "any depth"; `None` means the screen advertises no visuals at
    /// all.
    pub fn visual_type<'s>(&self, screen: &'s Screen, match_depth: u8) -> Option<&'s Visualtype> {
        visual_type_in(&screen.allowed_depths, match_depth)
    }

    /// Adds the given bits to a window's event mask unless already set.
    ///
    /// This is a read-modify-write of the window attribute; the
    /// protocol offers no atomic modify, so a concurrent writer from
    /// another client can race it. Known limitation, not locally
    /// fixable.
    pub fn ensure_event_mask(&self, win: XWindowID, mask: EventMask) -> Result<()> {
        let attributes = self.core.conn().get_window_attributes(win)?.reply()?;
        let mask = attributes.your_event_mask | mask;
        self.core
            .conn()
            .change_window_attributes(win, &ChangeWindowAttributesAux::new().event_mask(mask))?
            .check()?;
        Ok(())
    }

    /// Clears the event mask for the given window.
    pub fn clear_event_mask(&self, win: XWindowID) -> Result<()> {
        self.core
            .conn()
            .change_window_attributes(
                win,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::NO_EVENT),
            )?
            .check()?;
        Ok(())
    }

    /// Builds a 32-bit-format client message with the given type atom
    /// and target window, all data fields zeroed.
    pub fn make_client_message(&self, type_: XAtom, target: XWindowID) -> ClientMessageEvent {
        ClientMessageEvent::new(32, target, type_, [0u32; 5])
    }

    /// Sends a client message event and flushes the connection, since
    /// the send is otherwise buffered with no delivery guarantee.
    ///
    /// Callers without more specific needs pass
    /// [`SEND_EVENT_ANY_MASK`] and `propagate = false`.
    pub fn send_client_message(
        &self,
        message: ClientMessageEvent,
        target: XWindowID,
        event_mask: impl Into<EventMask>,
        propagate: bool,
    ) -> Result<()> {
        self.core
            .conn()
            .send_event(propagate, target, event_mask.into(), message)?;
        self.core.flush()
    }

    /// The response type a client message arrives with, for use with
    /// [`wait_for_response`](Connection::wait_for_response).
    pub const CLIENT_MESSAGE: u8 = CLIENT_MESSAGE_EVENT;

    /// Attaches an event sink at the default priority 0.
    pub fn attach_sink(&self, sink: Box<dyn EventSink>) -> SinkId {
        self.attach_sink_prio(sink, 0)
    }

    /// Attaches an event sink at the given priority.
    pub fn attach_sink_prio(&self, sink: Box<dyn EventSink>, prio: Priority) -> SinkId {
        self.registry.borrow_mut().attach(prio, sink)
    }

    /// Detaches the exact `(priority, id)` pair; a no-op if absent.
    ///
    /// Panics if called from inside a sink while a dispatch is in
    /// flight.
    pub fn detach_sink(&self, prio: Priority, id: SinkId) {
        self.registry.borrow_mut().detach(prio, id);
    }

    /// The sole bridge from "an event was received" to the registry:
    /// fans the event out to every attached sink, in priority order,
    /// with no filtering of its own.
    ///
    /// Panics if a sink tries to attach or detach during dispatch.
    pub fn dispatch_event(&self, event: &Event) {
        self.registry.borrow_mut().dispatch(event);
    }
}

fn format_id(win: XWindowID) -> String {
    format!("0x{:07x}", win)
}

/// Walks the depth groups for the first visual under a matching depth,
/// falling back once to "any depth" when a nonzero depth found nothing.
pub(crate) fn visual_type_in(depths: &[Depth], match_depth: u8) -> Option<&Visualtype> {
    for depth in depths {
        if match_depth == 0 || match_depth == depth.depth {
            if let Some(visual) = depth.visuals.first() {
                return Some(visual);
            }
        }
    }
    if match_depth > 0 {
        visual_type_in(depths, 0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visual(id: u32) -> Visualtype {
        Visualtype {
            visual_id: id,
            class: VisualClass::TRUE_COLOR,
            bits_per_rgb_value: 8,
            colormap_entries: 256,
            red_mask: 0xff0000,
            green_mask: 0x00ff00,
            blue_mask: 0x0000ff,
        }
    }

    fn depth(depth: u8, visuals: Vec<Visualtype>) -> Depth {
        Depth { depth, visuals }
    }

    #[test]
    fn matching_depth_returns_its_first_visual() {
        let depths = vec![
            depth(24, vec![visual(10), visual(11)]),
            depth(32, vec![visual(20)]),
        ];
        let found = visual_type_in(&depths, 32).expect("expected a visual");
        assert_eq!(found.visual_id, 20);
    }

    #[test]
    fn unmatched_nonzero_depth_falls_back_to_any() {
        let depths = vec![depth(24, vec![visual(10)])];
        let found = visual_type_in(&depths, 32).expect("expected fallback visual");
        assert_eq!(found.visual_id, 10);
    }

    #[test]
    fn depth_zero_matches_first_populated_group() {
        let depths = vec![depth(8, vec![]), depth(24, vec![visual(7)])];
        let found = visual_type_in(&depths, 0).expect("expected a visual");
        assert_eq!(found.visual_id, 7);
    }

    #[test]
    fn screen_without_visuals_yields_none() {
        assert!(visual_type_in(&[], 32).is_none());
        let empty_groups = vec![depth(24, vec![]), depth(32, vec![])];
        assert!(visual_type_in(&empty_groups, 32).is_none());
    }

    #[test]
    fn window_ids_format_as_zero_padded_hex() {
        assert_eq!(format_id(0x2c00041), "0x2c00041");
        assert_eq!(format_id(0x1), "0x0000001");
        assert_eq!(format_id(0), "0x0000000");
    }
}
