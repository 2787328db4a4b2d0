//! The static inventory of atoms the bar will ever need.
//!
//! Every variant is interned in a single batched round at connection
//! construction, so looking one up later never costs a server round
//! trip.

use std::collections::HashMap;

use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use super::core::XAtom;

/// Symbolic names the bar interns on the server.
///
/// This gives some measure of type safety around dealing with atoms:
/// a module asks for `Atom::NetWmWindowTypeDock` instead of passing
/// strings around.
#[derive(AsRefStr, Display, EnumString, EnumIter, Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Atom {
    /// _NET_SUPPORTED
    #[strum(serialize = "_NET_SUPPORTED")]
    NetSupported,
    /// _NET_CURRENT_DESKTOP
    #[strum(serialize = "_NET_CURRENT_DESKTOP")]
    NetCurrentDesktop,
    /// _NET_ACTIVE_WINDOW
    #[strum(serialize = "_NET_ACTIVE_WINDOW")]
    NetActiveWindow,
    /// _NET_WM_NAME
    #[strum(serialize = "_NET_WM_NAME")]
    NetWmName,
    /// _NET_WM_DESKTOP
    #[strum(serialize = "_NET_WM_DESKTOP")]
    NetWmDesktop,
    /// _NET_WM_VISIBLE_NAME
    #[strum(serialize = "_NET_WM_VISIBLE_NAME")]
    NetWmVisibleName,
    /// _NET_WM_WINDOW_TYPE
    #[strum(serialize = "_NET_WM_WINDOW_TYPE")]
    NetWmWindowType,
    /// _NET_WM_WINDOW_TYPE_DOCK
    #[strum(serialize = "_NET_WM_WINDOW_TYPE_DOCK")]
    NetWmWindowTypeDock,
    /// _NET_WM_WINDOW_TYPE_NORMAL
    #[strum(serialize = "_NET_WM_WINDOW_TYPE_NORMAL")]
    NetWmWindowTypeNormal,
    /// _NET_WM_PID
    #[strum(serialize = "_NET_WM_PID")]
    NetWmPid,
    /// _NET_WM_STATE
    #[strum(serialize = "_NET_WM_STATE")]
    NetWmState,
    /// _NET_WM_STATE_STICKY
    #[strum(serialize = "_NET_WM_STATE_STICKY")]
    NetWmStateSticky,
    /// _NET_WM_STATE_SKIP_TASKBAR
    #[strum(serialize = "_NET_WM_STATE_SKIP_TASKBAR")]
    NetWmStateSkipTaskbar,
    /// _NET_WM_STATE_ABOVE
    #[strum(serialize = "_NET_WM_STATE_ABOVE")]
    NetWmStateAbove,
    /// _NET_WM_STATE_MAXIMIZED_VERT
    #[strum(serialize = "_NET_WM_STATE_MAXIMIZED_VERT")]
    NetWmStateMaximizedVert,
    /// _NET_WM_STRUT
    #[strum(serialize = "_NET_WM_STRUT")]
    NetWmStrut,
    /// _NET_WM_STRUT_PARTIAL
    #[strum(serialize = "_NET_WM_STRUT_PARTIAL")]
    NetWmStrutPartial,
    /// _NET_SYSTEM_TRAY_OPCODE
    #[strum(serialize = "_NET_SYSTEM_TRAY_OPCODE")]
    NetSystemTrayOpcode,
    /// WM_PROTOCOLS
    #[strum(serialize = "WM_PROTOCOLS")]
    WmProtocols,
    /// WM_DELETE_WINDOW
    #[strum(serialize = "WM_DELETE_WINDOW")]
    WmDeleteWindow,
    /// WM_TAKE_FOCUS
    #[strum(serialize = "WM_TAKE_FOCUS")]
    WmTakeFocus,
    /// WM_STATE
    #[strum(serialize = "WM_STATE")]
    WmState,
    /// MANAGER
    #[strum(serialize = "MANAGER")]
    Manager,
    /// UTF8_STRING
    #[strum(serialize = "UTF8_STRING")]
    Utf8String,
    /// _XEMBED
    #[strum(serialize = "_XEMBED")]
    XEmbed,
    /// _XEMBED_INFO
    #[strum(serialize = "_XEMBED_INFO")]
    XEmbedInfo,
    /// _XROOTPMAP_ID
    #[strum(serialize = "_XROOTPMAP_ID")]
    XRootPmapId,
    /// _XSETROOT_ID
    #[strum(serialize = "_XSETROOT_ID")]
    XSetRootId,
    /// ESETROOT_PMAP_ID
    #[strum(serialize = "ESETROOT_PMAP_ID")]
    ESetRootPmapId,
}

/// The preloaded name-to-atom cache, populated once at connection
/// construction and read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct Atoms {
    atoms: HashMap<Atom, XAtom>,
}

impl Atoms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, atom: Atom, val: XAtom) {
        self.atoms.insert(atom, val);
    }

    /// Looks up the server-side value of a preloaded atom.
    pub fn retrieve(&self, atom: Atom) -> Option<XAtom> {
        self.atoms.get(&atom).copied()
    }

    /// Reverse lookup of a server-side atom value.
    pub fn retrieve_by_value(&self, val: XAtom) -> Option<Atom> {
        self.atoms
            .iter()
            .find(|(_, v)| **v == val)
            .map(|(k, _)| *k)
    }
}
