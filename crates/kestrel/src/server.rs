use std::collections::HashMap;

use crate::frontend::Frontend;
use crate::keyboard::Keyboard;
use crate::output::Output;
use crate::popup::Popup;
use crate::process::Launcher;
use crate::scene::Scene;
use crate::seat::Seat;
use crate::surface::{push_pending_serial, Surface};
use crate::window::Toplevel;

pub type SurfaceId = u64;
pub type ToplevelId = u64;
pub type PopupId = u64;
pub type OutputId = u64;
pub type KeyboardId = u64;
pub type ClientKey = u64;
pub type SourceId = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Client coordinates and sizes are clamped to this magnitude, so a sum of
/// a few of them never leaves `i32`.
pub const COORD_LIMIT: i32 = 1 << 24;

impl Rectangle {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// Copy with every field within `COORD_LIMIT`.
    pub fn clamped(&self) -> Rectangle {
        let clamp = |v: i32| v.clamp(-COORD_LIMIT, COORD_LIMIT);
        Rectangle {
            x: clamp(self.x),
            y: clamp(self.y),
            width: clamp(self.width),
            height: clamp(self.height),
        }
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        !self.is_empty()
            && x >= self.x as f64
            && y >= self.y as f64
            && x < self.right() as f64
            && y < self.bottom() as f64
    }

    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.x < other.right() && self.right() > other.x && self.y < other.bottom() && self.bottom() > other.y
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rectangle {
        Rectangle {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }

    pub fn union(&self, other: &Rectangle) -> Rectangle {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Rectangle {
            x: x1,
            y: y1,
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
        }
    }

    /// Closest point inside the box, treating the far edges as exclusive.
    pub fn closest_point(&self, x: f64, y: f64) -> (f64, f64) {
        let max_x = (self.right() as f64 - 1.0 / 65536.0).max(self.x as f64);
        let max_y = (self.bottom() as f64 - 1.0 / 65536.0).max(self.y as f64);
        (x.clamp(self.x as f64, max_x), y.clamp(self.y as f64, max_y))
    }
}

/// Window edges involved in an interactive resize. Bit values match
/// `xdg_toplevel.resize_edge`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Edges(u32);

impl Edges {
    pub const NONE: Edges = Edges(0);
    pub const TOP: Edges = Edges(1);
    pub const BOTTOM: Edges = Edges(2);
    pub const LEFT: Edges = Edges(4);
    pub const RIGHT: Edges = Edges(8);

    pub fn from_bits(bits: u32) -> Edges {
        Edges(bits & 0xF)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Edges) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Edges {
    type Output = Edges;

    fn bitor(self, rhs: Edges) -> Edges {
        Edges(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorMode {
    #[default]
    Passthrough,
    Move,
    Resize,
}

/// Pointer grab bookkeeping. `grabbed` is set exactly when `mode` is not
/// passthrough.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Interaction {
    pub mode: CursorMode,
    pub grabbed: Option<ToplevelId>,
    pub grab_x: f64,
    pub grab_y: f64,
    pub grab_geobox: Rectangle,
    pub resize_edges: Edges,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, Default)]
pub struct ClientInfo {
    pub pid: Option<i32>,
}

/// Compositor state shared by every handler. Protocol effects leave through
/// `frontend`, process effects through `launcher`.
pub struct Server<F, L> {
    pub frontend: F,
    pub launcher: L,
    pub scene: Scene,
    pub outputs: Vec<Output>,
    pub surfaces: HashMap<SurfaceId, Surface>,
    pub toplevels: HashMap<ToplevelId, Toplevel>,
    /// Mapped toplevels, most recently focused first.
    pub stack: Vec<ToplevelId>,
    pub popups: HashMap<PopupId, Popup>,
    pub keyboards: Vec<Keyboard>,
    pub seat: Seat,
    pub cursor: Cursor,
    pub interaction: Interaction,
    pub clients: HashMap<ClientKey, ClientInfo>,
    pub running: bool,
    next_id: u64,
}

impl<F: Frontend, L: Launcher> Server<F, L> {
    pub fn new(frontend: F, launcher: L) -> Self {
        Self {
            frontend,
            launcher,
            scene: Scene::new(),
            outputs: Vec::new(),
            surfaces: HashMap::new(),
            toplevels: HashMap::new(),
            stack: Vec::new(),
            popups: HashMap::new(),
            keyboards: Vec::new(),
            seat: Seat::new(crate::config::SEAT_NAME),
            cursor: Cursor::default(),
            interaction: Interaction::default(),
            clients: HashMap::new(),
            running: true,
            next_id: 1,
        }
    }

    pub fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn add_client(&mut self, pid: Option<i32>) -> ClientKey {
        let key = self.alloc_id();
        self.clients.insert(key, ClientInfo { pid });
        log::info!("[client] Client {} connected (pid {:?})", key, pid);
        key
    }

    pub fn remove_client(&mut self, key: ClientKey) {
        if self.clients.remove(&key).is_some() {
            log::info!("[client] Client {} disconnected", key);
        }
    }

    pub fn terminate(&mut self) {
        log::info!("Terminating display");
        self.running = false;
    }

    /// Sends every configure scheduled since the last flush.
    pub fn flush(&mut self) {
        let mut toplevels: Vec<ToplevelId> = self
            .toplevels
            .iter()
            .filter(|(_, t)| t.configure_scheduled)
            .map(|(id, _)| *id)
            .collect();
        toplevels.sort_unstable();

        for id in toplevels {
            let serial = self.seat.next_serial();
            if let Some(toplevel) = self.toplevels.get_mut(&id) {
                toplevel.configure_scheduled = false;
                push_pending_serial(&mut toplevel.pending_serials, serial);
                let pending = toplevel.pending;
                self.frontend.configure_toplevel(
                    id,
                    pending.width,
                    pending.height,
                    pending.activated,
                    serial,
                );
            }
        }

        let mut popups: Vec<PopupId> = self
            .popups
            .iter()
            .filter(|(_, p)| p.configure_scheduled)
            .map(|(id, _)| *id)
            .collect();
        popups.sort_unstable();

        for id in popups {
            let serial = self.seat.next_serial();
            if let Some(popup) = self.popups.get_mut(&id) {
                popup.configure_scheduled = false;
                push_pending_serial(&mut popup.pending_serials, serial);
                let geometry = popup.geometry;
                self.frontend.configure_popup(id, geometry, serial);
            }
        }
    }
}
