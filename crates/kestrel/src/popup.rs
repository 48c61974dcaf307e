use std::fmt;

use crate::frontend::Frontend;
use crate::process::Launcher;
use crate::scene::NodeId;
use crate::server::{PopupId, Rectangle, Server, SurfaceId, COORD_LIMIT};
use crate::surface::SurfaceRole;

/// Anchor edge or gravity direction, numbered like `xdg_positioner.anchor`
/// and `xdg_positioner.gravity`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    BottomLeft,
    TopRight,
    BottomRight,
}

impl Direction {
    pub fn from_raw(value: u32) -> Option<Self> {
        Some(match value {
            0 => Direction::None,
            1 => Direction::Top,
            2 => Direction::Bottom,
            3 => Direction::Left,
            4 => Direction::Right,
            5 => Direction::TopLeft,
            6 => Direction::BottomLeft,
            7 => Direction::TopRight,
            8 => Direction::BottomRight,
            _ => return None,
        })
    }

    fn has_left(self) -> bool {
        matches!(self, Direction::Left | Direction::TopLeft | Direction::BottomLeft)
    }

    fn has_right(self) -> bool {
        matches!(self, Direction::Right | Direction::TopRight | Direction::BottomRight)
    }

    fn has_top(self) -> bool {
        matches!(self, Direction::Top | Direction::TopLeft | Direction::TopRight)
    }

    fn has_bottom(self) -> bool {
        matches!(self, Direction::Bottom | Direction::BottomLeft | Direction::BottomRight)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Positioner {
    pub width: i32,
    pub height: i32,
    pub anchor_rect: Rectangle,
    pub anchor: Direction,
    pub gravity: Direction,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl Positioner {
    /// Popup geometry relative to the parent's window geometry. Constraint
    /// adjustment is not applied.
    pub fn place(&self) -> Rectangle {
        let ar = self.anchor_rect;
        let anchor_x = if self.anchor.has_left() {
            ar.x
        } else if self.anchor.has_right() {
            ar.right()
        } else {
            ar.x.saturating_add(ar.width / 2)
        };
        let anchor_y = if self.anchor.has_top() {
            ar.y
        } else if self.anchor.has_bottom() {
            ar.bottom()
        } else {
            ar.y.saturating_add(ar.height / 2)
        };

        let x = if self.gravity.has_left() {
            anchor_x.saturating_sub(self.width)
        } else if self.gravity.has_right() {
            anchor_x
        } else {
            anchor_x.saturating_sub(self.width / 2)
        };
        let y = if self.gravity.has_top() {
            anchor_y.saturating_sub(self.height)
        } else if self.gravity.has_bottom() {
            anchor_y
        } else {
            anchor_y.saturating_sub(self.height / 2)
        };

        Rectangle::new(
            x.saturating_add(self.offset_x),
            y.saturating_add(self.offset_y),
            self.width,
            self.height,
        )
        .clamped()
    }

    /// Copy with every client value within `COORD_LIMIT`.
    pub fn clamped(&self) -> Positioner {
        let clamp = |v: i32| v.clamp(-COORD_LIMIT, COORD_LIMIT);
        Positioner {
            width: clamp(self.width),
            height: clamp(self.height),
            anchor_rect: self.anchor_rect.clamped(),
            offset_x: clamp(self.offset_x),
            offset_y: clamp(self.offset_y),
            ..*self
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PopupError {
    MissingParent,
}

impl fmt::Display for PopupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopupError::MissingParent => write!(f, "popup parent is missing or has no role"),
        }
    }
}

impl std::error::Error for PopupError {}

pub struct Popup {
    pub id: PopupId,
    pub surface: SurfaceId,
    pub parent: SurfaceId,
    pub tree: Option<NodeId>,
    pub positioner: Positioner,
    /// Placement relative to the parent's window geometry.
    pub geometry: Rectangle,
    pub initialized: bool,
    pub configured: bool,
    pub mapped: bool,
    pub configure_scheduled: bool,
    pub pending_serials: Vec<u32>,
}

impl<F: Frontend, L: Launcher> Server<F, L> {
    /// Subtree that popups of `surface` attach to.
    pub fn xdg_tree(&self, surface: SurfaceId) -> Option<NodeId> {
        match self.surfaces.get(&surface)?.role {
            SurfaceRole::Toplevel(id) => self.toplevels.get(&id).map(|t| t.tree),
            SurfaceRole::Popup(id) => self.popups.get(&id).and_then(|p| p.tree),
            _ => None,
        }
    }

    pub fn new_popup(
        &mut self,
        surface: SurfaceId,
        parent: Option<SurfaceId>,
        positioner: Positioner,
    ) -> Result<PopupId, PopupError> {
        let parent = parent.ok_or(PopupError::MissingParent)?;
        let positioner = positioner.clamped();
        let parent_tree = self.xdg_tree(parent).ok_or(PopupError::MissingParent)?;

        let id = self.alloc_id();
        let tree = self.scene.create_tree(parent_tree, None);
        self.scene.set_enabled(tree, false);
        self.attach_surface_node(surface, tree);
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.role = SurfaceRole::Popup(id);
        }

        self.popups.insert(
            id,
            Popup {
                id,
                surface,
                parent,
                tree: Some(tree),
                positioner,
                geometry: positioner.place(),
                initialized: false,
                configured: false,
                mapped: false,
                configure_scheduled: false,
                pending_serials: Vec::new(),
            },
        );
        self.position_popup(id);
        log::debug!("[xdg] New popup {} for surface {} (parent {})", id, surface, parent);
        Ok(id)
    }

    /// Moves the popup tree so its window geometry lands at the placement
    /// relative to the parent's window geometry.
    pub fn position_popup(&mut self, id: PopupId) {
        let Some(popup) = self.popups.get(&id) else {
            return;
        };
        let Some(tree) = popup.tree else {
            return;
        };
        let parent = self.window_geometry(popup.parent);
        let own = self.window_geometry(popup.surface);
        let g = popup.geometry;
        let x = parent.x.saturating_add(g.x).saturating_sub(own.x);
        let y = parent.y.saturating_add(g.y).saturating_sub(own.y);
        self.scene.set_position(tree, x, y);
    }

    pub(crate) fn popup_commit(&mut self, id: PopupId) {
        let Some(popup) = self.popups.get_mut(&id) else {
            return;
        };
        let (initialized, configured, mapped, tree) =
            (popup.initialized, popup.configured, popup.mapped, popup.tree);
        popup.initialized = true;
        let has_buffer = self
            .surfaces
            .get(&popup.surface)
            .is_some_and(|s| s.buffer.is_some());

        if !initialized {
            popup.configure_scheduled = true;
        } else if has_buffer && configured && !mapped {
            popup.mapped = true;
            if let Some(tree) = tree {
                self.scene.set_enabled(tree, true);
            }
            log::debug!("[xdg] Popup {} mapped", id);
        } else if !has_buffer && mapped {
            popup.mapped = false;
            popup.initialized = false;
            popup.configured = false;
            if let Some(tree) = tree {
                self.scene.set_enabled(tree, false);
            }
            log::debug!("[xdg] Popup {} unmapped", id);
        }

        self.position_popup(id);
    }

    /// Handles `xdg_popup.reposition`.
    pub fn reposition_popup(&mut self, id: PopupId, positioner: Positioner) {
        let positioner = positioner.clamped();
        if let Some(popup) = self.popups.get_mut(&id) {
            popup.positioner = positioner;
            popup.geometry = positioner.place();
            popup.configure_scheduled = true;
        }
        self.position_popup(id);
    }

    pub fn destroy_popup(&mut self, id: PopupId) {
        let Some(popup) = self.popups.remove(&id) else {
            return;
        };
        self.detach_surface_nodes(popup.surface);
        if let Some(tree) = popup.tree {
            self.scene.destroy(tree);
        }
        if let Some(s) = self.surfaces.get_mut(&popup.surface) {
            s.role = SurfaceRole::None;
        }
        self.prune_orphan_popups();
        log::debug!("[xdg] Popup {} destroyed", id);
    }

    /// Forgets scene nodes of popups whose parent subtree is gone.
    pub(crate) fn prune_orphan_popups(&mut self) {
        let orphans: Vec<(PopupId, SurfaceId)> = self
            .popups
            .values()
            .filter(|p| p.tree.is_some_and(|t| self.scene.node(t).is_none()))
            .map(|p| (p.id, p.surface))
            .collect();
        for (id, surface) in orphans {
            if let Some(popup) = self.popups.get_mut(&id) {
                popup.tree = None;
                popup.mapped = false;
            }
            self.detach_surface_nodes(surface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::BufferChange;
    use crate::testing::{mapped_toplevel, test_server, Event};

    fn positioner(w: i32, h: i32, anchor_rect: Rectangle) -> Positioner {
        Positioner {
            width: w,
            height: h,
            anchor_rect,
            anchor: Direction::BottomLeft,
            gravity: Direction::BottomRight,
            ..Default::default()
        }
    }

    #[test]
    fn test_direction_from_raw() {
        assert_eq!(Direction::from_raw(0), Some(Direction::None));
        assert_eq!(Direction::from_raw(8), Some(Direction::BottomRight));
        assert_eq!(Direction::from_raw(9), None);
    }

    #[test]
    fn test_place_menu_below_anchor() {
        let p = positioner(100, 50, Rectangle::new(10, 10, 40, 20));
        assert_eq!(p.place(), Rectangle::new(10, 30, 100, 50));
    }

    #[test]
    fn test_place_centered_with_offset() {
        let p = Positioner {
            width: 20,
            height: 10,
            anchor_rect: Rectangle::new(0, 0, 100, 100),
            offset_x: 5,
            offset_y: -5,
            ..Default::default()
        };
        assert_eq!(p.place(), Rectangle::new(45, 40, 20, 10));
    }

    #[test]
    fn test_place_saturates_extreme_positioner() {
        let p = Positioner {
            width: i32::MAX,
            height: i32::MAX,
            anchor_rect: Rectangle::new(i32::MAX - 10, i32::MIN, i32::MAX, 100),
            anchor: Direction::BottomRight,
            gravity: Direction::TopLeft,
            offset_x: i32::MIN,
            offset_y: i32::MAX,
        };
        let placed = p.place();
        assert_eq!(placed, placed.clamped());

        let clamped = p.clamped();
        assert_eq!(clamped.width, COORD_LIMIT);
        assert_eq!(clamped.offset_x, -COORD_LIMIT);
        assert_eq!(clamped.anchor_rect, Rectangle::new(COORD_LIMIT, -COORD_LIMIT, COORD_LIMIT, 100));
        assert_eq!(clamped.place(), Rectangle::new(0, 100 - COORD_LIMIT, COORD_LIMIT, COORD_LIMIT));
    }

    #[test]
    fn test_popup_with_extreme_positioner_stays_in_range() {
        let mut server = test_server();
        let (_, parent) = mapped_toplevel(&mut server, 1, 200, 200);
        let surface = server.create_surface(1);
        let p = Positioner {
            width: 10,
            height: 10,
            anchor_rect: Rectangle::new(i32::MAX, i32::MAX, i32::MAX, i32::MAX),
            anchor: Direction::BottomRight,
            gravity: Direction::BottomRight,
            offset_x: i32::MAX,
            offset_y: i32::MAX,
        };
        let id = server.new_popup(surface, Some(parent), p).unwrap();
        let geometry = server.popups[&id].geometry;
        assert_eq!(geometry, Rectangle::new(COORD_LIMIT, COORD_LIMIT, 10, 10));

        server.commit(surface, BufferChange::Keep);
        server.reposition_popup(id, p);
        assert_eq!(server.popups[&id].geometry, geometry);
    }

    #[test]
    fn test_popup_without_parent_fails() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        let p = positioner(10, 10, Rectangle::new(0, 0, 1, 1));
        assert_eq!(server.new_popup(surface, None, p), Err(PopupError::MissingParent));

        let plain = server.create_surface(1);
        assert_eq!(server.new_popup(surface, Some(plain), p), Err(PopupError::MissingParent));
        assert!(server.popups.is_empty());
    }

    #[test]
    fn test_popup_maps_under_parent_and_hits_parent_toplevel() {
        let mut server = test_server();
        let (toplevel, parent) = mapped_toplevel(&mut server, 1, 200, 200);
        let surface = server.create_surface(1);
        let id = server
            .new_popup(surface, Some(parent), positioner(50, 30, Rectangle::new(20, 20, 10, 10)))
            .unwrap();

        server.commit(surface, BufferChange::Keep);
        server.flush();
        let serial = server
            .frontend
            .take()
            .into_iter()
            .find_map(|e| match e {
                Event::ConfigurePopup { popup, geometry, serial } if popup == id => {
                    assert_eq!(geometry, Rectangle::new(20, 30, 50, 30));
                    Some(serial)
                }
                _ => None,
            })
            .unwrap();
        assert!(server.ack_configure(surface, serial));
        server.commit(surface, BufferChange::Attach { width: 50, height: 30 });
        assert!(server.popups[&id].mapped);

        let tree = server.popups[&id].tree.unwrap();
        assert_eq!(server.scene.coords(tree), Some((20, 30)));

        let hit = server.toplevel_at(25.0, 35.0).unwrap();
        assert_eq!(hit.toplevel, toplevel);
        assert_eq!(hit.surface, surface);
        assert_eq!((hit.sx, hit.sy), (5.0, 5.0));
    }

    #[test]
    fn test_popup_offsets_parent_geometry() {
        let mut server = test_server();
        let (_, parent) = mapped_toplevel(&mut server, 1, 200, 200);
        server.set_window_geometry(parent, Rectangle::new(10, 10, 180, 180));
        server.commit(parent, BufferChange::Keep);

        let surface = server.create_surface(1);
        server.commit(surface, BufferChange::Attach { width: 60, height: 40 });
        server.set_window_geometry(surface, Rectangle::new(5, 5, 50, 30));
        let id = server
            .new_popup(surface, Some(parent), positioner(50, 30, Rectangle::new(0, 0, 10, 10)))
            .unwrap();
        server.commit(surface, BufferChange::Keep);

        let tree = server.popups[&id].tree.unwrap();
        // parent geometry (10,10) + placement (0,10) - own geometry (5,5)
        assert_eq!(server.scene.position(tree), (5, 15));
    }

    #[test]
    fn test_nested_popup_resolves_parent_tree() {
        let mut server = test_server();
        let (_, parent) = mapped_toplevel(&mut server, 1, 200, 200);
        let first = server.create_surface(1);
        let p = positioner(50, 30, Rectangle::new(0, 0, 10, 10));
        let first_id = server.new_popup(first, Some(parent), p).unwrap();
        let second = server.create_surface(1);
        let second_id = server.new_popup(second, Some(first), p).unwrap();

        let first_tree = server.popups[&first_id].tree.unwrap();
        let second_tree = server.popups[&second_id].tree.unwrap();
        assert_eq!(server.scene.node(second_tree).unwrap().parent, Some(first_tree));
    }

    #[test]
    fn test_destroying_parent_orphans_popup() {
        let mut server = test_server();
        let (toplevel, parent) = mapped_toplevel(&mut server, 1, 200, 200);
        let surface = server.create_surface(1);
        let id = server
            .new_popup(surface, Some(parent), positioner(10, 10, Rectangle::new(0, 0, 1, 1)))
            .unwrap();

        server.destroy_toplevel(toplevel);
        assert_eq!(server.popups[&id].tree, None);
        assert_eq!(server.surfaces[&surface].scene_node, None);

        server.destroy_surface(surface);
        assert!(server.popups.is_empty());
    }

    #[test]
    fn test_reposition_schedules_configure() {
        let mut server = test_server();
        let (_, parent) = mapped_toplevel(&mut server, 1, 200, 200);
        let surface = server.create_surface(1);
        let id = server
            .new_popup(surface, Some(parent), positioner(10, 10, Rectangle::new(0, 0, 1, 1)))
            .unwrap();
        server.flush();
        server.frontend.take();

        server.reposition_popup(id, positioner(10, 10, Rectangle::new(40, 40, 1, 1)));
        server.flush();
        assert!(server.frontend.take().iter().any(|e| matches!(
            e,
            Event::ConfigurePopup { geometry, .. } if *geometry == Rectangle::new(40, 41, 10, 10)
        )));
    }
}
