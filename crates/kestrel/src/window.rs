use kestrel_common::rgba_to_argb;

use crate::config::{BORDER_COLOR, BORDER_WIDTH};
use crate::frontend::Frontend;
use crate::process::Launcher;
use crate::scene::NodeId;
use crate::server::{CursorMode, Edges, Server, SurfaceId, ToplevelId};
use crate::surface::SurfaceRole;

/// State the next configure will carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ToplevelConfigure {
    pub width: i32,
    pub height: i32,
    pub activated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Borders {
    pub top: NodeId,
    pub bottom: NodeId,
    pub left: NodeId,
    pub right: NodeId,
}

pub struct Toplevel {
    pub id: ToplevelId,
    pub surface: SurfaceId,
    /// Subtree holding the surface, its subsurfaces, popups and borders.
    pub tree: NodeId,
    pub surface_node: NodeId,
    pub borders: Borders,
    pub mapped: bool,
    /// The initial commit has been handled.
    pub initialized: bool,
    /// The client acked at least one configure.
    pub configured: bool,
    pub pending: ToplevelConfigure,
    pub configure_scheduled: bool,
    pub pending_serials: Vec<u32>,
    pub title: Option<String>,
    pub app_id: Option<String>,
}

impl<F: Frontend, L: Launcher> Server<F, L> {
    pub fn new_toplevel(&mut self, surface: SurfaceId) -> ToplevelId {
        let id = self.alloc_id();
        let root = self.scene.root();
        let tree = self.scene.create_tree(root, Some(id));
        self.scene.set_enabled(tree, false);
        let surface_node = self.attach_surface_node(surface, tree);

        let color = rgba_to_argb(BORDER_COLOR);
        let borders = Borders {
            top: self.scene.create_rect(tree, 0, BORDER_WIDTH, color),
            bottom: self.scene.create_rect(tree, 0, BORDER_WIDTH, color),
            left: self.scene.create_rect(tree, BORDER_WIDTH, 0, color),
            right: self.scene.create_rect(tree, BORDER_WIDTH, 0, color),
        };

        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.role = SurfaceRole::Toplevel(id);
        }
        self.toplevels.insert(
            id,
            Toplevel {
                id,
                surface,
                tree,
                surface_node,
                borders,
                mapped: false,
                initialized: false,
                configured: false,
                pending: ToplevelConfigure::default(),
                configure_scheduled: false,
                pending_serials: Vec::new(),
                title: None,
                app_id: None,
            },
        );
        log::debug!("[xdg] New toplevel {} for surface {}", id, surface);
        id
    }

    pub fn toplevel_for_surface(&self, surface: SurfaceId) -> Option<ToplevelId> {
        match self.surfaces.get(&surface)?.role {
            SurfaceRole::Toplevel(id) => Some(id),
            _ => None,
        }
    }

    pub(crate) fn toplevel_commit(&mut self, id: ToplevelId) {
        let Some(toplevel) = self.toplevels.get_mut(&id) else {
            return;
        };
        let (initialized, configured, mapped) =
            (toplevel.initialized, toplevel.configured, toplevel.mapped);
        toplevel.initialized = true;
        let has_buffer = self
            .surfaces
            .get(&toplevel.surface)
            .is_some_and(|s| s.buffer.is_some());

        if !initialized {
            // Let the client pick its own size.
            self.set_toplevel_size(id, 0, 0);
        } else if has_buffer && configured && !mapped {
            self.map_toplevel(id);
        } else if !has_buffer && mapped {
            self.unmap_toplevel(id);
            if let Some(t) = self.toplevels.get_mut(&id) {
                t.initialized = false;
                t.configured = false;
            }
        }

        self.update_borders(id);
    }

    /// Places the four border rectangles just outside the window geometry.
    pub fn update_borders(&mut self, id: ToplevelId) {
        let Some(toplevel) = self.toplevels.get(&id) else {
            return;
        };
        let borders = toplevel.borders;
        let g = self.window_geometry(toplevel.surface);
        let w = BORDER_WIDTH;

        self.scene.set_rect_size(borders.top, g.width, w);
        self.scene.set_position(borders.top, g.x, g.y.saturating_sub(w));
        self.scene.set_rect_size(borders.bottom, g.width, w);
        self.scene.set_position(borders.bottom, g.x, g.bottom());
        self.scene.set_rect_size(borders.left, w, g.height);
        self.scene.set_position(borders.left, g.x.saturating_sub(w), g.y);
        self.scene.set_rect_size(borders.right, w, g.height);
        self.scene.set_position(borders.right, g.right(), g.y);
    }

    pub fn map_toplevel(&mut self, id: ToplevelId) {
        let Some(toplevel) = self.toplevels.get_mut(&id) else {
            return;
        };
        if toplevel.mapped {
            return;
        }
        toplevel.mapped = true;
        let tree = toplevel.tree;
        self.scene.set_enabled(tree, true);
        self.stack.insert(0, id);
        log::info!("[xdg] Toplevel {} mapped", id);
        self.focus(Some(id));
    }

    pub fn unmap_toplevel(&mut self, id: ToplevelId) {
        let Some(toplevel) = self.toplevels.get_mut(&id) else {
            return;
        };
        if !toplevel.mapped {
            return;
        }
        toplevel.mapped = false;
        let tree = toplevel.tree;

        if self.interaction.grabbed == Some(id) {
            self.reset_mode();
        }
        self.stack.retain(|t| *t != id);
        self.scene.set_enabled(tree, false);
        log::info!("[xdg] Toplevel {} unmapped", id);
    }

    pub fn destroy_toplevel(&mut self, id: ToplevelId) {
        self.unmap_toplevel(id);
        let Some(toplevel) = self.toplevels.remove(&id) else {
            return;
        };
        self.detach_surface_nodes(toplevel.surface);
        self.scene.destroy(toplevel.tree);
        self.prune_orphan_popups();
        if let Some(s) = self.surfaces.get_mut(&toplevel.surface) {
            s.role = SurfaceRole::None;
        }
        log::debug!("[xdg] Toplevel {} destroyed", id);
    }

    pub fn request_move(&mut self, id: ToplevelId, serial: u32) {
        if !self.interactive_request_allowed(id, serial) {
            log::debug!("[xdg] Ignoring move request from toplevel {} (serial {})", id, serial);
            return;
        }
        self.begin_interactive(id, CursorMode::Move, Edges::NONE);
    }

    pub fn request_resize(&mut self, id: ToplevelId, serial: u32, edges: Edges) {
        if edges.is_empty() || !self.interactive_request_allowed(id, serial) {
            log::debug!("[xdg] Ignoring resize request from toplevel {} (serial {})", id, serial);
            return;
        }
        self.begin_interactive(id, CursorMode::Resize, edges);
    }

    fn interactive_request_allowed(&self, id: ToplevelId, serial: u32) -> bool {
        self.toplevels.get(&id).is_some_and(|t| t.mapped) && self.seat.is_recent_input_serial(serial)
    }

    /// Maximize is not supported; the empty configure keeps the client
    /// moving through the protocol.
    pub fn request_maximize(&mut self, id: ToplevelId) {
        self.schedule_empty_configure(id);
    }

    pub fn request_fullscreen(&mut self, id: ToplevelId) {
        self.schedule_empty_configure(id);
    }

    fn schedule_empty_configure(&mut self, id: ToplevelId) {
        if let Some(toplevel) = self.toplevels.get_mut(&id) {
            if toplevel.initialized {
                toplevel.configure_scheduled = true;
            }
        }
    }

    pub fn set_toplevel_size(&mut self, id: ToplevelId, width: i32, height: i32) {
        if let Some(toplevel) = self.toplevels.get_mut(&id) {
            toplevel.pending.width = width;
            toplevel.pending.height = height;
            toplevel.configure_scheduled = true;
        }
    }

    pub fn set_toplevel_activated(&mut self, id: ToplevelId, activated: bool) {
        if let Some(toplevel) = self.toplevels.get_mut(&id) {
            if toplevel.pending.activated != activated {
                toplevel.pending.activated = activated;
                toplevel.configure_scheduled = true;
            }
        }
    }

    pub fn set_toplevel_title(&mut self, id: ToplevelId, title: String) {
        if let Some(toplevel) = self.toplevels.get_mut(&id) {
            log::debug!("[xdg] Toplevel {} title: {}", id, title);
            toplevel.title = Some(title);
        }
    }

    pub fn set_toplevel_app_id(&mut self, id: ToplevelId, app_id: String) {
        if let Some(toplevel) = self.toplevels.get_mut(&id) {
            toplevel.app_id = Some(app_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Rectangle, COORD_LIMIT};
    use crate::surface::BufferChange;
    use crate::testing::{ack_latest, mapped_toplevel, test_server, Event};

    #[test]
    fn test_initial_commit_configures_zero_size() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        let id = server.new_toplevel(surface);
        server.flush();
        assert!(server.frontend.take().is_empty());

        server.commit(surface, BufferChange::Keep);
        server.flush();
        let events = server.frontend.take();
        assert!(matches!(
            events.as_slice(),
            [Event::ConfigureToplevel { toplevel, width: 0, height: 0, activated: false, .. }] if *toplevel == id
        ));
    }

    #[test]
    fn test_not_in_stack_until_mapped() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        let id = server.new_toplevel(surface);
        server.commit(surface, BufferChange::Keep);
        assert!(server.stack.is_empty());

        // A buffer before any ack does not map.
        server.commit(surface, BufferChange::Attach { width: 50, height: 50 });
        assert!(server.stack.is_empty());

        ack_latest(&mut server, id);
        server.commit(surface, BufferChange::Keep);
        assert_eq!(server.stack, vec![id]);
        assert!(server.scene.is_visible(server.toplevels[&id].tree));
    }

    #[test]
    fn test_map_focuses_and_activates() {
        let mut server = test_server();
        let (id, surface) = mapped_toplevel(&mut server, 1, 100, 100);
        assert_eq!(server.seat.keyboard_focus, Some(surface));
        server.flush();
        let events = server.frontend.take();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::ConfigureToplevel { toplevel, activated: true, .. } if *toplevel == id
        )));
    }

    #[test]
    fn test_borders_follow_geometry() {
        let mut server = test_server();
        let (id, surface) = mapped_toplevel(&mut server, 1, 300, 200);
        server.set_window_geometry(surface, Rectangle::new(10, 20, 280, 160));
        server.commit(surface, BufferChange::Keep);

        let b = server.toplevels[&id].borders;
        assert_eq!(server.scene.position(b.top), (10, 18));
        assert_eq!(server.scene.rect_size(b.top), Some((280, 2)));
        assert_eq!(server.scene.position(b.bottom), (10, 180));
        assert_eq!(server.scene.rect_size(b.bottom), Some((280, 2)));
        assert_eq!(server.scene.position(b.left), (8, 20));
        assert_eq!(server.scene.rect_size(b.left), Some((2, 160)));
        assert_eq!(server.scene.position(b.right), (290, 20));
        assert_eq!(server.scene.rect_size(b.right), Some((2, 160)));
    }

    #[test]
    fn test_extreme_window_geometry_is_clamped() {
        let mut server = test_server();
        let (id, surface) = mapped_toplevel(&mut server, 1, 100, 100);
        server.set_window_geometry(surface, Rectangle::new(i32::MAX - 10, 0, 100, 100));
        server.commit(surface, BufferChange::Keep);

        assert_eq!(server.window_geometry(surface), Rectangle::new(COORD_LIMIT, 0, 100, 100));
        let b = server.toplevels[&id].borders;
        assert_eq!(server.scene.position(b.left), (COORD_LIMIT - 2, 0));
        assert_eq!(server.scene.position(b.right), (COORD_LIMIT + 100, 0));
    }

    #[test]
    fn test_borders_saturate_at_coordinate_extremes() {
        let mut server = test_server();
        let (id, surface) = mapped_toplevel(&mut server, 1, 100, 100);
        if let Some(s) = server.surfaces.get_mut(&surface) {
            s.geometry = Some(Rectangle::new(i32::MAX - 10, i32::MIN + 1, 100, 100));
        }
        server.commit(surface, BufferChange::Keep);

        let b = server.toplevels[&id].borders;
        assert_eq!(server.scene.position(b.top), (i32::MAX - 10, i32::MIN));
        assert_eq!(server.scene.position(b.bottom), (i32::MAX - 10, i32::MIN + 101));
        assert_eq!(server.scene.position(b.right), (i32::MAX, i32::MIN + 1));
        assert_eq!(server.scene.position(b.left), (i32::MAX - 12, i32::MIN + 1));
    }

    #[test]
    fn test_null_buffer_unmaps() {
        let mut server = test_server();
        let (id, surface) = mapped_toplevel(&mut server, 1, 100, 100);
        server.commit(surface, BufferChange::Detach);
        assert!(server.stack.is_empty());
        assert!(!server.toplevels[&id].mapped);
        assert!(!server.scene.is_visible(server.toplevels[&id].tree));
        assert!(!server.toplevels[&id].initialized);
    }

    #[test]
    fn test_unmap_of_grabbed_resets_mode() {
        let mut server = test_server();
        let (id, surface) = mapped_toplevel(&mut server, 1, 100, 100);
        assert!(server.begin_interactive(id, CursorMode::Move, Edges::NONE));
        assert_eq!(server.interaction.grabbed, Some(id));

        server.commit(surface, BufferChange::Detach);
        assert_eq!(server.interaction.mode, CursorMode::Passthrough);
        assert_eq!(server.interaction.grabbed, None);
    }

    #[test]
    fn test_destroy_removes_scene_subtree() {
        let mut server = test_server();
        let (id, surface) = mapped_toplevel(&mut server, 1, 100, 100);
        let tree = server.toplevels[&id].tree;
        let before = server.scene.len();

        server.destroy_surface(surface);
        assert!(server.toplevels.is_empty());
        assert!(server.stack.is_empty());
        assert!(server.scene.node(tree).is_none());
        assert!(server.scene.len() < before);
        assert_eq!(server.seat.keyboard_focus, None);
    }

    #[test]
    fn test_maximize_before_initial_commit_is_ignored() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        let id = server.new_toplevel(surface);
        server.request_maximize(id);
        server.flush();
        assert!(server.frontend.take().is_empty());
    }

    #[test]
    fn test_maximize_on_unmapped_toplevel_sends_configure() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        let id = server.new_toplevel(surface);
        server.commit(surface, BufferChange::Keep);
        server.flush();
        server.frontend.take();
        assert!(server.toplevels[&id].initialized);
        assert!(!server.toplevels[&id].mapped);

        server.request_maximize(id);
        server.flush();
        let events = server.frontend.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ConfigureToplevel { toplevel, .. } if toplevel == id));
        assert!(server.stack.is_empty());
        assert_eq!(server.interaction.mode, CursorMode::Passthrough);
    }

    #[test]
    fn test_fullscreen_on_unmapped_toplevel_sends_configure() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        let id = server.new_toplevel(surface);
        server.commit(surface, BufferChange::Keep);
        server.flush();
        server.frontend.take();

        server.request_fullscreen(id);
        server.request_fullscreen(id);
        server.flush();
        let events = server.frontend.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ConfigureToplevel { toplevel, .. } if toplevel == id));
        assert!(!server.toplevels[&id].mapped);
        assert_eq!(server.toplevels[&id].pending_serials.len(), 2);
    }

    #[test]
    fn test_fullscreen_after_configure_sends_configure() {
        let mut server = test_server();
        let (id, _) = mapped_toplevel(&mut server, 1, 100, 100);
        server.flush();
        server.frontend.take();

        server.request_fullscreen(id);
        server.flush();
        let events = server.frontend.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ConfigureToplevel { toplevel, .. } if toplevel == id));
    }

    #[test]
    fn test_move_request_needs_recent_serial() {
        let mut server = test_server();
        let (id, _) = mapped_toplevel(&mut server, 1, 100, 100);
        server.request_move(id, 9999);
        assert_eq!(server.interaction.mode, CursorMode::Passthrough);

        server.pointer_notify_enter(server.toplevels[&id].surface, 1.0, 1.0);
        server.pointer_notify_button(0, 272, wayland_server::protocol::wl_pointer::ButtonState::Pressed);
        let serial = server
            .frontend
            .take()
            .into_iter()
            .find_map(|e| match e {
                Event::PointerButton { serial, .. } => Some(serial),
                _ => None,
            })
            .unwrap();
        server.request_move(id, serial);
        assert_eq!(server.interaction.mode, CursorMode::Move);
        assert_eq!(server.interaction.grabbed, Some(id));
    }

    #[test]
    fn test_resize_request_without_edges_is_ignored() {
        let mut server = test_server();
        let (id, surface) = mapped_toplevel(&mut server, 1, 100, 100);
        server.pointer_notify_enter(surface, 1.0, 1.0);
        server.pointer_notify_button(0, 272, wayland_server::protocol::wl_pointer::ButtonState::Pressed);
        let serial = server
            .frontend
            .take()
            .into_iter()
            .find_map(|e| match e {
                Event::PointerButton { serial, .. } => Some(serial),
                _ => None,
            })
            .unwrap();

        server.request_resize(id, serial, Edges::NONE);
        assert_eq!(server.interaction.mode, CursorMode::Passthrough);
        server.request_resize(id, serial, Edges::BOTTOM | Edges::RIGHT);
        assert_eq!(server.interaction.mode, CursorMode::Resize);
        assert_eq!(server.interaction.resize_edges, Edges::BOTTOM | Edges::RIGHT);
    }
}
