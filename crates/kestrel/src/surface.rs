use crate::frontend::Frontend;
use crate::process::Launcher;
use crate::scene::NodeId;
use crate::server::{ClientKey, PopupId, Rectangle, Server, SurfaceId, ToplevelId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceRole {
    None,
    Toplevel(ToplevelId),
    Popup(PopupId),
    Subsurface { parent: SurfaceId },
    Cursor,
}

/// What a commit does to the attached buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferChange {
    Keep,
    Attach { width: i32, height: i32 },
    Detach,
}

pub struct Surface {
    pub id: SurfaceId,
    pub client: ClientKey,
    pub role: SurfaceRole,
    /// Size of the current buffer, if one is attached.
    pub buffer: Option<(i32, i32)>,
    /// Window geometry set by the client through xdg_surface.
    pub geometry: Option<Rectangle>,
    pub pending_geometry: Option<Rectangle>,
    pub scene_node: Option<NodeId>,
    pub subsurfaces: Vec<SurfaceId>,
    pub subsurface_position: (i32, i32),
    pub pending_subsurface_position: Option<(i32, i32)>,
}

impl Surface {
    fn new(id: SurfaceId, client: ClientKey) -> Self {
        Self {
            id,
            client,
            role: SurfaceRole::None,
            buffer: None,
            geometry: None,
            pending_geometry: None,
            scene_node: None,
            subsurfaces: Vec::new(),
            subsurface_position: (0, 0),
            pending_subsurface_position: None,
        }
    }

    /// Effective window geometry: what the client declared, else the buffer
    /// bounds.
    pub fn window_geometry(&self) -> Rectangle {
        match (self.geometry, self.buffer) {
            (Some(geometry), _) if !geometry.is_empty() => geometry,
            (_, Some((width, height))) => Rectangle::new(0, 0, width, height),
            _ => Rectangle::default(),
        }
    }
}

/// Drops `serial` and every older pending serial.
/// Unacked configure serials kept per surface; older ones are forgotten.
pub const MAX_PENDING_SERIALS: usize = 16;

pub fn push_pending_serial(pending: &mut Vec<u32>, serial: u32) {
    if pending.len() >= MAX_PENDING_SERIALS {
        pending.drain(..=pending.len() - MAX_PENDING_SERIALS);
    }
    pending.push(serial);
}

fn ack_serial(pending: &mut Vec<u32>, serial: u32) -> bool {
    match pending.iter().position(|s| *s == serial) {
        Some(index) => {
            pending.drain(..=index);
            true
        }
        None => false,
    }
}

impl<F: Frontend, L: Launcher> Server<F, L> {
    pub fn create_surface(&mut self, client: ClientKey) -> SurfaceId {
        let id = self.alloc_id();
        self.surfaces.insert(id, Surface::new(id, client));
        log::debug!("[surface] Surface {} created for client {}", id, client);
        id
    }

    pub fn window_geometry(&self, surface: SurfaceId) -> Rectangle {
        self.surfaces
            .get(&surface)
            .map(Surface::window_geometry)
            .unwrap_or_default()
    }

    pub fn set_window_geometry(&mut self, surface: SurfaceId, geometry: Rectangle) {
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.pending_geometry = Some(geometry.clamped());
        }
    }

    pub fn commit(&mut self, surface: SurfaceId, change: BufferChange) {
        let Some(s) = self.surfaces.get_mut(&surface) else {
            return;
        };
        match change {
            BufferChange::Keep => {}
            BufferChange::Attach { width, height } => s.buffer = Some((width, height)),
            BufferChange::Detach => s.buffer = None,
        }
        if let Some(geometry) = s.pending_geometry.take() {
            s.geometry = Some(geometry);
        }
        let role = s.role;
        let node = s.scene_node;
        let (width, height) = s.buffer.unwrap_or((0, 0));

        if let Some(node) = node {
            self.scene.set_surface_size(node, width, height);
        }
        self.sync_subsurfaces(surface);

        match role {
            SurfaceRole::Toplevel(id) => self.toplevel_commit(id),
            SurfaceRole::Popup(id) => self.popup_commit(id),
            _ => {}
        }
    }

    /// Applies pending subsurface positions and creates missing scene nodes
    /// for the subsurfaces of `surface`.
    fn sync_subsurfaces(&mut self, surface: SurfaceId) {
        let Some(s) = self.surfaces.get(&surface) else {
            return;
        };
        let parent_node = s.scene_node;
        let children = s.subsurfaces.clone();

        for child in children {
            let Some(c) = self.surfaces.get_mut(&child) else {
                continue;
            };
            if let Some(position) = c.pending_subsurface_position.take() {
                c.subsurface_position = position;
            }
            let (x, y) = c.subsurface_position;
            let (width, height) = c.buffer.unwrap_or((0, 0));
            let node = match (c.scene_node, parent_node) {
                (Some(node), _) => Some(node),
                (None, Some(parent)) => {
                    let node = self.scene.create_surface(parent, child);
                    if let Some(c) = self.surfaces.get_mut(&child) {
                        c.scene_node = Some(node);
                    }
                    Some(node)
                }
                (None, None) => None,
            };
            if let Some(node) = node {
                self.scene.set_position(node, x, y);
                self.scene.set_surface_size(node, width, height);
                self.sync_subsurfaces(child);
            }
        }
    }

    /// Creates the scene node for a role surface under `parent` and attaches
    /// its existing subsurfaces.
    pub(crate) fn attach_surface_node(&mut self, surface: SurfaceId, parent: NodeId) -> NodeId {
        let node = self.scene.create_surface(parent, surface);
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.scene_node = Some(node);
            let (width, height) = s.buffer.unwrap_or((0, 0));
            self.scene.set_surface_size(node, width, height);
        }
        self.sync_subsurfaces(surface);
        node
    }

    /// Forgets scene nodes of a surface and its subsurfaces. The caller
    /// destroys the nodes themselves.
    pub(crate) fn detach_surface_nodes(&mut self, surface: SurfaceId) {
        let children = match self.surfaces.get_mut(&surface) {
            Some(s) => {
                s.scene_node = None;
                s.subsurfaces.clone()
            }
            None => return,
        };
        for child in children {
            self.detach_surface_nodes(child);
        }
    }

    pub fn create_subsurface(&mut self, surface: SurfaceId, parent: SurfaceId) -> bool {
        if surface == parent || !self.surfaces.contains_key(&parent) {
            return false;
        }
        match self.surfaces.get_mut(&surface) {
            Some(s) if s.role == SurfaceRole::None => {
                s.role = SurfaceRole::Subsurface { parent };
            }
            _ => return false,
        }
        if let Some(p) = self.surfaces.get_mut(&parent) {
            p.subsurfaces.push(surface);
        }
        self.sync_subsurfaces(parent);
        log::debug!("[surface] Surface {} is a subsurface of {}", surface, parent);
        true
    }

    pub fn set_subsurface_position(&mut self, surface: SurfaceId, x: i32, y: i32) {
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.pending_subsurface_position = Some((x, y));
        }
    }

    pub fn destroy_subsurface(&mut self, surface: SurfaceId) {
        let Some(SurfaceRole::Subsurface { parent }) = self.surfaces.get(&surface).map(|s| s.role) else {
            return;
        };
        if let Some(p) = self.surfaces.get_mut(&parent) {
            p.subsurfaces.retain(|c| *c != surface);
        }
        let node = self.surfaces.get(&surface).and_then(|s| s.scene_node);
        self.detach_surface_nodes(surface);
        if let Some(node) = node {
            self.scene.destroy(node);
        }
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.role = SurfaceRole::None;
        }
    }

    /// Handles `xdg_surface.ack_configure`. Returns false when the serial was
    /// never sent to this surface.
    pub fn ack_configure(&mut self, surface: SurfaceId, serial: u32) -> bool {
        let result = match self.surfaces.get(&surface).map(|s| s.role) {
            Some(SurfaceRole::Toplevel(id)) => self.toplevels.get_mut(&id).map(|t| {
                let acked = ack_serial(&mut t.pending_serials, serial);
                t.configured |= acked;
                acked
            }),
            Some(SurfaceRole::Popup(id)) => self.popups.get_mut(&id).map(|p| {
                let acked = ack_serial(&mut p.pending_serials, serial);
                p.configured |= acked;
                acked
            }),
            _ => None,
        };
        let acked = result.unwrap_or(false);
        if !acked {
            log::warn!("[xdg] Surface {} acked unknown serial {}", surface, serial);
        }
        acked
    }

    pub fn destroy_surface(&mut self, surface: SurfaceId) {
        let Some(role) = self.surfaces.get(&surface).map(|s| s.role) else {
            return;
        };
        match role {
            SurfaceRole::Toplevel(id) => self.destroy_toplevel(id),
            SurfaceRole::Popup(id) => self.destroy_popup(id),
            SurfaceRole::Subsurface { .. } => self.destroy_subsurface(surface),
            SurfaceRole::Cursor | SurfaceRole::None => {}
        }

        let children = self
            .surfaces
            .get(&surface)
            .map(|s| s.subsurfaces.clone())
            .unwrap_or_default();
        for child in children {
            self.destroy_subsurface(child);
        }

        self.seat_forget_surface(surface);
        self.surfaces.remove(&surface);
        log::debug!("[surface] Surface {} destroyed", surface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mapped_toplevel, test_server};

    #[test]
    fn test_geometry_defaults_to_buffer_bounds() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        assert_eq!(server.window_geometry(surface), Rectangle::default());
        server.commit(surface, BufferChange::Attach { width: 300, height: 200 });
        assert_eq!(server.window_geometry(surface), Rectangle::new(0, 0, 300, 200));
    }

    #[test]
    fn test_geometry_is_double_buffered() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        server.commit(surface, BufferChange::Attach { width: 300, height: 200 });
        server.set_window_geometry(surface, Rectangle::new(10, 10, 280, 180));
        assert_eq!(server.window_geometry(surface), Rectangle::new(0, 0, 300, 200));
        server.commit(surface, BufferChange::Keep);
        assert_eq!(server.window_geometry(surface), Rectangle::new(10, 10, 280, 180));
    }

    #[test]
    fn test_detach_clears_buffer() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        server.commit(surface, BufferChange::Attach { width: 10, height: 10 });
        server.commit(surface, BufferChange::Detach);
        assert_eq!(server.surfaces[&surface].buffer, None);
    }

    #[test]
    fn test_subsurface_follows_parent_commit() {
        let mut server = test_server();
        let (_, parent) = mapped_toplevel(&mut server, 1, 200, 100);
        let child = server.create_surface(1);
        assert!(server.create_subsurface(child, parent));
        assert!(!server.create_subsurface(child, parent));

        server.commit(child, BufferChange::Attach { width: 20, height: 20 });
        server.set_subsurface_position(child, 50, 40);
        let node = server.surfaces[&child].scene_node.unwrap();
        assert_eq!(server.scene.position(node), (0, 0));

        server.commit(parent, BufferChange::Keep);
        assert_eq!(server.scene.position(node), (50, 40));

        let (hit, sx, sy) = server.scene.node_at(55.0, 45.0).unwrap();
        assert_eq!(hit, node);
        assert_eq!((sx, sy), (5.0, 5.0));
    }

    #[test]
    fn test_subsurface_created_before_role_gets_node() {
        let mut server = test_server();
        let parent = server.create_surface(1);
        let child = server.create_surface(1);
        server.create_subsurface(child, parent);
        assert!(server.surfaces[&child].scene_node.is_none());

        server.new_toplevel(parent);
        assert!(server.surfaces[&child].scene_node.is_some());
    }

    #[test]
    fn test_destroy_subsurface_removes_node() {
        let mut server = test_server();
        let (_, parent) = mapped_toplevel(&mut server, 1, 200, 100);
        let child = server.create_surface(1);
        server.create_subsurface(child, parent);
        let node = server.surfaces[&child].scene_node.unwrap();

        server.destroy_surface(child);
        assert!(server.scene.node(node).is_none());
        assert!(server.surfaces[&parent].subsurfaces.is_empty());
        assert!(!server.surfaces.contains_key(&child));
    }

    #[test]
    fn test_ack_drops_older_serials() {
        let mut pending = vec![3, 5, 8];
        assert!(ack_serial(&mut pending, 5));
        assert_eq!(pending, vec![8]);
        assert!(!ack_serial(&mut pending, 5));
    }

    #[test]
    fn test_pending_serials_are_capped() {
        let mut pending = Vec::new();
        for serial in 1..=40 {
            push_pending_serial(&mut pending, serial);
        }
        assert_eq!(pending.len(), MAX_PENDING_SERIALS);
        assert_eq!(pending.first(), Some(&25));
        assert_eq!(pending.last(), Some(&40));
    }

    #[test]
    fn test_unacked_configures_do_not_grow_without_bound() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        let id = server.new_toplevel(surface);
        server.commit(surface, BufferChange::Keep);
        server.flush();
        let first = server.toplevels[&id].pending_serials[0];
        for _ in 0..100 {
            server.request_maximize(id);
            server.flush();
        }
        assert_eq!(server.toplevels[&id].pending_serials.len(), MAX_PENDING_SERIALS);

        assert!(!server.ack_configure(surface, first));
        let latest = *server.toplevels[&id].pending_serials.last().unwrap();
        assert!(server.ack_configure(surface, latest));
        assert!(server.toplevels[&id].pending_serials.is_empty());
        assert!(server.toplevels[&id].configured);
    }

    #[test]
    fn test_ack_unknown_serial_does_not_configure() {
        let mut server = test_server();
        let surface = server.create_surface(1);
        let id = server.new_toplevel(surface);
        server.commit(surface, BufferChange::Keep);
        server.flush();
        assert!(!server.ack_configure(surface, 424242));
        assert!(!server.toplevels[&id].configured);
    }

    #[test]
    fn test_destroy_unknown_surface_is_noop() {
        let mut server = test_server();
        server.destroy_surface(42);
        assert!(server.surfaces.is_empty());
    }
}
