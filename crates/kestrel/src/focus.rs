use std::fmt;

use crate::frontend::{Frontend, Modifiers};
use crate::process::Launcher;
use crate::scene::NodeKind;
use crate::seat::CursorImage;
use crate::server::{ClientKey, Server, SourceId, SurfaceId, ToplevelId};
use crate::surface::SurfaceRole;

/// The surface passed to `wl_pointer.set_cursor` already has another role.
#[derive(Debug, PartialEq, Eq)]
pub struct CursorRoleError(pub SurfaceId);

impl fmt::Display for CursorRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface {} already has a non-cursor role", self.0)
    }
}

impl std::error::Error for CursorRoleError {}

/// Result of a layout-space hit test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitTest {
    pub toplevel: ToplevelId,
    pub surface: SurfaceId,
    pub sx: f64,
    pub sy: f64,
}

impl<F: Frontend, L: Launcher> Server<F, L> {
    /// Gives keyboard focus to `toplevel`, raising it and moving it to the
    /// front of the stack.
    pub fn focus(&mut self, toplevel: Option<ToplevelId>) {
        let Some(id) = toplevel else {
            return;
        };
        let Some((surface, tree)) = self.toplevels.get(&id).map(|t| (t.surface, t.tree)) else {
            return;
        };
        let prev = self.seat.keyboard_focus;
        if prev == Some(surface) {
            return;
        }
        if let Some(prev_toplevel) = prev.and_then(|s| self.toplevel_for_surface(s)) {
            self.set_toplevel_activated(prev_toplevel, false);
        }

        self.scene.raise_to_top(tree);
        self.stack.retain(|t| *t != id);
        self.stack.insert(0, id);
        self.set_toplevel_activated(id, true);

        let (keys, modifiers) = self.active_keyboard_state();
        self.keyboard_notify_enter(surface, &keys, modifiers);
        log::debug!("[focus] Focused toplevel {}", id);
    }

    /// Keys held and modifiers of the seat's active keyboard.
    pub fn active_keyboard_state(&self) -> (Vec<u32>, Modifiers) {
        self.seat
            .active_keyboard
            .and_then(|id| self.keyboards.iter().find(|k| k.id == id))
            .map(|k| (k.pressed.clone(), k.modifiers))
            .unwrap_or_default()
    }

    /// Topmost toplevel surface at a layout point.
    pub fn toplevel_at(&self, lx: f64, ly: f64) -> Option<HitTest> {
        let (node, sx, sy) = self.scene.node_at(lx, ly)?;
        let NodeKind::Surface { surface, .. } = self.scene.node(node)?.kind else {
            return None;
        };
        let toplevel = self.scene.owner_of(node)?;
        Some(HitTest { toplevel, surface, sx, sy })
    }

    /// Focuses the least recently focused toplevel.
    pub fn cycle(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        let last = self.stack.last().copied();
        self.focus(last);
    }

    /// Sends SIGTERM to the client owning the keyboard focus.
    pub fn close_focused(&mut self) {
        let Some(surface) = self.seat.keyboard_focus else {
            return;
        };
        let pid = self
            .surfaces
            .get(&surface)
            .and_then(|s| self.clients.get(&s.client))
            .and_then(|c| c.pid);
        match pid {
            Some(pid) => {
                log::info!("[focus] Keyboard-focused window PID: {}", pid);
                self.launcher.terminate(pid);
            }
            None => log::warn!("[focus] No PID known for surface {}", surface),
        }
    }

    pub fn request_set_selection(&mut self, source: Option<SourceId>) {
        self.set_selection(source);
    }

    /// Honoured only for the client holding pointer focus. Returns
    /// `Ok(false)` when the request is ignored and an error when the surface
    /// already carries another role.
    pub fn request_set_cursor(
        &mut self,
        client: ClientKey,
        surface: Option<SurfaceId>,
        hotspot_x: i32,
        hotspot_y: i32,
    ) -> Result<bool, CursorRoleError> {
        if let Some(id) = surface {
            match self.surfaces.get(&id).map(|s| s.role) {
                Some(SurfaceRole::None | SurfaceRole::Cursor) => {}
                Some(role) => {
                    log::warn!("[seat] Rejecting set_cursor with surface {} (role {:?})", id, role);
                    return Err(CursorRoleError(id));
                }
                None => return Ok(false),
            }
        }

        let focused_client = self
            .seat
            .pointer_focus
            .and_then(|s| self.surfaces.get(&s))
            .map(|s| s.client);
        if focused_client != Some(client) {
            log::debug!("[seat] Ignoring set_cursor from unfocused client {}", client);
            return Ok(false);
        }

        self.seat.cursor_image = match surface {
            Some(surface) => {
                if let Some(s) = self.surfaces.get_mut(&surface) {
                    s.role = SurfaceRole::Cursor;
                }
                CursorImage::Surface { surface, hotspot_x, hotspot_y }
            }
            None => CursorImage::Hidden,
        };
        Ok(true)
    }
}
