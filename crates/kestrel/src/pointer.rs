use wayland_server::protocol::wl_pointer::ButtonState;

use crate::frontend::{AxisEvent, Frontend};
use crate::process::Launcher;
use crate::scene::NodeId;
use crate::seat::CursorImage;
use crate::server::{CursorMode, Edges, Interaction, Server, ToplevelId};

impl<F: Frontend, L: Launcher> Server<F, L> {
    /// Relative motion, clamped to the output layout.
    pub fn pointer_motion(&mut self, dx: f64, dy: f64, time: u32) {
        let (x, y) = (self.cursor.x + dx, self.cursor.y + dy);
        let (x, y) = self.layout_closest_point(x, y);
        self.cursor.x = x;
        self.cursor.y = y;
        self.process_motion(time);
    }

    /// Absolute motion with `x` and `y` normalized to `[0, 1]` over the
    /// whole layout.
    pub fn pointer_motion_absolute(&mut self, x: f64, y: f64, time: u32) {
        let layout = self.layout_box();
        if layout.is_empty() {
            return;
        }
        let lx = layout.x as f64 + x.clamp(0.0, 1.0) * layout.width as f64;
        let ly = layout.y as f64 + y.clamp(0.0, 1.0) * layout.height as f64;
        let (lx, ly) = self.layout_closest_point(lx, ly);
        self.cursor.x = lx;
        self.cursor.y = ly;
        self.process_motion(time);
    }

    pub fn pointer_button(&mut self, button: u32, state: ButtonState, time: u32) {
        self.pointer_notify_button(time, button, state);
        match state {
            ButtonState::Released => self.reset_mode(),
            _ => {
                let hit = self.toplevel_at(self.cursor.x, self.cursor.y);
                self.focus(hit.map(|h| h.toplevel));
            }
        }
    }

    pub fn pointer_axis(&mut self, event: &AxisEvent) {
        self.pointer_notify_axis(event);
    }

    pub fn pointer_frame(&mut self) {
        self.pointer_notify_frame();
    }

    pub fn process_motion(&mut self, time: u32) {
        match self.interaction.mode {
            CursorMode::Move => self.process_move(),
            CursorMode::Resize => self.process_resize(),
            CursorMode::Passthrough => match self.toplevel_at(self.cursor.x, self.cursor.y) {
                Some(hit) => {
                    self.pointer_notify_enter(hit.surface, hit.sx, hit.sy);
                    self.pointer_notify_motion(time, hit.sx, hit.sy);
                }
                None => {
                    self.seat.cursor_image = CursorImage::Named("default");
                    self.pointer_clear_focus();
                }
            },
        }
    }

    fn process_move(&mut self) {
        let Some(tree) = self.grabbed_tree() else {
            return;
        };
        let x = (self.cursor.x - self.interaction.grab_x) as i32;
        let y = (self.cursor.y - self.interaction.grab_y) as i32;
        self.scene.set_position(tree, x, y);
    }

    fn process_resize(&mut self) {
        let Some(id) = self.interaction.grabbed else {
            return;
        };
        let Some((tree, surface)) = self.toplevels.get(&id).map(|t| (t.tree, t.surface)) else {
            return;
        };
        let Interaction { grab_x, grab_y, grab_geobox: geobox, resize_edges: edges, .. } =
            self.interaction;

        let border_x = self.cursor.x - grab_x;
        let border_y = self.cursor.y - grab_y;
        let mut new_left = geobox.x;
        let mut new_right = geobox.right();
        let mut new_top = geobox.y;
        let mut new_bottom = geobox.bottom();

        if edges.contains(Edges::TOP) {
            new_top = border_y as i32;
            if new_top >= new_bottom {
                new_top = new_bottom.saturating_sub(1);
            }
        } else if edges.contains(Edges::BOTTOM) {
            new_bottom = border_y as i32;
            if new_bottom <= new_top {
                new_bottom = new_top.saturating_add(1);
            }
        }
        if edges.contains(Edges::LEFT) {
            new_left = border_x as i32;
            if new_left >= new_right {
                new_left = new_right.saturating_sub(1);
            }
        } else if edges.contains(Edges::RIGHT) {
            new_right = border_x as i32;
            if new_right <= new_left {
                new_right = new_left.saturating_add(1);
            }
        }

        let geometry = self.window_geometry(surface);
        self.scene.set_position(
            tree,
            new_left.saturating_sub(geometry.x),
            new_top.saturating_sub(geometry.y),
        );
        self.set_toplevel_size(
            id,
            new_right.saturating_sub(new_left),
            new_bottom.saturating_sub(new_top),
        );
    }

    fn grabbed_tree(&self) -> Option<NodeId> {
        let id = self.interaction.grabbed?;
        self.toplevels.get(&id).map(|t| t.tree)
    }

    /// Starts an interactive move or resize of `toplevel`. Returns false if
    /// the request cannot start a grab.
    pub fn begin_interactive(&mut self, toplevel: ToplevelId, mode: CursorMode, edges: Edges) -> bool {
        let Some((tree, surface)) = self
            .toplevels
            .get(&toplevel)
            .filter(|t| t.mapped)
            .map(|t| (t.tree, t.surface))
        else {
            return false;
        };
        let (node_x, node_y) = self.scene.position(tree);

        match mode {
            CursorMode::Passthrough => return false,
            CursorMode::Resize if edges.is_empty() => return false,
            CursorMode::Move => {
                self.interaction = Interaction {
                    mode,
                    grabbed: Some(toplevel),
                    grab_x: self.cursor.x - node_x as f64,
                    grab_y: self.cursor.y - node_y as f64,
                    ..Interaction::default()
                };
            }
            CursorMode::Resize => {
                let geometry = self.window_geometry(surface);
                let geobox = geometry.translated(node_x, node_y);
                let border_x = if edges.contains(Edges::RIGHT) { geobox.right() } else { geobox.x };
                let border_y = if edges.contains(Edges::BOTTOM) { geobox.bottom() } else { geobox.y };
                self.interaction = Interaction {
                    mode,
                    grabbed: Some(toplevel),
                    grab_x: self.cursor.x - border_x as f64,
                    grab_y: self.cursor.y - border_y as f64,
                    grab_geobox: geobox,
                    resize_edges: edges,
                };
            }
        }
        log::debug!("[cursor] Begin {:?} of toplevel {}", mode, toplevel);
        true
    }

    pub fn reset_mode(&mut self) {
        self.interaction = Interaction::default();
    }
}
