use crate::frontend::Frontend;
use crate::process::Launcher;
use crate::scene::NodeKind;
use crate::seat::CursorImage;
use crate::server::{OutputId, Rectangle, Server, SurfaceId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputMode {
    pub width: i32,
    pub height: i32,
    /// Refresh rate in mHz.
    pub refresh: i32,
    pub preferred: bool,
}

/// Mode to enable on attach: the preferred native mode, or the largest mode
/// with the highest refresh rate.
pub fn pick_mode(modes: &[OutputMode]) -> Option<OutputMode> {
    let best = |modes: &mut dyn Iterator<Item = &OutputMode>| {
        modes
            .max_by_key(|m| (m.width as i64 * m.height as i64, m.refresh))
            .copied()
    };
    best(&mut modes.iter().filter(|m| m.preferred)).or_else(|| best(&mut modes.iter()))
}

pub struct Output {
    pub id: OutputId,
    pub name: String,
    pub make: String,
    pub model: String,
    pub modes: Vec<OutputMode>,
    pub mode: Option<OutputMode>,
    pub x: i32,
    pub y: i32,
    pub enabled: bool,
}

impl Output {
    pub fn size(&self) -> (i32, i32) {
        self.mode.map(|m| (m.width, m.height)).unwrap_or((0, 0))
    }

    /// Output rectangle in layout coordinates.
    pub fn geometry(&self) -> Rectangle {
        let (width, height) = self.size();
        Rectangle::new(self.x, self.y, width, height)
    }

    /// Frame interval derived from the refresh rate, 60 Hz when unknown.
    pub fn frame_interval(&self) -> std::time::Duration {
        let refresh = self.mode.map(|m| m.refresh).filter(|r| *r > 0).unwrap_or(60_000);
        std::time::Duration::from_micros(1_000_000_000 / refresh as u64)
    }
}

impl<F: Frontend, L: Launcher> Server<F, L> {
    /// Attaches an output, enables its preferred mode and appends it to the
    /// right end of the layout.
    pub fn new_output(&mut self, name: &str, modes: Vec<OutputMode>) -> OutputId {
        let id = self.alloc_id();
        let mode = pick_mode(&modes);
        match mode {
            Some(m) => log::info!(
                "[output] {} attached: {}x{}@{:.3}Hz",
                name,
                m.width,
                m.height,
                m.refresh as f64 / 1000.0
            ),
            None => log::warn!("[output] {} attached without modes", name),
        }
        self.outputs.push(Output {
            id,
            name: name.to_string(),
            make: "kestrel".to_string(),
            model: name.to_string(),
            modes,
            mode,
            x: 0,
            y: 0,
            enabled: true,
        });
        self.arrange_outputs();
        id
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|o| o.id == id)
    }

    /// Left to right in attachment order.
    fn arrange_outputs(&mut self) {
        let mut x = 0;
        for output in self.outputs.iter_mut().filter(|o| o.enabled) {
            output.x = x;
            output.y = 0;
            x += output.size().0;
        }
    }

    /// Applies a state the backend asks for, e.g. a resized nested window.
    pub fn output_request_state(&mut self, id: OutputId, mode: OutputMode) {
        let Some(output) = self.outputs.iter_mut().find(|o| o.id == id) else {
            return;
        };
        if output.mode == Some(mode) {
            return;
        }
        log::info!("[output] {} now {}x{}", output.name, mode.width, mode.height);
        output.mode = Some(mode);
        if !output.modes.contains(&mode) {
            output.modes.push(mode);
        }
        self.arrange_outputs();
    }

    pub fn destroy_output(&mut self, id: OutputId) {
        let before = self.outputs.len();
        self.outputs.retain(|o| o.id != id);
        if self.outputs.len() == before {
            return;
        }
        log::info!("[output] Output {} removed", id);
        self.arrange_outputs();
        let (x, y) = self.layout_closest_point(self.cursor.x, self.cursor.y);
        self.cursor.x = x;
        self.cursor.y = y;
    }

    /// Bounding box of every enabled output.
    pub fn layout_box(&self) -> Rectangle {
        self.outputs
            .iter()
            .filter(|o| o.enabled)
            .fold(Rectangle::default(), |acc, o| acc.union(&o.geometry()))
    }

    /// Closest point to (x, y) that lies on some output. With no outputs the
    /// point is returned unchanged.
    pub fn layout_closest_point(&self, x: f64, y: f64) -> (f64, f64) {
        self.outputs
            .iter()
            .filter(|o| o.enabled && !o.geometry().is_empty())
            .map(|o| o.geometry().closest_point(x, y))
            .min_by(|a, b| {
                let da = (a.0 - x).powi(2) + (a.1 - y).powi(2);
                let db = (b.0 - x).powi(2) + (b.1 - y).powi(2);
                da.total_cmp(&db)
            })
            .unwrap_or((x, y))
    }

    /// Surfaces that should receive `frame done` after `id` presented.
    pub fn frame_targets(&self, id: OutputId) -> Vec<SurfaceId> {
        let Some(area) = self.output(id).map(Output::geometry) else {
            return Vec::new();
        };
        let mut targets: Vec<SurfaceId> = self
            .scene
            .paint_order()
            .into_iter()
            .filter_map(|item| match item.kind {
                NodeKind::Surface { surface, width, height } => {
                    let rect = Rectangle::new(item.x, item.y, width, height);
                    (!rect.is_empty() && rect.intersects(&area)).then_some(surface)
                }
                _ => None,
            })
            .collect();
        if let CursorImage::Surface { surface, .. } = self.seat.cursor_image {
            if !targets.contains(&surface) {
                targets.push(surface);
            }
        }
        targets
    }

    /// Called once the output has presented a frame.
    pub fn output_frame(&mut self, id: OutputId, time: u32) {
        for surface in self.frame_targets(id) {
            self.frontend.frame_done(surface, time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mapped_toplevel, test_server, Event};

    fn mode(width: i32, height: i32, refresh: i32, preferred: bool) -> OutputMode {
        OutputMode { width, height, refresh, preferred }
    }

    #[test]
    fn test_pick_mode_prefers_flagged() {
        let modes = [mode(3840, 2160, 30_000, false), mode(1920, 1080, 60_000, true), mode(1920, 1080, 144_000, true)];
        assert_eq!(pick_mode(&modes), Some(mode(1920, 1080, 144_000, true)));
    }

    #[test]
    fn test_pick_mode_without_preferred() {
        let modes = [mode(1280, 720, 60_000, false), mode(1920, 1080, 50_000, false)];
        assert_eq!(pick_mode(&modes), Some(mode(1920, 1080, 50_000, false)));
        assert_eq!(pick_mode(&[]), None);
    }

    #[test]
    fn test_outputs_laid_out_left_to_right() {
        let mut server = test_server();
        let a = server.new_output("A", vec![mode(1920, 1080, 60_000, true)]);
        let b = server.new_output("B", vec![mode(1280, 1024, 60_000, true)]);
        assert_eq!(server.output(a).unwrap().geometry(), Rectangle::new(0, 0, 1920, 1080));
        assert_eq!(server.output(b).unwrap().geometry(), Rectangle::new(1920, 0, 1280, 1024));
        assert_eq!(server.layout_box(), Rectangle::new(0, 0, 3200, 1080));

        server.destroy_output(a);
        assert_eq!(server.output(b).unwrap().geometry(), Rectangle::new(0, 0, 1280, 1024));
    }

    #[test]
    fn test_closest_point_avoids_gaps() {
        let mut server = test_server();
        server.new_output("A", vec![mode(1000, 1000, 60_000, true)]);
        server.new_output("B", vec![mode(1000, 500, 60_000, true)]);
        // Below B is outside every output even though it is inside the box.
        let (x, y) = server.layout_closest_point(1500.0, 800.0);
        assert_eq!(x, 1500.0);
        assert!(y < 500.0 && y > 499.0);
    }

    #[test]
    fn test_request_state_resizes_and_relayouts() {
        let mut server = test_server();
        let a = server.new_output("A", vec![mode(800, 600, 60_000, true)]);
        let b = server.new_output("B", vec![mode(800, 600, 60_000, true)]);
        server.output_request_state(a, mode(1024, 768, 60_000, false));
        assert_eq!(server.output(a).unwrap().size(), (1024, 768));
        assert_eq!(server.output(b).unwrap().x, 1024);
    }

    #[test]
    fn test_destroy_output_pulls_cursor_back() {
        let mut server = test_server();
        server.new_output("A", vec![mode(800, 600, 60_000, true)]);
        let b = server.new_output("B", vec![mode(800, 600, 60_000, true)]);
        server.cursor.x = 1200.0;
        server.cursor.y = 300.0;
        server.destroy_output(b);
        assert!(server.cursor.x < 800.0);
        assert_eq!(server.cursor.y, 300.0);
    }

    #[test]
    fn test_frame_done_for_visible_surfaces() {
        let mut server = test_server();
        let a = server.new_output("A", vec![mode(800, 600, 60_000, true)]);
        let b = server.new_output("B", vec![mode(800, 600, 60_000, true)]);
        let (_, surface) = mapped_toplevel(&mut server, 1, 100, 100);
        server.frontend.take();

        server.output_frame(a, 16);
        assert_eq!(server.frontend.take(), vec![Event::FrameDone { surface }]);
        server.output_frame(b, 16);
        assert!(server.frontend.take().is_empty());
    }

    #[test]
    fn test_unmapped_surface_gets_no_frame() {
        let mut server = test_server();
        let a = server.new_output("A", vec![mode(800, 600, 60_000, true)]);
        let surface = server.create_surface(1);
        server.new_toplevel(surface);
        server.output_frame(a, 16);
        assert!(server.frame_targets(a).is_empty());
    }

    #[test]
    fn test_frame_interval() {
        let mut server = test_server();
        let a = server.new_output("A", vec![mode(800, 600, 50_000, true)]);
        assert_eq!(server.output(a).unwrap().frame_interval(), std::time::Duration::from_millis(20));
    }
}
