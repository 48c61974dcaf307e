use wayland_server::protocol::wl_keyboard::KeyState;
use wayland_server::protocol::wl_pointer::{Axis, AxisRelativeDirection, AxisSource, ButtonState};

use crate::server::{PopupId, Rectangle, SourceId, SurfaceId, ToplevelId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisEvent {
    pub time: u32,
    pub orientation: Axis,
    pub delta: f64,
    pub discrete: i32,
    pub source: AxisSource,
    /// `Inverted` when the device scrolls naturally.
    pub relative_direction: AxisRelativeDirection,
}

/// Client-visible effects of the compositor core. The Wayland glue
/// translates ids back to protocol objects; tests record the calls.
pub trait Frontend {
    fn configure_toplevel(&mut self, toplevel: ToplevelId, width: i32, height: i32, activated: bool, serial: u32);
    fn configure_popup(&mut self, popup: PopupId, geometry: Rectangle, serial: u32);

    fn keyboard_enter(&mut self, surface: SurfaceId, keys: &[u32], modifiers: Modifiers, serial: u32);
    fn keyboard_leave(&mut self, surface: SurfaceId, serial: u32);
    fn keyboard_key(&mut self, surface: SurfaceId, time: u32, key: u32, state: KeyState, serial: u32);
    fn keyboard_modifiers(&mut self, surface: SurfaceId, modifiers: Modifiers, serial: u32);

    fn pointer_enter(&mut self, surface: SurfaceId, sx: f64, sy: f64, serial: u32);
    fn pointer_leave(&mut self, surface: SurfaceId, serial: u32);
    fn pointer_motion(&mut self, surface: SurfaceId, time: u32, sx: f64, sy: f64);
    fn pointer_button(&mut self, surface: SurfaceId, time: u32, button: u32, state: ButtonState, serial: u32);
    fn pointer_axis(&mut self, surface: SurfaceId, event: &AxisEvent);
    fn pointer_frame(&mut self, surface: SurfaceId);

    /// Offers the current selection to the client owning `surface`.
    fn selection(&mut self, surface: SurfaceId, source: Option<SourceId>);
    fn cancel_source(&mut self, source: SourceId);

    fn frame_done(&mut self, surface: SurfaceId, time: u32);
}
