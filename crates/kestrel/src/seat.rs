use std::collections::VecDeque;

use wayland_server::protocol::wl_keyboard::KeyState;
use wayland_server::protocol::wl_pointer::ButtonState;

use crate::frontend::{AxisEvent, Frontend, Modifiers};
use crate::process::Launcher;
use crate::server::{KeyboardId, Server, SourceId, SurfaceId};

const RECENT_SERIALS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CursorImage {
    Named(&'static str),
    Surface { surface: SurfaceId, hotspot_x: i32, hotspot_y: i32 },
    Hidden,
}

/// The single seat: one keyboard focus slot, one pointer focus slot.
pub struct Seat {
    pub name: String,
    pub keyboard_focus: Option<SurfaceId>,
    pub pointer_focus: Option<SurfaceId>,
    pub pointer_position: Option<(f64, f64)>,
    pub active_keyboard: Option<KeyboardId>,
    pub selection: Option<SourceId>,
    pub cursor_image: CursorImage,
    serial: u32,
    input_serials: VecDeque<u32>,
}

impl Seat {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keyboard_focus: None,
            pointer_focus: None,
            pointer_position: None,
            active_keyboard: None,
            selection: None,
            cursor_image: CursorImage::Named("default"),
            serial: 0,
            input_serials: VecDeque::with_capacity(RECENT_SERIALS),
        }
    }

    pub fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }

    fn record_input_serial(&mut self, serial: u32) {
        if self.input_serials.len() == RECENT_SERIALS {
            self.input_serials.pop_front();
        }
        self.input_serials.push_back(serial);
    }

    /// Whether `serial` belongs to one of the recent key or button presses.
    pub fn is_recent_input_serial(&self, serial: u32) -> bool {
        self.input_serials.contains(&serial)
    }
}

impl<F: Frontend, L: Launcher> Server<F, L> {
    pub fn keyboard_notify_enter(&mut self, surface: SurfaceId, keys: &[u32], modifiers: Modifiers) {
        if self.seat.keyboard_focus == Some(surface) {
            return;
        }
        if let Some(prev) = self.seat.keyboard_focus.take() {
            let serial = self.seat.next_serial();
            self.frontend.keyboard_leave(prev, serial);
        }
        let serial = self.seat.next_serial();
        self.seat.keyboard_focus = Some(surface);
        self.frontend.keyboard_enter(surface, keys, modifiers, serial);
        self.frontend.selection(surface, self.seat.selection);
    }

    pub fn keyboard_notify_key(&mut self, time: u32, key: u32, state: KeyState) {
        let Some(surface) = self.seat.keyboard_focus else {
            return;
        };
        let serial = self.seat.next_serial();
        if state == KeyState::Pressed {
            self.seat.record_input_serial(serial);
        }
        self.frontend.keyboard_key(surface, time, key, state, serial);
    }

    pub fn keyboard_notify_modifiers(&mut self, modifiers: Modifiers) {
        let Some(surface) = self.seat.keyboard_focus else {
            return;
        };
        let serial = self.seat.next_serial();
        self.frontend.keyboard_modifiers(surface, modifiers, serial);
    }

    pub fn pointer_notify_enter(&mut self, surface: SurfaceId, sx: f64, sy: f64) {
        if self.seat.pointer_focus == Some(surface) {
            return;
        }
        if let Some(prev) = self.seat.pointer_focus.take() {
            let serial = self.seat.next_serial();
            self.frontend.pointer_leave(prev, serial);
            self.frontend.pointer_frame(prev);
        }
        let serial = self.seat.next_serial();
        self.seat.pointer_focus = Some(surface);
        self.seat.pointer_position = Some((sx, sy));
        self.frontend.pointer_enter(surface, sx, sy, serial);
        self.frontend.pointer_frame(surface);
    }

    pub fn pointer_notify_motion(&mut self, time: u32, sx: f64, sy: f64) {
        let Some(surface) = self.seat.pointer_focus else {
            return;
        };
        if self.seat.pointer_position == Some((sx, sy)) {
            return;
        }
        self.seat.pointer_position = Some((sx, sy));
        self.frontend.pointer_motion(surface, time, sx, sy);
    }

    pub fn pointer_clear_focus(&mut self) {
        if let Some(prev) = self.seat.pointer_focus.take() {
            let serial = self.seat.next_serial();
            self.frontend.pointer_leave(prev, serial);
            self.frontend.pointer_frame(prev);
        }
        self.seat.pointer_position = None;
    }

    pub fn pointer_notify_button(&mut self, time: u32, button: u32, state: ButtonState) {
        let Some(surface) = self.seat.pointer_focus else {
            return;
        };
        let serial = self.seat.next_serial();
        if state == ButtonState::Pressed {
            self.seat.record_input_serial(serial);
        }
        self.frontend.pointer_button(surface, time, button, state, serial);
    }

    pub fn pointer_notify_axis(&mut self, event: &AxisEvent) {
        if let Some(surface) = self.seat.pointer_focus {
            self.frontend.pointer_axis(surface, event);
        }
    }

    pub fn pointer_notify_frame(&mut self) {
        if let Some(surface) = self.seat.pointer_focus {
            self.frontend.pointer_frame(surface);
        }
    }

    /// Replaces the selection, cancelling the previous source.
    pub fn set_selection(&mut self, source: Option<SourceId>) {
        if self.seat.selection == source {
            return;
        }
        if let Some(old) = self.seat.selection.take() {
            self.frontend.cancel_source(old);
        }
        self.seat.selection = source;
        if let Some(focus) = self.seat.keyboard_focus {
            self.frontend.selection(focus, source);
        }
    }

    /// Drops a destroyed data source from the selection slot.
    pub fn data_source_destroyed(&mut self, source: SourceId) {
        if self.seat.selection != Some(source) {
            return;
        }
        self.seat.selection = None;
        if let Some(focus) = self.seat.keyboard_focus {
            self.frontend.selection(focus, None);
        }
    }

    /// Removes every reference the seat holds to a surface that is going away.
    pub fn seat_forget_surface(&mut self, surface: SurfaceId) {
        if self.seat.keyboard_focus == Some(surface) {
            self.seat.keyboard_focus = None;
        }
        if self.seat.pointer_focus == Some(surface) {
            self.seat.pointer_focus = None;
            self.seat.pointer_position = None;
        }
        if let CursorImage::Surface { surface: s, .. } = self.seat.cursor_image {
            if s == surface {
                self.seat.cursor_image = CursorImage::Hidden;
            }
        }
    }
}
