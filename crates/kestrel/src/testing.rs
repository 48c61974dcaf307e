use wayland_server::protocol::wl_keyboard::KeyState;
use wayland_server::protocol::wl_pointer::{AxisRelativeDirection, ButtonState};
use xkbcommon::xkb;

use crate::frontend::{AxisEvent, Frontend, Modifiers};
use crate::process::Launcher;
use crate::server::{ClientKey, PopupId, Rectangle, Server, SourceId, SurfaceId, ToplevelId};
use crate::surface::BufferChange;

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    ConfigureToplevel { toplevel: ToplevelId, width: i32, height: i32, activated: bool, serial: u32 },
    ConfigurePopup { popup: PopupId, geometry: Rectangle, serial: u32 },
    KeyboardEnter { surface: SurfaceId, keys: Vec<u32>, modifiers: Modifiers },
    KeyboardLeave { surface: SurfaceId },
    KeyboardKey { surface: SurfaceId, key: u32, state: KeyState },
    KeyboardModifiers { surface: SurfaceId, modifiers: Modifiers },
    PointerEnter { surface: SurfaceId, sx: f64, sy: f64 },
    PointerLeave { surface: SurfaceId },
    PointerMotion { surface: SurfaceId, sx: f64, sy: f64 },
    PointerButton { surface: SurfaceId, button: u32, state: ButtonState, serial: u32 },
    PointerAxis { surface: SurfaceId, delta: f64, direction: AxisRelativeDirection },
    PointerFrame { surface: SurfaceId },
    Selection { surface: SurfaceId, source: Option<SourceId> },
    CancelSource { source: SourceId },
    FrameDone { surface: SurfaceId },
}

#[derive(Default)]
pub struct RecordingFrontend {
    pub events: Vec<Event>,
}

impl RecordingFrontend {
    pub fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

impl Frontend for RecordingFrontend {
    fn configure_toplevel(&mut self, toplevel: ToplevelId, width: i32, height: i32, activated: bool, serial: u32) {
        self.events.push(Event::ConfigureToplevel { toplevel, width, height, activated, serial });
    }

    fn configure_popup(&mut self, popup: PopupId, geometry: Rectangle, serial: u32) {
        self.events.push(Event::ConfigurePopup { popup, geometry, serial });
    }

    fn keyboard_enter(&mut self, surface: SurfaceId, keys: &[u32], modifiers: Modifiers, _serial: u32) {
        self.events.push(Event::KeyboardEnter { surface, keys: keys.to_vec(), modifiers });
    }

    fn keyboard_leave(&mut self, surface: SurfaceId, _serial: u32) {
        self.events.push(Event::KeyboardLeave { surface });
    }

    fn keyboard_key(&mut self, surface: SurfaceId, _time: u32, key: u32, state: KeyState, _serial: u32) {
        self.events.push(Event::KeyboardKey { surface, key, state });
    }

    fn keyboard_modifiers(&mut self, surface: SurfaceId, modifiers: Modifiers, _serial: u32) {
        self.events.push(Event::KeyboardModifiers { surface, modifiers });
    }

    fn pointer_enter(&mut self, surface: SurfaceId, sx: f64, sy: f64, _serial: u32) {
        self.events.push(Event::PointerEnter { surface, sx, sy });
    }

    fn pointer_leave(&mut self, surface: SurfaceId, _serial: u32) {
        self.events.push(Event::PointerLeave { surface });
    }

    fn pointer_motion(&mut self, surface: SurfaceId, _time: u32, sx: f64, sy: f64) {
        self.events.push(Event::PointerMotion { surface, sx, sy });
    }

    fn pointer_button(&mut self, surface: SurfaceId, _time: u32, button: u32, state: ButtonState, serial: u32) {
        self.events.push(Event::PointerButton { surface, button, state, serial });
    }

    fn pointer_axis(&mut self, surface: SurfaceId, event: &AxisEvent) {
        self.events.push(Event::PointerAxis {
            surface,
            delta: event.delta,
            direction: event.relative_direction,
        });
    }

    fn pointer_frame(&mut self, surface: SurfaceId) {
        self.events.push(Event::PointerFrame { surface });
    }

    fn selection(&mut self, surface: SurfaceId, source: Option<SourceId>) {
        self.events.push(Event::Selection { surface, source });
    }

    fn cancel_source(&mut self, source: SourceId) {
        self.events.push(Event::CancelSource { source });
    }

    fn frame_done(&mut self, surface: SurfaceId, _time: u32) {
        self.events.push(Event::FrameDone { surface });
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    pub spawned: Vec<String>,
    pub terminated: Vec<i32>,
}

impl Launcher for RecordingLauncher {
    fn spawn(&mut self, command: &str) -> Option<u32> {
        self.spawned.push(command.to_string());
        Some(1000 + self.spawned.len() as u32)
    }

    fn terminate(&mut self, pid: i32) {
        self.terminated.push(pid);
    }
}

pub type TestServer = Server<RecordingFrontend, RecordingLauncher>;

pub fn test_server() -> TestServer {
    Server::new(RecordingFrontend::default(), RecordingLauncher::default())
}

/// Evdev keycodes used by the test keymap.
pub const KEY_ESC: u32 = 1;
pub const KEY_Q: u32 = 16;
pub const KEY_ENTER: u32 = 28;
pub const KEY_F: u32 = 33;
pub const KEY_LEFTSHIFT: u32 = 42;
pub const KEY_LEFTALT: u32 = 56;
pub const KEY_F1: u32 = 59;

/// Self-contained keymap so tests do not depend on installed XKB data.
pub const TEST_KEYMAP: &str = r#"xkb_keymap {
    xkb_keycodes "kestrel-test" {
        minimum = 8;
        maximum = 255;
        <ESC>  = 9;
        <AD01> = 24;
        <RTRN> = 36;
        <AC04> = 41;
        <LFSH> = 50;
        <LALT> = 64;
        <FK01> = 67;
    };
    xkb_types "kestrel-test" {
        type "ONE_LEVEL" {
            modifiers = none;
            level_name[Level1] = "Any";
        };
        type "TWO_LEVEL" {
            modifiers = Shift;
            map[Shift] = Level2;
            level_name[Level1] = "Base";
            level_name[Level2] = "Shift";
        };
        type "ALPHABETIC" {
            modifiers = Shift+Lock;
            map[Shift] = Level2;
            map[Lock] = Level2;
            level_name[Level1] = "Base";
            level_name[Level2] = "Caps";
        };
    };
    xkb_compatibility "kestrel-test" {
        interpret Any+AnyOf(all) {
            action = SetMods(modifiers=modMapMods,clearLocks);
        };
    };
    xkb_symbols "kestrel-test" {
        key <ESC>  { [ Escape ] };
        key <AD01> { [ q, Q ] };
        key <RTRN> { [ Return ] };
        key <AC04> { [ f, F ] };
        key <LFSH> { [ Shift_L ] };
        key <LALT> { [ Alt_L ] };
        key <FK01> { [ F1 ] };
        modifier_map Shift { <LFSH> };
        modifier_map Mod1 { <LALT> };
    };
};
"#;

pub fn test_keymap() -> xkb::Keymap {
    let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
    xkb::Keymap::new_from_string(
        &context,
        TEST_KEYMAP.to_string(),
        xkb::KEYMAP_FORMAT_TEXT_V1,
        xkb::KEYMAP_COMPILE_NO_FLAGS,
    )
    .expect("test keymap compiles")
}

/// Acks the most recent configure sent to `toplevel`.
pub fn ack_latest(server: &mut TestServer, toplevel: ToplevelId) {
    server.flush();
    let serial = server
        .frontend
        .events
        .iter()
        .rev()
        .find_map(|e| match e {
            Event::ConfigureToplevel { toplevel: t, serial, .. } if *t == toplevel => Some(*serial),
            _ => None,
        })
        .expect("toplevel was configured");
    let surface = server.toplevels[&toplevel].surface;
    server.ack_configure(surface, serial);
}

/// Drives a toplevel through create, initial commit, ack and first buffer.
pub fn mapped_toplevel(server: &mut TestServer, client: ClientKey, width: i32, height: i32) -> (ToplevelId, SurfaceId) {
    let surface = server.create_surface(client);
    let toplevel = server.new_toplevel(surface);
    server.commit(surface, BufferChange::Keep);
    ack_latest(server, toplevel);
    server.commit(surface, BufferChange::Attach { width, height });
    (toplevel, surface)
}
