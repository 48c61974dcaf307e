use wayland_server::protocol::wl_keyboard::KeyState;
use xkbcommon::xkb;

use crate::config::{
    MODIFIER, MOD_ALT, MOD_CAPS, MOD_CTRL, MOD_LOGO, MOD_MOD2, MOD_MOD3, MOD_MOD5, MOD_SHIFT,
    REPEAT_DELAY, REPEAT_RATE, XKB_LAYOUT,
};
use crate::frontend::{Frontend, Modifiers};
use crate::process::Launcher;
use crate::server::{KeyboardId, Server};

/// XKB keycodes are evdev codes shifted by 8.
const EVDEV_OFFSET: u32 = 8;

const MODIFIER_NAMES: [(&str, u32); 8] = [
    ("Shift", MOD_SHIFT),
    ("Lock", MOD_CAPS),
    ("Control", MOD_CTRL),
    ("Mod1", MOD_ALT),
    ("Mod2", MOD_MOD2),
    ("Mod3", MOD_MOD3),
    ("Mod4", MOD_LOGO),
    ("Mod5", MOD_MOD5),
];

/// Compiles the default keymap from the system XKB data.
pub fn default_keymap() -> Option<xkb::Keymap> {
    let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
    xkb::Keymap::new_from_names(
        &context,
        "",
        "",
        XKB_LAYOUT,
        "",
        None,
        xkb::KEYMAP_COMPILE_NO_FLAGS,
    )
}

pub struct Keyboard {
    pub id: KeyboardId,
    pub name: String,
    pub keymap: xkb::Keymap,
    pub state: xkb::State,
    /// Evdev keycodes currently held, in press order.
    pub pressed: Vec<u32>,
    pub modifiers: Modifiers,
    pub repeat_rate: i32,
    pub repeat_delay: i32,
}

impl Keyboard {
    pub fn new(id: KeyboardId, name: &str, keymap: xkb::Keymap) -> Self {
        let state = xkb::State::new(&keymap);
        Self {
            id,
            name: name.to_string(),
            keymap,
            state,
            pressed: Vec::new(),
            modifiers: Modifiers::default(),
            repeat_rate: REPEAT_RATE,
            repeat_delay: REPEAT_DELAY,
        }
    }

    /// Keysyms the key produces in the current state.
    pub fn syms(&self, keycode: u32) -> Vec<u32> {
        self.state
            .key_get_syms(xkb::Keycode::from(keycode + EVDEV_OFFSET))
            .iter()
            .map(|sym| sym.raw())
            .collect()
    }

    /// Effective modifiers as a `MOD_*` mask.
    pub fn modifier_mask(&self) -> u32 {
        MODIFIER_NAMES
            .iter()
            .filter(|(name, _)| self.state.mod_name_is_active(*name, xkb::STATE_MODS_EFFECTIVE))
            .fold(0, |mask, (_, bit)| mask | bit)
    }

    fn serialize_modifiers(&self) -> Modifiers {
        Modifiers {
            depressed: self.state.serialize_mods(xkb::STATE_MODS_DEPRESSED),
            latched: self.state.serialize_mods(xkb::STATE_MODS_LATCHED),
            locked: self.state.serialize_mods(xkb::STATE_MODS_LOCKED),
            group: self.state.serialize_layout(xkb::STATE_LAYOUT_EFFECTIVE),
        }
    }

    /// Feeds a key into the XKB state. Returns true if the modifiers changed.
    pub fn update_key(&mut self, keycode: u32, state: KeyState) -> bool {
        let direction = match state {
            KeyState::Pressed => xkb::KeyDirection::Down,
            _ => xkb::KeyDirection::Up,
        };
        self.state
            .update_key(xkb::Keycode::from(keycode + EVDEV_OFFSET), direction);
        let modifiers = self.serialize_modifiers();
        let changed = modifiers != self.modifiers;
        self.modifiers = modifiers;
        changed
    }

    fn track_pressed(&mut self, keycode: u32, state: KeyState) {
        match state {
            KeyState::Pressed => {
                if !self.pressed.contains(&keycode) {
                    self.pressed.push(keycode);
                }
            }
            _ => self.pressed.retain(|k| *k != keycode),
        }
    }
}

impl<F: Frontend, L: Launcher> Server<F, L> {
    /// Attaches a keyboard with the default keymap and repeat settings.
    pub fn new_keyboard(&mut self, name: &str) -> Option<KeyboardId> {
        match default_keymap() {
            Some(keymap) => Some(self.add_keyboard(name, keymap)),
            None => {
                log::error!("[input] Failed to compile keymap for {}", name);
                None
            }
        }
    }

    pub fn add_keyboard(&mut self, name: &str, keymap: xkb::Keymap) -> KeyboardId {
        let id = self.alloc_id();
        self.keyboards.push(Keyboard::new(id, name, keymap));
        self.seat.active_keyboard = Some(id);
        log::info!("[input] Keyboard {} attached: {}", id, name);
        id
    }

    pub fn keyboard(&self, id: KeyboardId) -> Option<&Keyboard> {
        self.keyboards.iter().find(|k| k.id == id)
    }

    /// Raw key event from a device. `keycode` is an evdev code.
    pub fn keyboard_key(&mut self, id: KeyboardId, keycode: u32, state: KeyState, time: u32) {
        let Some(keyboard) = self.keyboards.iter_mut().find(|k| k.id == id) else {
            return;
        };
        keyboard.track_pressed(keycode, state);
        let syms = keyboard.syms(keycode);
        let mask = keyboard.modifier_mask();

        let mut handled = false;
        if state == KeyState::Pressed && mask & MODIFIER != 0 {
            for sym in syms {
                handled |= self.handle_keybinding(sym);
            }
        }

        if !handled {
            self.seat.active_keyboard = Some(id);
            self.keyboard_notify_key(time, keycode, state);
        }

        let changed = self
            .keyboards
            .iter_mut()
            .find(|k| k.id == id)
            .map(|k| k.update_key(keycode, state))
            .unwrap_or(false);
        if changed {
            self.keyboard_modifiers(id);
        }
    }

    /// Modifier state of `id` changed.
    pub fn keyboard_modifiers(&mut self, id: KeyboardId) {
        let Some(modifiers) = self.keyboard(id).map(|k| k.modifiers) else {
            return;
        };
        self.seat.active_keyboard = Some(id);
        self.keyboard_notify_modifiers(modifiers);
    }

    pub fn remove_keyboard(&mut self, id: KeyboardId) {
        let before = self.keyboards.len();
        self.keyboards.retain(|k| k.id != id);
        if self.keyboards.len() == before {
            return;
        }
        log::info!("[input] Keyboard {} removed", id);
        if self.seat.active_keyboard == Some(id) {
            self.seat.active_keyboard = self.keyboards.last().map(|k| k.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        mapped_toplevel, test_keymap, test_server, Event, TestServer, KEY_ENTER, KEY_ESC, KEY_F,
        KEY_F1, KEY_LEFTALT, KEY_LEFTSHIFT, KEY_Q,
    };

    fn with_keyboard() -> (TestServer, KeyboardId) {
        let mut server = test_server();
        let kb = server.add_keyboard("test", test_keymap());
        (server, kb)
    }

    fn forwarded(events: &[Event], key: u32, state: KeyState) -> bool {
        events
            .iter()
            .any(|e| matches!(e, Event::KeyboardKey { key: k, state: s, .. } if *k == key && *s == state))
    }

    #[test]
    fn test_alt_return_launches_terminal() {
        let (mut server, kb) = with_keyboard();
        mapped_toplevel(&mut server, 1, 100, 100);
        server.frontend.take();

        server.keyboard_key(kb, KEY_LEFTALT, KeyState::Pressed, 0);
        server.keyboard_key(kb, KEY_ENTER, KeyState::Pressed, 1);

        assert_eq!(server.launcher.spawned, vec!["kitty".to_string()]);
        let events = server.frontend.take();
        assert!(forwarded(&events, KEY_LEFTALT, KeyState::Pressed));
        assert!(!forwarded(&events, KEY_ENTER, KeyState::Pressed));
    }

    #[test]
    fn test_plain_key_is_forwarded() {
        let (mut server, kb) = with_keyboard();
        mapped_toplevel(&mut server, 1, 100, 100);
        server.frontend.take();

        server.keyboard_key(kb, KEY_ENTER, KeyState::Pressed, 0);
        assert!(server.launcher.spawned.is_empty());
        assert!(forwarded(&server.frontend.take(), KEY_ENTER, KeyState::Pressed));
    }

    #[test]
    fn test_release_never_binds() {
        let (mut server, kb) = with_keyboard();
        server.keyboard_key(kb, KEY_LEFTALT, KeyState::Pressed, 0);
        server.keyboard_key(kb, KEY_ESC, KeyState::Released, 1);
        assert!(server.running);
        server.keyboard_key(kb, KEY_ESC, KeyState::Pressed, 2);
        assert!(!server.running);
    }

    #[test]
    fn test_shifted_sym_matches_uppercase_binding() {
        let (mut server, kb) = with_keyboard();
        server.keyboard_key(kb, KEY_LEFTALT, KeyState::Pressed, 0);
        server.keyboard_key(kb, KEY_F, KeyState::Pressed, 1);
        assert!(server.launcher.spawned.is_empty());

        server.keyboard_key(kb, KEY_LEFTSHIFT, KeyState::Pressed, 2);
        server.keyboard_key(kb, KEY_F, KeyState::Pressed, 3);
        assert_eq!(server.launcher.spawned, vec!["firefox".to_string()]);
    }

    #[test]
    fn test_compositor_bindings() {
        let (mut server, kb) = with_keyboard();
        let client = server.add_client(Some(77));
        let (first, _) = mapped_toplevel(&mut server, client, 100, 100);
        let (second, _) = mapped_toplevel(&mut server, client, 100, 100);
        assert_eq!(server.stack, vec![second, first]);

        server.keyboard_key(kb, KEY_LEFTALT, KeyState::Pressed, 0);
        server.keyboard_key(kb, KEY_F1, KeyState::Pressed, 1);
        assert_eq!(server.stack, vec![first, second]);

        server.keyboard_key(kb, KEY_Q, KeyState::Pressed, 2);
        assert_eq!(server.launcher.terminated, vec![77]);
    }

    #[test]
    fn test_modifiers_sent_on_change() {
        let (mut server, kb) = with_keyboard();
        let (_, surface) = mapped_toplevel(&mut server, 1, 100, 100);
        server.frontend.take();

        server.keyboard_key(kb, KEY_LEFTALT, KeyState::Pressed, 0);
        let mask = server.keyboard(kb).unwrap().modifiers.depressed;
        assert_ne!(mask, 0);
        assert!(server.frontend.take().contains(&Event::KeyboardModifiers {
            surface,
            modifiers: Modifiers { depressed: mask, latched: 0, locked: 0, group: 0 },
        }));

        server.keyboard_key(kb, KEY_ENTER, KeyState::Released, 1);
        assert!(!server
            .frontend
            .take()
            .iter()
            .any(|e| matches!(e, Event::KeyboardModifiers { .. })));
    }

    #[test]
    fn test_enter_carries_held_keys() {
        let (mut server, kb) = with_keyboard();
        server.keyboard_key(kb, KEY_LEFTALT, KeyState::Pressed, 0);
        let (_, surface) = mapped_toplevel(&mut server, 1, 100, 100);

        let enter = server.frontend.take().into_iter().find_map(|e| match e {
            Event::KeyboardEnter { surface: s, keys, modifiers } if s == surface => Some((keys, modifiers)),
            _ => None,
        });
        let (keys, modifiers) = enter.unwrap();
        assert_eq!(keys, vec![KEY_LEFTALT]);
        assert_ne!(modifiers.depressed, 0);
    }

    #[test]
    fn test_pressed_list_tracks_releases() {
        let (mut server, kb) = with_keyboard();
        server.keyboard_key(kb, KEY_ENTER, KeyState::Pressed, 0);
        server.keyboard_key(kb, KEY_ENTER, KeyState::Pressed, 1);
        assert_eq!(server.keyboard(kb).unwrap().pressed, vec![KEY_ENTER]);
        server.keyboard_key(kb, KEY_ENTER, KeyState::Released, 2);
        assert!(server.keyboard(kb).unwrap().pressed.is_empty());
    }

    #[test]
    fn test_active_keyboard_follows_events() {
        let (mut server, first) = with_keyboard();
        let second = server.add_keyboard("second", test_keymap());
        assert_eq!(server.seat.active_keyboard, Some(second));

        server.keyboard_key(first, KEY_ENTER, KeyState::Pressed, 0);
        assert_eq!(server.seat.active_keyboard, Some(first));

        server.remove_keyboard(first);
        assert_eq!(server.seat.active_keyboard, Some(second));
        server.remove_keyboard(second);
        assert_eq!(server.seat.active_keyboard, None);
    }

    #[test]
    fn test_modifier_mask_names() {
        let (mut server, kb) = with_keyboard();
        server.keyboard_key(kb, KEY_LEFTSHIFT, KeyState::Pressed, 0);
        server.keyboard_key(kb, KEY_LEFTALT, KeyState::Pressed, 1);
        assert_eq!(server.keyboard(kb).unwrap().modifier_mask(), MOD_SHIFT | MOD_ALT);
    }
}
