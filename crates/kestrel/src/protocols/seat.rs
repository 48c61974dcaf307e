use std::os::fd::AsFd;

use wayland_server::protocol::{
    wl_keyboard::{self, KeymapFormat, WlKeyboard},
    wl_pointer::{self, WlPointer},
    wl_seat::{self, WlSeat},
    wl_touch::{self, WlTouch},
};
use wayland_server::{Dispatch, GlobalDispatch, Resource};

use super::compositor::surface_id;
use crate::config::{REPEAT_DELAY, REPEAT_RATE};
use crate::server::SurfaceId;
use crate::state::State;

impl State {
    /// The keyboard-focused surface, if it belongs to `client`.
    pub fn focus_of_client(&self, client: &wayland_server::Client) -> Option<SurfaceId> {
        let key = State::client_key(client)?;
        let focus = self.server.seat.keyboard_focus?;
        let owner = self.server.surfaces.get(&focus)?.client;
        (owner == key).then_some(focus)
    }
}

impl GlobalDispatch<WlSeat, ()> for State {
    fn bind(
        state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlSeat>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let seat = data_init.init(resource, ());
        seat.capabilities(wl_seat::Capability::Pointer | wl_seat::Capability::Keyboard);
        if seat.version() >= 2 {
            seat.name(state.server.seat.name.clone());
        }
    }
}

impl Dispatch<WlSeat, ()> for State {
    fn request(
        state: &mut Self,
        client: &wayland_server::Client,
        _resource: &WlSeat,
        request: wl_seat::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_seat::Request::GetPointer { id } => {
                let pointer = data_init.init(id, ());
                state.server.frontend.pointers.push(pointer);
                log::debug!("[seat] Pointer created, total pointers: {}", state.server.frontend.pointers.len());
            }
            wl_seat::Request::GetKeyboard { id } => {
                let keyboard = data_init.init(id, ());

                if let Some(ref keymap) = state.keymap {
                    keyboard.keymap(KeymapFormat::XkbV1, keymap.fd.as_fd(), keymap.size);
                } else {
                    log::warn!("[seat] No keymap available to send to keyboard");
                }
                if keyboard.version() >= 4 {
                    keyboard.repeat_info(REPEAT_RATE, REPEAT_DELAY);
                }

                // A client binding its keyboard after gaining focus still
                // needs an enter.
                if let Some(focus) = state.focus_of_client(client) {
                    let (keys, modifiers) = state.server.active_keyboard_state();
                    let serial = state.server.seat.next_serial();
                    state
                        .server
                        .frontend
                        .keyboard_enter_one(&keyboard, focus, &keys, modifiers, serial);
                }

                state.server.frontend.keyboards.push(keyboard);
                log::debug!("[seat] Keyboard created, total keyboards: {}", state.server.frontend.keyboards.len());
            }
            wl_seat::Request::GetTouch { id } => {
                data_init.init(id, ());
            }
            _ => {}
        }
    }
}

impl Dispatch<WlPointer, ()> for State {
    fn request(
        state: &mut Self,
        client: &wayland_server::Client,
        resource: &WlPointer,
        request: wl_pointer::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wl_pointer::Request::SetCursor { surface, hotspot_x, hotspot_y, .. } = request {
            let Some(key) = State::client_key(client) else {
                return;
            };
            let surface = surface.as_ref().and_then(surface_id);
            if let Err(e) = state.server.request_set_cursor(key, surface, hotspot_x, hotspot_y) {
                resource.post_error(wl_pointer::Error::Role, e.to_string());
            }
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlPointer,
        _data: &(),
    ) {
        state.server.frontend.pointers.retain(|p| p != resource);
    }
}

impl Dispatch<WlKeyboard, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlKeyboard,
        _request: wl_keyboard::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlKeyboard,
        _data: &(),
    ) {
        state.server.frontend.keyboards.retain(|k| k != resource);
    }
}

impl Dispatch<WlTouch, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlTouch,
        _request: wl_touch::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }
}
