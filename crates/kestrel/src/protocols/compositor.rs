use wayland_server::protocol::{
    wl_callback::WlCallback,
    wl_compositor::{self, WlCompositor},
    wl_region::{self, WlRegion},
    wl_surface::{self, WlSurface},
};
use wayland_server::{Dispatch, GlobalDispatch, Resource};

use crate::server::SurfaceId;
use crate::state::State;

impl GlobalDispatch<WlCompositor, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlCompositor>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WlCompositor, ()> for State {
    fn request(
        state: &mut Self,
        client: &wayland_server::Client,
        _resource: &WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let Some(key) = State::client_key(client) else {
                    return;
                };
                let surface_id = state.server.create_surface(key);
                let surface = data_init.init(id, surface_id);
                state.server.frontend.surfaces.insert(surface_id, surface);
            }
            wl_compositor::Request::CreateRegion { id } => {
                data_init.init(id, ());
            }
            _ => {}
        }
    }
}

impl Dispatch<WlSurface, SurfaceId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlSurface,
        request: wl_surface::Request,
        data: &SurfaceId,
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let surface = *data;
        match request {
            wl_surface::Request::Attach { buffer, .. } => {
                state.pending_buffers.insert(surface, buffer);
            }
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init(callback, ());
                state.pending_callbacks.entry(surface).or_default().push(callback);
            }
            wl_surface::Request::Commit => {
                state.commit_surface(surface);
            }
            // Whole frames are repainted, so damage is not tracked.
            wl_surface::Request::Damage { .. } | wl_surface::Request::DamageBuffer { .. } => {}
            wl_surface::Request::SetOpaqueRegion { .. } | wl_surface::Request::SetInputRegion { .. } => {}
            wl_surface::Request::SetBufferTransform { .. } | wl_surface::Request::SetBufferScale { .. } => {}
            wl_surface::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &WlSurface,
        data: &SurfaceId,
    ) {
        state.surface_destroyed(*data);
    }
}

impl Dispatch<WlCallback, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlCallback,
        _request: wayland_server::protocol::wl_callback::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }
}

impl Dispatch<WlRegion, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlRegion,
        _request: wl_region::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }
}

pub fn surface_id(surface: &WlSurface) -> Option<SurfaceId> {
    surface.data::<SurfaceId>().copied()
}
