use wayland_server::protocol::{
    wl_subcompositor::{self, WlSubcompositor},
    wl_subsurface::{self, WlSubsurface},
};
use wayland_server::{Dispatch, GlobalDispatch};

use super::compositor::surface_id;
use crate::server::SurfaceId;
use crate::state::State;

impl GlobalDispatch<WlSubcompositor, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlSubcompositor>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WlSubcompositor, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlSubcompositor,
        request: wl_subcompositor::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wl_subcompositor::Request::GetSubsurface { id, surface, parent } = request {
            let ids = surface_id(&surface).zip(surface_id(&parent));
            match ids {
                Some((child, parent)) if state.server.create_subsurface(child, parent) => {
                    data_init.init(id, child);
                }
                _ => {
                    log::warn!("[surface] Rejected subsurface request");
                    data_init.post_error(
                        id,
                        wl_subcompositor::Error::BadSurface,
                        "surface already has a role or parent is invalid",
                    );
                }
            }
        }
    }
}

impl Dispatch<WlSubsurface, SurfaceId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlSubsurface,
        request: wl_subsurface::Request,
        data: &SurfaceId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_subsurface::Request::SetPosition { x, y } => {
                state.server.set_subsurface_position(*data, x, y);
            }
            // Subsurfaces stack in creation order and always commit with
            // their parent.
            wl_subsurface::Request::PlaceAbove { .. }
            | wl_subsurface::Request::PlaceBelow { .. }
            | wl_subsurface::Request::SetSync
            | wl_subsurface::Request::SetDesync => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &WlSubsurface,
        data: &SurfaceId,
    ) {
        state.server.destroy_subsurface(*data);
    }
}
