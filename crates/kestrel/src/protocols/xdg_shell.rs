use std::sync::Mutex;

use wayland_protocols::xdg::shell::server::{
    xdg_popup::{self, XdgPopup},
    xdg_positioner::{self, XdgPositioner},
    xdg_surface::{self, XdgSurface},
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::{self, XdgWmBase},
};
use wayland_server::{Dispatch, GlobalDispatch, Resource};

use super::compositor::surface_id;
use crate::popup::{Direction, Positioner};
use crate::server::{Edges, PopupId, Rectangle, SurfaceId, ToplevelId};
use crate::state::State;
use crate::surface::SurfaceRole;

pub struct XdgSurfaceData {
    pub surface: SurfaceId,
}

impl GlobalDispatch<XdgWmBase, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<XdgWmBase>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<XdgWmBase, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &XdgWmBase,
        request: xdg_wm_base::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            xdg_wm_base::Request::CreatePositioner { id } => {
                data_init.init(id, Mutex::new(Positioner::default()));
            }
            xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                let Some(surface_id) = surface_id(&surface) else {
                    return;
                };
                let has_role = state
                    .server
                    .surfaces
                    .get(&surface_id)
                    .is_some_and(|s| s.role != SurfaceRole::None);
                if has_role {
                    data_init.post_error(id, xdg_wm_base::Error::Role, "surface already has a role");
                    return;
                }
                data_init.init(id, XdgSurfaceData { surface: surface_id });
            }
            xdg_wm_base::Request::Pong { .. } => {}
            _ => {}
        }
    }
}

impl Dispatch<XdgPositioner, Mutex<Positioner>> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        resource: &XdgPositioner,
        request: xdg_positioner::Request,
        data: &Mutex<Positioner>,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let Ok(mut positioner) = data.lock() else {
            return;
        };
        match request {
            xdg_positioner::Request::SetSize { width, height } => {
                if width <= 0 || height <= 0 {
                    resource.post_error(xdg_positioner::Error::InvalidInput, "size must be positive");
                    return;
                }
                positioner.width = width;
                positioner.height = height;
            }
            xdg_positioner::Request::SetAnchorRect { x, y, width, height } => {
                if width < 0 || height < 0 {
                    resource.post_error(xdg_positioner::Error::InvalidInput, "negative anchor rect");
                    return;
                }
                positioner.anchor_rect = Rectangle::new(x, y, width, height);
            }
            xdg_positioner::Request::SetAnchor { anchor } => {
                positioner.anchor = Direction::from_raw(u32::from(anchor)).unwrap_or_default();
            }
            xdg_positioner::Request::SetGravity { gravity } => {
                positioner.gravity = Direction::from_raw(u32::from(gravity)).unwrap_or_default();
            }
            xdg_positioner::Request::SetOffset { x, y } => {
                positioner.offset_x = x;
                positioner.offset_y = y;
            }
            _ => {}
        }
    }
}

impl Dispatch<XdgSurface, XdgSurfaceData> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &XdgSurface,
        request: xdg_surface::Request,
        data: &XdgSurfaceData,
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let surface = data.surface;
        match request {
            xdg_surface::Request::GetToplevel { id } => {
                let has_role = state
                    .server
                    .surfaces
                    .get(&surface)
                    .map_or(true, |s| s.role != SurfaceRole::None);
                if has_role {
                    data_init.post_error(id, xdg_wm_base::Error::Role, "surface already has a role");
                    return;
                }
                let toplevel_id = state.server.new_toplevel(surface);
                let toplevel = data_init.init(id, toplevel_id);
                state
                    .server
                    .frontend
                    .toplevels
                    .insert(toplevel_id, (resource.clone(), toplevel));
            }
            xdg_surface::Request::GetPopup { id, parent, positioner } => {
                let parent_surface = parent
                    .as_ref()
                    .and_then(|p| p.data::<XdgSurfaceData>())
                    .map(|d| d.surface);
                let placement = positioner
                    .data::<Mutex<Positioner>>()
                    .and_then(|p| p.lock().ok().map(|p| *p))
                    .unwrap_or_default();
                match state.server.new_popup(surface, parent_surface, placement) {
                    Ok(popup_id) => {
                        let popup = data_init.init(id, popup_id);
                        state
                            .server
                            .frontend
                            .popups
                            .insert(popup_id, (resource.clone(), popup));
                    }
                    Err(e) => {
                        log::warn!("[xdg] Popup rejected: {}", e);
                        data_init.post_error(id, xdg_wm_base::Error::InvalidPopupParent, e.to_string());
                    }
                }
            }
            xdg_surface::Request::SetWindowGeometry { x, y, width, height } => {
                if width <= 0 || height <= 0 {
                    resource.post_error(xdg_surface::Error::InvalidSize, "window geometry must be positive");
                    return;
                }
                state.server.set_window_geometry(surface, Rectangle::new(x, y, width, height));
            }
            xdg_surface::Request::AckConfigure { serial } => {
                state.server.ack_configure(surface, serial);
            }
            _ => {}
        }
    }
}

impl Dispatch<XdgToplevel, ToplevelId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &XdgToplevel,
        request: xdg_toplevel::Request,
        data: &ToplevelId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let id = *data;
        match request {
            xdg_toplevel::Request::SetTitle { title } => state.server.set_toplevel_title(id, title),
            xdg_toplevel::Request::SetAppId { app_id } => state.server.set_toplevel_app_id(id, app_id),
            xdg_toplevel::Request::Move { serial, .. } => state.server.request_move(id, serial),
            xdg_toplevel::Request::Resize { serial, edges, .. } => {
                state.server.request_resize(id, serial, Edges::from_bits(u32::from(edges)));
            }
            xdg_toplevel::Request::SetMaximized | xdg_toplevel::Request::UnsetMaximized => {
                state.server.request_maximize(id);
            }
            xdg_toplevel::Request::SetFullscreen { .. } | xdg_toplevel::Request::UnsetFullscreen => {
                state.server.request_fullscreen(id);
            }
            xdg_toplevel::Request::SetMinimized => {
                log::debug!("[xdg] Toplevel {} asked to minimize, ignored", id);
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &XdgToplevel,
        data: &ToplevelId,
    ) {
        state.server.destroy_toplevel(*data);
        state.server.frontend.toplevels.remove(data);
    }
}

impl Dispatch<XdgPopup, PopupId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &XdgPopup,
        request: xdg_popup::Request,
        data: &PopupId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            xdg_popup::Request::Reposition { positioner, token } => {
                let Some(placement) = positioner
                    .data::<Mutex<Positioner>>()
                    .and_then(|p| p.lock().ok().map(|p| *p))
                else {
                    return;
                };
                resource.repositioned(token);
                state.server.reposition_popup(*data, placement);
            }
            xdg_popup::Request::Grab { .. } => {
                log::debug!("[xdg] Popup {} grab ignored", data);
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &XdgPopup,
        data: &PopupId,
    ) {
        state.server.destroy_popup(*data);
        state.server.frontend.popups.remove(data);
    }
}
