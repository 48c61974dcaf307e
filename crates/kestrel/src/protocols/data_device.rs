use std::os::fd::AsFd;

use wayland_server::protocol::{
    wl_data_device::{self, WlDataDevice},
    wl_data_device_manager::{self, WlDataDeviceManager},
    wl_data_offer::{self, WlDataOffer},
    wl_data_source::{self, WlDataSource},
};
use wayland_server::{Dispatch, GlobalDispatch, Resource};

use crate::server::SourceId;
use crate::state::{DataSourceEntry, State};

impl GlobalDispatch<WlDataDeviceManager, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlDataDeviceManager>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WlDataDeviceManager, ()> for State {
    fn request(
        state: &mut Self,
        client: &wayland_server::Client,
        _resource: &WlDataDeviceManager,
        request: wl_data_device_manager::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device_manager::Request::CreateDataSource { id } => {
                let source_id = state.server.alloc_id();
                let resource = data_init.init(id, source_id);
                state.server.frontend.data_sources.insert(
                    source_id,
                    DataSourceEntry {
                        resource,
                        mime_types: Vec::new(),
                    },
                );
            }
            wl_data_device_manager::Request::GetDataDevice { id, .. } => {
                let device = data_init.init(id, ());
                state.server.frontend.data_devices.push(device);
                // Catch the new device up on the current selection.
                if let Some(focus) = state.focus_of_client(client) {
                    let selection = state.server.seat.selection;
                    crate::frontend::Frontend::selection(&mut state.server.frontend, focus, selection);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WlDataSource, SourceId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlDataSource,
        request: wl_data_source::Request,
        data: &SourceId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wl_data_source::Request::Offer { mime_type } = request {
            if let Some(entry) = state.server.frontend.data_sources.get_mut(data) {
                entry.mime_types.push(mime_type);
            }
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &WlDataSource,
        data: &SourceId,
    ) {
        state.server.data_source_destroyed(*data);
        state.server.frontend.data_sources.remove(data);
    }
}

impl Dispatch<WlDataDevice, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlDataDevice,
        request: wl_data_device::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device::Request::SetSelection { source, .. } => {
                let source = source.as_ref().and_then(|s| s.data::<SourceId>().copied());
                state.server.request_set_selection(source);
            }
            wl_data_device::Request::StartDrag { .. } => {
                log::debug!("[data] Drag and drop is not supported");
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlDataDevice,
        _data: &(),
    ) {
        state.server.frontend.data_devices.retain(|d| d != resource);
    }
}

impl Dispatch<WlDataOffer, SourceId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlDataOffer,
        request: wl_data_offer::Request,
        data: &SourceId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wl_data_offer::Request::Receive { mime_type, fd } = request {
            // Only the live selection may be read.
            if state.server.seat.selection != Some(*data) {
                return;
            }
            if let Some(entry) = state.server.frontend.data_sources.get(data) {
                entry.resource.send(mime_type, fd.as_fd());
            }
        }
    }
}
