use wayland_server::protocol::wl_output::{self, WlOutput};
use wayland_server::{Dispatch, GlobalDispatch, Resource};

use crate::config::OUTPUT_VERSION;
use crate::output::{Output, OutputMode};
use crate::server::OutputId;
use crate::state::State;

fn send_mode(resource: &WlOutput, mode: &OutputMode) {
    let mut flags = wl_output::Mode::Current;
    if mode.preferred {
        flags |= wl_output::Mode::Preferred;
    }
    resource.mode(flags, mode.width, mode.height, mode.refresh);
}

fn send_state(resource: &WlOutput, output: &Output) {
    resource.geometry(
        output.x,
        output.y,
        0,
        0,
        wl_output::Subpixel::Unknown,
        output.make.clone(),
        output.model.clone(),
        wl_output::Transform::Normal,
    );
    if let Some(mode) = &output.mode {
        send_mode(resource, mode);
    }
    if resource.version() >= 2 {
        resource.scale(1);
    }
    if resource.version() >= 4 {
        resource.name(output.name.clone());
        resource.description(format!("{} {}", output.make, output.model));
    }
    if resource.version() >= 2 {
        resource.done();
    }
}

impl State {
    /// Creates the wl_output global for an attached output.
    pub fn advertise_output(&mut self, id: OutputId) {
        let global = self.dh.create_global::<State, WlOutput, _>(OUTPUT_VERSION, id);
        self.output_globals.insert(id, global);
    }

    /// Resends geometry and mode after the output changed.
    pub fn output_changed(&self) {
        for (id, resource) in &self.output_resources {
            if let Some(output) = self.server.output(*id) {
                send_state(resource, output);
            }
        }
    }
}

impl GlobalDispatch<WlOutput, OutputId> for State {
    fn bind(
        state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlOutput>,
        global_data: &OutputId,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let output = data_init.init(resource, *global_data);
        match state.server.output(*global_data) {
            Some(info) => send_state(&output, info),
            None => {
                if output.version() >= 2 {
                    output.done();
                }
            }
        }
        state.output_resources.push((*global_data, output));
    }
}

impl Dispatch<WlOutput, OutputId> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlOutput,
        _request: wl_output::Request,
        _data: &OutputId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlOutput,
        _data: &OutputId,
    ) {
        state.output_resources.retain(|(_, r)| r != resource);
    }
}
