pub mod drm;
pub mod headless;
pub mod winit;

use std::error::Error;
use std::time::Duration;

use calloop::generic::Generic;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, Interest, LoopHandle, Mode, PostAction};
use wayland_server::{Display, ListeningSocket};

use crate::config::BackendKind;
use crate::renderer::{render_output, Canvas, RenderContext};
use crate::server::OutputId;
use crate::state::State;

/// Everything the event loop callbacks can reach.
pub struct LoopData {
    pub display: Display<State>,
    pub state: State,
}

impl LoopData {
    /// Dispatches pending client requests and sends what they produced.
    pub fn dispatch_clients(&mut self) {
        if let Err(e) = self.display.dispatch_clients(&mut self.state) {
            log::error!("[wayland] Dispatch failed: {}", e);
        }
        self.state.reap_clients();
        self.flush();
    }

    /// Sends configures scheduled since the last flush and writes out
    /// buffered events.
    pub fn flush(&mut self) {
        self.state.flush();
        if let Err(e) = self.display.flush_clients() {
            log::warn!("[wayland] Flush failed: {}", e);
        }
    }

    /// Paints one output and tells its surfaces the frame is done.
    pub fn render(&mut self, output: OutputId, canvas: &mut Canvas) {
        let state = &self.state;
        let ctx = RenderContext {
            textures: &state.textures,
            cursors: &state.cursors,
            bg_dark: state.config.background_dark(),
            bg_light: state.config.background_light(),
        };
        render_output(&state.server, output, &ctx, canvas);
    }

    /// Called once `output` has presented.
    pub fn frame_presented(&mut self, output: OutputId) {
        let time = self.state.now_ms();
        self.state.server.output_frame(output, time);
        self.flush();
    }
}

/// Adds the listening socket, the client fds and the child reaper to the loop.
pub fn insert_wayland_sources(
    handle: &LoopHandle<'static, LoopData>,
    socket: ListeningSocket,
    display: &mut Display<State>,
) -> Result<(), Box<dyn Error>> {
    handle
        .insert_source(Generic::new(socket, Interest::READ, Mode::Level), |_, socket, data| {
            match socket.as_ref().accept() {
                Ok(Some(stream)) => {
                    log::info!("[client] New client connecting");
                    if let Err(e) = data.state.insert_client(stream) {
                        log::error!("[client] Failed to insert client: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("[client] Accept failed: {}", e),
            }
            Ok(PostAction::Continue)
        })
        .map_err(|e| format!("failed to insert socket source: {}", e))?;

    let poll_fd = display.backend().poll_fd().try_clone_to_owned()?;
    handle
        .insert_source(Generic::new(poll_fd, Interest::READ, Mode::Level), |_, _, data| {
            data.dispatch_clients();
            Ok(PostAction::Continue)
        })
        .map_err(|e| format!("failed to insert display source: {}", e))?;

    handle
        .insert_source(Timer::from_duration(Duration::from_secs(1)), |_, _, data| {
            let reaped = data.state.server.launcher.reap();
            if reaped > 0 {
                log::debug!("[process] Reaped {} children", reaped);
            }
            TimeoutAction::ToDuration(Duration::from_secs(1))
        })
        .map_err(|e| format!("failed to insert reap timer: {}", e))?;

    Ok(())
}

fn nested_session() -> bool {
    ["WAYLAND_DISPLAY", "DISPLAY"]
        .iter()
        .any(|var| std::env::var(var).is_ok_and(|v| !v.is_empty()))
}

pub enum Backend {
    Headless(headless::HeadlessBackend),
    Winit(winit::WinitBackend),
    Drm(drm::DrmBackend),
}

impl Backend {
    /// Starts the configured backend and attaches its outputs.
    pub fn start(
        kind: BackendKind,
        handle: &LoopHandle<'static, LoopData>,
        data: &mut LoopData,
    ) -> Result<Self, Box<dyn Error>> {
        match kind {
            BackendKind::Headless => Ok(Backend::Headless(headless::HeadlessBackend::start(data)?)),
            BackendKind::Winit => Ok(Backend::Winit(winit::WinitBackend::start(data)?)),
            BackendKind::Drm => Ok(Backend::Drm(drm::DrmBackend::start(handle, data)?)),
            BackendKind::Auto if nested_session() => {
                log::info!("[backend] Running nested inside an existing session");
                Ok(Backend::Winit(winit::WinitBackend::start(data)?))
            }
            BackendKind::Auto => match drm::DrmBackend::start(handle, data) {
                Ok(backend) => Ok(Backend::Drm(backend)),
                Err(e) => {
                    log::warn!("[backend] DRM unavailable ({}), running headless", e);
                    Ok(Backend::Headless(headless::HeadlessBackend::start(data)?))
                }
            },
        }
    }

    /// Runs until the server stops. Outputs and devices stay open until the
    /// backend is dropped.
    pub fn run(&mut self, event_loop: &mut EventLoop<'static, LoopData>, data: &mut LoopData) -> Result<(), Box<dyn Error>> {
        match self {
            Backend::Winit(backend) => backend.run(event_loop, data),
            Backend::Headless(backend) => {
                while data.state.server.running {
                    event_loop.dispatch(Some(backend.time_to_frame()), data)?;
                    backend.frame(data);
                    data.flush();
                }
                Ok(())
            }
            Backend::Drm(backend) => {
                while data.state.server.running {
                    event_loop.dispatch(Some(backend.time_to_frame()), data)?;
                    backend.frame(data);
                    data.flush();
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_backend_outlives_run_until_teardown() {
        let mut event_loop = EventLoop::<LoopData>::try_new().unwrap();
        let handle = event_loop.handle();
        let display = Display::<State>::new().unwrap();
        let state = State::new(display.handle(), Config::default());
        let mut data = LoopData { display, state };

        let mut backend = Backend::start(BackendKind::Headless, &handle, &mut data).unwrap();
        data.state.server.terminate();
        backend.run(&mut event_loop, &mut data).unwrap();

        assert!(matches!(backend, Backend::Headless(_)));
        assert_eq!(data.state.server.outputs.len(), 1);
        data.state.teardown();
        data.flush();
        drop(backend);
        let root = data.state.server.scene.root();
        assert!(data.state.server.scene.children(root).is_empty());
    }
}
