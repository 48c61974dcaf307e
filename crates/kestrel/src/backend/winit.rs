use std::error::Error;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use wayland_server::protocol::wl_keyboard::KeyState;
use wayland_server::protocol::wl_pointer::{Axis, AxisRelativeDirection, AxisSource, ButtonState};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::platform::run_on_demand::EventLoopExtRunOnDemand;
use winit::platform::scancode::PhysicalKeyExtScancode;
use winit::window::{Window, WindowId};

use super::LoopData;
use crate::frontend::AxisEvent;
use crate::output::OutputMode;
use crate::renderer::Canvas;
use crate::server::{KeyboardId, OutputId};

const BTN_LEFT: u32 = 0x110;
const BTN_RIGHT: u32 = 0x111;
const BTN_MIDDLE: u32 = 0x112;
const BTN_SIDE: u32 = 0x113;
const BTN_EXTRA: u32 = 0x114;

/// Scroll distance of one wheel click, in surface units.
const SCROLL_STEP: f64 = 15.0;

/// Runs the compositor inside a window of the hosting session.
pub struct WinitBackend {
    event_loop: EventLoop<()>,
    output: OutputId,
    keyboard: Option<KeyboardId>,
    surface: Option<softbuffer::Surface<Arc<Window>, Arc<Window>>>,
    window: Option<Arc<Window>>,
}

impl WinitBackend {
    pub fn start(data: &mut LoopData) -> Result<Self, Box<dyn Error>> {
        let event_loop = EventLoop::new()?;
        let nested = &data.state.config.nested;
        let mode = OutputMode {
            width: nested.width,
            height: nested.height,
            refresh: 60_000,
            preferred: true,
        };
        let output = data.state.server.new_output("WINIT-1", vec![mode]);
        data.state.advertise_output(output);
        let keyboard = data.state.server.new_keyboard("winit-keyboard");
        log::info!("[winit] Nested backend ready ({}x{})", mode.width, mode.height);
        Ok(Self { event_loop, output, keyboard, surface: None, window: None })
    }

    /// Runs the host event loop. The window outlives the call and closes
    /// when the backend is dropped.
    pub fn run(
        &mut self,
        calloop: &mut calloop::EventLoop<'static, LoopData>,
        data: &mut LoopData,
    ) -> Result<(), Box<dyn Error>> {
        let mut app = App {
            calloop,
            data,
            output: self.output,
            keyboard: self.keyboard,
            window: self.window.take(),
            surface: self.surface.take(),
            canvas: Canvas::new(0, 0, 0),
            last_frame: Instant::now(),
            error: None,
        };
        let result = self.event_loop.run_app_on_demand(&mut app);
        self.surface = app.surface.take();
        self.window = app.window.take();
        result?;
        match app.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct App<'a> {
    calloop: &'a mut calloop::EventLoop<'static, LoopData>,
    data: &'a mut LoopData,
    output: OutputId,
    keyboard: Option<KeyboardId>,
    window: Option<Arc<Window>>,
    surface: Option<softbuffer::Surface<Arc<Window>, Arc<Window>>>,
    canvas: Canvas,
    last_frame: Instant,
    error: Option<Box<dyn Error>>,
}

impl App<'_> {
    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Result<(), Box<dyn Error>> {
        let nested = &self.data.state.config.nested;
        let attrs = Window::default_attributes()
            .with_title("kestrel")
            .with_inner_size(winit::dpi::PhysicalSize::new(nested.width as u32, nested.height as u32));
        let window = Arc::new(event_loop.create_window(attrs)?);
        let context = softbuffer::Context::new(window.clone())?;
        let surface = softbuffer::Surface::new(&context, window.clone())?;
        self.window = Some(window);
        self.surface = Some(surface);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Box<dyn Error>) {
        log::error!("[winit] {}", error);
        self.error = Some(error);
        self.data.state.server.terminate();
        event_loop.exit();
    }

    fn frame_interval(&self) -> Duration {
        self.data
            .state
            .server
            .output(self.output)
            .map(|o| o.frame_interval())
            .unwrap_or(Duration::from_millis(16))
    }

    fn render(&mut self) {
        let (Some(window), Some(surface)) = (&self.window, &mut self.surface) else {
            return;
        };
        let size = window.inner_size();
        let (Some(width), Some(height)) = (NonZeroU32::new(size.width), NonZeroU32::new(size.height)) else {
            return;
        };
        if let Err(e) = surface.resize(width, height) {
            log::warn!("[winit] Failed to resize surface: {}", e);
            return;
        }

        self.data.render(self.output, &mut self.canvas);

        let mut buffer = match surface.buffer_mut() {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("[winit] Failed to get buffer: {}", e);
                return;
            }
        };
        buffer.fill(0);
        let copy_w = self.canvas.width.min(width.get() as usize);
        for (y, row) in self.canvas.as_slice().chunks_exact(self.canvas.stride.max(1)).enumerate() {
            let start = y * width.get() as usize;
            let Some(dst) = buffer.get_mut(start..start + copy_w) else {
                break;
            };
            for (d, s) in dst.iter_mut().zip(row) {
                *d = s & 0x00FF_FFFF;
            }
        }
        if let Err(e) = buffer.present() {
            log::warn!("[winit] Failed to present: {}", e);
            return;
        }

        self.last_frame = Instant::now();
        self.data.frame_presented(self.output);
    }

    fn handle_key(&mut self, scancode: u32, state: ElementState) {
        let Some(keyboard) = self.keyboard else {
            return;
        };
        let state = match state {
            ElementState::Pressed => KeyState::Pressed,
            ElementState::Released => KeyState::Released,
        };
        let time = self.data.state.now_ms();
        self.data.state.server.keyboard_key(keyboard, scancode, state, time);
    }

    fn handle_button(&mut self, button: MouseButton, state: ElementState) {
        let code = match button {
            MouseButton::Left => BTN_LEFT,
            MouseButton::Right => BTN_RIGHT,
            MouseButton::Middle => BTN_MIDDLE,
            MouseButton::Back => BTN_SIDE,
            MouseButton::Forward => BTN_EXTRA,
            MouseButton::Other(_) => return,
        };
        let state = match state {
            ElementState::Pressed => ButtonState::Pressed,
            ElementState::Released => ButtonState::Released,
        };
        let time = self.data.state.now_ms();
        let server = &mut self.data.state.server;
        server.pointer_button(code, state, time);
        server.pointer_frame();
    }

    fn handle_scroll(&mut self, delta: MouseScrollDelta) {
        let time = self.data.state.now_ms();
        // winit scrolls positive upwards, wl_pointer downwards.
        let axes = match delta {
            MouseScrollDelta::LineDelta(x, y) => [
                (Axis::HorizontalScroll, -x as f64 * SCROLL_STEP, -x as i32, AxisSource::Wheel),
                (Axis::VerticalScroll, -y as f64 * SCROLL_STEP, -y as i32, AxisSource::Wheel),
            ],
            MouseScrollDelta::PixelDelta(pos) => [
                (Axis::HorizontalScroll, -pos.x, 0, AxisSource::Finger),
                (Axis::VerticalScroll, -pos.y, 0, AxisSource::Finger),
            ],
        };
        let server = &mut self.data.state.server;
        for (orientation, delta, discrete, source) in axes {
            if delta != 0.0 {
                server.pointer_axis(&AxisEvent {
                    time,
                    orientation,
                    delta,
                    discrete,
                    source,
                    relative_direction: AxisRelativeDirection::Identical,
                });
            }
        }
        server.pointer_frame();
    }
}

impl ApplicationHandler for App<'_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.create_window(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("[winit] Window closed");
                self.data.state.server.terminate();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                let mode = OutputMode {
                    width: size.width as i32,
                    height: size.height as i32,
                    refresh: 60_000,
                    preferred: true,
                };
                self.data.state.server.output_request_state(self.output, mode);
                self.data.state.output_changed();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => self.render(),
            WindowEvent::CursorMoved { position, .. } => {
                let Some(window) = &self.window else {
                    return;
                };
                let size = window.inner_size();
                if size.width == 0 || size.height == 0 {
                    return;
                }
                let time = self.data.state.now_ms();
                let server = &mut self.data.state.server;
                server.pointer_motion_absolute(
                    position.x / size.width as f64,
                    position.y / size.height as f64,
                    time,
                );
                server.pointer_frame();
            }
            WindowEvent::MouseInput { state, button, .. } => self.handle_button(button, state),
            WindowEvent::MouseWheel { delta, .. } => self.handle_scroll(delta),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.repeat {
                    return;
                }
                match event.physical_key.to_scancode() {
                    Some(scancode) => self.handle_key(scancode, event.state),
                    None => log::debug!("[winit] Key without scancode: {:?}", event.physical_key),
                }
            }
            _ => {}
        }
        self.data.flush();
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(e) = self.calloop.dispatch(Some(Duration::ZERO), self.data) {
            self.fail(event_loop, e.into());
            return;
        }
        self.data.flush();

        if !self.data.state.server.running {
            event_loop.exit();
            return;
        }
        let interval = self.frame_interval();
        if self.last_frame.elapsed() >= interval {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        }
        // Client fds are not watched by winit, so wake up regularly.
        event_loop.set_control_flow(ControlFlow::wait_duration(Duration::from_millis(4)));
    }
}
