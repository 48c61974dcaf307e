use std::collections::HashMap;
use std::error::Error;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use drm::buffer::{Buffer, DrmFourcc};
use drm::Device as BasicDevice;
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{connector, crtc, framebuffer, Device as ControlDevice, ModeTypeFlags};
use input::event::device::DeviceEvent;
use input::event::keyboard::{KeyState as LiKeyState, KeyboardEventTrait};
use input::event::pointer::{
    Axis as LiAxis, ButtonState as LiButtonState, PointerEvent, PointerEventTrait, PointerScrollEvent,
};
use input::event::{Event, EventTrait};
use input::{DeviceCapability, Libinput, LibinputInterface};
use wayland_server::protocol::wl_keyboard::KeyState;
use wayland_server::protocol::wl_pointer::{Axis, AxisRelativeDirection, AxisSource, ButtonState};

use super::LoopData;
use crate::config::SEAT_NAME;
use crate::frontend::AxisEvent;
use crate::output::OutputMode;
use crate::renderer::Canvas;
use crate::server::{KeyboardId, OutputId};

struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl BasicDevice for Card {}
impl ControlDevice for Card {}

impl Card {
    fn open(path: &Path) -> std::io::Result<Self> {
        OpenOptions::new().read(true).write(true).open(path).map(Card)
    }
}

/// One lit connector scanning out a dumb buffer.
struct DrmOutput {
    id: OutputId,
    crtc: crtc::Handle,
    framebuffer: framebuffer::Handle,
    buffer: Option<DumbBuffer>,
    canvas: Canvas,
    next_frame: Instant,
}

/// Kernel modesetting with software rendering into dumb buffers. Input
/// comes from libinput on the same seat.
pub struct DrmBackend {
    card: Card,
    outputs: Vec<DrmOutput>,
}

fn open_card(configured: Option<PathBuf>) -> Result<Card, Box<dyn Error>> {
    if let Some(path) = configured {
        return Card::open(&path).map_err(|e| format!("failed to open {}: {}", path.display(), e).into());
    }
    Card::open(Path::new("/dev/dri/card0"))
        .or_else(|_| Card::open(Path::new("/dev/dri/card1")))
        .map_err(|e| format!("failed to open DRM device: {}", e).into())
}

fn connector_name(info: &connector::Info) -> String {
    format!("{:?}-{}", info.interface(), info.interface_id())
}

impl DrmBackend {
    pub fn start(handle: &LoopHandle<'static, LoopData>, data: &mut LoopData) -> Result<Self, Box<dyn Error>> {
        let card = open_card(data.state.config.drm_device())?;
        if let Err(e) = card.acquire_master_lock() {
            log::warn!("[drm] Could not become DRM master: {}", e);
        }

        let res = card.resource_handles()?;
        let mut used_crtcs: Vec<crtc::Handle> = Vec::new();
        let mut outputs = Vec::new();

        for &conn in res.connectors() {
            let info = match card.get_connector(conn, true) {
                Ok(info) => info,
                Err(e) => {
                    log::warn!("[drm] Failed to query connector: {}", e);
                    continue;
                }
            };
            if info.state() != connector::State::Connected || info.modes().is_empty() {
                continue;
            }
            let name = connector_name(&info);

            let crtc = info
                .encoders()
                .iter()
                .filter_map(|&e| card.get_encoder(e).ok())
                .flat_map(|encoder| res.filter_crtcs(encoder.possible_crtcs()))
                .find(|c| !used_crtcs.contains(c));
            let Some(crtc) = crtc else {
                log::warn!("[drm] No free CRTC for {}", name);
                continue;
            };

            let modes: Vec<OutputMode> = info
                .modes()
                .iter()
                .map(|m| OutputMode {
                    width: m.size().0 as i32,
                    height: m.size().1 as i32,
                    refresh: m.vrefresh() as i32 * 1000,
                    preferred: m.mode_type().contains(ModeTypeFlags::PREFERRED),
                })
                .collect();
            let id = data.state.server.new_output(&name, modes);
            let Some(chosen) = data.state.server.output(id).and_then(|o| o.mode) else {
                data.state.server.destroy_output(id);
                continue;
            };
            let Some(drm_mode) = info.modes().iter().copied().find(|m| {
                m.size() == (chosen.width as u16, chosen.height as u16)
                    && m.vrefresh() as i32 * 1000 == chosen.refresh
            }) else {
                data.state.server.destroy_output(id);
                continue;
            };

            let size = (chosen.width as u32, chosen.height as u32);
            let setup = card
                .create_dumb_buffer(size, DrmFourcc::Xrgb8888, 32)
                .and_then(|buffer| match card.add_framebuffer(&buffer, 24, 32) {
                    Ok(fb) => Ok((buffer, fb)),
                    Err(e) => {
                        let _ = card.destroy_dumb_buffer(buffer);
                        Err(e)
                    }
                });
            let (buffer, fb) = match setup {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("[drm] Failed to allocate scanout buffer for {}: {}", name, e);
                    data.state.server.destroy_output(id);
                    continue;
                }
            };
            if let Err(e) = card.set_crtc(crtc, Some(fb), (0, 0), &[info.handle()], Some(drm_mode)) {
                log::error!("[drm] Modeset failed on {}: {}", name, e);
                let _ = card.destroy_framebuffer(fb);
                let _ = card.destroy_dumb_buffer(buffer);
                data.state.server.destroy_output(id);
                continue;
            }

            used_crtcs.push(crtc);
            data.state.advertise_output(id);
            log::info!("[drm] {} lit at {}x{}", name, size.0, size.1);
            outputs.push(DrmOutput {
                id,
                crtc,
                framebuffer: fb,
                buffer: Some(buffer),
                canvas: Canvas::new(size.0 as usize, size.1 as usize, 0),
                next_frame: Instant::now(),
            });
        }

        if outputs.is_empty() {
            return Err("no connected display found".into());
        }

        match InputSource::new() {
            Ok(input) => input.insert(handle)?,
            Err(e) => log::error!("[input] libinput unavailable, input disabled: {}", e),
        }

        Ok(Self { card, outputs })
    }

    /// Time until the next output is due.
    pub fn time_to_frame(&self) -> Duration {
        let now = Instant::now();
        self.outputs
            .iter()
            .map(|o| o.next_frame.saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::from_millis(16))
    }

    /// Repaints every output whose frame is due.
    pub fn frame(&mut self, data: &mut LoopData) {
        let now = Instant::now();
        for output in &mut self.outputs {
            if now < output.next_frame {
                continue;
            }
            let interval = data
                .state
                .server
                .output(output.id)
                .map(|o| o.frame_interval())
                .unwrap_or(Duration::from_millis(16));
            output.next_frame = now + interval;

            let Some(buffer) = output.buffer.as_mut() else {
                continue;
            };
            data.render(output.id, &mut output.canvas);
            let pitch = buffer.pitch() as usize;
            match self.card.map_dumb_buffer(buffer) {
                Ok(mut mapping) => output.canvas.copy_to(&mut mapping, pitch),
                Err(e) => {
                    log::warn!("[drm] Failed to map scanout buffer: {}", e);
                    continue;
                }
            }
            data.frame_presented(output.id);
        }
    }
}

impl Drop for DrmBackend {
    fn drop(&mut self) {
        for output in &mut self.outputs {
            if let Err(e) = self.card.set_crtc(output.crtc, None, (0, 0), &[], None) {
                log::debug!("[drm] Failed to disable CRTC: {}", e);
            }
            if let Err(e) = self.card.destroy_framebuffer(output.framebuffer) {
                log::debug!("[drm] Failed to destroy framebuffer: {}", e);
            }
            if let Some(buffer) = output.buffer.take() {
                if let Err(e) = self.card.destroy_dumb_buffer(buffer) {
                    log::debug!("[drm] Failed to destroy dumb buffer: {}", e);
                }
            }
        }
        if let Err(e) = self.card.release_master_lock() {
            log::debug!("[drm] Failed to drop DRM master: {}", e);
        }
        log::info!("[drm] Released {} outputs", self.outputs.len());
    }
}

struct Interface;

impl LibinputInterface for Interface {
    fn open_restricted(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32> {
        OpenOptions::new()
            .custom_flags(flags)
            .read((flags & libc::O_RDWR != 0) || (flags & libc::O_ACCMODE == libc::O_RDONLY))
            .write((flags & libc::O_RDWR != 0) || (flags & libc::O_WRONLY != 0))
            .open(path)
            .map(|file| file.into())
            .map_err(|err| err.raw_os_error().unwrap_or(-1))
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        drop(File::from(fd));
    }
}

/// libinput context plus the keyboards it has announced, keyed by sysname.
struct InputSource {
    libinput: Libinput,
    keyboards: HashMap<String, KeyboardId>,
}

impl InputSource {
    fn new() -> Result<Self, Box<dyn Error>> {
        let mut libinput = Libinput::new_with_udev(Interface);
        libinput
            .udev_assign_seat(SEAT_NAME)
            .map_err(|_| "failed to assign udev seat")?;
        Ok(Self {
            libinput,
            keyboards: HashMap::new(),
        })
    }

    fn insert(mut self, handle: &LoopHandle<'static, LoopData>) -> Result<(), Box<dyn Error>> {
        let fd = self.libinput.as_fd().try_clone_to_owned()?;
        handle
            .insert_source(Generic::new(fd, Interest::READ, Mode::Level), move |_, _, data| {
                if let Err(e) = self.libinput.dispatch() {
                    log::warn!("[input] Dispatch failed: {}", e);
                }
                self.process(data);
                data.flush();
                Ok(PostAction::Continue)
            })
            .map_err(|e| format!("failed to insert input source: {}", e))?;
        log::info!("[input] libinput attached to {}", SEAT_NAME);
        Ok(())
    }

    fn process(&mut self, data: &mut LoopData) {
        while let Some(event) = self.libinput.next() {
            match event {
                Event::Device(DeviceEvent::Added(added)) => {
                    let device = added.device();
                    log::info!("[input] Device added: {}", device.name());
                    if device.has_capability(DeviceCapability::Keyboard) {
                        if let Some(id) = data.state.server.new_keyboard(device.name()) {
                            self.keyboards.insert(device.sysname().to_string(), id);
                        }
                    }
                }
                Event::Device(DeviceEvent::Removed(removed)) => {
                    let device = removed.device();
                    log::info!("[input] Device removed: {}", device.name());
                    if let Some(id) = self.keyboards.remove(device.sysname()) {
                        data.state.server.remove_keyboard(id);
                    }
                }
                Event::Keyboard(key) => {
                    let Some(&id) = self.keyboards.get(key.device().sysname()) else {
                        continue;
                    };
                    let state = match key.key_state() {
                        LiKeyState::Pressed => KeyState::Pressed,
                        LiKeyState::Released => KeyState::Released,
                    };
                    data.state.server.keyboard_key(id, key.key(), state, key.time());
                }
                Event::Pointer(pointer) => Self::pointer(data, pointer),
                _ => {}
            }
        }
    }

    fn pointer(data: &mut LoopData, event: PointerEvent) {
        let server = &mut data.state.server;
        match event {
            PointerEvent::Motion(m) => server.pointer_motion(m.dx(), m.dy(), m.time()),
            PointerEvent::MotionAbsolute(m) => {
                server.pointer_motion_absolute(m.absolute_x_transformed(1), m.absolute_y_transformed(1), m.time())
            }
            PointerEvent::Button(b) => {
                let state = match b.button_state() {
                    LiButtonState::Pressed => ButtonState::Pressed,
                    LiButtonState::Released => ButtonState::Released,
                };
                server.pointer_button(b.button(), state, b.time());
            }
            PointerEvent::ScrollWheel(e) => {
                let relative_direction = relative_direction(&e.device());
                for (li, axis) in AXES {
                    if e.has_axis(li) {
                        server.pointer_axis(&AxisEvent {
                            time: e.time(),
                            orientation: axis,
                            delta: e.scroll_value(li),
                            discrete: (e.scroll_value_v120(li) / 120.0) as i32,
                            source: AxisSource::Wheel,
                            relative_direction,
                        });
                    }
                }
            }
            PointerEvent::ScrollFinger(e) => scroll(server, &e, AxisSource::Finger),
            PointerEvent::ScrollContinuous(e) => scroll(server, &e, AxisSource::Continuous),
            _ => return,
        }
        server.pointer_frame();
    }
}

const AXES: [(LiAxis, Axis); 2] = [
    (LiAxis::Vertical, Axis::VerticalScroll),
    (LiAxis::Horizontal, Axis::HorizontalScroll),
];

fn relative_direction(device: &input::Device) -> AxisRelativeDirection {
    if device.config_scroll_natural_scroll_enabled() {
        AxisRelativeDirection::Inverted
    } else {
        AxisRelativeDirection::Identical
    }
}

fn scroll<E>(server: &mut crate::state::KestrelServer, event: &E, source: AxisSource)
where
    E: PointerScrollEvent + PointerEventTrait + EventTrait,
{
    let relative_direction = relative_direction(&event.device());
    for (li, axis) in AXES {
        if event.has_axis(li) {
            server.pointer_axis(&AxisEvent {
                time: event.time(),
                orientation: axis,
                delta: event.scroll_value(li),
                discrete: 0,
                source,
                relative_direction,
            });
        }
    }
}
