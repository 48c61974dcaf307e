use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use wayland_protocols::xdg::shell::server::{
    xdg_popup::XdgPopup, xdg_surface::XdgSurface, xdg_toplevel, xdg_toplevel::XdgToplevel,
};
use wayland_server::backend::{ClientData, ClientId, DisconnectReason, GlobalId};
use wayland_server::protocol::{
    wl_buffer::WlBuffer,
    wl_callback::WlCallback,
    wl_data_device::WlDataDevice,
    wl_data_offer::WlDataOffer,
    wl_data_source::WlDataSource,
    wl_keyboard::{KeyState, WlKeyboard},
    wl_output::WlOutput,
    wl_pointer::{self, ButtonState, WlPointer},
    wl_surface::WlSurface,
};
use wayland_server::{DisplayHandle, Resource};

use crate::config::Config;
use crate::cursor::CursorManager;
use crate::frontend::{AxisEvent, Frontend, Modifiers};
use crate::process::ProcessLauncher;
use crate::renderer::Texture;
use crate::server::{
    ClientKey, OutputId, PopupId, Rectangle, Server, SourceId, SurfaceId, ToplevelId,
};
use crate::surface::BufferChange;

/// Per-client data handed to wayland-server.
pub struct ClientState {
    pub key: ClientKey,
    disconnected: Arc<Mutex<Vec<ClientKey>>>,
}

impl ClientData for ClientState {
    fn initialized(&self, client_id: ClientId) {
        log::debug!("[client] Client {} initialized as {:?}", self.key, client_id);
    }

    fn disconnected(&self, _client_id: ClientId, reason: DisconnectReason) {
        log::debug!("[client] Client {} gone: {:?}", self.key, reason);
        if let Ok(mut list) = self.disconnected.lock() {
            list.push(self.key);
        }
    }
}

pub struct DataSourceEntry {
    pub resource: WlDataSource,
    pub mime_types: Vec<String>,
}

/// Keymap shared with every wl_keyboard through a memfd.
pub struct KeymapFile {
    pub fd: OwnedFd,
    pub size: u32,
}

impl KeymapFile {
    pub fn new(keymap: &str) -> Option<Self> {
        use std::io::Write;
        use std::os::fd::FromRawFd;

        let name = std::ffi::CString::new("kestrel-keymap").ok()?;
        let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            log::error!("[seat] Failed to create memfd for keymap");
            return None;
        }
        let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
        if let Err(e) = file.write_all(keymap.as_bytes()).and_then(|_| file.write_all(&[0])) {
            log::error!("[seat] Failed to write keymap: {}", e);
            return None;
        }
        log::debug!("[seat] Created keymap (size={})", keymap.len() + 1);
        Some(Self {
            fd: file.into(),
            size: keymap.len() as u32 + 1,
        })
    }
}

/// Protocol objects behind the ids the core hands out.
pub struct WaylandFrontend {
    dh: DisplayHandle,
    pub surfaces: HashMap<SurfaceId, WlSurface>,
    pub toplevels: HashMap<ToplevelId, (XdgSurface, XdgToplevel)>,
    pub popups: HashMap<PopupId, (XdgSurface, XdgPopup)>,
    pub keyboards: Vec<WlKeyboard>,
    pub pointers: Vec<WlPointer>,
    pub data_devices: Vec<WlDataDevice>,
    pub data_sources: HashMap<SourceId, DataSourceEntry>,
    pub frame_callbacks: HashMap<SurfaceId, Vec<WlCallback>>,
}

impl WaylandFrontend {
    pub fn new(dh: DisplayHandle) -> Self {
        Self {
            dh,
            surfaces: HashMap::new(),
            toplevels: HashMap::new(),
            popups: HashMap::new(),
            keyboards: Vec::new(),
            pointers: Vec::new(),
            data_devices: Vec::new(),
            data_sources: HashMap::new(),
            frame_callbacks: HashMap::new(),
        }
    }

    fn keyboards_for(&self, surface: &WlSurface) -> impl Iterator<Item = &WlKeyboard> {
        let id = surface.id();
        self.keyboards.iter().filter(move |k| k.id().same_client_as(&id))
    }

    fn pointers_for(&self, surface: &WlSurface) -> impl Iterator<Item = &WlPointer> {
        let id = surface.id();
        self.pointers.iter().filter(move |p| p.id().same_client_as(&id))
    }

    /// Sends enter and modifiers to one freshly bound keyboard.
    pub fn keyboard_enter_one(&self, keyboard: &WlKeyboard, surface: SurfaceId, keys: &[u32], modifiers: Modifiers, serial: u32) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        keyboard.enter(serial, wl_surface, key_bytes(keys));
        keyboard.modifiers(serial, modifiers.depressed, modifiers.latched, modifiers.locked, modifiers.group);
    }
}

fn key_bytes(keys: &[u32]) -> Vec<u8> {
    keys.iter().flat_map(|k| k.to_ne_bytes()).collect()
}

impl Frontend for WaylandFrontend {
    fn configure_toplevel(&mut self, toplevel: ToplevelId, width: i32, height: i32, activated: bool, serial: u32) {
        let Some((xdg_surface, xdg_toplevel)) = self.toplevels.get(&toplevel) else {
            return;
        };
        let mut states = Vec::new();
        if activated {
            states.extend_from_slice(&(xdg_toplevel::State::Activated as u32).to_ne_bytes());
        }
        xdg_toplevel.configure(width, height, states);
        xdg_surface.configure(serial);
    }

    fn configure_popup(&mut self, popup: PopupId, geometry: Rectangle, serial: u32) {
        let Some((xdg_surface, xdg_popup)) = self.popups.get(&popup) else {
            return;
        };
        xdg_popup.configure(geometry.x, geometry.y, geometry.width, geometry.height);
        xdg_surface.configure(serial);
    }

    fn keyboard_enter(&mut self, surface: SurfaceId, keys: &[u32], modifiers: Modifiers, serial: u32) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for keyboard in self.keyboards_for(wl_surface) {
            self.keyboard_enter_one(keyboard, surface, keys, modifiers, serial);
        }
    }

    fn keyboard_leave(&mut self, surface: SurfaceId, serial: u32) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for keyboard in self.keyboards_for(wl_surface) {
            keyboard.leave(serial, wl_surface);
        }
    }

    fn keyboard_key(&mut self, surface: SurfaceId, time: u32, key: u32, state: KeyState, serial: u32) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for keyboard in self.keyboards_for(wl_surface) {
            keyboard.key(serial, time, key, state);
        }
    }

    fn keyboard_modifiers(&mut self, surface: SurfaceId, modifiers: Modifiers, serial: u32) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for keyboard in self.keyboards_for(wl_surface) {
            keyboard.modifiers(serial, modifiers.depressed, modifiers.latched, modifiers.locked, modifiers.group);
        }
    }

    fn pointer_enter(&mut self, surface: SurfaceId, sx: f64, sy: f64, serial: u32) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for pointer in self.pointers_for(wl_surface) {
            pointer.enter(serial, wl_surface, sx, sy);
        }
    }

    fn pointer_leave(&mut self, surface: SurfaceId, serial: u32) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for pointer in self.pointers_for(wl_surface) {
            pointer.leave(serial, wl_surface);
        }
    }

    fn pointer_motion(&mut self, surface: SurfaceId, time: u32, sx: f64, sy: f64) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for pointer in self.pointers_for(wl_surface) {
            pointer.motion(time, sx, sy);
        }
    }

    fn pointer_button(&mut self, surface: SurfaceId, time: u32, button: u32, state: ButtonState, serial: u32) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for pointer in self.pointers_for(wl_surface) {
            pointer.button(serial, time, button, state);
        }
    }

    fn pointer_axis(&mut self, surface: SurfaceId, event: &AxisEvent) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for pointer in self.pointers_for(wl_surface) {
            if pointer.version() >= wl_pointer::EVT_AXIS_SOURCE_SINCE {
                pointer.axis_source(event.source);
            }
            if event.delta == 0.0 {
                if pointer.version() >= wl_pointer::EVT_AXIS_STOP_SINCE {
                    pointer.axis_stop(event.time, event.orientation);
                }
                continue;
            }
            if event.discrete != 0 {
                if pointer.version() >= wl_pointer::EVT_AXIS_VALUE120_SINCE {
                    pointer.axis_value120(event.orientation, event.discrete.saturating_mul(120));
                } else if pointer.version() >= wl_pointer::EVT_AXIS_DISCRETE_SINCE {
                    pointer.axis_discrete(event.orientation, event.discrete);
                }
            }
            if pointer.version() >= wl_pointer::EVT_AXIS_RELATIVE_DIRECTION_SINCE {
                pointer.axis_relative_direction(event.orientation, event.relative_direction);
            }
            pointer.axis(event.time, event.orientation, event.delta);
        }
    }

    fn pointer_frame(&mut self, surface: SurfaceId) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        for pointer in self.pointers_for(wl_surface) {
            if pointer.version() >= wl_pointer::EVT_FRAME_SINCE {
                pointer.frame();
            }
        }
    }

    fn selection(&mut self, surface: SurfaceId, source: Option<SourceId>) {
        let Some(wl_surface) = self.surfaces.get(&surface) else {
            return;
        };
        let surface_id = wl_surface.id();
        for device in self.data_devices.iter().filter(|d| d.id().same_client_as(&surface_id)) {
            let Some(entry) = source.and_then(|s| self.data_sources.get(&s).map(|e| (s, e))) else {
                device.selection(None);
                continue;
            };
            let (source_id, entry) = entry;
            let Ok(client) = self.dh.get_client(device.id()) else {
                continue;
            };
            let offer = match client.create_resource::<WlDataOffer, SourceId, State>(&self.dh, device.version(), source_id) {
                Ok(offer) => offer,
                Err(e) => {
                    log::warn!("[data] Failed to create offer: {:?}", e);
                    continue;
                }
            };
            device.data_offer(&offer);
            for mime_type in &entry.mime_types {
                offer.offer(mime_type.clone());
            }
            device.selection(Some(&offer));
        }
    }

    fn cancel_source(&mut self, source: SourceId) {
        if let Some(entry) = self.data_sources.get(&source) {
            entry.resource.cancelled();
        }
    }

    fn frame_done(&mut self, surface: SurfaceId, time: u32) {
        if let Some(callbacks) = self.frame_callbacks.remove(&surface) {
            for callback in callbacks {
                callback.done(time);
            }
        }
    }
}

/// The server as driven by real Wayland clients.
pub type KestrelServer = Server<WaylandFrontend, ProcessLauncher>;

pub struct State {
    pub server: KestrelServer,
    pub dh: DisplayHandle,
    pub config: Config,
    pub textures: HashMap<SurfaceId, Texture>,
    /// Buffer attached since the last commit; `Some(None)` detaches.
    pub pending_buffers: HashMap<SurfaceId, Option<WlBuffer>>,
    pub pending_callbacks: HashMap<SurfaceId, Vec<WlCallback>>,
    pub keymap: Option<KeymapFile>,
    pub cursors: CursorManager,
    pub output_globals: HashMap<OutputId, GlobalId>,
    pub output_resources: Vec<(OutputId, WlOutput)>,
    pub clients: HashMap<ClientKey, ClientId>,
    disconnected: Arc<Mutex<Vec<ClientKey>>>,
    started: Instant,
}

impl State {
    pub fn new(dh: DisplayHandle, config: Config) -> Self {
        let keymap = crate::keyboard::default_keymap()
            .and_then(|k| KeymapFile::new(&k.get_as_string(xkbcommon::xkb::KEYMAP_FORMAT_TEXT_V1)));
        if keymap.is_none() {
            log::warn!("[seat] No keymap available for clients");
        }
        let cursors = CursorManager::new(&config.appearance.cursor_theme, crate::config::CURSOR_SIZE);

        Self {
            server: Server::new(WaylandFrontend::new(dh.clone()), ProcessLauncher::new()),
            dh,
            config,
            textures: HashMap::new(),
            pending_buffers: HashMap::new(),
            pending_callbacks: HashMap::new(),
            keymap,
            cursors,
            output_globals: HashMap::new(),
            output_resources: Vec::new(),
            clients: HashMap::new(),
            disconnected: Arc::new(Mutex::new(Vec::new())),
            started: Instant::now(),
        }
    }

    /// Milliseconds since startup, the clock used for input and frame events.
    pub fn now_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    pub fn client_key(client: &wayland_server::Client) -> Option<ClientKey> {
        client.get_data::<ClientState>().map(|c| c.key)
    }

    /// Registers a freshly accepted connection.
    pub fn insert_client(&mut self, stream: UnixStream) -> Result<(), Box<dyn std::error::Error>> {
        let pid = match getsockopt(&stream, PeerCredentials) {
            Ok(credentials) => Some(credentials.pid()),
            Err(e) => {
                log::warn!("[client] Could not read peer credentials: {}", e);
                None
            }
        };
        let key = self.server.add_client(pid);
        let data = Arc::new(ClientState {
            key,
            disconnected: self.disconnected.clone(),
        });
        match self.dh.insert_client(stream, data) {
            Ok(client) => {
                self.clients.insert(key, client.id());
                Ok(())
            }
            Err(e) => {
                self.server.remove_client(key);
                Err(e.into())
            }
        }
    }

    /// Forgets clients whose connection has closed.
    pub fn reap_clients(&mut self) {
        let gone: Vec<ClientKey> = match self.disconnected.lock() {
            Ok(mut list) => std::mem::take(&mut *list),
            Err(_) => return,
        };
        for key in gone {
            self.clients.remove(&key);
            self.server.remove_client(key);
        }
    }

    pub fn commit_surface(&mut self, surface: SurfaceId) {
        let change = match self.pending_buffers.remove(&surface) {
            None => BufferChange::Keep,
            Some(None) => {
                self.textures.remove(&surface);
                BufferChange::Detach
            }
            Some(Some(buffer)) => {
                let change = match crate::protocols::shm::import_buffer(&buffer) {
                    Ok(texture) => {
                        let change = BufferChange::Attach {
                            width: texture.width as i32,
                            height: texture.height as i32,
                        };
                        self.textures.insert(surface, texture);
                        change
                    }
                    Err(e) => {
                        log::warn!("[shm] Surface {}: {}", surface, e);
                        BufferChange::Keep
                    }
                };
                buffer.release();
                change
            }
        };

        if let Some(callbacks) = self.pending_callbacks.remove(&surface) {
            self.server
                .frontend
                .frame_callbacks
                .entry(surface)
                .or_default()
                .extend(callbacks);
        }
        self.server.commit(surface, change);
    }

    pub fn surface_destroyed(&mut self, surface: SurfaceId) {
        self.server.destroy_surface(surface);
        self.textures.remove(&surface);
        self.pending_buffers.remove(&surface);
        self.pending_callbacks.remove(&surface);
        self.server.frontend.frame_callbacks.remove(&surface);
        self.server.frontend.surfaces.remove(&surface);
    }

    /// Flushes configures scheduled by the handlers that just ran.
    pub fn flush(&mut self) {
        self.server.flush();
    }

    /// Disconnects every client and drops compositor resources.
    pub fn teardown(&mut self) {
        let handle = self.dh.backend_handle();
        for (_, client) in self.clients.drain() {
            handle.kill_client(client, DisconnectReason::ConnectionClosed);
        }
        let root = self.server.scene.root();
        self.server.scene.destroy(root);
        self.textures.clear();
        self.cursors.clear();
        log::info!("[state] Teardown complete");
    }
}
