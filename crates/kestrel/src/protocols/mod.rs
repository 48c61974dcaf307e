pub mod compositor;
pub mod data_device;
pub mod output;
pub mod seat;
pub mod shm;
pub mod subcompositor;
pub mod xdg_shell;

use wayland_protocols::xdg::shell::server::xdg_wm_base::XdgWmBase;
use wayland_server::protocol::{
    wl_compositor::WlCompositor, wl_data_device_manager::WlDataDeviceManager, wl_seat::WlSeat,
    wl_shm::WlShm, wl_subcompositor::WlSubcompositor,
};
use wayland_server::DisplayHandle;

use crate::config;
use crate::state::State;

/// Advertises every global except outputs, which the backend announces as
/// they attach.
pub fn create_globals(dh: &DisplayHandle) {
    dh.create_global::<State, WlCompositor, _>(config::COMPOSITOR_VERSION, ());
    dh.create_global::<State, WlSubcompositor, _>(config::SUBCOMPOSITOR_VERSION, ());
    dh.create_global::<State, WlShm, _>(config::SHM_VERSION, ());
    dh.create_global::<State, XdgWmBase, _>(config::XDG_WM_BASE_VERSION, ());
    dh.create_global::<State, WlSeat, _>(config::SEAT_VERSION, ());
    dh.create_global::<State, WlDataDeviceManager, _>(config::DATA_DEVICE_MANAGER_VERSION, ());
    log::info!("[wayland] Globals created");
}
