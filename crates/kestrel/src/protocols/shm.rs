use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use wayland_server::protocol::{
    wl_buffer::{self, WlBuffer},
    wl_shm::{self, WlShm},
    wl_shm_pool::{self, WlShmPool},
};
use wayland_server::{Dispatch, GlobalDispatch, Resource, WEnum};

use crate::renderer::Texture;
use crate::state::State;

/// Client memory backing a wl_shm_pool, mapped read-only on first use.
pub struct ShmPool {
    fd: OwnedFd,
    size: usize,
    map: Option<NonNull<u8>>,
}

// The mapping is only touched while the pool mutex is held.
unsafe impl Send for ShmPool {}

impl ShmPool {
    fn new(fd: OwnedFd, size: usize) -> Self {
        Self { fd, size, map: None }
    }

    fn resize(&mut self, size: usize) {
        self.unmap();
        self.size = size;
        log::debug!("[shm] Pool resized to {} bytes", size);
    }

    fn unmap(&mut self) {
        if let Some(ptr) = self.map.take() {
            unsafe {
                libc::munmap(ptr.as_ptr() as *mut libc::c_void, self.size);
            }
        }
    }

    fn data(&mut self) -> Result<&[u8], String> {
        if self.map.is_none() {
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    self.size,
                    libc::PROT_READ,
                    libc::MAP_SHARED,
                    self.fd.as_fd().as_raw_fd(),
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(format!("mmap failed: {}", std::io::Error::last_os_error()));
            }
            self.map = NonNull::new(ptr as *mut u8);
        }
        let ptr = self.map.ok_or("mmap returned null")?;
        Ok(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size) })
    }
}

impl Drop for ShmPool {
    fn drop(&mut self) {
        self.unmap();
    }
}

pub type SharedPool = Arc<Mutex<ShmPool>>;

pub struct ShmBufferData {
    pub pool: SharedPool,
    pub offset: usize,
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub format: wl_shm::Format,
}

/// Bytes a buffer with these parameters spans inside its pool.
fn buffer_span(offset: usize, width: usize, height: usize, stride: usize) -> Option<usize> {
    if width == 0 || height == 0 || stride < width * 4 {
        return None;
    }
    stride.checked_mul(height - 1)?.checked_add(width * 4)?.checked_add(offset)
}

/// Converts little-endian ARGB/XRGB rows into a packed texture.
pub fn pixels_from_rows(bytes: &[u8], data: &ShmBufferData) -> Result<Texture, String> {
    let end = buffer_span(data.offset, data.width, data.height, data.stride)
        .ok_or("invalid buffer dimensions")?;
    if end > bytes.len() {
        return Err(format!("buffer ends at {} past pool size {}", end, bytes.len()));
    }
    let opaque = data.format == wl_shm::Format::Xrgb8888;
    let mut pixels = Vec::with_capacity(data.width * data.height);
    for row in 0..data.height {
        let start = data.offset + row * data.stride;
        for px in bytes[start..start + data.width * 4].chunks_exact(4) {
            let value = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
            pixels.push(if opaque { value | 0xFF00_0000 } else { value });
        }
    }
    Ok(Texture {
        width: data.width,
        height: data.height,
        pixels,
        opaque,
    })
}

/// Copies the contents of a committed wl_buffer.
pub fn import_buffer(buffer: &WlBuffer) -> Result<Texture, String> {
    let data = buffer
        .data::<ShmBufferData>()
        .ok_or("buffer is not a shm buffer")?;
    let mut pool = data.pool.lock().map_err(|_| "shm pool lock poisoned")?;
    let bytes = pool.data()?;
    pixels_from_rows(bytes, data)
}

impl GlobalDispatch<WlShm, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlShm>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let shm = data_init.init(resource, ());
        shm.format(wl_shm::Format::Argb8888);
        shm.format(wl_shm::Format::Xrgb8888);
    }
}

impl Dispatch<WlShm, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wl_shm::Request::CreatePool { id, fd, size } = request {
            if size <= 0 {
                data_init.post_error(id, wl_shm::Error::InvalidStride, "pool size must be positive");
                return;
            }
            let pool: SharedPool = Arc::new(Mutex::new(ShmPool::new(fd, size as usize)));
            data_init.init(id, pool);
            log::debug!("[shm] Pool created ({} bytes)", size);
        }
    }
}

impl Dispatch<WlShmPool, SharedPool> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WlShmPool,
        request: wl_shm_pool::Request,
        data: &SharedPool,
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer { id, offset, width, height, stride, format } => {
                let format = match format {
                    WEnum::Value(f @ (wl_shm::Format::Argb8888 | wl_shm::Format::Xrgb8888)) => f,
                    _ => {
                        data_init.post_error(id, wl_shm::Error::InvalidFormat, "unsupported format");
                        return;
                    }
                };
                let pool_size = data.lock().map(|p| p.size).unwrap_or(0);
                let valid = offset >= 0
                    && width > 0
                    && height > 0
                    && stride > 0
                    && buffer_span(offset as usize, width as usize, height as usize, stride as usize)
                        .is_some_and(|end| end <= pool_size);
                if !valid {
                    data_init.post_error(id, wl_shm::Error::InvalidStride, "buffer does not fit in pool");
                    return;
                }
                data_init.init(
                    id,
                    ShmBufferData {
                        pool: data.clone(),
                        offset: offset as usize,
                        width: width as usize,
                        height: height as usize,
                        stride: stride as usize,
                        format,
                    },
                );
            }
            wl_shm_pool::Request::Resize { size } => {
                let Ok(mut pool) = data.lock() else {
                    return;
                };
                if size <= 0 || (size as usize) < pool.size {
                    resource.post_error(wl_shm::Error::InvalidStride, "shm pools can only grow");
                    return;
                }
                pool.resize(size as usize);
            }
            _ => {}
        }
    }
}

impl Dispatch<WlBuffer, ShmBufferData> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlBuffer,
        _request: wl_buffer::Request,
        _data: &ShmBufferData,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }
}
