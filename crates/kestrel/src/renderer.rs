use std::collections::HashMap;

use crate::cursor::CursorManager;
use crate::frontend::Frontend;
use crate::process::Launcher;
use crate::scene::NodeKind;
use crate::seat::CursorImage;
use crate::server::{OutputId, Server, SurfaceId};

/// Client pixels copied out of a shm buffer, premultiplied ARGB.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Texture {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u32>,
    /// Every pixel has full alpha, so blits can skip blending.
    pub opaque: bool,
}

/// Source-over for premultiplied ARGB.
fn blend(src: u32, dst: u32) -> u32 {
    let alpha = src >> 24;
    match alpha {
        0xFF => src,
        0 => dst,
        _ => {
            let inv = 255 - alpha;
            let channel = |shift: u32| {
                let s = (src >> shift) & 0xFF;
                let d = (dst >> shift) & 0xFF;
                (s + (d * inv + 127) / 255).min(255) << shift
            };
            channel(24) | channel(16) | channel(8) | channel(0)
        }
    }
}

pub struct Canvas {
    pub pixels: Vec<u32>,
    pub width: usize,
    pub height: usize,
    pub stride: usize,
}

impl Canvas {
    pub fn new(width: usize, height: usize, bg_color: u32) -> Self {
        Self {
            pixels: vec![bg_color; width * height],
            width,
            height,
            stride: width,
        }
    }

    pub fn resize(&mut self, width: usize, height: usize, bg_color: u32) {
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            self.stride = width;
            self.pixels = vec![bg_color; width * height];
        }
    }

    pub fn clear_with_pattern(&mut self, bg_dark: u32, bg_light: u32) {
        let tile_size = 32;

        let width = self.width;
        let stride = self.stride;
        let pixels = &mut self.pixels;

        for y in 0..self.height {
            let ty = y / tile_size;
            let row_start = y * stride;
            let base_color = if ty % 2 == 0 { bg_dark } else { bg_light };
            let alt_color = if ty % 2 == 0 { bg_light } else { bg_dark };

            let mut x = 0;
            while x < width {
                let tx = x / tile_size;
                let color = if tx % 2 == 0 { base_color } else { alt_color };
                let tile_end = ((tx + 1) * tile_size).min(width);
                pixels[row_start + x..row_start + tile_end].fill(color);
                x = tile_end;
            }
        }
    }

    /// Clipped span of a `width` x `height` box at (x, y): canvas origin,
    /// offset into the source, and copy size.
    fn clip(&self, x: i32, y: i32, width: usize, height: usize) -> Option<(usize, usize, usize, usize, usize, usize)> {
        let skip_x = x.saturating_neg().max(0) as usize;
        let skip_y = y.saturating_neg().max(0) as usize;
        let dst_x = x.max(0) as usize;
        let dst_y = y.max(0) as usize;
        if dst_x >= self.width || dst_y >= self.height {
            return None;
        }
        let copy_w = width.saturating_sub(skip_x).min(self.width - dst_x);
        let copy_h = height.saturating_sub(skip_y).min(self.height - dst_y);
        if copy_w == 0 || copy_h == 0 {
            return None;
        }
        Some((dst_x, dst_y, skip_x, skip_y, copy_w, copy_h))
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: u32) {
        if width <= 0 || height <= 0 {
            return;
        }
        let Some((dst_x, dst_y, _, _, copy_w, copy_h)) = self.clip(x, y, width as usize, height as usize) else {
            return;
        };
        for row in dst_y..dst_y + copy_h {
            let start = row * self.stride + dst_x;
            let span = &mut self.pixels[start..start + copy_w];
            if color >> 24 == 0xFF {
                span.fill(color);
            } else {
                for px in span {
                    *px = blend(color, *px);
                }
            }
        }
    }

    pub fn blit(&mut self, texture: &Texture, x: i32, y: i32) {
        let Some((dst_x, dst_y, skip_x, skip_y, copy_w, copy_h)) = self.clip(x, y, texture.width, texture.height) else {
            return;
        };
        for row in 0..copy_h {
            let src_start = (skip_y + row) * texture.width + skip_x;
            let dst_start = (dst_y + row) * self.stride + dst_x;
            let src = &texture.pixels[src_start..src_start + copy_w];
            let dst = &mut self.pixels[dst_start..dst_start + copy_w];
            if texture.opaque {
                dst.copy_from_slice(src);
            } else {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = blend(*s, *d);
                }
            }
        }
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.pixels
    }

    /// Copies the canvas into a mapped scanout buffer with the given pitch.
    pub fn copy_to(&self, dst: &mut [u8], pitch: usize) {
        let row_bytes = (self.width * 4).min(pitch);
        for (y, row) in self.pixels.chunks_exact(self.stride).enumerate().take(self.height) {
            let start = y * pitch;
            let Some(out) = dst.get_mut(start..start + row_bytes) else {
                break;
            };
            for (chunk, px) in out.chunks_exact_mut(4).zip(row) {
                chunk.copy_from_slice(&px.to_le_bytes());
            }
        }
    }
}

pub struct RenderContext<'a> {
    pub textures: &'a HashMap<SurfaceId, Texture>,
    pub cursors: &'a CursorManager,
    pub bg_dark: u32,
    pub bg_light: u32,
}

/// Paints the part of the layout covered by `output` into `canvas`.
pub fn render_output<F: Frontend, L: Launcher>(
    server: &Server<F, L>,
    output: OutputId,
    ctx: &RenderContext<'_>,
    canvas: &mut Canvas,
) {
    let Some(area) = server.output(output).map(|o| o.geometry()) else {
        return;
    };
    if area.is_empty() {
        return;
    }
    canvas.resize(area.width as usize, area.height as usize, ctx.bg_dark);
    canvas.clear_with_pattern(ctx.bg_dark, ctx.bg_light);

    for item in server.scene.paint_order() {
        let x = item.x.saturating_sub(area.x);
        let y = item.y.saturating_sub(area.y);
        match item.kind {
            NodeKind::Surface { surface, .. } => {
                if let Some(texture) = ctx.textures.get(&surface) {
                    canvas.blit(texture, x, y);
                }
            }
            NodeKind::Rect { width, height, color } => canvas.fill_rect(x, y, width, height, color),
            NodeKind::Tree { .. } => {}
        }
    }

    let cx = (server.cursor.x.floor() as i32).saturating_sub(area.x);
    let cy = (server.cursor.y.floor() as i32).saturating_sub(area.y);
    match server.seat.cursor_image {
        CursorImage::Named(name) => {
            let sprite = ctx.cursors.sprite(name);
            canvas.blit(&sprite.texture, cx.saturating_sub(sprite.xhot), cy.saturating_sub(sprite.yhot));
        }
        CursorImage::Surface { surface, hotspot_x, hotspot_y } => {
            if let Some(texture) = ctx.textures.get(&surface) {
                canvas.blit(texture, cx.saturating_sub(hotspot_x), cy.saturating_sub(hotspot_y));
            }
        }
        CursorImage::Hidden => {}
    }
}
