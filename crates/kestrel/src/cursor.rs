use std::collections::HashMap;

use crate::renderer::Texture;

/// A cursor image with its hotspot.
pub struct CursorSprite {
    pub texture: Texture,
    pub xhot: i32,
    pub yhot: i32,
}

/// Loads named cursor images from the XCursor theme, with a built-in arrow
/// when the theme has none.
pub struct CursorManager {
    theme: String,
    size: u32,
    cache: HashMap<String, CursorSprite>,
    fallback: CursorSprite,
}

impl CursorManager {
    pub fn new(theme: &str, size: u32) -> Self {
        let mut manager = Self {
            theme: theme.to_string(),
            size,
            cache: HashMap::new(),
            fallback: fallback_arrow(),
        };
        manager.load("default");
        manager
    }

    /// A manager that never touches the filesystem.
    pub fn fallback_only() -> Self {
        Self {
            theme: String::new(),
            size: 0,
            cache: HashMap::new(),
            fallback: fallback_arrow(),
        }
    }

    /// Loads `name` into the cache. Returns false if the theme lacks it.
    pub fn load(&mut self, name: &str) -> bool {
        if self.cache.contains_key(name) {
            return true;
        }
        match load_xcursor(&self.theme, name, self.size) {
            Some(sprite) => {
                log::debug!(
                    "[cursor] Loaded '{}' from theme '{}' ({}x{})",
                    name,
                    self.theme,
                    sprite.texture.width,
                    sprite.texture.height
                );
                self.cache.insert(name.to_string(), sprite);
                true
            }
            None => {
                log::warn!("[cursor] Theme '{}' has no '{}' cursor, using built-in arrow", self.theme, name);
                false
            }
        }
    }

    pub fn sprite(&self, name: &str) -> &CursorSprite {
        self.cache.get(name).unwrap_or(&self.fallback)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

fn load_xcursor(theme: &str, name: &str, size: u32) -> Option<CursorSprite> {
    if theme.is_empty() {
        return None;
    }
    let path = xcursor::CursorTheme::load(theme).load_icon(name)?;
    let data = std::fs::read(&path).ok()?;
    let images = xcursor::parser::parse_xcursor(&data)?;

    // Animated cursors list every frame; the first at the nearest size is enough.
    let image = images
        .iter()
        .min_by_key(|image| (image.size as i64 - size as i64).abs())?;
    let pixels: Vec<u32> = image
        .pixels_argb
        .chunks_exact(4)
        .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]]))
        .collect();
    if pixels.len() != (image.width * image.height) as usize {
        return None;
    }

    Some(CursorSprite {
        texture: Texture {
            width: image.width as usize,
            height: image.height as usize,
            pixels,
            opaque: false,
        },
        xhot: image.xhot as i32,
        yhot: image.yhot as i32,
    })
}

fn fallback_arrow() -> CursorSprite {
    // W = white, B = black outline, . = transparent
    const CURSOR: &[&str] = &[
        "BW",
        "BWWB",
        "BWWWB",
        "BWWWWB",
        "BWWWWWB",
        "BWWWWWWB",
        "BWWWWWWWB",
        "BWWWWWWWWB",
        "BWWWWWWWWWB",
        "BWWWWWWWWWWB",
        "BWWWWWWBBBBB",
        "BWWWBWWB",
        "BWWBBWWWB",
        "BWB.BWWWB",
        "BB..BWWWB",
        "B....BWWWB",
        ".....BWWWB",
        "......BWWB",
        "......BBB",
    ];
    let width = CURSOR.iter().map(|row| row.len()).max().unwrap_or(0);
    let height = CURSOR.len();
    let mut pixels = vec![0u32; width * height];
    for (y, row) in CURSOR.iter().enumerate() {
        for (x, ch) in row.chars().enumerate() {
            pixels[y * width + x] = match ch {
                'W' => 0xFFFFFFFF,
                'B' => 0xFF000000,
                _ => 0,
            };
        }
    }
    CursorSprite {
        texture: Texture { width, height, pixels, opaque: false },
        xhot: 0,
        yhot: 0,
    }
}
