/// Parses `#RRGGBB` or `#AARRGGBB` (the `#` is optional) into a packed
/// ARGB word. Six-digit colors are opaque.
pub fn parse_color(s: &str) -> Option<u32> {
    let hex = s.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let value = u32::from_str_radix(hex, 16).ok()?;
    match hex.len() {
        6 => Some(0xFF00_0000 | value),
        8 => Some(value),
        _ => None,
    }
}

/// Packs normalized RGBA components into an ARGB word, rounding each channel.
pub fn rgba_to_argb(rgba: [f32; 4]) -> u32 {
    let [r, g, b, a] = rgba.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u32);
    (a << 24) | (r << 16) | (g << 8) | b
}
