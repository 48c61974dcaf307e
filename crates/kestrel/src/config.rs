use kestrel_common::{kestrel_config_dir, parse_color};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use xkbcommon::xkb::keysyms::*;

use crate::bindings::{CompositorAction, CompositorBinding, LauncherBinding};

// Modifier mask bits as reported for a keyboard's effective state.
pub const MOD_SHIFT: u32 = 1 << 0;
pub const MOD_CAPS: u32 = 1 << 1;
pub const MOD_CTRL: u32 = 1 << 2;
pub const MOD_ALT: u32 = 1 << 3;
pub const MOD_MOD2: u32 = 1 << 4;
pub const MOD_MOD3: u32 = 1 << 5;
pub const MOD_LOGO: u32 = 1 << 6;
pub const MOD_MOD5: u32 = 1 << 7;

/// Modifier that must be held for every binding.
pub const MODIFIER: u32 = MOD_ALT;

pub const BORDER_WIDTH: i32 = 2;
pub const BORDER_COLOR: [f32; 4] = [1.0, 0.647, 0.0, 1.0];

pub const REPEAT_RATE: i32 = 25;
pub const REPEAT_DELAY: i32 = 600;

pub const XKB_LAYOUT: &str = "us";
pub const CURSOR_SIZE: u32 = 24;
pub const SEAT_NAME: &str = "seat0";
pub const SOCKET_PREFIX: &str = "wayland";

pub const COMPOSITOR_VERSION: u32 = 5;
pub const SUBCOMPOSITOR_VERSION: u32 = 1;
pub const SHM_VERSION: u32 = 1;
pub const XDG_WM_BASE_VERSION: u32 = 3;
pub const SEAT_VERSION: u32 = 9;
pub const DATA_DEVICE_MANAGER_VERSION: u32 = 3;
pub const OUTPUT_VERSION: u32 = 4;

pub const COMPOSITOR_BINDINGS: [CompositorBinding; 3] = [
    CompositorBinding { keysym: KEY_Escape, action: CompositorAction::Terminate },
    CompositorBinding { keysym: KEY_F1, action: CompositorAction::Cycle },
    CompositorBinding { keysym: KEY_q, action: CompositorAction::CloseFocused },
];

pub const LAUNCHER_BINDINGS: [LauncherBinding; 14] = [
    LauncherBinding { keysym: KEY_Return, command: "kitty" },
    LauncherBinding { keysym: KEY_F, command: "firefox" },
    LauncherBinding { keysym: KEY_e, command: "kitty ranger" },
    LauncherBinding { keysym: KEY_v, command: "pavucontrol" },
    LauncherBinding { keysym: KEY_r, command: "rofi -show drun" },
    LauncherBinding { keysym: KEY_c, command: "kitty qalc" },
    LauncherBinding { keysym: KEY_XF86MonBrightnessUp, command: "light -A 10" },
    LauncherBinding { keysym: KEY_XF86MonBrightnessDown, command: "light -U 10" },
    LauncherBinding { keysym: KEY_XF86AudioPrev, command: "playerctl previous" },
    LauncherBinding { keysym: KEY_XF86AudioNext, command: "playerctl next" },
    LauncherBinding { keysym: KEY_XF86AudioPlay, command: "playerctl play_pause" },
    LauncherBinding {
        keysym: KEY_XF86AudioRaiseVolume,
        command: "pactl set-sink-volume @DEFAULT_SINK@ +10%",
    },
    LauncherBinding {
        keysym: KEY_XF86AudioLowerVolume,
        command: "pactl set-sink-volume @DEFAULT_SINK@ -10%",
    },
    LauncherBinding { keysym: KEY_XF86AudioMute, command: "pactl set-sink-mute @DEFAULT_SINK@ toggle" },
];

fn default_backend() -> String {
    "auto".to_string()
}
fn default_drm_device() -> String {
    "auto".to_string()
}

fn default_headless_width() -> i32 {
    1920
}
fn default_headless_height() -> i32 {
    1080
}
fn default_headless_refresh() -> i32 {
    60_000
}

fn default_nested_width() -> i32 {
    1280
}
fn default_nested_height() -> i32 {
    800
}

fn default_background_dark() -> String {
    "#1A1A2E".to_string()
}
fn default_background_light() -> String {
    "#16213E".to_string()
}
fn default_cursor_theme() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Auto,
    Headless,
    Winit,
    Drm,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(BackendKind::Auto),
            "headless" | "none" => Some(BackendKind::Headless),
            "winit" | "nested" | "wayland" | "x11" => Some(BackendKind::Winit),
            "drm" | "kms" => Some(BackendKind::Drm),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    #[serde(default = "default_backend")]
    pub kind: String,
    #[serde(default = "default_drm_device")]
    pub drm_device: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HeadlessConfig {
    #[serde(default = "default_headless_width")]
    pub width: i32,
    #[serde(default = "default_headless_height")]
    pub height: i32,
    /// Refresh rate in mHz.
    #[serde(default = "default_headless_refresh")]
    pub refresh: i32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NestedConfig {
    #[serde(default = "default_nested_width")]
    pub width: i32,
    #[serde(default = "default_nested_height")]
    pub height: i32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppearanceConfig {
    #[serde(default = "default_background_dark")]
    pub background_dark: String,
    #[serde(default = "default_background_light")]
    pub background_light: String,
    #[serde(default = "default_cursor_theme")]
    pub cursor_theme: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub headless: HeadlessConfig,
    pub nested: NestedConfig,
    pub appearance: AppearanceConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend(),
            drm_device: default_drm_device(),
        }
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            width: default_headless_width(),
            height: default_headless_height(),
            refresh: default_headless_refresh(),
        }
    }
}

impl Default for NestedConfig {
    fn default() -> Self {
        Self {
            width: default_nested_width(),
            height: default_nested_height(),
        }
    }
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            background_dark: default_background_dark(),
            background_light: default_background_light(),
            cursor_theme: default_cursor_theme(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let user_config = kestrel_config_dir().join("config.toml");
        let system_config = PathBuf::from("/etc/kestrel/config.toml");

        for path in [&user_config, &system_config] {
            if !path.exists() {
                continue;
            }
            match Self::load_from_path(path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    log::warn!("Failed to load {}: {}", path.display(), e);
                }
            }
        }

        log::info!("Using default configuration");
        Self::default()
    }

    fn load_from_path(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("Failed to read file: {}", e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse TOML: {}", e))
    }

    /// Backend selection. `KESTREL_BACKEND` wins over the file.
    pub fn backend_kind(&self) -> BackendKind {
        if let Ok(value) = std::env::var("KESTREL_BACKEND") {
            match BackendKind::parse(&value) {
                Some(kind) => return kind,
                None => log::warn!("Ignoring unknown KESTREL_BACKEND '{}'", value),
            }
        }
        BackendKind::parse(&self.backend.kind).unwrap_or_else(|| {
            log::warn!("Unknown backend '{}', using auto", self.backend.kind);
            BackendKind::Auto
        })
    }

    pub fn drm_device(&self) -> Option<PathBuf> {
        match self.backend.drm_device.as_str() {
            "" | "auto" => None,
            path => Some(PathBuf::from(path)),
        }
    }

    pub fn background_dark(&self) -> u32 {
        parse_color(&self.appearance.background_dark).unwrap_or(0xFF1A1A2E)
    }

    pub fn background_light(&self) -> u32 {
        parse_color(&self.appearance.background_light).unwrap_or(0xFF16213E)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend.kind, "auto");
        assert_eq!(config.drm_device(), None);
        assert_eq!(config.headless.width, 1920);
        assert_eq!(config.headless.refresh, 60_000);
        assert_eq!(config.background_dark(), 0xFF1A1A2E);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [backend]
            kind = "headless"

            [headless]
            width = 800
            "#,
        )
        .unwrap();
        assert_eq!(BackendKind::parse(&config.backend.kind), Some(BackendKind::Headless));
        assert_eq!(config.headless.width, 800);
        assert_eq!(config.headless.height, 1080);
        assert_eq!(config.nested.width, 1280);
    }

    #[test]
    fn test_invalid_file_is_error() {
        assert!(Config::parse("[backend\nkind=").is_err());
    }

    #[test]
    fn test_bad_color_falls_back() {
        let config = Config::parse("[appearance]\nbackground_light = \"nope\"").unwrap();
        assert_eq!(config.background_light(), 0xFF16213E);
    }

    #[test]
    fn test_backend_kind_names() {
        assert_eq!(BackendKind::parse("DRM"), Some(BackendKind::Drm));
        assert_eq!(BackendKind::parse("nested"), Some(BackendKind::Winit));
        assert_eq!(BackendKind::parse("vulkan"), None);
    }

    #[test]
    fn test_drm_device_path() {
        let config = Config::parse("[backend]\ndrm_device = \"/dev/dri/card1\"").unwrap();
        assert_eq!(config.drm_device(), Some(PathBuf::from("/dev/dri/card1")));
    }

    #[test]
    fn test_binding_tables() {
        assert_eq!(COMPOSITOR_BINDINGS.len(), 3);
        assert_eq!(LAUNCHER_BINDINGS.len(), 14);
        assert_eq!(LAUNCHER_BINDINGS[0].command, "kitty");
        assert_eq!(MODIFIER, MOD_ALT);
    }
}
