use std::path::PathBuf;

/// Resolves an XDG base directory: the variable if set and absolute,
/// otherwise `$HOME/<fallback>`, otherwise `/tmp`.
fn xdg_base(var: Option<String>, home: Option<String>, fallback: &str) -> PathBuf {
    if let Some(dir) = var.filter(|d| d.starts_with('/')) {
        return PathBuf::from(dir);
    }
    match home.filter(|h| !h.is_empty()) {
        Some(home) => PathBuf::from(home).join(fallback),
        None => PathBuf::from("/tmp"),
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// `$XDG_CONFIG_HOME/kestrel`
pub fn kestrel_config_dir() -> PathBuf {
    xdg_base(env("XDG_CONFIG_HOME"), env("HOME"), ".config").join("kestrel")
}

/// `$XDG_DATA_HOME/kestrel/logs`
pub fn kestrel_log_dir() -> PathBuf {
    xdg_base(env("XDG_DATA_HOME"), env("HOME"), ".local/share")
        .join("kestrel")
        .join("logs")
}
