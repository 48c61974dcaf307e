use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::paths::kestrel_log_dir;

/// Session logger: info and above go to `kestrel.log`, debug and trace to
/// `kestrel.dbg.log`, and every line is mirrored to stderr.
pub struct FileLogger {
    main_file: Option<Mutex<File>>,
    debug_file: Option<Mutex<File>>,
}

impl FileLogger {
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        let log_dir = kestrel_log_dir();
        fs::create_dir_all(&log_dir)?;

        let session_num = Self::get_next_session_number(&log_dir);
        let session_dir = log_dir.join(format!("session-{}", session_num));
        fs::create_dir_all(&session_dir)?;

        let main_file = Self::open_log_file(&session_dir, "kestrel.log")?;
        let debug_file = Self::open_log_file(&session_dir, "kestrel.dbg.log")?;

        let logger = FileLogger {
            main_file: Some(Mutex::new(main_file)),
            debug_file: Some(Mutex::new(debug_file)),
        };

        Self::install(logger)?;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        log::info!("=== Kestrel Session {} ===", session_num);
        log::info!("Log directory: {}", session_dir.display());
        log::info!("Started at: {}", timestamp);

        Ok(())
    }

    /// Installs a logger that only writes to stderr. Used when the session
    /// directory cannot be created.
    pub fn init_stderr() -> Result<(), Box<dyn std::error::Error>> {
        Self::install(FileLogger {
            main_file: None,
            debug_file: None,
        })
    }

    fn install(logger: FileLogger) -> Result<(), Box<dyn std::error::Error>> {
        log::set_max_level(LevelFilter::Debug);
        log::set_logger(Box::leak(Box::new(logger)))
            .map_err(|e| format!("Failed to set logger: {}", e))?;
        Ok(())
    }

    fn open_log_file(dir: &Path, name: &str) -> Result<File, Box<dyn std::error::Error>> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(file)
    }

    fn get_next_session_number(log_dir: &Path) -> u32 {
        let mut max_num = 0u32;

        if let Ok(entries) = fs::read_dir(log_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if let Some(num) = parse_session_number(&name.to_string_lossy()) {
                    max_num = max_num.max(num);
                }
            }
        }

        max_num + 1
    }
}

fn parse_session_number(name: &str) -> Option<u32> {
    name.strip_prefix("session-")?.parse::<u32>().ok()
}

fn level_char(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'T',
    }
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now().format("%H:%M:%S%.3f");
        let log_line = format!("{} {} {}\n", timestamp, record.target(), record.args());

        let file_mutex = if record.level() >= Level::Debug {
            self.debug_file.as_ref()
        } else {
            self.main_file.as_ref()
        };

        if let Some(Ok(mut file)) = file_mutex.map(|m| m.lock()) {
            let _ = file.write_all(log_line.as_bytes());
            let _ = file.flush();
        }

        eprint!("{} {} {}", timestamp, level_char(record.level()), log_line);
    }

    fn flush(&self) {
        for file in [&self.main_file, &self.debug_file].into_iter().flatten() {
            let _ = file.lock().map(|mut f| f.flush());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_number_parsing() {
        assert_eq!(parse_session_number("session-12"), Some(12));
        assert_eq!(parse_session_number("session-"), None);
        assert_eq!(parse_session_number("other-3"), None);
    }

    #[test]
    fn test_next_session_number() {
        let dir = std::env::temp_dir().join(format!("kestrel-log-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("session-3")).unwrap();
        fs::create_dir_all(dir.join("session-7")).unwrap();
        fs::create_dir_all(dir.join("unrelated")).unwrap();
        assert_eq!(FileLogger::get_next_session_number(&dir), 8);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_level_chars() {
        assert_eq!(level_char(Level::Warn), 'W');
        assert_eq!(level_char(Level::Trace), 'T');
    }
}
