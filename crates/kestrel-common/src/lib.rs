pub mod color;
pub mod logging;
pub mod paths;

pub use color::{parse_color, rgba_to_argb};
pub use logging::FileLogger;
pub use paths::{kestrel_config_dir, kestrel_log_dir};
