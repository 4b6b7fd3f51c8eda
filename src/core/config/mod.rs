pub mod data;
pub mod io;

pub use data::{path_display, Config, DEFAULT_MODEL};
pub use io::{conversations_dir, data_dir, ConfigError};
