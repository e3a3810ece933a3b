//! Host-process plumbing for the webpilot agent: configuration loading and
//! logging initialisation shared by the `webpilot` binary.

pub mod config;
pub mod logging;

pub use config::{apply_overrides, load_config, resolve_config_path, LoadedConfig};
pub use logging::init_logging;
