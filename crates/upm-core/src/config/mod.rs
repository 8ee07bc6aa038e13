//! Layered configuration
//!
//! [`SettingsResolver`] merges built-in defaults, the user's global config,
//! the project config and an explicit config file into one [`Settings`].

mod resolver;
mod settings;

pub use resolver::{GLOBAL_CONFIG_FILENAME, PROJECT_CONFIG_PATH, SettingsResolver};
pub use settings::{Settings, SettingsLayer, host_platform};
