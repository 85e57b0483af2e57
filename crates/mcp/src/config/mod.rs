//! Settings for the management core.

mod settings;

pub use settings::{ManagementSettings, SettingsError};
