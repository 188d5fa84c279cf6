/// Layered settings loading and persistence.
pub mod state;

pub use state::{AppSettings, CliOverrides, SettingsError, SettingsStore};
