//! Layered settings: compiled defaults, then `~/.deckwright/settings.json`,
//! then `DECKWRIGHT_*` environment variables.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deckwright_home, deep_merge, default_db_path, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{
    CompositionSettings, DeckwrightSettings, LoggingSettings, ProgressSettings, StoreSettings,
};
