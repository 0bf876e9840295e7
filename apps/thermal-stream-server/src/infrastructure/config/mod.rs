//! Configuration Module
//!
//! Configuration loading for the playback server.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, PlaybackSettings, ServerConfig, ServerSettings,
    StorageSettings,
};
