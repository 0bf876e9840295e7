//! Server Configuration Settings
//!
//! Configuration types for the playback server, loaded from environment
//! variables. Unparsable numbers fall back to their defaults; values that
//! would make playback impossible are rejected.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind address.
    pub host: IpAddr,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8888,
        }
    }
}

impl ServerSettings {
    /// Socket address to bind.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Location and access settings of the SQLite stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Directory holding `oecd.db`, `ftse250.db` and `sp500.db`.
    pub data_dir: PathBuf,
    /// How long a query waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Playback pacing settings shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    /// Wall-clock period between ticks.
    pub tick_interval: Duration,
    /// Records per bulk.
    pub bulk_size: NonZeroUsize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            bulk_size: crate::application::services::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Capacity of each data set's broadcast channel.
    pub capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            capacity: crate::infrastructure::broadcast::DEFAULT_CAPACITY,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Store settings.
    pub storage: StorageSettings,
    /// Playback settings.
    pub playback: PlaybackSettings,
    /// Broadcast settings.
    pub broadcast: BroadcastSettings,
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unparsable host and
    /// `ConfigError::ZeroValue` for a zero tick interval or bulk size.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvLookup(&lookup);
        let defaults = Self::default();

        let host = match env.get("THERMAL_HOST") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "THERMAL_HOST".to_string(),
                value: raw,
            })?,
            None => defaults.server.host,
        };

        let server = ServerSettings {
            host,
            port: env.parse("THERMAL_PORT", defaults.server.port),
        };

        let storage = StorageSettings {
            data_dir: env
                .get("THERMAL_DATA_DIR")
                .map_or(defaults.storage.data_dir, PathBuf::from),
            busy_timeout: Duration::from_millis(env.parse(
                "THERMAL_SQLITE_BUSY_TIMEOUT_MS",
                duration_millis(defaults.storage.busy_timeout),
            )),
        };

        let tick_interval_ms: u64 = env.parse(
            "THERMAL_TICK_INTERVAL_MS",
            duration_millis(defaults.playback.tick_interval),
        );
        if tick_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("THERMAL_TICK_INTERVAL_MS".to_string()));
        }

        let bulk_size = NonZeroUsize::new(env.parse("THERMAL_BULK_SIZE", defaults.playback.bulk_size.get()))
            .ok_or_else(|| ConfigError::ZeroValue("THERMAL_BULK_SIZE".to_string()))?;

        let playback = PlaybackSettings {
            tick_interval: Duration::from_millis(tick_interval_ms),
            bulk_size,
        };

        let broadcast = BroadcastSettings {
            capacity: env
                .parse("THERMAL_BROADCAST_CAPACITY", defaults.broadcast.capacity)
                .max(1),
        };

        Ok(Self {
            server,
            storage,
            playback,
            broadcast,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Variable present but unparsable.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Variable must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
}

struct EnvLookup<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> EnvLookup<'_, F> {
    /// Non-empty trimmed value.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
