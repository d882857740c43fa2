//! Key/value persistence for the farm collections.
//!
//! Values are whole JSON documents, one per key, the same way a browser keeps
//! them in local storage. Callers always rewrite the full document.

pub mod file;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const SENSORS_KEY: &str = "smart_farm_sensors";
pub const ACTUATORS_KEY: &str = "smart_farm_actuators";
pub const ACTUATOR_LOGS_KEY: &str = "smart_farm_actuator_logs";
pub const ALERTS_KEY: &str = "smart_farm_alerts";
pub const ALERT_THRESHOLDS_KEY: &str = "smart_farm_alert_thresholds";
pub const ALERT_PREFERENCES_KEY: &str = "smart_farm_alert_preferences";
pub const USERS_KEY: &str = "smart_farm_registered_users";
pub const SENSOR_READINGS_KEY: &str = "smart_farm_sensor_readings";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on key {key:?}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt JSON under key {key:?}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid key {0:?}")]
    InvalidKey(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Raw JSON document stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the document under `key`.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All keys currently present, sorted.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Keys become file names, so keep them to `[A-Za-z0-9_-]`.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_owned()))
    }
}
