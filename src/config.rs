use std::{path::PathBuf, str::FromStr};

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// StorageBackend
// ---------------------------------------------------------------------------

/// Where the farm collections are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process memory only; everything is lost on restart.
    Memory,
    /// One `<key>.json` file per collection under `DATA_DIR`.
    File,
    /// A `kv_store` table in Postgres at `DATABASE_URL`.
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "postgres" => Ok(Self::Postgres),
            other => Err(anyhow::anyhow!("unknown storage backend: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL without trailing slash, e.g. `http://farm-hub:5000/api`.
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// HMAC key for session tokens.
    pub secret_key: String,
    pub session_ttl_secs: i64,
    pub storage: StorageBackend,
    pub data_dir: PathBuf,
    /// Only read when `storage` is `Postgres`.
    pub database_url: Option<String>,
    /// Seed empty collections with the demo farm on first read.
    pub seed_demo_data: bool,
    /// Readings kept per sensor in the history collection.
    pub reading_history_limit: usize,
    /// `None` disables the push-event channel.
    pub mqtt: Option<MqttConfig>,
    /// `None` serves everything from the local store.
    pub upstream: Option<UpstreamConfig>,
    /// Automation rule evaluation interval in seconds.
    pub control_interval_secs: u64,
    pub backup_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let storage = optional("STORAGE_BACKEND", "file")
            .parse::<StorageBackend>()
            .context("STORAGE_BACKEND must be one of memory, file, postgres")?;

        let database_url = match storage {
            StorageBackend::Postgres => Some(required("DATABASE_URL")?),
            _ => std::env::var("DATABASE_URL").ok(),
        };

        Ok(Self {
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "5000")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            secret_key: required("SECRET_KEY")?,
            session_ttl_secs: parse_session_ttl(&optional("SESSION_TTL_SECS", "86400"))
                .context("SESSION_TTL_SECS must be between 1 and 315360000 seconds")?,
            storage,
            data_dir: PathBuf::from(optional("DATA_DIR", "data")),
            database_url,
            seed_demo_data: parse_bool(&optional("SEED_DEMO_DATA", "true"))
                .context("SEED_DEMO_DATA must be true or false")?,
            reading_history_limit: optional("READING_HISTORY_LIMIT", "500")
                .parse()
                .context("READING_HISTORY_LIMIT must be a positive integer")?,
            mqtt: mqtt_from_env()?,
            upstream: upstream_from_env()?,
            control_interval_secs: optional("CONTROL_INTERVAL_SECS", "10")
                .parse()
                .context("CONTROL_INTERVAL_SECS must be a positive integer")?,
            backup_dir: PathBuf::from(optional("BACKUP_DIR", "backups")),
        })
    }
}

fn mqtt_from_env() -> Result<Option<MqttConfig>> {
    let Ok(broker) = std::env::var("MQTT_BROKER") else {
        return Ok(None);
    };
    Ok(Some(MqttConfig {
        broker,
        port: optional("MQTT_PORT", "1883")
            .parse()
            .context("MQTT_PORT must be a valid port number")?,
        client_id: optional("MQTT_CLIENT_ID", "smart_farm_service"),
        username: std::env::var("MQTT_USERNAME").ok(),
        password: std::env::var("MQTT_PASSWORD").ok(),
    }))
}

fn upstream_from_env() -> Result<Option<UpstreamConfig>> {
    let Ok(base_url) = std::env::var("UPSTREAM_API_URL") else {
        return Ok(None);
    };
    Ok(Some(UpstreamConfig {
        base_url: base_url.trim_end_matches('/').to_owned(),
        token: std::env::var("UPSTREAM_API_TOKEN").ok(),
        timeout_secs: optional("UPSTREAM_TIMEOUT_SECS", "5")
            .parse()
            .context("UPSTREAM_TIMEOUT_SECS must be a positive integer")?,
    }))
}

/// Ten years.
const MAX_SESSION_TTL_SECS: i64 = 315_360_000;

fn parse_session_ttl(raw: &str) -> Result<i64> {
    let ttl: i64 = raw.trim().parse()?;
    if !(1..=MAX_SESSION_TTL_SECS).contains(&ttl) {
        anyhow::bail!("session ttl out of range: {ttl}");
    }
    Ok(ttl)
}

/// Accepts `true/false`, `1/0`, `yes/no` (case-insensitive).
fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(anyhow::anyhow!("not a boolean: {other:?}")),
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_from_str_known() {
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert_eq!("file".parse::<StorageBackend>().unwrap(), StorageBackend::File);
        assert_eq!(
            "postgres".parse::<StorageBackend>().unwrap(),
            StorageBackend::Postgres
        );
    }

    #[test]
    fn storage_backend_unknown_errors() {
        let err = "redis".parse::<StorageBackend>().unwrap_err();
        assert!(err.to_string().contains("unknown storage backend"));
    }

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("YES").unwrap());
        assert!(parse_bool(" 1 ").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn session_ttl_must_be_positive_and_bounded() {
        assert_eq!(parse_session_ttl("86400").unwrap(), 86400);
        assert_eq!(parse_session_ttl(" 1 ").unwrap(), 1);
        assert!(parse_session_ttl("0").is_err());
        assert!(parse_session_ttl("-3600").is_err());
        assert!(parse_session_ttl("315360001").is_err());
        assert!(parse_session_ttl(&i64::MAX.to_string()).is_err());
        assert!(parse_session_ttl("soon").is_err());
    }
}
