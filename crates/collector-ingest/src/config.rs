//! Configuration management
//!
//! Two layers: a [`CollectorConfig`] per remote source, read from a TOML file
//! with `COLLECTOR_`-prefixed environment overrides, and [`IngestSettings`] per
//! deployment (profile, storage, ledger, event bus), read from the environment.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::storage::StorageConfig;
use crate::transport::RemoteTarget;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default FTP control port.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Default SSH port for SFTP.
pub const DEFAULT_SFTP_PORT: u16 = 22;

/// Default environment profile, the first segment of every destination key.
pub const DEFAULT_PROFILE: &str = "dev";

/// Default process-type tag written on audit records.
pub const DEFAULT_PROCESS_TYPE: &str = "COLLECTION";

/// Default event bus topic for ingestion events.
pub const DEFAULT_AUDIT_TOPIC: &str = "ingestion-audit";

/// Default remote directory walked when none is configured.
pub const DEFAULT_REMOTE_ROOT: &str = "/";

/// Default field delimiter recorded with each file.
pub const DEFAULT_DELIMITER: &str = ",";

/// Default JSON-lines ledger location when no database is configured.
pub const DEFAULT_LEDGER_PATH: &str = "audit/ingestion_audit.jsonl";

/// Default maximum database connections for the ledger pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Prefix for collector overrides in the environment, e.g. `COLLECTOR_HOST`.
pub const COLLECTOR_ENV_PREFIX: &str = "COLLECTOR_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Sftp,
}

impl Protocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ftp => DEFAULT_FTP_PORT,
            Protocol::Sftp => DEFAULT_SFTP_PORT,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Sftp => write!(f, "sftp"),
        }
    }
}

fn default_protocol() -> Protocol {
    Protocol::Ftp
}

fn default_remote_root() -> String {
    DEFAULT_REMOTE_ROOT.to_string()
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

fn default_process_type() -> String {
    DEFAULT_PROCESS_TYPE.to_string()
}

/// One remote source to ingest. Immutable for the duration of a run.
#[derive(Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Owning collector identifier, written on every audit record
    pub collector_id: String,

    #[serde(default = "default_protocol")]
    pub protocol: Protocol,

    pub host: String,

    /// Defaults to the protocol's well-known port
    #[serde(default)]
    pub port: Option<u16>,

    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    /// SFTP only: authenticate with this private key instead of a password
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    /// Accept a missing or empty password (anonymous FTP)
    #[serde(default)]
    pub allow_empty_password: bool,

    #[serde(default = "default_remote_root")]
    pub remote_root: String,

    /// Local directory mirroring the remote tree during a run
    pub staging_root: PathBuf,

    /// Tag for the kind of data this collector fetches; second key segment
    pub file_type: String,

    /// Field delimiter of the collected files; carried as metadata only
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    #[serde(default = "default_process_type")]
    pub process_type: String,
}

impl std::fmt::Debug for CollectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorConfig")
            .field("collector_id", &self.collector_id)
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key)
            .field("allow_empty_password", &self.allow_empty_password)
            .field("remote_root", &self.remote_root)
            .field("staging_root", &self.staging_root)
            .field("file_type", &self.file_type)
            .field("delimiter", &self.delimiter)
            .field("process_type", &self.process_type)
            .finish()
    }
}

impl CollectorConfig {
    /// Load from a TOML file, apply `COLLECTOR_*` overrides, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(IngestError::config(format!(
                "Collector configuration file not found: {}",
                path.display()
            )));
        }

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path))
                .merge(Env::prefixed(COLLECTOR_ENV_PREFIX)),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| IngestError::config(format!("Invalid collector configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.collector_id.trim().is_empty() {
            return Err(IngestError::config("collector_id cannot be empty"));
        }

        if self.host.trim().is_empty() {
            return Err(IngestError::config("host cannot be empty"));
        }

        if self.port == Some(0) {
            return Err(IngestError::config("port must be greater than 0"));
        }

        if self.username.trim().is_empty() {
            return Err(IngestError::config("username cannot be empty"));
        }

        let has_password = self.password.as_deref().is_some_and(|p| !p.is_empty());
        let has_key = self.private_key.is_some();
        if !has_password && !has_key && !self.allow_empty_password {
            return Err(IngestError::config(
                "password is required unless allow_empty_password is set or a private_key is given",
            ));
        }

        if has_key && self.protocol == Protocol::Ftp {
            return Err(IngestError::config("private_key is only supported with sftp"));
        }

        if self.remote_root.trim().is_empty() {
            return Err(IngestError::config("remote_root cannot be empty"));
        }

        if self.staging_root.as_os_str().is_empty() {
            return Err(IngestError::config("staging_root cannot be empty"));
        }

        if self.file_type.trim().is_empty() || self.file_type.contains('/') {
            return Err(IngestError::config("file_type must be a non-empty key segment without '/'"));
        }

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    pub fn target(&self) -> RemoteTarget {
        RemoteTarget {
            host: self.host.clone(),
            port: self.port(),
            username: self.username.clone(),
            password: self.password.clone(),
            private_key: self.private_key.clone(),
        }
    }
}

/// Where audit records are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerBackend {
    Postgres { url: String, max_connections: u32 },
    Jsonl { path: PathBuf },
    Memory,
}

/// Where ingestion events go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBusBackend {
    Http { base_url: String },
    Log,
}

/// Deployment-wide settings shared by every collector run
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Environment profile, first segment of destination keys
    pub profile: String,

    pub storage: StorageConfig,

    pub ledger: LedgerBackend,

    pub events: EventBusBackend,

    /// Remove staged files after a clean run
    pub purge_staging: bool,
}

impl IngestSettings {
    /// Load settings from `.env` and the process environment
    ///
    /// - `INGEST_PROFILE` (default `dev`)
    /// - `INGEST_PURGE_STAGING` (default `false`)
    /// - `AUDIT_LEDGER`: `postgres` | `jsonl` | `memory`; defaults to `postgres`
    ///   when `DATABASE_URL` is set, `jsonl` otherwise
    /// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `AUDIT_LEDGER_PATH`
    /// - `EVENT_BUS_URL`: HTTP event bus base URL; events are logged when unset
    /// - `S3_*`: see [`StorageConfig::from_env`]
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let storage = StorageConfig::from_env().map_err(|e| IngestError::config(e.to_string()))?;

        let database_url = env_non_empty("DATABASE_URL");
        let backend = env_non_empty("AUDIT_LEDGER").unwrap_or_else(|| {
            if database_url.is_some() {
                "postgres".to_string()
            } else {
                "jsonl".to_string()
            }
        });

        let ledger = match backend.to_ascii_lowercase().as_str() {
            "postgres" => LedgerBackend::Postgres {
                url: database_url.ok_or_else(|| IngestError::config("AUDIT_LEDGER=postgres requires DATABASE_URL"))?,
                max_connections: env_non_empty("DATABASE_MAX_CONNECTIONS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
            },
            "jsonl" => LedgerBackend::Jsonl {
                path: env_non_empty("AUDIT_LEDGER_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_PATH)),
            },
            "memory" => LedgerBackend::Memory,
            other => return Err(IngestError::config(format!("Unknown AUDIT_LEDGER backend: {}", other))),
        };

        let events = match env_non_empty("EVENT_BUS_URL") {
            Some(base_url) => EventBusBackend::Http { base_url },
            None => EventBusBackend::Log,
        };

        let settings = Self {
            profile: env_non_empty("INGEST_PROFILE").unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            storage,
            ledger,
            events,
            purge_staging: env_non_empty("INGEST_PURGE_STAGING")
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.profile.trim().is_empty() || self.profile.contains('/') {
            return Err(IngestError::config("profile must be a non-empty key segment without '/'"));
        }
        if self.storage.bucket.is_empty() {
            return Err(IngestError::config("S3 bucket cannot be empty"));
        }
        if let LedgerBackend::Postgres { max_connections: 0, .. } = self.ledger {
            return Err(IngestError::config("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }
        Ok(())
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const SAMPLE: &str = r#"
collector_id = "pm-collector-01"
protocol = "sftp"
host = "10.0.0.5"
username = "collector"
password = "secret"
remote_root = "/export/pm"
staging_root = "/var/lib/collector/staging"
file_type = "PM"
delimiter = ";"
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn minimal() -> CollectorConfig {
        CollectorConfig {
            collector_id: "c1".into(),
            protocol: Protocol::Ftp,
            host: "localhost".into(),
            port: None,
            username: "anonymous".into(),
            password: None,
            private_key: None,
            allow_empty_password: false,
            remote_root: "/".into(),
            staging_root: PathBuf::from("/tmp/stage"),
            file_type: "CM".into(),
            delimiter: ",".into(),
            process_type: DEFAULT_PROCESS_TYPE.into(),
        }
    }

    #[test]
    #[serial]
    fn test_load_toml_with_defaults() {
        let file = write_config(SAMPLE);
        let config = CollectorConfig::load(file.path()).unwrap();

        assert_eq!(config.collector_id, "pm-collector-01");
        assert_eq!(config.protocol, Protocol::Sftp);
        assert_eq!(config.port(), DEFAULT_SFTP_PORT);
        assert_eq!(config.delimiter, ";");
        assert_eq!(config.process_type, DEFAULT_PROCESS_TYPE);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let file = write_config(SAMPLE);
        std::env::set_var("COLLECTOR_HOST", "10.9.9.9");
        std::env::set_var("COLLECTOR_PORT", "2222");
        let config = CollectorConfig::load(file.path());
        std::env::remove_var("COLLECTOR_HOST");
        std::env::remove_var("COLLECTOR_PORT");

        let config = config.unwrap();
        assert_eq!(config.host, "10.9.9.9");
        assert_eq!(config.port(), 2222);
    }

    #[test]
    #[serial]
    fn test_missing_file_is_config_error() {
        let err = CollectorConfig::load("/nonexistent/collector.toml").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_password_required_unless_allowed() {
        let mut config = minimal();
        assert!(config.validate().is_err());

        config.allow_empty_password = true;
        assert!(config.validate().is_ok());
        assert_eq!(config.port(), DEFAULT_FTP_PORT);
    }

    #[test]
    fn test_private_key_requires_sftp() {
        let mut config = minimal();
        config.private_key = Some(PathBuf::from("/home/c/.ssh/id_ed25519"));
        assert!(config.validate().is_err());

        config.protocol = Protocol::Sftp;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_type_must_be_single_segment() {
        let mut config = minimal();
        config.allow_empty_password = true;
        config.file_type = "PM/raw".into();
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_debug_hides_password() {
        let mut config = minimal();
        config.password = Some("hunter2".into());
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    const SETTINGS_VARS: &[&str] = &[
        "INGEST_PROFILE",
        "INGEST_PURGE_STAGING",
        "AUDIT_LEDGER",
        "AUDIT_LEDGER_PATH",
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "EVENT_BUS_URL",
        "S3_ACCESS_KEY",
        "S3_SECRET_KEY",
    ];

    fn reset_settings_env() {
        for var in SETTINGS_VARS {
            std::env::remove_var(var);
        }
        std::env::set_var("S3_ACCESS_KEY", "key");
        std::env::set_var("S3_SECRET_KEY", "secret");
    }

    #[test]
    #[serial]
    fn test_settings_defaults() {
        reset_settings_env();
        let settings = IngestSettings::from_env().unwrap();

        assert_eq!(settings.profile, DEFAULT_PROFILE);
        assert_eq!(
            settings.ledger,
            LedgerBackend::Jsonl {
                path: PathBuf::from(DEFAULT_LEDGER_PATH)
            }
        );
        assert_eq!(settings.events, EventBusBackend::Log);
        assert!(!settings.purge_staging);
    }

    #[test]
    #[serial]
    fn test_settings_database_url_selects_postgres() {
        reset_settings_env();
        std::env::set_var("DATABASE_URL", "postgresql://localhost/collector");
        std::env::set_var("EVENT_BUS_URL", "http://bus:8080");
        std::env::set_var("INGEST_PROFILE", "prod");
        std::env::set_var("INGEST_PURGE_STAGING", "true");

        let settings = IngestSettings::from_env().unwrap();
        reset_settings_env();

        assert_eq!(
            settings.ledger,
            LedgerBackend::Postgres {
                url: "postgresql://localhost/collector".into(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS
            }
        );
        assert_eq!(
            settings.events,
            EventBusBackend::Http {
                base_url: "http://bus:8080".into()
            }
        );
        assert_eq!(settings.profile, "prod");
        assert!(settings.purge_staging);
    }

    #[test]
    #[serial]
    fn test_settings_unknown_ledger_rejected() {
        reset_settings_env();
        std::env::set_var("AUDIT_LEDGER", "redis");
        let result = IngestSettings::from_env();
        reset_settings_env();
        assert!(matches!(result, Err(IngestError::Config(_))));
    }
}
