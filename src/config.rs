//! Connection configuration.
//!
//! Loads a `relq.toml` describing named connections:
//!
//! ```toml
//! default = "main"
//!
//! [connections.main]
//! driver = "sqlite"
//! database = "./app.db"
//!
//! [connections.reporting]
//! driver = "postgres"
//! host = "db.internal"
//! database = "reports"
//! username = "app"
//! ```

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use relq_core::{Dialect, RelqError};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "relq.toml";

// ============================================================================
// Connection
// ============================================================================

/// Settings for one logical connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub driver: Dialect,

    /// Database name, or a file path / `:memory:` for SQLite.
    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default, alias = "user")]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub sslmode: Option<String>,

    /// A full connection string; wins over the individual fields.
    #[serde(default)]
    pub url: Option<String>,

    /// Overrides whether nested commits issue `RELEASE SAVEPOINT`.
    #[serde(default)]
    pub release_savepoints: Option<bool>,
}

impl ConnectionConfig {
    pub fn sqlite(database: impl Into<String>) -> Self {
        Self {
            driver: Dialect::SQLite,
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn sqlite_memory() -> Self {
        Self::sqlite(":memory:")
    }

    #[inline]
    pub fn dialect(&self) -> Dialect {
        self.driver
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.driver {
            Dialect::PostgreSQL => 5432,
            Dialect::MySQL => 3306,
            Dialect::SQLite => 0,
        })
    }

    pub fn release_savepoints(&self) -> bool {
        self.release_savepoints
            .unwrap_or_else(|| self.driver.supports_savepoint_release())
    }

    /// Dialect-specific connection string.
    pub fn dsn(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match self.driver {
            Dialect::SQLite => {
                if self.database.is_empty() {
                    ":memory:".to_string()
                } else {
                    self.database.clone()
                }
            }
            Dialect::PostgreSQL => {
                let mut parts = vec![
                    format!("host={}", self.host()),
                    format!("port={}", self.port()),
                ];
                if let Some(user) = &self.username {
                    parts.push(format!("user={user}"));
                }
                if let Some(password) = &self.password {
                    parts.push(format!("password={password}"));
                }
                if !self.database.is_empty() {
                    parts.push(format!("dbname={}", self.database));
                }
                if let Some(mode) = &self.sslmode {
                    parts.push(format!("sslmode={mode}"));
                }
                parts.join(" ")
            }
            Dialect::MySQL => {
                let auth = match (&self.username, &self.password) {
                    (Some(u), Some(p)) => format!("{u}:{p}@"),
                    (Some(u), None) => format!("{u}@"),
                    _ => String::new(),
                };
                format!(
                    "mysql://{auth}{}:{}/{}",
                    self.host(),
                    self.port(),
                    self.database
                )
            }
        }
    }

    fn validate(&self, name: &str) -> Result<(), Error> {
        let err = |msg: &str| Error::Invalid {
            connection: name.to_string(),
            reason: msg.to_string(),
        };
        match (self.driver, &self.url) {
            (Dialect::PostgreSQL, Some(url))
                if !url.starts_with("postgres") && !url.contains("host=") =>
            {
                Err(err("PostgreSQL URL must start with postgres:// or be a key=value string"))
            }
            (Dialect::MySQL, Some(url)) if !url.starts_with("mysql://") => {
                Err(err("MySQL URL must start with mysql://"))
            }
            (Dialect::PostgreSQL | Dialect::MySQL, None) if self.database.is_empty() => {
                Err(err("database is required"))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Every named connection plus the one used when none is named.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_connection")]
    pub default: String,

    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

fn default_connection() -> String {
    "main".to_string()
}

impl DatabaseConfig {
    /// Single-connection configuration named `main`.
    pub fn single(config: ConnectionConfig) -> Self {
        let mut connections = HashMap::new();
        connections.insert(default_connection(), config);
        Self {
            default: default_connection(),
            connections,
        }
    }

    /// Load from the default config file.
    pub fn load() -> Result<Self, Error> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.into())
            } else {
                Error::Io(path.into(), e)
            }
        })?;
        let config: Self =
            toml::from_str(&content).map_err(|e| Error::Parse(path.into(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Parse(PathBuf::from("<string>"), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.connections.is_empty() && !self.connections.contains_key(&self.default) {
            return Err(Error::MissingDefault(self.default.clone()));
        }
        for (name, connection) in &self.connections {
            connection.validate(name)?;
        }
        Ok(())
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.get(name)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("default connection '{0}' is not configured")]
    MissingDefault(String),

    #[error("invalid connection '{connection}': {reason}")]
    Invalid { connection: String, reason: String },
}

pub type ConfigError = Error;

impl From<Error> for RelqError {
    fn from(err: Error) -> Self {
        RelqError::Config(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
