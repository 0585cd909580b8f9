//! Provisioning configuration
//!
//! Credentials come either from a YAML file named by `MONGO_INIT_CONFIG` or
//! from environment variables. Nothing is hard-coded except defaults for
//! non-secret values.

use crate::provision::grant::{
    DatabaseName, GrantError, ProvisionPlan, ProvisionStep, RoleGrant, StepKind, UserSpec,
};
use common::ConfigExt;
use serde::Deserialize;
use std::fmt;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 27017;
pub const DEFAULT_SHELL: &str = "mongosh";
pub const DEFAULT_ADMIN_DB: &str = "admin";
pub const DEFAULT_ADMIN_ROLE: &str = "root";
pub const DEFAULT_APP_DB: &str = "binge_buddy_db";
pub const DEFAULT_APP_ROLE: &str = "readWrite";
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_READY_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(transparent)]
    InvalidDatabaseName(#[from] GrantError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// What to do when a user to be created already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingUserPolicy {
    /// Replace password and roles; repeated runs converge on the same users.
    #[default]
    Update,
    /// Abort the run before touching anything.
    Fail,
}

impl FromStr for ExistingUserPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "update" => Ok(Self::Update),
            "fail" => Ok(Self::Fail),
            other => Err(ConfigError::Invalid {
                name: "MONGO_INIT_ON_EXISTING_USER",
                reason: format!("expected 'update' or 'fail', got '{}'", other),
            }),
        }
    }
}

/// Credentials for the bootstrap session itself.
#[derive(Clone)]
pub struct AuthConfig {
    pub user: String,
    pub password: String,
    pub database: DatabaseName,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// How to reach the server.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub shell: String,
    pub auth: Option<AuthConfig>,
}

impl ConnectionConfig {
    /// Connection string handed to the shell. Never carries credentials.
    pub fn uri(&self) -> String {
        format!(
            "mongodb://{}:{}/admin?directConnection=true&serverSelectionTimeoutMS=5000",
            self.host, self.port
        )
    }

    /// `host:port`, for logs.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One user to provision, before validation.
#[derive(Clone)]
pub struct UserConfig {
    pub user: String,
    pub password: String,
    pub database: String,
    pub role: String,
}

impl fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("role", &self.role)
            .finish()
    }
}

/// Complete configuration of a provisioning run.
#[derive(Debug)]
pub struct ProvisionConfig {
    pub connection: ConnectionConfig,
    pub admin: UserConfig,
    pub application: UserConfig,
    pub on_existing_user: ExistingUserPolicy,
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
    pub marker: Option<PathBuf>,
}

impl ProvisionConfig {
    /// Load from `MONGO_INIT_CONFIG` if set, else from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        match String::env_optional("MONGO_INIT_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Self::from_env(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let admin_user =
            String::env_optional("MONGO_INIT_ADMIN_USER").ok_or(ConfigError::Missing("MONGO_INIT_ADMIN_USER"))?;
        let admin_pass = String::env_optional("MONGO_INIT_ADMIN_PASSWORD")
            .ok_or(ConfigError::Missing("MONGO_INIT_ADMIN_PASSWORD"))?;

        let auth = match (
            String::env_optional("MONGO_INIT_AUTH_USER"),
            String::env_optional("MONGO_INIT_AUTH_PASSWORD"),
        ) {
            (Some(user), Some(password)) => Some(AuthConfig {
                user,
                password,
                database: DatabaseName::new(String::env_or("MONGO_INIT_AUTH_DB", DEFAULT_ADMIN_DB))?,
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    name: "MONGO_INIT_AUTH_USER",
                    reason: "MONGO_INIT_AUTH_USER and MONGO_INIT_AUTH_PASSWORD must be set together"
                        .to_string(),
                })
            }
        };

        let on_existing_user = match String::env_optional("MONGO_INIT_ON_EXISTING_USER") {
            Some(v) => v.parse()?,
            None => ExistingUserPolicy::default(),
        };

        Ok(Self {
            connection: ConnectionConfig {
                host: String::env_or("MONGO_HOST", DEFAULT_HOST),
                port: env_number("MONGO_PORT", DEFAULT_PORT)?,
                shell: String::env_or("MONGOSH_BIN", DEFAULT_SHELL),
                auth,
            },
            application: UserConfig {
                user: String::env_optional("MONGO_INIT_APP_USER").unwrap_or_else(|| admin_user.clone()),
                password: String::env_optional("MONGO_INIT_APP_PASSWORD")
                    .unwrap_or_else(|| admin_pass.clone()),
                database: String::env_or("MONGO_DB_NAME", DEFAULT_APP_DB),
                role: String::env_or("MONGO_INIT_APP_ROLE", DEFAULT_APP_ROLE),
            },
            admin: UserConfig {
                user: admin_user,
                password: admin_pass,
                database: String::env_or("MONGO_INIT_ADMIN_DB", DEFAULT_ADMIN_DB),
                role: String::env_or("MONGO_INIT_ADMIN_ROLE", DEFAULT_ADMIN_ROLE),
            },
            on_existing_user,
            ready_timeout: Duration::from_secs(env_number(
                "MONGO_INIT_READY_TIMEOUT",
                DEFAULT_READY_TIMEOUT_SECS,
            )?),
            ready_interval: Duration::from_secs(env_number(
                "MONGO_INIT_READY_INTERVAL",
                DEFAULT_READY_INTERVAL_SECS,
            )?),
            marker: String::env_optional("MONGO_INIT_MARKER").map(PathBuf::from),
        })
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        file.into_config()
    }

    /// Validate names and scopes and build the two-step plan.
    pub fn plan(&self) -> Result<ProvisionPlan, ConfigError> {
        let admin = self.admin.step(StepKind::Admin, "admin")?;
        let application = self.application.step(StepKind::Application, "application")?;
        Ok(ProvisionPlan::new(admin, application)?)
    }
}

fn env_number<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = ParseIntError>,
{
    T::env_parse(name, default).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

impl UserConfig {
    fn step(&self, kind: StepKind, section: &'static str) -> Result<ProvisionStep, ConfigError> {
        if self.user.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: section,
                reason: "user name must not be empty".to_string(),
            });
        }
        if self.password.is_empty() {
            return Err(ConfigError::Invalid {
                name: section,
                reason: "password must not be empty".to_string(),
            });
        }
        if self.role.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: section,
                reason: "role must not be empty".to_string(),
            });
        }

        let database = DatabaseName::new(self.database.clone())?;
        let user = UserSpec::new(
            self.user.clone(),
            self.password.clone(),
            vec![RoleGrant::new(self.role.clone(), database.clone())],
        );
        Ok(ProvisionStep::new(kind, database, user)?)
    }
}

/// On-disk layout of the YAML config file.
#[derive(Deserialize)]
struct FileConfig {
    #[serde(default)]
    connection: FileConnection,
    admin: FileUser,
    application: FileUser,
    #[serde(default)]
    on_existing_user: ExistingUserPolicy,
    #[serde(default)]
    ready_timeout_secs: Option<u64>,
    #[serde(default)]
    ready_interval_secs: Option<u64>,
    #[serde(default)]
    marker: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct FileConnection {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    shell: Option<String>,
    #[serde(default)]
    auth: Option<FileAuth>,
}

#[derive(Deserialize)]
struct FileAuth {
    username: String,
    password: String,
    #[serde(default)]
    database: Option<String>,
}

#[derive(Deserialize)]
struct FileUser {
    username: String,
    password: String,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

impl FileConfig {
    fn into_config(self) -> Result<ProvisionConfig, ConfigError> {
        let auth = match self.connection.auth {
            Some(a) => Some(AuthConfig {
                user: a.username,
                password: a.password,
                database: DatabaseName::new(a.database.unwrap_or_else(|| DEFAULT_ADMIN_DB.to_string()))?,
            }),
            None => None,
        };

        Ok(ProvisionConfig {
            connection: ConnectionConfig {
                host: self.connection.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: self.connection.port.unwrap_or(DEFAULT_PORT),
                shell: self.connection.shell.unwrap_or_else(|| DEFAULT_SHELL.to_string()),
                auth,
            },
            admin: self.admin.into_user(DEFAULT_ADMIN_DB, DEFAULT_ADMIN_ROLE),
            application: self.application.into_user(DEFAULT_APP_DB, DEFAULT_APP_ROLE),
            on_existing_user: self.on_existing_user,
            ready_timeout: Duration::from_secs(self.ready_timeout_secs.unwrap_or(DEFAULT_READY_TIMEOUT_SECS)),
            ready_interval: Duration::from_secs(
                self.ready_interval_secs.unwrap_or(DEFAULT_READY_INTERVAL_SECS),
            ),
            marker: self.marker,
        })
    }
}

impl FileUser {
    fn into_user(self, default_db: &str, default_role: &str) -> UserConfig {
        UserConfig {
            user: self.username,
            password: self.password,
            database: self.database.unwrap_or_else(|| default_db.to_string()),
            role: self.role.unwrap_or_else(|| default_role.to_string()),
        }
    }
}
