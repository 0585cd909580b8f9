//! Environment variable parsing helpers
//!
//! Container init scripts receive all of their settings through the
//! environment, so every component reads configuration through these helpers.

use std::env;
use std::str::FromStr;

/// Extension trait for reading environment variables.
///
/// Blanket-implemented for every type so call sites read as
/// `String::env_or(..)` or `u64::env_parse(..)`.
pub trait ConfigExt {
    /// Get an environment variable with a default value.
    ///
    /// # Example
    /// ```ignore
    /// let host = String::env_or("MONGO_HOST", "localhost");
    /// ```
    fn env_or(name: &str, default: &str) -> String {
        env::var(name).unwrap_or_else(|_| default.to_string())
    }

    /// Get an environment variable, treating unset and empty the same way.
    fn env_optional(name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Get an environment variable parsed as a specific type.
    ///
    /// Returns `default` if the variable is unset or blank. A value that does
    /// not parse is an error, never a silent fallback.
    ///
    /// # Example
    /// ```ignore
    /// let port: u16 = u16::env_parse("MONGO_PORT", 27017)?;
    /// ```
    fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, T::Err> {
        match String::env_optional(name) {
            Some(value) => value.trim().parse(),
            None => Ok(default),
        }
    }
}

impl<T> ConfigExt for T {}

/// Accessors for the container environment the init program runs in.
pub struct ContainerEnv;

impl ContainerEnv {
    /// Name of this container, used to tag log lines and telemetry.
    pub fn hostname() -> String {
        env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
    }

    /// Collector URL for lifecycle telemetry, if one is configured.
    pub fn telemetry_url() -> Option<String> {
        String::env_optional("MONGO_INIT_TELEMETRY_URL")
    }

    /// Whether logs should be emitted as JSON lines.
    pub fn json_logs() -> bool {
        String::env_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json")
    }
}
